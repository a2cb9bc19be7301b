// Document ID Generator - Snowflake-like IDs
// 64-bit ID format: [timestamp:42][node_id:10][sequence:12]

use std::sync::Mutex;

use super::ids::DocumentId;

/// Allows 1024 nodes and 4096 IDs per millisecond per node.
#[derive(Debug)]
pub struct DocumentIdGenerator {
    node_id: u16,
    // (last_timestamp, next_sequence)
    state: Mutex<(u64, u64)>,
}

impl DocumentIdGenerator {
    /// Create new ID generator for the given node. Returns `None` when the
    /// node id does not fit in 10 bits.
    pub fn new(node_id: u16) -> Option<Self> {
        if node_id >= 1024 {
            return None;
        }

        Some(Self {
            node_id,
            state: Mutex::new((0, 0)),
        })
    }

    /// Generate next unique ID
    pub fn next_id(&self) -> DocumentId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut now = current_millis();
        if now < state.0 {
            // Clock went backwards; keep issuing from the last seen millisecond
            now = state.0;
        }

        if now == state.0 {
            if state.1 >= 4096 {
                // Sequence exhausted - spin to the next millisecond
                while now <= state.0 {
                    std::hint::spin_loop();
                    now = current_millis();
                }
                state.0 = now;
                state.1 = 0;
            }
        } else {
            state.0 = now;
            state.1 = 0;
        }

        let sequence = state.1;
        state.1 += 1;

        let id = ((now & 0x3FFFFFFFFFF) << 22) |    // 42 bits timestamp
                 ((self.node_id as u64) << 12) |    // 10 bits node_id
                 (sequence & 0xFFF); // 12 bits sequence

        DocumentId(id as i64)
    }

    /// Extract node ID from a generated ID
    pub fn extract_node_id(id: DocumentId) -> u16 {
        ((id.0 as u64) >> 12 & 0x3FF) as u16
    }

    /// Extract sequence from a generated ID
    pub fn extract_sequence(id: DocumentId) -> u16 {
        ((id.0 as u64) & 0xFFF) as u16
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }
}

fn current_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_generation() {
        let generator = DocumentIdGenerator::new(123).unwrap();

        let id1 = generator.next_id();
        let id2 = generator.next_id();
        let id3 = generator.next_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);

        assert_eq!(DocumentIdGenerator::extract_node_id(id1), 123);
        assert_eq!(DocumentIdGenerator::extract_node_id(id2), 123);
        assert_eq!(DocumentIdGenerator::extract_node_id(id3), 123);

        // Monotonic within a node
        assert!(id1 < id2);
        assert!(id2 < id3);
    }

    #[test]
    fn test_rejects_out_of_range_node() {
        assert!(DocumentIdGenerator::new(1024).is_none());
        assert_eq!(DocumentIdGenerator::new(1023).unwrap().node_id(), 1023);
    }

    #[test]
    fn test_unique_across_sequence_rollover() {
        let generator = DocumentIdGenerator::new(7).unwrap();
        let ids: HashSet<DocumentId> = (0..10_000).map(|_| generator.next_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
