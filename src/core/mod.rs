// Core types and primitives

pub mod id_generator;
pub mod ids;

pub use id_generator::DocumentIdGenerator;
pub use ids::DocumentId;
