use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub graph: GraphConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin. Permissive when unset.
    pub frontend_origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Node id embedded in generated document ids (0..1024).
    pub id_node: u16,
    pub cascade_mode: CascadeMode,
}

/// How a post delete propagates to comments and back-references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    /// Post first, then each back-link and comment in turn; failures after the
    /// post delete surface as a partial cascade.
    Staged,
    /// The post delete and the whole cascade commit or roll back together.
    #[default]
    Transactional,
}

impl FromStr for CascadeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staged" => Ok(CascadeMode::Staged),
            "transactional" => Ok(CascadeMode::Transactional),
            other => Err(format!("unknown cascade mode '{}'", other)),
        }
    }
}

impl fmt::Display for CascadeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeMode::Staged => write!(f, "staged"),
            CascadeMode::Transactional => write!(f, "transactional"),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let id_node: u16 = env::var("ID_NODE")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);
        if id_node >= 1024 {
            anyhow::bail!("ID_NODE must be below 1024, got {}", id_node);
        }

        let cascade_mode = match env::var("CASCADE_MODE") {
            Ok(raw) => raw.parse::<CascadeMode>().map_err(anyhow::Error::msg)?,
            Err(_) => CascadeMode::default(),
        };

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/post_graph.db".to_string()),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST")
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                frontend_origin: env::var("FRONTEND_BASE_URL").ok().filter(|v| !v.is_empty()),
            },
            graph: GraphConfig {
                id_node,
                cascade_mode,
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
