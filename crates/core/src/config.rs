//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Chunk size in bytes, fixed per deployment.
    /// Every chunk except the last must be exactly this size; uploads larger
    /// than this are rejected by the transport.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            chunk_size: default_chunk_size(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Validate the chunk size against the supported bounds.
    pub fn validate(&self) -> crate::Result<()> {
        if !(crate::MIN_CHUNK_SIZE..=crate::MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(crate::Error::InvalidChunkSize {
                size: self.chunk_size,
                min: crate::MIN_CHUNK_SIZE,
                max: crate::MAX_CHUNK_SIZE,
            });
        }
        Ok(())
    }
}

/// Chunk storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for chunk files. Each upload gets `{chunk_root}/{token}/`.
    #[serde(default = "default_chunk_root")]
    pub chunk_root: PathBuf,
}

fn default_chunk_root() -> PathBuf {
    PathBuf::from("./data/chunks")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_root: default_chunk_root(),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Busy timeout in seconds for concurrent writers.
        #[serde(default = "default_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/uploads.db"),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

/// How chunk files are concatenated.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CombineStrategy {
    /// Native streaming copy.
    #[default]
    Streaming,
    /// Shell out to `cat`.
    Cat,
}

/// Which time budget a combine runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CombineMode {
    /// A web request is waiting for the result.
    Interactive,
    /// Running outside a request (CLI or worker).
    Background,
}

/// Combine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CombineConfig {
    #[serde(default)]
    pub strategy: CombineStrategy,
    /// Time budget when a request is waiting (default: 60s).
    #[serde(default = "default_interactive_timeout_secs")]
    pub interactive_timeout_secs: u64,
    /// Time budget for background finalization (default: 240s).
    #[serde(default = "default_background_timeout_secs")]
    pub background_timeout_secs: u64,
}

fn default_interactive_timeout_secs() -> u64 {
    60
}

fn default_background_timeout_secs() -> u64 {
    240
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            strategy: CombineStrategy::default(),
            interactive_timeout_secs: default_interactive_timeout_secs(),
            background_timeout_secs: default_background_timeout_secs(),
        }
    }
}

impl CombineConfig {
    /// Get the timeout for a combine mode.
    pub fn timeout(&self, mode: CombineMode) -> Duration {
        match mode {
            CombineMode::Interactive => Duration::from_secs(self.interactive_timeout_secs),
            CombineMode::Background => Duration::from_secs(self.background_timeout_secs),
        }
    }

    /// Validate timeout budgets.
    pub fn validate(&self) -> Result<(), String> {
        if self.interactive_timeout_secs == 0 || self.background_timeout_secs == 0 {
            return Err("combine timeouts must be at least 1 second".to_string());
        }
        Ok(())
    }
}

/// A directory-backed upload handler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Name clients pass as `handler` at init.
    pub name: String,
    /// Directory the combined files are written to.
    pub directory: PathBuf,
    /// Maximum accepted file size in bytes.
    #[serde(default)]
    pub max_size: Option<u64>,
    /// Accepted MIME types; empty accepts all.
    #[serde(default)]
    pub allowed_mime_types: Vec<String>,
    /// Accepted extensions without the dot, compared case-insensitively;
    /// empty accepts all.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub combine: CombineConfig,
    /// Upload handler policies.
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate().map_err(|e| e.to_string())?;
        self.combine.validate()?;

        if self.handlers.is_empty() {
            return Err("no upload handlers defined".to_string());
        }
        let mut names = std::collections::HashSet::new();
        for handler in &self.handlers {
            if handler.name.trim().is_empty() {
                return Err("handler name must not be empty".to_string());
            }
            if !names.insert(handler.name.as_str()) {
                return Err(format!("duplicate handler name: {}", handler.name));
            }
        }
        Ok(())
    }

    /// Create a test configuration rooted in `dir`.
    ///
    /// **For testing only.** Uses SQLite and filesystem storage under `dir`
    /// and a single `default` handler writing to `dir/files`.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig {
                chunk_root: dir.join("chunks"),
            },
            metadata: MetadataConfig::Sqlite {
                path: dir.join("uploads.db"),
                busy_timeout_secs: default_busy_timeout_secs(),
            },
            combine: CombineConfig::default(),
            handlers: vec![HandlerConfig {
                name: "default".to_string(),
                directory: dir.join("files"),
                max_size: None,
                allowed_mime_types: Vec::new(),
                allowed_extensions: Vec::new(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_timeouts_by_mode() {
        let config = CombineConfig::default();
        assert_eq!(
            config.timeout(CombineMode::Interactive),
            Duration::from_secs(60)
        );
        assert_eq!(
            config.timeout(CombineMode::Background),
            Duration::from_secs(240)
        );
    }

    #[test]
    fn test_combine_config_deserialize_defaults() {
        let config: CombineConfig = serde_json::from_str(r#"{"strategy":"cat"}"#).unwrap();
        assert_eq!(config.strategy, CombineStrategy::Cat);
        assert_eq!(config.interactive_timeout_secs, 60);
        assert_eq!(config.background_timeout_secs, 240);

        let zero = CombineConfig {
            interactive_timeout_secs: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_server_config_chunk_size_bounds() {
        assert!(ServerConfig::default().validate().is_ok());

        let tiny = ServerConfig {
            chunk_size: 1,
            ..Default::default()
        };
        assert!(tiny.validate().is_err());

        let huge = ServerConfig {
            chunk_size: crate::MAX_CHUNK_SIZE + 1,
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_metadata_config_tagged() {
        let json = r#"{"type":"sqlite","path":"/tmp/u.db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        let MetadataConfig::Sqlite {
            path,
            busy_timeout_secs,
        } = config;
        assert_eq!(path, PathBuf::from("/tmp/u.db"));
        assert_eq!(busy_timeout_secs, 5);
    }

    #[test]
    fn test_app_config_requires_handlers() {
        let dir = std::path::Path::new("/tmp/quilt");
        let mut config = AppConfig::for_testing(dir);
        assert!(config.validate().is_ok());

        config.handlers.push(config.handlers[0].clone());
        assert!(config.validate().unwrap_err().contains("duplicate"));

        config.handlers.clear();
        assert!(config.validate().unwrap_err().contains("no upload handlers"));
    }

    #[test]
    fn test_handler_config_deserialize() {
        let json = r#"{"name":"avatars","directory":"/srv/avatars","allowed_extensions":["png"]}"#;
        let handler: HandlerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(handler.name, "avatars");
        assert!(handler.max_size.is_none());
        assert!(handler.allowed_mime_types.is_empty());
        assert_eq!(handler.allowed_extensions, vec!["png".to_string()]);
    }
}
