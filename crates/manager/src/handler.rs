//! Upload handler policies.
//!
//! A handler decides whether an upload may start, what payload is stored
//! with it, where the combined file goes, and what the client receives once
//! the upload is finalized. The policy is chosen at init and carried on the
//! record by name.

use async_trait::async_trait;
use quilt_core::UploadRecord;
use quilt_core::config::HandlerConfig;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors raised by handler policies.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// A named upload policy.
#[async_trait]
pub trait UploadHandler: Send + Sync + 'static {
    /// Registry key, stored on every record this handler admits.
    fn name(&self) -> &str;

    /// Accept or reject an upload before a token is issued.
    async fn validate(&self, record: &UploadRecord, payload: &Value) -> Result<(), HandlerError>;

    /// Produce the payload persisted with the record.
    async fn payload(&self, record: &UploadRecord, payload: Value) -> Value;

    /// Final path of the combined file.
    fn destination(&self, record: &UploadRecord) -> PathBuf;

    /// Build the completion result once the file is in place.
    async fn completed(&self, record: &UploadRecord, path: &Path) -> Result<Value, HandlerError>;
}

/// Handlers by name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn UploadHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with one [`DirectoryHandler`] per config entry.
    pub fn from_config(configs: &[HandlerConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Arc::new(DirectoryHandler::from_config(config)));
        }
        registry
    }

    /// Register a handler under its name, returning any handler it replaced.
    pub fn register(&mut self, handler: Arc<dyn UploadHandler>) -> Option<Arc<dyn UploadHandler>> {
        self.handlers.insert(handler.name().to_string(), handler)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UploadHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Stores completed files as `{directory}/{token}.{extension}`.
#[derive(Clone, Debug)]
pub struct DirectoryHandler {
    name: String,
    directory: PathBuf,
    max_size: Option<u64>,
    allowed_mime_types: Vec<String>,
    allowed_extensions: Vec<String>,
}

impl DirectoryHandler {
    /// Create a handler with no size, type or extension limits.
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            max_size: None,
            allowed_mime_types: Vec::new(),
            allowed_extensions: Vec::new(),
        }
    }

    pub fn from_config(config: &HandlerConfig) -> Self {
        Self {
            name: config.name.clone(),
            directory: config.directory.clone(),
            max_size: config.max_size,
            allowed_mime_types: config
                .allowed_mime_types
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl UploadHandler for DirectoryHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, record: &UploadRecord, payload: &Value) -> Result<(), HandlerError> {
        if let Some(max) = self.max_size
            && record.declared_size > max
        {
            return Err(HandlerError::Rejected(format!(
                "file size {} exceeds the {max} byte limit",
                record.declared_size
            )));
        }

        if !self.allowed_mime_types.is_empty()
            && !self
                .allowed_mime_types
                .contains(&record.mime_type.to_ascii_lowercase())
        {
            return Err(HandlerError::Rejected(format!(
                "type {} is not accepted",
                record.mime_type
            )));
        }

        if !self.allowed_extensions.is_empty()
            && !self
                .allowed_extensions
                .contains(&record.extension.to_ascii_lowercase())
        {
            return Err(HandlerError::Rejected(format!(
                "extension '{}' is not accepted",
                record.extension
            )));
        }

        match payload {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(HandlerError::Rejected(
                "payload must be a JSON object".to_string(),
            )),
        }
    }

    async fn payload(&self, _record: &UploadRecord, payload: Value) -> Value {
        match payload {
            Value::Null => json!({}),
            other => other,
        }
    }

    fn destination(&self, record: &UploadRecord) -> PathBuf {
        let token = record.token.as_str();
        if record.extension.is_empty() {
            self.directory.join(token)
        } else {
            self.directory.join(format!("{token}.{}", record.extension))
        }
    }

    #[instrument(skip(self, record), fields(handler = %self.name, token = ?record.token))]
    async fn completed(&self, record: &UploadRecord, path: &Path) -> Result<Value, HandlerError> {
        let size = tokio::fs::metadata(path).await?.len();
        tracing::info!(path = %path.display(), size, "Upload stored");

        Ok(json!({
            "success": true,
            "token": record.token.as_str(),
            "path": path.display().to_string(),
            "size": size,
            "name": record.original_name,
            "payload": record.payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quilt_core::{InitUpload, UploadToken};

    fn record(name: &str, mime: &str, size: u64) -> UploadRecord {
        UploadRecord::new(
            UploadToken::generate(),
            "docs",
            &InitUpload {
                size,
                name: name.to_string(),
                mime_type: mime.to_string(),
                payload: None,
            },
            1024,
        )
        .unwrap()
    }

    fn limited() -> DirectoryHandler {
        DirectoryHandler::from_config(&HandlerConfig {
            name: "docs".to_string(),
            directory: PathBuf::from("/srv/docs"),
            max_size: Some(1000),
            allowed_mime_types: vec!["application/PDF".to_string()],
            allowed_extensions: vec![".pdf".to_string()],
        })
    }

    #[test]
    fn test_destination_uses_token_and_extension() {
        let handler = DirectoryHandler::new("docs", "/srv/docs");
        let with_ext = record("report.pdf", "application/pdf", 10);
        assert_eq!(
            handler.destination(&with_ext),
            PathBuf::from(format!("/srv/docs/{}.pdf", with_ext.token.as_str()))
        );

        let bare = record("Makefile", "text/plain", 10);
        assert_eq!(
            handler.destination(&bare),
            PathBuf::from(format!("/srv/docs/{}", bare.token.as_str()))
        );
    }

    #[tokio::test]
    async fn test_validate_limits() {
        let handler = limited();
        let null = Value::Null;

        handler
            .validate(&record("a.PDF", "application/pdf", 1000), &null)
            .await
            .unwrap();

        for bad in [
            record("a.pdf", "application/pdf", 1001),
            record("a.pdf", "image/png", 10),
            record("a.png", "application/pdf", 10),
        ] {
            assert!(matches!(
                handler.validate(&bad, &null).await,
                Err(HandlerError::Rejected(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_payload_must_be_object() {
        let handler = DirectoryHandler::new("docs", "/srv/docs");
        let rec = record("a.txt", "text/plain", 1);

        assert!(handler.validate(&rec, &json!({"k": 1})).await.is_ok());
        assert!(handler.validate(&rec, &json!([1, 2])).await.is_err());
        assert_eq!(handler.payload(&rec, Value::Null).await, json!({}));
        assert_eq!(handler.payload(&rec, json!({"k": 1})).await, json!({"k": 1}));
    }

    #[tokio::test]
    async fn test_completed_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        let handler = DirectoryHandler::new("docs", dir.path());
        let mut rec = record("notes.txt", "text/plain", 5);
        rec.payload = json!({"user": 9});
        let path = handler.destination(&rec);
        std::fs::write(&path, b"hello").unwrap();

        let result = handler.completed(&rec, &path).await.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["size"], 5);
        assert_eq!(result["name"], "notes.txt");
        assert_eq!(result["token"], rec.token.as_str());
        assert_eq!(result["payload"]["user"], 9);
    }

    #[test]
    fn test_registry_from_config() {
        let registry = HandlerRegistry::from_config(&[
            HandlerConfig {
                name: "b".to_string(),
                directory: PathBuf::from("/b"),
                max_size: None,
                allowed_mime_types: Vec::new(),
                allowed_extensions: Vec::new(),
            },
            HandlerConfig {
                name: "a".to_string(),
                directory: PathBuf::from("/a"),
                max_size: None,
                allowed_mime_types: Vec::new(),
                allowed_extensions: Vec::new(),
            },
        ]);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
        assert!(HandlerRegistry::new().is_empty());
    }
}
