//! Publish collaborator.
//!
//! Publishing an approved artifact to downstream consumers happens outside
//! this system; the worker only needs something to call and a reference back.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

#[derive(Debug, Clone, thiserror::Error)]
#[error("publish failed for {target}: {reason}")]
pub struct PublishError {
    pub target: String,
    pub reason: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `target`; returns a reference for the published batch.
    async fn publish(&self, target: &str) -> Result<String, PublishError>;
}

/// Logs what would be published and where.
#[derive(Debug, Clone)]
pub struct LoggingPublisher {
    base_url: String,
}

impl LoggingPublisher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn execution_url(&self, name: &str) -> String {
        format!("{}/exec/{name}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn publish(&self, target: &str) -> Result<String, PublishError> {
        let publish_id = format!("publish-{}", Utc::now().timestamp_millis());
        info!(%target, %publish_id, url = %self.execution_url(target), "publish queued");
        Ok(publish_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_publish_reference() {
        let publisher = LoggingPublisher::new("https://codeflow.test/");
        assert_eq!(publisher.execution_url("Demo"), "https://codeflow.test/exec/Demo");
        assert!(publisher.publish("Demo").await.unwrap().starts_with("publish-"));
    }
}
