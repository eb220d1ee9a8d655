//! Digest dispatch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::render::RenderedMessage;
use crate::core::HarvestError;
use crate::store::media::write_atomic;

/// Delivers rendered digest messages
#[async_trait]
pub trait DigestSender: Send + Sync {
    async fn send(&self, message: &RenderedMessage) -> Result<(), HarvestError>;
}

/// Writes each message as an `.eml` file, ready for any MTA to pick up
#[derive(Debug, Clone)]
pub struct Outbox {
    dir: PathBuf,
    stamp: String,
}

impl Outbox {
    /// Outbox for a run started at `started`
    pub fn new(dir: impl Into<PathBuf>, started: DateTime<Utc>) -> Self {
        Self {
            dir: dir.into(),
            stamp: started.format("%Y%m%d-%H%M%S").to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a message is written to
    pub fn message_path(&self, index: usize, count: usize) -> PathBuf {
        self.dir
            .join(format!("{}-{}-of-{}.eml", self.stamp, index, count))
    }
}

#[async_trait]
impl DigestSender for Outbox {
    async fn send(&self, message: &RenderedMessage) -> Result<(), HarvestError> {
        let path = self.message_path(message.index, message.count);
        write_atomic(path.clone(), message.document.clone().into_bytes()).await?;
        info!(path = %path.display(), subject = %message.subject, "Digest message written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_outbox_writes_eml() {
        let temp = TempDir::new().unwrap();
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        let outbox = Outbox::new(temp.path().join("outbox"), started);

        let message = RenderedMessage {
            index: 2,
            count: 3,
            subject: "Harvest 2024-03-09 [2/3]".to_string(),
            from: "gleaner@localhost".to_string(),
            to: vec![],
            markdown: String::new(),
            html: String::new(),
            document: "Subject: Harvest\r\n\r\nbody".to_string(),
        };
        outbox.send(&message).await.unwrap();

        let path = temp.path().join("outbox").join("20240309-070500-2-of-3.eml");
        assert_eq!(outbox.message_path(2, 3), path);
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "Subject: Harvest\r\n\r\nbody"
        );
    }
}
