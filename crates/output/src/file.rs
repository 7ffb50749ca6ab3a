//! Recording transport: append packets to a local file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use golive_common::error::{GoliveError, GoliveResult};
use golive_media_model::EncodedPacket;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::transport::{FailurePolicy, PacketTransport};

/// Writes every packet straight through to disk. A write error ends the
/// recording; packets are never silently skipped.
#[derive(Debug)]
pub struct FileTransport {
    path: PathBuf,
    file: Option<File>,
}

impl FileTransport {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn failure(&self, message: impl ToString) -> GoliveError {
        GoliveError::RecordingWriteFailure {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl PacketTransport for FileTransport {
    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn connect(&mut self) -> GoliveResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| self.failure(e))?;
        }
        let file = File::create(&self.path).await.map_err(|e| self.failure(e))?;
        tracing::info!(path = %self.path.display(), "Recording file opened");
        self.file = Some(file);
        Ok(())
    }

    async fn send(&mut self, packet: &EncodedPacket) -> GoliveResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(self.failure("recording file is not open"));
        };
        let result = async {
            file.write_all(&packet.data).await?;
            file.flush().await
        }
        .await;
        result.map_err(|e| self.failure(e))
    }

    async fn shutdown(&mut self) -> GoliveResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| self.failure(e))?;
            file.sync_data().await.map_err(|e| self.failure(e))?;
            tracing::info!(path = %self.path.display(), "Recording file closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("golive-output-{}", std::process::id()))
            .join(name)
    }

    #[tokio::test]
    async fn test_writes_packets_in_order() {
        let path = scratch("ordered/out.ts");
        let mut transport = FileTransport::new(path.clone());
        transport.connect().await.unwrap();
        for seq in 0..3u64 {
            let packet = EncodedPacket::new(seq, seq * 1_000, vec![seq as u8; 4]);
            transport.send(&packet).await.unwrap();
        }
        transport.shutdown().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_send_before_connect_is_a_recording_failure() {
        let mut transport = FileTransport::new(scratch("never-opened.ts"));
        let err = transport
            .send(&EncodedPacket::new(0, 0, vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, GoliveError::RecordingWriteFailure { .. }));
    }

    #[tokio::test]
    async fn test_unwritable_path_fails_to_open() {
        let blocker = scratch("blocker");
        std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let mut transport = FileTransport::new(blocker.join("out.ts"));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, GoliveError::RecordingWriteFailure { .. }));
        let _ = std::fs::remove_file(&blocker);
    }
}
