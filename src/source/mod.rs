//! Detection source adapters feeding the fusion loop.

pub mod jsonl;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::detect::FrameBatch;

pub use self::jsonl::JsonLinesSource;

#[derive(Debug, Error)]
pub enum SourceError {
    /// One tick could not be produced; the next one may succeed.
    #[error("malformed batch at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("frame unavailable: {0}")]
    Unavailable(String),
    #[error("source i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Transient errors skip one tick; anything else ends the stream.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Malformed { .. } | SourceError::Unavailable(_))
    }
}

/// Produces per-frame detection batches.
#[async_trait::async_trait]
pub trait DetectionSource: Send {
    /// Next batch, or `Ok(None)` at end of stream.
    async fn next_batch(&mut self) -> Result<Option<FrameBatch>, SourceError>;
}

/// Batches pushed by an embedding process (e.g. an in-process inference
/// pipeline). The stream ends once every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<FrameBatch>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<FrameBatch>) -> Self {
        Self { rx }
    }

    /// Bounded channel pair.
    pub fn channel(capacity: usize) -> (mpsc::Sender<FrameBatch>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait::async_trait]
impl DetectionSource for ChannelSource {
    async fn next_batch(&mut self) -> Result<Option<FrameBatch>, SourceError> {
        Ok(self.rx.recv().await)
    }
}
