//! Source backends.
//!
//! A backend owns one device, file, or network input and yields normalized
//! samples. Backends are constructed through the [`crate::registry::SourceRegistry`]
//! and driven by the acquisition loop in [`crate::manager`].

use golive_common::error::GoliveResult;
use golive_media_model::{AudioChunk, Frame, SourceCapability};

pub mod test_pattern;
pub mod transcoder;

pub use test_pattern::TestPatternSource;
pub use transcoder::TranscoderSource;

/// One unit of media read from a source.
#[derive(Debug, Clone)]
pub enum SourceSample {
    Video(Frame),
    Audio(AudioChunk),
}

impl SourceSample {
    pub fn pts_ns(&self) -> u64 {
        match self {
            Self::Video(frame) => frame.pts_ns(),
            Self::Audio(chunk) => chunk.pts_ns(),
        }
    }
}

/// Abstract interface for a capture source.
#[async_trait::async_trait]
pub trait SourceBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn capability(&self) -> SourceCapability;

    /// Acquire the device or connection.
    async fn open(&mut self) -> GoliveResult<()>;

    /// Read the next sample. `Ok(None)` means the source has ended.
    ///
    /// Implementations must be cancel-safe: the acquisition loop wraps this
    /// call in a stall timeout.
    async fn read(&mut self) -> GoliveResult<Option<SourceSample>>;

    /// Release the device or connection.
    async fn close(&mut self) -> GoliveResult<()>;
}
