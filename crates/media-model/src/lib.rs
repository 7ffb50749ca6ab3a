//! GoLive Media Model
//!
//! Data contracts shared by every pipeline stage:
//! - **Media:** frames, audio chunks, and encoded packets, all stamped with
//!   nanosecond presentation timestamps
//! - **Configuration:** sources, encoder settings, output targets
//! - **State:** pipeline run state, quality ladder, and health snapshots

pub mod audio;
pub mod encoder;
pub mod frame;
pub mod output;
pub mod packet;
pub mod source;
pub mod state;

pub use audio::*;
pub use encoder::*;
pub use frame::*;
pub use output::*;
pub use packet::*;
pub use source::*;
pub use state::*;

/// A configuration value that does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
