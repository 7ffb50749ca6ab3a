//! # golive-output
//!
//! Delivers encoded packets to a network endpoint or a recording file.
//!
//! ```text
//! encoder packets ──mpsc──▶ OutputSink::run ──▶ PacketTransport
//!                               │                 ├─ FileTransport     (fatal on error)
//!                               │                 └─ NetworkTransport  (reconnects)
//!                               └─ watch<ConnectionState> ──▶ controller
//! ```

pub mod file;
pub mod network;
pub mod sink;
pub mod transport;

pub use file::FileTransport;
pub use network::{remux_args, NetworkTransport};
pub use sink::{OutputSink, SinkMonitor, WriteOutcome};
pub use transport::{target_kind, FailurePolicy, PacketTransport, TransportRegistry};
