//! Chunked file transfer over an open data channel.
//!
//! This module provides:
//! - The binary metadata/chunk frame codec
//! - The sending engine (fragmentation, backpressure)
//! - The receiving engine (reassembly, completion detection)
//! - File sources and sinks for memory and disk

pub mod constants;
pub mod file;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod sink;
pub mod utils;

// Re-export public API
pub use file::{DiskFile, FileSource, MemoryFile};
pub use protocol::{Chunk, Frame, Metadata, decode_frame};
pub use receiver::{ReceiveState, ReceiverEngine};
pub use sender::{SendSummary, SenderEngine};
pub use sink::{DiskSink, FileSink, MemorySink};
