/// Wire tag of a metadata frame
pub const MESSAGE_TYPE_METADATA: u32 = 0;

/// Wire tag of a chunk frame
pub const MESSAGE_TYPE_CHUNK: u32 = 1;

/// messageType + payloadSize + chunkIndex
pub const CHUNK_HEADER_SIZE: usize = 12;

/// messageType + fileSize + totalChunks + fileNameLength + fileTypeLength
pub const METADATA_HEADER_SIZE: usize = 24;

/// Maximum filename length accepted when writing to disk
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Fallback MIME type when the sender cannot guess one
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
