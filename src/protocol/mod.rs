//! Protocol Module
//!
//! Messages and framing for the aggregator/client event channel:
//! - `download` (server to client) and `upload` (client to server) messages
//! - Acknowledged upload frames
//! - Length-prefixed, optionally compressed byte-stream codec

pub mod frame;
pub mod messages;

pub use frame::{
    decode_body, encode_frame, read_frame, write_frame, ClientFrame, ServerFrame,
    COMPRESS_THRESHOLD,
};
pub use messages::{DataMsg, DownloadMsg, ModelMsg, UploadMsg};
