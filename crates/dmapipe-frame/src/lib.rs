//! Fixed-header framing for channel multiplexing.
//!
//! Every frame on the shared pipe starts with an 8-byte header:
//! - A 2-byte magic sentinel for frame validation
//! - A command byte (data, channel open, channel close)
//! - The pad length, channel id, and payload length
//!
//! Payloads are followed by `pad_len` filler bytes so the total frame
//! length is always a multiple of the transport's 4-byte granularity.

pub mod codec;
pub mod error;

pub use codec::{
    decode_header, encode_header, pad_len, Command, Header, ALIGNMENT, HEADER_SIZE, MAGIC,
};
pub use error::{FrameError, Result};
