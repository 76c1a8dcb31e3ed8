/// Errors that can occur while decoding mux headers.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header's leading bytes do not match the sentinel.
    #[error("invalid header magic {found:#06x} (expected 0x33fc)")]
    InvalidMagic { found: u16 },

    /// Fewer bytes than one fixed header.
    #[error("truncated header ({len} bytes, need 8)")]
    Truncated { len: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
