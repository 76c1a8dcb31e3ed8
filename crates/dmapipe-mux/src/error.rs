use dmapipe_transport::TransportError;

/// Broad failure categories, for callers that branch on class rather
/// than cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed something invalid.
    Validation,
    /// The engine or channel is in the wrong state.
    State,
    /// Descriptor or buffer resources are exhausted.
    Resource,
    /// The transport rejected an operation.
    Io,
}

/// Errors surfaced by the multiplexing engine.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Channel id outside the compile-time namespace.
    #[error("channel {id} out of range (0..{max})")]
    ChannelOutOfRange { id: u8, max: usize },

    /// The payload does not fit the 16-bit length field of the header.
    #[error("payload too large ({len} bytes, max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Transport bring-up has not completed.
    #[error("multiplexer not ready")]
    NotReady,

    /// The channel is not fully open for data transfer.
    #[error("channel {id} not open")]
    ChannelNotOpen { id: u8 },

    /// The in-flight descriptor table is full.
    #[error("tx descriptor table exhausted ({max} in flight)")]
    DescriptorsExhausted { max: usize },

    /// The DMA arena refused the mapping.
    #[error("dma mapping failed: {0}")]
    DmaMap(#[source] TransportError),

    /// The transport rejected the transfer submission.
    #[error("transfer submission failed: {0}")]
    Submit(#[source] TransportError),

    /// Transport bring-up failed at the named step.
    #[error("bring-up failed at {step}: {source}")]
    BringUp {
        step: &'static str,
        #[source]
        source: TransportError,
    },

    /// An engine thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl MuxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MuxError::ChannelOutOfRange { .. } | MuxError::PayloadTooLarge { .. } => {
                ErrorKind::Validation
            }
            MuxError::NotReady | MuxError::ChannelNotOpen { .. } => ErrorKind::State,
            MuxError::DescriptorsExhausted { .. }
            | MuxError::DmaMap(_)
            | MuxError::Spawn { .. } => ErrorKind::Resource,
            MuxError::Submit(_) | MuxError::BringUp { .. } => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_taxonomy() {
        assert_eq!(
            MuxError::ChannelOutOfRange { id: 9, max: 8 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(MuxError::NotReady.kind(), ErrorKind::State);
        assert_eq!(
            MuxError::ChannelNotOpen { id: 1 }.kind(),
            ErrorKind::State
        );
        assert_eq!(
            MuxError::DescriptorsExhausted { max: 32 }.kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            MuxError::DmaMap(TransportError::MapExhausted { capacity: 4 }).kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            MuxError::Submit(TransportError::NotConnected).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            MuxError::BringUp {
                step: "connect tx endpoint",
                source: TransportError::NotConnected,
            }
            .kind(),
            ErrorKind::Io
        );
    }
}
