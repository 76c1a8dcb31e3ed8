/// Errors that can occur in DMA transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to map the device register window.
    #[error("failed to map register window at {base:#010x} (+{len:#x})")]
    MapRegisters { base: u64, len: usize },

    /// Failed to register the shared transport device.
    #[error("failed to register transport device: {reason}")]
    RegisterDevice { reason: &'static str },

    /// Failed to allocate or connect an endpoint.
    #[error("failed to connect pipe {pipe_index}: {reason}")]
    Connect { pipe_index: u32, reason: &'static str },

    /// The endpoint's descriptor region has no free slot.
    #[error("descriptor queue full on pipe {pipe_index}")]
    QueueFull { pipe_index: u32 },

    /// The endpoint is not connected.
    #[error("endpoint not connected")]
    NotConnected,

    /// The DMA address is not currently mapped.
    #[error("no mapping at dma address {0:#010x}")]
    InvalidAddress(u64),

    /// The arena's mapping table is full.
    #[error("dma arena exhausted ({capacity} mappings)")]
    MapExhausted { capacity: usize },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
