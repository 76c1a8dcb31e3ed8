use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Bus address handed out by the DMA arena.
pub type DmaAddr = u64;

/// Caller-chosen tag carried through to the matching completion event.
pub type TransferTag = u64;

/// Size of one transfer descriptor within an endpoint's descriptor region.
pub const DESCRIPTOR_SIZE: usize = 8;

/// Transfer option flags for [`BusEndpoint::submit`].
pub mod flags {
    /// Raise a completion interrupt for this transfer.
    pub const INTERRUPT: u32 = 1 << 0;
    /// Mark the transfer as end-of-transfer.
    pub const END_OF_TRANSFER: u32 = 1 << 1;
}

/// Completion event kinds delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The oldest queued transfer finished.
    EndOfTransfer,
    /// Any other signal the underlying engine may raise.
    Other(u32),
}

/// Asynchronous completion notification.
#[derive(Debug, Clone, Copy)]
pub struct CompletionEvent {
    pub kind: EventKind,
    pub tag: TransferTag,
}

/// Callback invoked on the transport's delivery context.
///
/// Runs in an interrupt-like context: implementations must not block and
/// should only hand the event off for deferred processing.
pub type CompletionHandler = Arc<dyn Fn(CompletionEvent) + Send + Sync>;

/// Endpoint direction relative to the local processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local memory to peer (transmit).
    ToPeer,
    /// Peer to local memory (receive).
    FromPeer,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToPeer => f.write_str("tx"),
            Direction::FromPeer => f.write_str("rx"),
        }
    }
}

/// Properties of the shared device behind the register window.
#[derive(Debug, Clone)]
pub struct DeviceProps {
    /// Physical base of the register window.
    pub phys_base: u64,
    /// Size of the register window in bytes.
    pub window_size: usize,
    /// Interrupt line; simulated transports ignore it.
    pub irq: u32,
    /// Number of pipes the device exposes.
    pub num_pipes: u32,
    /// Interrupt-coalescing threshold in bytes.
    pub summing_threshold: u32,
}

/// Configuration for one unidirectional endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub direction: Direction,
    /// Device pipe index this endpoint attaches to.
    pub pipe_index: u32,
    /// Size in bytes of the endpoint's private descriptor region.
    pub descriptor_region: usize,
    /// Completion event threshold.
    pub event_threshold: u32,
}

impl EndpointConfig {
    /// Number of transfer slots the descriptor region holds.
    pub fn descriptor_slots(&self) -> usize {
        self.descriptor_region / DESCRIPTOR_SIZE
    }
}

/// A resource acquired from the transport, released when dropped.
pub struct ResourceGuard {
    label: &'static str,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ResourceGuard {
    pub fn new(label: &'static str, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            label,
            release: Some(Box::new(release)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(resource = self.label, "released");
        }
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("label", &self.label)
            .finish()
    }
}

/// One side of the shared DMA engine.
pub trait BusTransport: Send + Sync {
    /// Map the device register window. The guard unmaps on drop.
    fn map_registers(&self, base: u64, len: usize) -> Result<ResourceGuard>;

    /// Register the shared device. The guard deregisters on drop.
    fn register_device(&self, props: &DeviceProps) -> Result<ResourceGuard>;

    /// Allocate and connect one unidirectional endpoint.
    ///
    /// The endpoint disconnects when the last reference is dropped.
    fn connect(&self, config: &EndpointConfig) -> Result<Arc<dyn BusEndpoint>>;

    /// The DMA mapping service for buffers moved through this transport.
    fn dma(&self) -> Arc<crate::arena::DmaArena>;
}

/// One connected unidirectional pipe.
pub trait BusEndpoint: Send + Sync {
    /// Queue one transfer.
    ///
    /// Never blocks; fails with `QueueFull` when the descriptor region
    /// has no free slot.
    fn submit(&self, addr: DmaAddr, len: usize, tag: TransferTag, options: u32) -> Result<()>;

    /// Register the completion callback for this endpoint.
    fn register_completion(&self, handler: CompletionHandler) -> Result<()>;

    /// Retire the oldest consumed descriptor, freeing its slot.
    fn retire(&self) -> Result<()>;
}
