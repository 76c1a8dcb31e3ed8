//! Opaque DMA transport abstraction.
//!
//! Models the shared hardware pipe between two processors as an
//! asynchronous submission service: callers map buffers into a DMA
//! arena, queue transfers on unidirectional endpoints, and receive
//! completion events on a registered callback.
//!
//! This is the lowest layer of dmapipe. The multiplexing engine builds
//! on the [`BusTransport`]/[`BusEndpoint`] traits provided here; the
//! in-process [`LoopbackTransport`] wires two engines back to back.

pub mod arena;
pub mod error;
pub mod loopback;
pub mod traits;

pub use arena::DmaArena;
pub use error::{Result, TransportError};
pub use loopback::LoopbackTransport;
pub use traits::{
    flags, BusEndpoint, BusTransport, CompletionEvent, CompletionHandler, DeviceProps, Direction,
    DmaAddr, EndpointConfig, EventKind, ResourceGuard, TransferTag, DESCRIPTOR_SIZE,
};
