//! Channel multiplexing engine over a shared DMA transport.
//!
//! Up to [`NUM_CHANNELS`] logical channels share one physical pipe pair.
//! Outbound payloads are framed, padded to the transport granularity,
//! and submitted as DMA transfers; inbound completions are parsed on a
//! single worker thread that dispatches data to per-channel handlers,
//! applies OPEN/CLOSE control frames, and keeps exactly one receive
//! buffer posted at all times.
//!
//! The engine is an explicitly constructed [`Multiplexer`]: it owns the
//! channel table, the deferred-work queue, and the transport bring-up
//! state, and tears all of it down on drop.

pub mod buf;
pub mod channel;
pub mod config;
pub mod diag;
pub mod engine;
pub mod error;
mod queue;
mod rx;
pub mod stats;
mod tx;

pub use buf::PacketBuf;
pub use channel::{ChannelHandler, LOCAL_OPEN, NUM_CHANNELS, REMOTE_OPEN};
pub use config::MuxConfig;
pub use diag::ChannelStatus;
pub use engine::Multiplexer;
pub use error::{ErrorKind, MuxError, Result};
pub use stats::StatsSnapshot;
