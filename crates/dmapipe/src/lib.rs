//! Convenience façade over the dmapipe crates.
//!
//! Re-exports the engine surface most callers need; the full APIs live
//! in [`mux`], [`frame`] and [`transport`].

pub use dmapipe_frame as frame;
pub use dmapipe_mux as mux;
pub use dmapipe_transport as transport;

pub use dmapipe_mux::{
    ChannelHandler, ChannelStatus, Multiplexer, MuxConfig, MuxError, PacketBuf, StatsSnapshot,
    NUM_CHANNELS,
};
pub use dmapipe_transport::LoopbackTransport;
