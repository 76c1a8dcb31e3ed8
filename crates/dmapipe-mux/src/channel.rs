use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

/// Number of logical channels, fixed at build time.
pub const NUM_CHANNELS: usize = 8;

/// Set while the local side holds the channel open.
pub const LOCAL_OPEN: u32 = 0x1;
/// Set while the peer announces the channel open.
pub const REMOTE_OPEN: u32 = 0x2;

/// Per-channel delivery interface, injected at `open()`.
///
/// Methods run on the engine's worker thread and receive ownership of
/// the buffers they are handed. They may call back into the engine
/// (for example to write a reply) but must not block for long: the
/// worker also services receive reposting and completion retirement.
pub trait ChannelHandler: Send + Sync {
    /// One data frame payload received on the channel.
    fn on_receive(&self, payload: Bytes);

    /// A locally written payload was consumed by the transport.
    fn on_write_done(&self, payload: Bytes);
}

#[derive(Default)]
struct ChannelSlot {
    status: u32,
    handler: Option<Arc<dyn ChannelHandler>>,
}

/// Fixed table of per-channel state.
///
/// Each slot carries its own lock; status bits and the handler are only
/// touched under it. Out-of-range ids are rejected, never indexed.
pub(crate) struct ChannelTable {
    slots: [Mutex<ChannelSlot>; NUM_CHANNELS],
}

impl ChannelTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(ChannelSlot::default())),
        }
    }

    fn slot(&self, id: u8) -> Option<MutexGuard<'_, ChannelSlot>> {
        self.slots
            .get(id as usize)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install the handler and set `LOCAL_OPEN`.
    ///
    /// Returns `false` without touching anything when the channel is
    /// already fully open, making a second `open()` a no-op.
    pub fn open_local(&self, id: u8, handler: Arc<dyn ChannelHandler>) -> bool {
        let Some(mut slot) = self.slot(id) else {
            return false;
        };
        if slot.status == (LOCAL_OPEN | REMOTE_OPEN) {
            return false;
        }
        slot.handler = Some(handler);
        slot.status |= LOCAL_OPEN;
        true
    }

    /// Clear the handler and `LOCAL_OPEN`.
    pub fn close_local(&self, id: u8) {
        if let Some(mut slot) = self.slot(id) {
            slot.handler = None;
            slot.status &= !LOCAL_OPEN;
        }
    }

    /// Apply a peer OPEN/CLOSE announcement. Returns `false` for
    /// out-of-range ids.
    pub fn set_remote(&self, id: u8, open: bool) -> bool {
        let Some(mut slot) = self.slot(id) else {
            return false;
        };
        if open {
            slot.status |= REMOTE_OPEN;
        } else {
            slot.status &= !REMOTE_OPEN;
        }
        true
    }

    /// Snapshot the handler under the channel lock.
    pub fn handler(&self, id: u8) -> Option<Arc<dyn ChannelHandler>> {
        self.slot(id).and_then(|slot| slot.handler.clone())
    }

    pub fn status(&self, id: u8) -> u32 {
        self.slot(id).map(|slot| slot.status).unwrap_or(0)
    }

    /// Usable for data transfer: both sides have opened the channel.
    pub fn is_open(&self, id: u8) -> bool {
        self.status(id) == (LOCAL_OPEN | REMOTE_OPEN)
    }

    pub fn is_local_open(&self, id: u8) -> bool {
        self.status(id) & LOCAL_OPEN != 0
    }

    pub fn is_remote_open(&self, id: u8) -> bool {
        self.status(id) & REMOTE_OPEN != 0
    }
}
