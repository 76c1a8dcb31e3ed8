use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use bytes::Bytes;

use crate::arena::DmaArena;
use crate::error::{Result, TransportError};
use crate::traits::{
    BusEndpoint, BusTransport, CompletionEvent, CompletionHandler, DeviceProps, Direction, DmaAddr,
    EndpointConfig, EventKind, ResourceGuard, TransferTag,
};

struct Posted {
    addr: DmaAddr,
    len: usize,
    tag: TransferTag,
}

#[derive(Default)]
struct PipeState {
    connected: bool,
    pipe_index: u32,
    slots: usize,
    in_use: usize,
    handler: Option<CompletionHandler>,
    /// Receive buffers posted and not yet consumed (`FromPeer` only).
    posted: VecDeque<Posted>,
    /// Frames that arrived before a buffer was posted (`FromPeer` only).
    pending: VecDeque<Bytes>,
}

struct Shared {
    label: &'static str,
    dma: Arc<DmaArena>,
    peer: OnceLock<Weak<Shared>>,
    registered: AtomicBool,
    to_peer: Mutex<PipeState>,
    from_peer: Mutex<PipeState>,
}

impl Shared {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            dma: Arc::new(DmaArena::new()),
            peer: OnceLock::new(),
            registered: AtomicBool::new(false),
            to_peer: Mutex::new(PipeState::default()),
            from_peer: Mutex::new(PipeState::default()),
        }
    }

    fn side(&self, direction: Direction) -> &Mutex<PipeState> {
        match direction {
            Direction::ToPeer => &self.to_peer,
            Direction::FromPeer => &self.from_peer,
        }
    }

    fn lock(&self, direction: Direction) -> MutexGuard<'_, PipeState> {
        self.side(direction)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Land one frame in this side's receive path: copy it into the
    /// oldest posted buffer and raise end-of-transfer, or queue it until
    /// a buffer is posted.
    fn deliver(&self, frame: Bytes) {
        let fire = {
            let mut state = self.lock(Direction::FromPeer);
            if !state.connected {
                tracing::debug!(side = self.label, "dropping frame, rx pipe not connected");
                return;
            }
            match state.posted.pop_front() {
                Some(posted) => {
                    if let Err(err) = self.dma.write(posted.addr, &frame) {
                        tracing::warn!(side = self.label, %err, "rx buffer write failed");
                        return;
                    }
                    state.handler.clone().map(|handler| {
                        (
                            handler,
                            CompletionEvent {
                                kind: EventKind::EndOfTransfer,
                                tag: posted.tag,
                            },
                        )
                    })
                }
                None => {
                    state.pending.push_back(frame);
                    None
                }
            }
        };
        if let Some((handler, event)) = fire {
            handler(event);
        }
    }
}

/// In-process transport pair.
///
/// Frames submitted on one side's `ToPeer` endpoint land in the other
/// side's posted receive buffer, with descriptor-slot accounting on both
/// pipes. Built for the demo binary and for exercising the engine
/// without hardware.
#[derive(Clone)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    /// Create two connected sides.
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Shared::new("a"));
        let b = Arc::new(Shared::new("b"));
        let _ = a.peer.set(Arc::downgrade(&b));
        let _ = b.peer.set(Arc::downgrade(&a));
        (Self { shared: a }, Self { shared: b })
    }

    /// Deliver a raw frame into this side's receive path, as if the peer
    /// had submitted it. Diagnostic hook for fault injection.
    pub fn inject_inbound(&self, frame: Bytes) {
        self.shared.deliver(frame);
    }
}

impl BusTransport for LoopbackTransport {
    fn map_registers(&self, base: u64, len: usize) -> Result<ResourceGuard> {
        if len == 0 {
            return Err(TransportError::MapRegisters { base, len });
        }
        tracing::debug!(side = self.shared.label, base, len, "register window mapped");
        Ok(ResourceGuard::new("register window", || {}))
    }

    fn register_device(&self, props: &DeviceProps) -> Result<ResourceGuard> {
        if props.num_pipes == 0 {
            return Err(TransportError::RegisterDevice {
                reason: "device exposes no pipes",
            });
        }
        if self.shared.registered.swap(true, Ordering::SeqCst) {
            return Err(TransportError::RegisterDevice {
                reason: "device already registered",
            });
        }
        tracing::debug!(side = self.shared.label, pipes = props.num_pipes, "device registered");
        let shared = Arc::clone(&self.shared);
        Ok(ResourceGuard::new("transport device", move || {
            shared.registered.store(false, Ordering::SeqCst);
        }))
    }

    fn connect(&self, config: &EndpointConfig) -> Result<Arc<dyn BusEndpoint>> {
        let slots = config.descriptor_slots();
        if slots == 0 {
            return Err(TransportError::Connect {
                pipe_index: config.pipe_index,
                reason: "descriptor region too small",
            });
        }
        let mut state = self.shared.lock(config.direction);
        if state.connected {
            return Err(TransportError::Connect {
                pipe_index: config.pipe_index,
                reason: "pipe already connected",
            });
        }
        state.connected = true;
        state.pipe_index = config.pipe_index;
        state.slots = slots;
        state.in_use = 0;
        drop(state);
        tracing::debug!(
            side = self.shared.label,
            direction = %config.direction,
            pipe = config.pipe_index,
            slots,
            "endpoint connected"
        );
        Ok(Arc::new(LoopbackEndpoint {
            shared: Arc::clone(&self.shared),
            direction: config.direction,
        }))
    }

    fn dma(&self) -> Arc<DmaArena> {
        Arc::clone(&self.shared.dma)
    }
}

struct LoopbackEndpoint {
    shared: Arc<Shared>,
    direction: Direction,
}

impl LoopbackEndpoint {
    /// Reserve one descriptor slot, failing `QueueFull` when exhausted.
    fn take_slot(&self) -> Result<()> {
        let mut state = self.shared.lock(self.direction);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.in_use >= state.slots {
            return Err(TransportError::QueueFull {
                pipe_index: state.pipe_index,
            });
        }
        state.in_use += 1;
        Ok(())
    }

    fn release_slot(&self) {
        let mut state = self.shared.lock(self.direction);
        state.in_use = state.in_use.saturating_sub(1);
    }
}

impl BusEndpoint for LoopbackEndpoint {
    fn submit(&self, addr: DmaAddr, len: usize, tag: TransferTag, _options: u32) -> Result<()> {
        self.take_slot()?;
        match self.direction {
            Direction::ToPeer => {
                let frame = match self.shared.dma.read(addr, len) {
                    Ok(frame) => frame,
                    Err(err) => {
                        self.release_slot();
                        return Err(err);
                    }
                };
                match self.shared.peer.get().and_then(Weak::upgrade) {
                    Some(peer) => peer.deliver(frame),
                    None => tracing::debug!(side = self.shared.label, "no peer attached"),
                }
                let handler = self.shared.lock(self.direction).handler.clone();
                if let Some(handler) = handler {
                    handler(CompletionEvent {
                        kind: EventKind::EndOfTransfer,
                        tag,
                    });
                }
                Ok(())
            }
            Direction::FromPeer => {
                // Post the buffer, then drain any frame that arrived early.
                let fire = {
                    let mut state = self.shared.lock(self.direction);
                    state.posted.push_back(Posted { addr, len, tag });
                    match state.pending.pop_front() {
                        Some(frame) => {
                            // The posted queue cannot be empty here.
                            let posted = match state.posted.pop_front() {
                                Some(posted) => posted,
                                None => return Ok(()),
                            };
                            if let Err(err) = self.shared.dma.write(posted.addr, &frame) {
                                tracing::warn!(side = self.shared.label, %err, "rx buffer write failed");
                                None
                            } else {
                                state.handler.clone().map(|handler| {
                                    (
                                        handler,
                                        CompletionEvent {
                                            kind: EventKind::EndOfTransfer,
                                            tag: posted.tag,
                                        },
                                    )
                                })
                            }
                        }
                        None => None,
                    }
                };
                if let Some((handler, event)) = fire {
                    handler(event);
                }
                Ok(())
            }
        }
    }

    fn register_completion(&self, handler: CompletionHandler) -> Result<()> {
        let mut state = self.shared.lock(self.direction);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.handler = Some(handler);
        Ok(())
    }

    fn retire(&self) -> Result<()> {
        let mut state = self.shared.lock(self.direction);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.in_use == 0 {
            tracing::debug!(
                side = self.shared.label,
                direction = %self.direction,
                "retire with no consumed descriptor"
            );
            return Ok(());
        }
        state.in_use -= 1;
        Ok(())
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        let mut state = self.shared.lock(self.direction);
        state.connected = false;
        state.handler = None;
        state.posted.clear();
        state.pending.clear();
        state.in_use = 0;
        tracing::debug!(
            side = self.shared.label,
            direction = %self.direction,
            "endpoint disconnected"
        );
    }
}
