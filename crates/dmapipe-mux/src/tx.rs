use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};

use dmapipe_frame::{self as frame, Header, HEADER_SIZE};
use dmapipe_transport::{flags, BusEndpoint, DmaAddr, DmaArena, TransferTag};

use crate::buf::PacketBuf;
use crate::channel::ChannelTable;
use crate::error::{MuxError, Result};
use crate::queue::{Task, TaskSender};
use crate::stats::MuxStats;

/// One in-flight outbound transfer.
struct TxDescriptor {
    addr: DmaAddr,
    ch_id: u8,
    payload_len: usize,
    is_control: bool,
}

/// Outbound half of the engine: frames, pads, maps and submits buffers,
/// then reclaims them as completions come back through the worker.
pub(crate) struct TxPipeline {
    endpoint: Arc<dyn BusEndpoint>,
    dma: Arc<DmaArena>,
    stats: Arc<MuxStats>,
    channels: Arc<ChannelTable>,
    queue: TaskSender,
    /// Serializes padding, descriptor assignment and submission across
    /// concurrent writers.
    submit_lock: Mutex<()>,
    in_flight: Mutex<HashMap<TransferTag, TxDescriptor>>,
    /// Completed data frames waiting for their write-done callback.
    done_pool: Mutex<VecDeque<(u8, usize, Bytes)>>,
    next_tag: AtomicU64,
    max_in_flight: usize,
}

impl TxPipeline {
    pub fn new(
        endpoint: Arc<dyn BusEndpoint>,
        dma: Arc<DmaArena>,
        stats: Arc<MuxStats>,
        channels: Arc<ChannelTable>,
        queue: TaskSender,
        max_in_flight: usize,
    ) -> Self {
        Self {
            endpoint,
            dma,
            stats,
            channels,
            queue,
            submit_lock: Mutex::new(()),
            in_flight: Mutex::new(HashMap::new()),
            done_pool: Mutex::new(VecDeque::new()),
            next_tag: AtomicU64::new(1),
            max_in_flight,
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<TransferTag, TxDescriptor>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frame and submit one data payload for `ch_id`.
    pub fn submit_data(&self, ch_id: u8, mut buf: PacketBuf) -> Result<()> {
        if buf.len() > u16::MAX as usize {
            return Err(MuxError::PayloadTooLarge {
                len: buf.len(),
                max: u16::MAX as usize,
            });
        }
        let _guard = self
            .submit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let pad = frame::pad_len(buf.len());
        if buf.headroom() < HEADER_SIZE || buf.tailroom() < pad {
            let copied = buf.len();
            buf = buf.copy_expand(HEADER_SIZE, pad);
            self.stats.write_copies.fetch_add(1, Ordering::Relaxed);
            self.stats
                .write_copy_bytes
                .fetch_add(copied as u64, Ordering::Relaxed);
            tracing::trace!(ch = ch_id, len = copied, "payload copied into expanded buffer");
        }

        let payload_len = buf.len();
        let header = Header::data(ch_id, payload_len as u16, pad as u8);
        buf.put_padding(pad);
        let prepended = buf.prepend(&header.encode());
        debug_assert!(prepended, "headroom ensured above");

        let total = buf.len();
        self.submit_frame(buf.freeze(), ch_id, payload_len, false)?;
        tracing::trace!(
            ch = ch_id,
            len = total,
            pkt_len = payload_len,
            pad_len = pad,
            "data frame submitted"
        );
        Ok(())
    }

    /// Frame and submit one header-only control frame.
    pub fn submit_control(&self, header: Header) -> Result<()> {
        let _guard = self
            .submit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut wire = BytesMut::with_capacity(HEADER_SIZE);
        frame::encode_header(&header, &mut wire);
        self.submit_frame(wire.freeze(), header.ch_id, 0, true)?;
        tracing::trace!(ch = header.ch_id, cmd = header.cmd, "control frame submitted");
        Ok(())
    }

    fn submit_frame(
        &self,
        wire: Bytes,
        ch_id: u8,
        payload_len: usize,
        is_control: bool,
    ) -> Result<()> {
        // Reserve the descriptor before submitting so the completion,
        // which may fire immediately, always finds it.
        let tag = {
            let mut in_flight = self.in_flight();
            if in_flight.len() >= self.max_in_flight {
                return Err(MuxError::DescriptorsExhausted {
                    max: self.max_in_flight,
                });
            }
            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
            in_flight.insert(
                tag,
                TxDescriptor {
                    addr: 0,
                    ch_id,
                    payload_len,
                    is_control,
                },
            );
            tag
        };

        let len = wire.len();
        let addr = match self.dma.map_outbound(wire) {
            Ok(addr) => addr,
            Err(err) => {
                self.in_flight().remove(&tag);
                return Err(MuxError::DmaMap(err));
            }
        };
        if let Some(descriptor) = self.in_flight().get_mut(&tag) {
            descriptor.addr = addr;
        }

        if let Err(err) = self
            .endpoint
            .submit(addr, len, tag, flags::INTERRUPT | flags::END_OF_TRANSFER)
        {
            let _ = self.dma.unmap(addr);
            self.in_flight().remove(&tag);
            return Err(MuxError::Submit(err));
        }
        Ok(())
    }

    /// Deferred completion handling for `tag`: unmap, route the buffer,
    /// and schedule descriptor retirement.
    pub fn complete(&self, tag: TransferTag) {
        let Some(descriptor) = self.in_flight().remove(&tag) else {
            tracing::warn!(tag, "completion for unknown descriptor");
            return;
        };
        match self.dma.unmap(descriptor.addr) {
            Ok(wire) => {
                if descriptor.is_control {
                    // Header-only frame, nothing to hand back.
                    drop(wire);
                } else {
                    self.done_pool
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push_back((descriptor.ch_id, descriptor.payload_len, wire));
                    self.queue.push(Task::WriteDone);
                }
            }
            Err(err) => tracing::warn!(tag, %err, "tx unmap failed"),
        }
        self.queue.push(Task::RetireTx);
    }

    /// Pop the oldest completed write and invoke its channel callback,
    /// or drop the buffer when no handler is registered.
    pub fn write_done(&self) {
        let entry = self
            .done_pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some((ch_id, payload_len, wire)) = entry else {
            return;
        };
        self.stats
            .write_bytes
            .fetch_add(payload_len as u64, Ordering::Relaxed);
        let payload = wire.slice(HEADER_SIZE..HEADER_SIZE + payload_len);
        match self.channels.handler(ch_id) {
            Some(handler) => handler.on_write_done(payload),
            None => tracing::trace!(ch = ch_id, "write done with no handler, dropping buffer"),
        }
    }

    /// Free the transport's oldest consumed transfer slot.
    pub fn retire(&self) {
        if let Err(err) = self.endpoint.retire() {
            tracing::warn!(%err, "tx descriptor retire failed");
        }
    }
}
