use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use dmapipe_frame::{self as frame, Command, Header, HEADER_SIZE};
use dmapipe_transport::{flags, BusEndpoint, DmaAddr, DmaArena};

use crate::channel::{ChannelTable, NUM_CHANNELS};
use crate::error::{MuxError, Result};
use crate::stats::MuxStats;

/// Attempts to post a replacement buffer before declaring the pipe
/// stalled.
const REPOST_ATTEMPTS: usize = 3;

struct RxCell {
    addr: DmaAddr,
}

/// Inbound half of the engine.
///
/// Exactly one receive buffer is posted at any time. Each completion is
/// parsed and dispatched on the worker thread, and a fresh buffer is
/// posted on every exit path.
pub(crate) struct RxPipeline {
    endpoint: Arc<dyn BusEndpoint>,
    dma: Arc<DmaArena>,
    stats: Arc<MuxStats>,
    channels: Arc<ChannelTable>,
    buffer_size: usize,
    cell: Mutex<Option<RxCell>>,
    next_tag: AtomicU64,
}

impl RxPipeline {
    pub fn new(
        endpoint: Arc<dyn BusEndpoint>,
        dma: Arc<DmaArena>,
        stats: Arc<MuxStats>,
        channels: Arc<ChannelTable>,
        buffer_size: usize,
    ) -> Self {
        Self {
            endpoint,
            dma,
            stats,
            channels,
            buffer_size,
            cell: Mutex::new(None),
            next_tag: AtomicU64::new(1),
        }
    }

    fn take_cell(&self) -> Option<RxCell> {
        self.cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Post one fresh receive buffer.
    pub fn post(&self) -> Result<()> {
        let addr = self
            .dma
            .map_inbound(self.buffer_size)
            .map_err(MuxError::DmaMap)?;
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);

        // The cell must be in place before submitting: the transport may
        // deliver a queued frame and raise the completion immediately.
        *self.cell.lock().unwrap_or_else(PoisonError::into_inner) = Some(RxCell { addr });

        if let Err(err) = self.endpoint.submit(
            addr,
            self.buffer_size,
            tag,
            flags::INTERRUPT | flags::END_OF_TRANSFER,
        ) {
            *self.cell.lock().unwrap_or_else(PoisonError::into_inner) = None;
            let _ = self.dma.unmap(addr);
            return Err(MuxError::Submit(err));
        }
        Ok(())
    }

    /// Deferred handling of one inbound completion: retire the consumed
    /// descriptor, parse and dispatch the buffer, repost.
    pub fn process(&self) {
        if let Err(err) = self.endpoint.retire() {
            tracing::warn!(%err, "rx descriptor retire failed");
        }
        match self.take_cell() {
            Some(cell) => match self.dma.unmap(cell.addr) {
                Ok(wire) => self.handle_frame(wire),
                Err(err) => tracing::warn!(%err, "rx unmap failed"),
            },
            None => tracing::warn!("rx completion with no posted buffer"),
        }
        self.repost();
    }

    fn handle_frame(&self, wire: Bytes) {
        let header = match frame::decode_header(&wire) {
            Ok(header) => header,
            Err(err) => {
                self.stats.rx_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%err, len = wire.len(), "dropping invalid frame");
                return;
            }
        };
        match header.command() {
            Some(Command::Data) => self.dispatch_data(&header, &wire),
            Some(Command::Open) => {
                if self.channels.set_remote(header.ch_id, true) {
                    tracing::debug!(ch = header.ch_id, "remote opened channel");
                } else {
                    self.drop_frame(&header, "open for unknown channel");
                }
            }
            Some(Command::Close) => {
                if self.channels.set_remote(header.ch_id, false) {
                    tracing::debug!(ch = header.ch_id, "remote closed channel");
                } else {
                    self.drop_frame(&header, "close for unknown channel");
                }
            }
            None => self.drop_frame(&header, "unknown command"),
        }
    }

    fn dispatch_data(&self, header: &Header, wire: &Bytes) {
        let pkt_len = header.pkt_len as usize;
        let end = HEADER_SIZE + pkt_len;
        if header.ch_id as usize >= NUM_CHANNELS || end > wire.len() {
            self.drop_frame(header, "bad channel or length");
            return;
        }
        self.stats
            .read_bytes
            .fetch_add(pkt_len as u64, Ordering::Relaxed);
        // Snapshot under the channel lock, deliver outside it so the
        // handler may re-enter the engine.
        match self.channels.handler(header.ch_id) {
            Some(handler) => handler.on_receive(wire.slice(HEADER_SIZE..end)),
            None => tracing::trace!(ch = header.ch_id, "no receive handler, dropping payload"),
        }
    }

    fn drop_frame(&self, header: &Header, reason: &'static str) {
        self.stats.rx_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            reason,
            cmd = header.cmd,
            ch = header.ch_id,
            pkt_len = header.pkt_len,
            pad_len = header.pad_len,
            "dropping frame"
        );
    }

    /// Keep the pipe alive: the receive side must never be left without
    /// a posted buffer. After `REPOST_ATTEMPTS` failures the pipe is
    /// stalled and only an error log remains.
    fn repost(&self) {
        for attempt in 1..=REPOST_ATTEMPTS {
            match self.post() {
                Ok(()) => return,
                Err(err) => {
                    self.stats.repost_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(%err, attempt, "failed to repost receive buffer");
                }
            }
        }
        tracing::error!("receive pipe stalled: no buffer posted");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;

    use dmapipe_transport::{CompletionHandler, TransferTag, TransportError};

    use super::*;

    #[derive(Default)]
    struct StubEndpoint {
        fail_submit: AtomicBool,
        submits: Mutex<Vec<(DmaAddr, usize, TransferTag)>>,
        retires: AtomicUsize,
    }

    impl BusEndpoint for StubEndpoint {
        fn submit(
            &self,
            addr: DmaAddr,
            len: usize,
            tag: TransferTag,
            _options: u32,
        ) -> dmapipe_transport::Result<()> {
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(TransportError::NotConnected);
            }
            self.submits.lock().unwrap().push((addr, len, tag));
            Ok(())
        }

        fn register_completion(
            &self,
            _handler: CompletionHandler,
        ) -> dmapipe_transport::Result<()> {
            Ok(())
        }

        fn retire(&self) -> dmapipe_transport::Result<()> {
            self.retires.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pipeline() -> (RxPipeline, Arc<StubEndpoint>, Arc<DmaArena>, Arc<MuxStats>) {
        let endpoint = Arc::new(StubEndpoint::default());
        let dma = Arc::new(DmaArena::new());
        let stats = Arc::new(MuxStats::default());
        let rx = RxPipeline::new(
            Arc::clone(&endpoint) as Arc<dyn BusEndpoint>,
            Arc::clone(&dma),
            Arc::clone(&stats),
            Arc::new(ChannelTable::new()),
            64,
        );
        (rx, endpoint, dma, stats)
    }

    #[test]
    fn post_maps_one_buffer_of_the_configured_size() {
        let (rx, endpoint, dma, _stats) = pipeline();

        rx.post().unwrap();

        let submits = endpoint.submits.lock().unwrap();
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].1, 64);
        assert_eq!(dma.mapped(), 1);
    }

    #[test]
    fn process_retires_dispatches_and_reposts() {
        let (rx, endpoint, dma, stats) = pipeline();
        rx.post().unwrap();
        let addr = endpoint.submits.lock().unwrap()[0].0;

        // Invalid magic: the frame is dropped, the pipe stays posted.
        dma.write(addr, &[0xAA, 0x55, 0, 0, 0, 0, 0, 0]).unwrap();
        rx.process();

        assert_eq!(endpoint.retires.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().rx_dropped, 1);
        assert_eq!(endpoint.submits.lock().unwrap().len(), 2);
        assert_eq!(dma.mapped(), 1);
    }

    #[test]
    fn repost_failure_is_bounded_and_counted() {
        let (rx, endpoint, dma, stats) = pipeline();
        rx.post().unwrap();

        endpoint.fail_submit.store(true, Ordering::SeqCst);
        rx.process();

        assert_eq!(stats.snapshot().repost_failures, 3);
        // Every failed attempt unwound its mapping; the pipe is stalled
        // with nothing posted.
        assert_eq!(dma.mapped(), 0);
        assert_eq!(endpoint.submits.lock().unwrap().len(), 1);
    }
}
