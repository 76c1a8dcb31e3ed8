use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use dmapipe_frame::Header;
use dmapipe_transport::{
    BusTransport, Direction, DmaArena, EndpointConfig, EventKind, ResourceGuard,
};

use crate::buf::PacketBuf;
use crate::channel::{ChannelHandler, ChannelTable, NUM_CHANNELS};
use crate::config::MuxConfig;
use crate::diag::ChannelStatus;
use crate::error::{MuxError, Result};
use crate::queue::{self, Task, TaskSender};
use crate::rx::RxPipeline;
use crate::stats::{MuxStats, StatsSnapshot};
use crate::tx::TxPipeline;

struct Pipes {
    tx: TxPipeline,
    rx: RxPipeline,
    // Dropped in declaration order: pipelines and their endpoints first,
    // then the device registration, then the register window.
    _device: ResourceGuard,
    _window: ResourceGuard,
}

struct EngineState {
    config: MuxConfig,
    transport: Arc<dyn BusTransport>,
    dma: Arc<DmaArena>,
    channels: Arc<ChannelTable>,
    stats: Arc<MuxStats>,
    queue: TaskSender,
    ready: AtomicBool,
    pipes: Mutex<Option<Arc<Pipes>>>,
}

impl EngineState {
    fn pipes(&self) -> Option<Arc<Pipes>> {
        self.pipes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_pipes(&self, pipes: Option<Arc<Pipes>>) {
        *self.pipes.lock().unwrap_or_else(PoisonError::into_inner) = pipes;
    }
}

/// The channel multiplexing engine.
///
/// Owns the channel table, the deferred-work queue and its worker
/// thread, and the transport bring-up state. Constructed with
/// [`Multiplexer::start`]; torn down by [`Multiplexer::shutdown`] or
/// drop.
pub struct Multiplexer {
    state: Arc<EngineState>,
    worker: Option<JoinHandle<()>>,
    init: Option<JoinHandle<()>>,
    cancel_init: mpsc::Sender<()>,
}

impl Multiplexer {
    /// Construct the engine and schedule the delayed transport bring-up.
    ///
    /// Registry operations fail with [`MuxError::NotReady`] until
    /// bring-up completes, `config.init_delay` after this call.
    pub fn start(transport: Arc<dyn BusTransport>, config: MuxConfig) -> Result<Self> {
        let stats = Arc::new(MuxStats::default());
        let (queue, tasks) = queue::channel(config.queue_depth, Arc::clone(&stats));
        let state = Arc::new(EngineState {
            dma: transport.dma(),
            transport,
            channels: Arc::new(ChannelTable::new()),
            stats,
            queue,
            ready: AtomicBool::new(false),
            pipes: Mutex::new(None),
            config,
        });

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("dmapipe-worker".into())
            .spawn(move || worker_loop(&worker_state, &tasks))
            .map_err(|source| MuxError::Spawn {
                name: "worker",
                source,
            })?;

        let (cancel_init, cancelled) = mpsc::channel();
        let init_state = Arc::clone(&state);
        let init = thread::Builder::new()
            .name("dmapipe-init".into())
            .spawn(move || init_loop(&init_state, &cancelled))
            .map_err(|source| MuxError::Spawn {
                name: "init",
                source,
            })?;

        Ok(Self {
            state,
            worker: Some(worker),
            init: Some(init),
            cancel_init,
        })
    }

    fn check_id(id: u8) -> Result<()> {
        if (id as usize) < NUM_CHANNELS {
            Ok(())
        } else {
            Err(MuxError::ChannelOutOfRange {
                id,
                max: NUM_CHANNELS,
            })
        }
    }

    fn ready_pipes(&self) -> Result<Arc<Pipes>> {
        if !self.state.ready.load(Ordering::Acquire) {
            return Err(MuxError::NotReady);
        }
        self.state.pipes().ok_or(MuxError::NotReady)
    }

    /// Open `id` for local use and announce it to the peer.
    ///
    /// Returns without waiting for the peer: the channel becomes usable
    /// for data once the peer's own OPEN arrives. A second open on a
    /// fully open channel is a no-op and sends nothing.
    pub fn open(&self, id: u8, handler: Arc<dyn ChannelHandler>) -> Result<()> {
        Self::check_id(id)?;
        let pipes = self.ready_pipes()?;
        if !self.state.channels.open_local(id, handler) {
            tracing::debug!(ch = id, "channel already open");
            return Ok(());
        }
        tracing::debug!(ch = id, "opening channel");
        pipes.tx.submit_control(Header::open(id))
    }

    /// Close `id` locally and announce the close to the peer.
    ///
    /// In-flight transfers for the channel are not cancelled; their
    /// completions are dropped for lack of a handler.
    pub fn close(&self, id: u8) -> Result<()> {
        Self::check_id(id)?;
        let pipes = self.ready_pipes()?;
        self.state.channels.close_local(id);
        tracing::debug!(ch = id, "closing channel");
        pipes.tx.submit_control(Header::close(id))
    }

    /// Write one payload to a fully open channel.
    ///
    /// Consumption is reported through the handler's `on_write_done`.
    /// There is no retry on submission failure; callers retry writes
    /// themselves.
    pub fn write(&self, id: u8, buf: PacketBuf) -> Result<()> {
        Self::check_id(id)?;
        let pipes = self.ready_pipes()?;
        if !self.state.channels.is_open(id) {
            return Err(MuxError::ChannelNotOpen { id });
        }
        pipes.tx.submit_data(id, buf)
    }

    /// Bring-up has completed and the engine accepts traffic.
    pub fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire)
    }

    /// Both sides have the channel open.
    pub fn is_open(&self, id: u8) -> bool {
        self.state.channels.is_open(id)
    }

    pub fn is_local_open(&self, id: u8) -> bool {
        self.state.channels.is_local_open(id)
    }

    pub fn is_remote_open(&self, id: u8) -> bool {
        self.state.channels.is_remote_open(id)
    }

    /// Read-only per-channel open state, one entry per channel.
    pub fn channel_table(&self) -> Vec<ChannelStatus> {
        (0..NUM_CHANNELS as u8)
            .map(|id| ChannelStatus {
                id,
                local_open: self.state.channels.is_local_open(id),
                remote_open: self.state.channels.is_remote_open(id),
            })
            .collect()
    }

    /// Point-in-time debug counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }

    /// Stop the worker and init threads and release the transport
    /// resources in reverse acquisition order.
    pub fn shutdown(&mut self) {
        let _ = self.cancel_init.send(());
        if let Some(init) = self.init.take() {
            let _ = init.join();
        }
        self.state.ready.store(false, Ordering::Release);
        if self.worker.is_some() {
            self.state.queue.push_blocking(Task::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.state.set_pipes(None);
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(state: &EngineState, tasks: &mpsc::Receiver<Task>) {
    while let Ok(task) = tasks.recv() {
        if let Task::Shutdown = task {
            break;
        }
        let Some(pipes) = state.pipes() else {
            tracing::warn!(?task, "deferred task before bring-up");
            continue;
        };
        match task {
            Task::RxComplete => pipes.rx.process(),
            Task::TxComplete(tag) => pipes.tx.complete(tag),
            Task::WriteDone => pipes.tx.write_done(),
            Task::RetireTx => pipes.tx.retire(),
            Task::Shutdown => {}
        }
    }
    tracing::debug!("worker stopped");
}

fn init_loop(state: &Arc<EngineState>, cancelled: &mpsc::Receiver<()>) {
    match cancelled.recv_timeout(state.config.init_delay) {
        Err(RecvTimeoutError::Timeout) => {}
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            tracing::debug!("bring-up cancelled");
            return;
        }
    }
    if let Err(err) = bring_up(state) {
        tracing::error!(%err, "transport bring-up failed");
    }
}

/// One-shot transport bring-up.
///
/// Every step hands back an owned resource, so an early return releases
/// everything already acquired in reverse order.
fn bring_up(state: &Arc<EngineState>) -> Result<()> {
    let config = &state.config;
    tracing::info!("starting transport bring-up");

    let window = state
        .transport
        .map_registers(config.device.phys_base, config.device.window_size)
        .map_err(|source| MuxError::BringUp {
            step: "map registers",
            source,
        })?;

    let device = state
        .transport
        .register_device(&config.device)
        .map_err(|source| MuxError::BringUp {
            step: "register device",
            source,
        })?;

    let tx_endpoint = state
        .transport
        .connect(&EndpointConfig {
            direction: Direction::ToPeer,
            pipe_index: config.tx_pipe_index,
            descriptor_region: config.descriptor_region,
            event_threshold: config.event_threshold,
        })
        .map_err(|source| MuxError::BringUp {
            step: "connect tx endpoint",
            source,
        })?;

    let rx_endpoint = state
        .transport
        .connect(&EndpointConfig {
            direction: Direction::FromPeer,
            pipe_index: config.rx_pipe_index,
            descriptor_region: config.descriptor_region,
            event_threshold: config.event_threshold,
        })
        .map_err(|source| MuxError::BringUp {
            step: "connect rx endpoint",
            source,
        })?;

    let queue = state.queue.clone();
    tx_endpoint
        .register_completion(Arc::new(move |event| match event.kind {
            EventKind::EndOfTransfer => queue.push(Task::TxComplete(event.tag)),
            EventKind::Other(id) => tracing::error!(event = id, "unexpected tx event"),
        }))
        .map_err(|source| MuxError::BringUp {
            step: "register tx completion",
            source,
        })?;

    let queue = state.queue.clone();
    rx_endpoint
        .register_completion(Arc::new(move |event| match event.kind {
            EventKind::EndOfTransfer => queue.push(Task::RxComplete),
            EventKind::Other(id) => tracing::error!(event = id, "unexpected rx event"),
        }))
        .map_err(|source| MuxError::BringUp {
            step: "register rx completion",
            source,
        })?;

    let pipes = Arc::new(Pipes {
        tx: TxPipeline::new(
            tx_endpoint,
            Arc::clone(&state.dma),
            Arc::clone(&state.stats),
            Arc::clone(&state.channels),
            state.queue.clone(),
            config.max_in_flight,
        ),
        rx: RxPipeline::new(
            rx_endpoint,
            Arc::clone(&state.dma),
            Arc::clone(&state.stats),
            Arc::clone(&state.channels),
            config.buffer_size,
        ),
        _device: device,
        _window: window,
    });

    state.set_pipes(Some(Arc::clone(&pipes)));
    state.ready.store(true, Ordering::Release);

    if let Err(err) = pipes.rx.post() {
        state.ready.store(false, Ordering::Release);
        state.set_pipes(None);
        return Err(err);
    }

    tracing::info!("transport bring-up complete");
    Ok(())
}
