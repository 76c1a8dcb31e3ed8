use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dmapipe_mux::{ChannelHandler, Multiplexer, MuxConfig, PacketBuf};
use dmapipe_transport::{BusTransport, LoopbackTransport};

use crate::cmd::DemoArgs;
use crate::exit::{mux_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_channel_table, print_stats, OutputFormat};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Forwards received payloads to the main thread.
struct ForwardingHandler {
    received: Sender<Bytes>,
}

impl ChannelHandler for ForwardingHandler {
    fn on_receive(&self, payload: Bytes) {
        let _ = self.received.send(payload);
    }

    fn on_write_done(&self, payload: Bytes) {
        tracing::debug!(len = payload.len(), "write consumed by the transport");
    }
}

fn forwarding() -> (Arc<ForwardingHandler>, Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(ForwardingHandler { received: tx }), rx)
}

pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let config = MuxConfig {
        init_delay: Duration::from_millis(args.init_delay_ms),
        ..MuxConfig::default()
    };

    let (left_transport, right_transport) = LoopbackTransport::pair();
    let left = Multiplexer::start(Arc::new(left_transport) as Arc<dyn BusTransport>, config.clone())
        .map_err(|err| mux_error("start left engine", err))?;
    let right = Multiplexer::start(Arc::new(right_transport) as Arc<dyn BusTransport>, config)
        .map_err(|err| mux_error("start right engine", err))?;

    wait_for(
        || left.is_ready() && right.is_ready(),
        Duration::from_millis(args.init_delay_ms) + RECV_TIMEOUT,
        "transport bring-up",
    )?;
    tracing::info!("both engines ready");

    let (left_handler, left_received) = forwarding();
    let (right_handler, right_received) = forwarding();
    left.open(args.channel, left_handler)
        .map_err(|err| mux_error("open left channel", err))?;
    right
        .open(args.channel, right_handler)
        .map_err(|err| mux_error("open right channel", err))?;

    wait_for(
        || left.is_open(args.channel) && right.is_open(args.channel),
        RECV_TIMEOUT,
        "channel handshake",
    )?;
    tracing::info!(ch = args.channel, "channel open on both sides");

    let mut echoed = 0u32;
    for seq in 0..args.count {
        left.write(args.channel, PacketBuf::from_payload(args.data.as_bytes()))
            .map_err(|err| mux_error("write", err))?;

        let inbound = right_received
            .recv_timeout(RECV_TIMEOUT)
            .map_err(|_| CliError::new(TIMEOUT, "timed out waiting for frame at the peer"))?;
        tracing::debug!(seq, len = inbound.len(), "peer received frame");

        right
            .write(args.channel, PacketBuf::from_payload(&inbound))
            .map_err(|err| mux_error("echo write", err))?;
        let echo = left_received
            .recv_timeout(RECV_TIMEOUT)
            .map_err(|_| CliError::new(TIMEOUT, "timed out waiting for the echo"))?;
        if echo.as_ref() == args.data.as_bytes() {
            echoed += 1;
        }
    }

    println!("sent {} frame(s), {} echo(es) verified", args.count, echoed);
    print_channel_table("left", &left.channel_table(), format);
    print_channel_table("right", &right.channel_table(), format);
    print_stats("left", &left.stats(), format);
    print_stats("right", &right.stats(), format);

    if args.watch {
        watch(&left, &right, format)?;
    }

    Ok(SUCCESS)
}

fn wait_for(
    mut condition: impl FnMut() -> bool,
    timeout: Duration,
    what: &str,
) -> CliResult<()> {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    Err(CliError::new(TIMEOUT, format!("timed out waiting for {what}")))
}

fn watch(left: &Multiplexer, right: &Multiplexer, format: OutputFormat) -> CliResult<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_flag.store(true, Ordering::SeqCst))
        .map_err(|err| CliError::new(crate::exit::INTERNAL, format!("signal handler: {err}")))?;

    tracing::info!("watching channel state, Ctrl-C to stop");
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
        print_channel_table("left", &left.channel_table(), format);
        print_channel_table("right", &right.channel_table(), format);
    }
    Ok(())
}
