use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod demo;
pub mod inspect;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run two engines over an in-process loopback and exchange frames.
    Demo(DemoArgs),
    /// Decode a hex-encoded frame header.
    Inspect(InspectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Demo(args) => demo::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Channel to exercise.
    #[arg(long, short = 'c', default_value = "1")]
    pub channel: u8,
    /// Payload sent from the left engine; the right engine echoes it.
    #[arg(long, default_value = "ping over the shared pipe")]
    pub data: String,
    /// Number of frames to send.
    #[arg(long, default_value = "4")]
    pub count: u32,
    /// Bring-up grace period for both engines, in milliseconds.
    #[arg(long, default_value = "50")]
    pub init_delay_ms: u64,
    /// Keep running and print the channel table until Ctrl-C.
    #[arg(long)]
    pub watch: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Hex-encoded frame bytes (at least one 8-byte header).
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Include build metadata.
    #[arg(long)]
    pub extended: bool,
}
