use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dmapipe_mux::{ChannelStatus, StatsSnapshot};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ChannelRow {
    id: u8,
    local_open: bool,
    remote_open: bool,
    open: bool,
}

impl From<&ChannelStatus> for ChannelRow {
    fn from(status: &ChannelStatus) -> Self {
        Self {
            id: status.id,
            local_open: status.local_open,
            remote_open: status.remote_open,
            open: status.is_open(),
        }
    }
}

#[derive(Serialize)]
struct StatsOut {
    read_bytes: u64,
    write_bytes: u64,
    write_copies: u64,
    write_copy_bytes: u64,
    rx_dropped: u64,
    queue_overflows: u64,
    repost_failures: u64,
}

impl From<&StatsSnapshot> for StatsOut {
    fn from(snap: &StatsSnapshot) -> Self {
        Self {
            read_bytes: snap.read_bytes,
            write_bytes: snap.write_bytes,
            write_copies: snap.write_copies,
            write_copy_bytes: snap.write_copy_bytes,
            rx_dropped: snap.rx_dropped,
            queue_overflows: snap.queue_overflows,
            repost_failures: snap.repost_failures,
        }
    }
}

pub fn print_channel_table(label: &str, channels: &[ChannelStatus], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rows: Vec<ChannelRow> = channels.iter().map(ChannelRow::from).collect();
            println!(
                "{}",
                serde_json::json!({ "side": label, "channels": rows })
            );
        }
        OutputFormat::Table => {
            println!("{label}");
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(["channel", "local open", "remote open"]);
            for status in channels {
                table.add_row([
                    format!("ch{:02}", status.id),
                    yn(status.local_open).to_string(),
                    yn(status.remote_open).to_string(),
                ]);
            }
            println!("{table}");
        }
    }
}

pub fn print_stats(label: &str, snapshot: &StatsSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "side": label, "stats": StatsOut::from(snapshot) })
            );
        }
        OutputFormat::Table => {
            println!("{label}");
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(["counter", "value"]);
            table.add_row(["read bytes".to_string(), snapshot.read_bytes.to_string()]);
            table.add_row(["write bytes".to_string(), snapshot.write_bytes.to_string()]);
            table.add_row(["write copies".to_string(), snapshot.write_copies.to_string()]);
            table.add_row([
                "write copy bytes".to_string(),
                snapshot.write_copy_bytes.to_string(),
            ]);
            table.add_row(["rx dropped".to_string(), snapshot.rx_dropped.to_string()]);
            table.add_row([
                "queue overflows".to_string(),
                snapshot.queue_overflows.to_string(),
            ]);
            table.add_row([
                "repost failures".to_string(),
                snapshot.repost_failures.to_string(),
            ]);
            println!("{table}");
        }
    }
}

fn yn(flag: bool) -> &'static str {
    if flag {
        "Y"
    } else {
        "N"
    }
}
