use dmapipe_frame::{decode_header, Command, Header, HEADER_SIZE};

use crate::cmd::InspectArgs;
use crate::exit::{frame_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)?;
    let header = decode_header(&bytes).map_err(|err| frame_error("decode header", err))?;

    print_header(&header, bytes.len(), format);
    Ok(SUCCESS)
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if !cleaned.is_ascii() {
        return Err(CliError::new(DATA_INVALID, "hex input must be ascii"));
    }
    if cleaned.len() % 2 != 0 {
        return Err(CliError::new(
            DATA_INVALID,
            "hex input must have an even number of digits",
        ));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| CliError::new(DATA_INVALID, format!("invalid hex at offset {i}")))
        })
        .collect()
}

fn command_name(header: &Header) -> &'static str {
    match header.command() {
        Some(Command::Data) => "DATA",
        Some(Command::Open) => "OPEN",
        Some(Command::Close) => "CLOSE",
        None => "UNKNOWN",
    }
}

fn print_header(header: &Header, input_len: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "cmd": header.cmd,
                    "command": command_name(header),
                    "channel": header.ch_id,
                    "pkt_len": header.pkt_len,
                    "pad_len": header.pad_len,
                    "reserved": header.reserved,
                    "frame_len": header.frame_len(),
                    "input_len": input_len,
                })
            );
        }
        OutputFormat::Table => {
            println!("command:   {} ({})", command_name(header), header.cmd);
            println!("channel:   {}", header.ch_id);
            println!("pkt_len:   {}", header.pkt_len);
            println!("pad_len:   {}", header.pad_len);
            println!("frame_len: {}", header.frame_len());
            if input_len > HEADER_SIZE {
                println!("payload:   {} input bytes after header", input_len - HEADER_SIZE);
            }
        }
    }
}
