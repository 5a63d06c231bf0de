//! Subcommand implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use driver::{AccessMode, Device, attach};
use tracing::debug;
use transport::{UsbLink, list_boards};

use crate::config::CtlConfig;

/// The bank is only reported when it changes; a fresh attach waits this
/// long in case a report is already on the wire.
const FIRST_REPORT_WAIT: Duration = Duration::from_millis(250);

/// Wake-up granularity of the watch loop, so a disconnect is noticed.
const WATCH_POLL: Duration = Duration::from_secs(1);

pub fn list(config: &CtlConfig) -> Result<()> {
    let boards = list_boards(config.vendor_id, config.product_id)?;
    if boards.is_empty() {
        println!("no boards found");
        return Ok(());
    }
    for board in boards {
        println!(
            "bus {:03} device {:03}  {:04x}:{:04x}",
            board.bus, board.address, board.vendor_id, board.product_id
        );
    }
    Ok(())
}

pub fn switches(config: &CtlConfig) -> Result<()> {
    let device = open_board(config)?;
    device.wait_switch_change(FIRST_REPORT_WAIT);
    println!("{}", device.switch_string());
    device.disconnect();
    Ok(())
}

pub fn watch(config: &CtlConfig, count: Option<u64>) -> Result<()> {
    let device = open_board(config)?;
    println!("{}", device.switch_string());

    let mut seen = 0u64;
    loop {
        if !device.is_connected() {
            bail!("board disconnected");
        }
        if device.wait_switch_change(WATCH_POLL) {
            if !device.is_connected() {
                bail!("board disconnected");
            }
            println!("{}", device.switch_string());
            seen += 1;
            if count.is_some_and(|n| seen >= n) {
                break;
            }
        }
    }
    device.disconnect();
    Ok(())
}

pub fn read(config: &CtlConfig, len: usize) -> Result<()> {
    let device = open_board(config)?;
    let handle = device.open(AccessMode::Read)?;
    let data = handle.read(len)?;
    println!("{}", hex_dump(&data));
    drop(handle);
    device.disconnect();
    Ok(())
}

pub fn write(config: &CtlConfig, args: &[String]) -> Result<()> {
    let payload = parse_hex_bytes(args)?;
    let device = open_board(config)?;
    let handle = device.open(AccessMode::Write)?;
    let submitted = handle.write(&payload)?;
    println!("{submitted} bytes submitted");
    drop(handle);
    device.disconnect();
    Ok(())
}

pub fn status(config: &CtlConfig) -> Result<()> {
    let device = open_board(config)?;
    device.wait_switch_change(FIRST_REPORT_WAIT);
    println!("switches: {}", device.switch_string());
    println!(
        "bulk:     {}",
        if device.has_bulk_channel() {
            "present"
        } else {
            "absent (switch-only board)"
        }
    );
    println!("pending:  {} bytes", device.pending_data());
    device.disconnect();
    Ok(())
}

fn open_board(config: &CtlConfig) -> Result<Device> {
    debug!(
        "opening board {:04x}:{:04x}",
        config.vendor_id, config.product_id
    );
    let link = UsbLink::open(config.vendor_id, config.product_id).with_context(|| {
        format!(
            "opening board {:04x}:{:04x}",
            config.vendor_id, config.product_id
        )
    })?;
    Ok(attach(Arc::new(link))?)
}

fn parse_hex_bytes(args: &[String]) -> Result<Vec<u8>> {
    args.iter()
        .map(|arg| {
            let trimmed = arg.trim_start_matches("0x");
            u8::from_str_radix(trimmed, 16).with_context(|| format!("not a hex byte: {arg}"))
        })
        .collect()
}

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
