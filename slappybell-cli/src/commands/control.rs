//! Reply reporting and the file listing.

use anyhow::Result;
use console::style;
use slappybell::{Device, FileListing, Message, ResultCode};

use crate::CliError;

/// Print a reply and fail when the bell did not report success.
pub(crate) fn report(reply: &Message) -> Result<()> {
    if reply.is_success() {
        println!("{}", format_reply(reply));
        Ok(())
    } else {
        Err(CliError::Rejected(format_reply(reply)).into())
    }
}

/// Print a Wi-Fi status reply.
///
/// Every Wi-Fi state the bell reports is an answer, not a failure; only
/// host-side errors and command failures are rejected.
pub(crate) fn report_status(reply: &Message) -> Result<()> {
    let answered = reply
        .code()
        .is_some_and(|code| {
            code == ResultCode::Success || code == ResultCode::NoWifiConnection || code.is_wifi_status()
        });
    if answered {
        println!("{}", format_reply(reply));
        Ok(())
    } else {
        Err(CliError::Rejected(format_reply(reply)).into())
    }
}

fn format_reply(reply: &Message) -> String {
    let code = reply
        .code()
        .map(|c| c.to_string())
        .unwrap_or_default();
    let code = if reply.is_success() {
        style(code).green()
    } else {
        style(code).red()
    };
    match reply.body() {
        Some(body) => format!("{code} {}\n{body}", reply.message()),
        None => format!("{code} {}", reply.message()),
    }
}

/// Files command implementation.
pub(crate) fn cmd_files(device: &Device, json: bool) -> Result<()> {
    let listing = match device.list_files() {
        Ok(listing) => listing,
        Err(reply) => return Err(CliError::Rejected(format_reply(&reply)).into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for line in listing_lines(&listing) {
            println!("{line}");
        }
    }
    Ok(())
}

fn listing_lines(listing: &FileListing) -> Vec<String> {
    let mut lines: Vec<String> = listing
        .files
        .iter()
        .map(|file| match file.size {
            Some(size) => format!("{:<32} {size:>10}", file.name),
            None => file
                .name
                .clone(),
        })
        .collect();

    if let (Some(used), Some(total)) = (listing.storage_used, listing.storage_total) {
        lines.push(format!("Storage: {used} / {total} bytes used"));
    }
    lines
}
