//! Sound file upload.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use slappybell::{Device, TransferProgress};
use std::fs;
use std::path::Path;

use super::control::report;
use crate::CliError;

/// Upload command implementation.
pub(crate) fn cmd_upload(device: &Device, file: &Path, name: Option<&str>, quiet: bool) -> Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => stored_name(file)?,
    };
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    if !quiet {
        eprintln!(
            "{} Uploading {} as {} ({} bytes)",
            style("📦").cyan(),
            file.display(),
            style(&name).bold(),
            data.len()
        );
    }

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(data.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .context("invalid progress template")?
                .progress_chars("#>-"),
        );
        pb
    };

    let bar = pb.clone();
    let reply = device.upload_with_progress(&name, data, move |progress: TransferProgress| {
        bar.set_length(progress.total_bytes);
        bar.set_position(progress.sent_bytes);
    });

    if reply.is_success() {
        pb.finish_with_message("done");
    } else {
        pb.abandon_with_message("failed");
    }
    report(&reply)
}

/// The device-side name for a local file.
fn stored_name(file: &Path) -> Result<String> {
    file.file_name()
        .and_then(|n| n.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| {
            CliError::Usage(format!(
                "Cannot derive a name from {}; pass --name",
                file.display()
            ))
            .into()
        })
}
