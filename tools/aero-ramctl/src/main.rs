mod config;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use aero_ramdisk::{
    CompletionSink, Controller, Device, InMemoryNamespace, RequestToken, Transaction, VecRegion,
};
use anyhow::{anyhow, bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::config::RamctlConfig;

const SELF_CHECK_TOKEN: RequestToken = 0x5e1f;
const RESTORE_TOKEN: RequestToken = 0x5e20;

#[derive(Parser, Debug)]
#[command(
    name = "aero-ramctl",
    about = "Configure RAM-backed block devices from a JSON description and report their geometry."
)]
struct Args {
    /// JSON file describing the controller limits and the disks to create
    #[arg(long, value_name = "PATH")]
    config: PathBuf,

    /// Write, read back and restore the last block of every disk
    #[arg(long, action = clap::ArgAction::SetTrue)]
    self_check: bool,

    /// Write the full contents of disk NAME to PATH before exiting (repeatable)
    #[arg(long, value_name = "NAME=PATH", value_parser = parse_dump)]
    dump: Vec<(String, PathBuf)>,

    /// Log filter directive (e.g. "debug" or "aero_ramdisk=trace")
    #[arg(long, env = "AERO_RAMCTL_LOG", default_value = "info")]
    log_level: String,
}

/// One line of stdout per configured disk.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiskReport {
    name: String,
    block_size: u64,
    block_count: u64,
    capacity_bytes: u64,
    image_bytes: u64,
}

fn parse_dump(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got {raw:?}"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got {raw:?}"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .with_context(|| format!("invalid log filter {:?}", args.log_level))?;
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    run(args)
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = RamctlConfig::load(&args.config)?;
    let controller = Controller::new(config.controller.clone(), Arc::new(InMemoryNamespace::new()))
        .context("invalid controller config")?;

    let result = run_disks(&controller, &config, &args);

    for name in controller.names() {
        if let Err(err) = controller.unlink_by_name(&name) {
            tracing::warn!(disk = %name, error = %err, "failed to unlink disk");
        }
    }
    result
}

fn run_disks(controller: &Controller, config: &RamctlConfig, args: &Args) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();

    for spec in &config.disks {
        let disk = controller
            .configure(&spec.disk)
            .with_context(|| format!("configure disk {:?}", spec.disk.name))?;

        let image_bytes = match &spec.image {
            Some(path) => load_image(&disk, path)?,
            None => 0,
        };

        let (block_size, block_count) = disk.block_geometry()?;
        let report = DiskReport {
            name: disk.name()?.to_string(),
            block_size,
            block_count,
            capacity_bytes: disk.size()?,
            image_bytes,
        };
        serde_json::to_writer(&mut stdout, &report).context("write report")?;
        writeln!(stdout).context("write report")?;
    }

    if args.self_check {
        for name in controller.names() {
            let disk = controller
                .lookup(&name)
                .ok_or_else(|| anyhow!("disk {name:?} vanished before self-check"))?;
            self_check(&disk).with_context(|| format!("self-check of disk {name:?}"))?;
            tracing::info!(disk = %name, "self-check passed");
        }
    }

    for (name, path) in &args.dump {
        let disk = controller
            .lookup(name)
            .ok_or_else(|| anyhow!("--dump names unknown disk {name:?}"))?;
        dump_disk(&disk, path)?;
    }

    Ok(())
}

/// Copies `path` to the start of `disk`, padded to a whole block and truncated to the capacity.
fn load_image(disk: &Device, path: &Path) -> anyhow::Result<u64> {
    let mut data = fs::read(path).with_context(|| format!("read image {}", path.display()))?;
    let name = disk.name()?;
    let geometry = disk.geometry()?;
    let block_size = geometry.block_size() as usize;
    let capacity = geometry.capacity_bytes() as usize;

    if data.len() > capacity {
        tracing::warn!(
            disk = name,
            image = %path.display(),
            image_len = data.len(),
            capacity,
            "image larger than disk; truncating"
        );
        data.truncate(capacity);
    }
    let padded = data.len().div_ceil(block_size) * block_size;
    data.resize(padded, 0);

    let mut txn = Transaction::write(0, data);
    let completion = disk.submit(&mut txn);
    completion
        .status
        .with_context(|| format!("load image {} into {name}", path.display()))?;
    tracing::debug!(disk = name, bytes = completion.actual, "image loaded");
    Ok(completion.actual)
}

fn self_check(disk: &Device) -> anyhow::Result<()> {
    let geometry = disk.geometry()?;
    let block_size = geometry.block_size();
    let offset = geometry.capacity_bytes() - block_size;
    let len = block_size as usize;

    let mut original = Transaction::read(offset, len);
    disk.submit(&mut original).status?;

    let pattern: Vec<u8> = (0..len).map(|i| (i as u8) ^ 0xA5).collect();
    let mut write = Transaction::write(offset, pattern.clone());
    disk.submit(&mut write).status?;

    let completions: CompletionLog = Arc::default();
    disk.set_completion_sink(recording_sink(&completions))?;

    let result = verify_async_roundtrip(disk, offset, original.data, &pattern, &completions);
    disk.clear_completion_sink();
    result
}

type CompletionLog = Arc<Mutex<Vec<(RequestToken, aero_ramdisk::Result<u64>)>>>;

/// A sink appending every completion to `completions`, even after a panic poisoned the lock.
fn recording_sink(completions: &CompletionLog) -> Arc<dyn CompletionSink> {
    let completions = completions.clone();
    Arc::new(move |token: RequestToken, status: aero_ramdisk::Result<u64>| {
        completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((token, status));
    })
}

/// Reads the block at `offset` back through the async path, then restores `original`.
fn verify_async_roundtrip(
    disk: &Device,
    offset: u64,
    original: Vec<u8>,
    pattern: &[u8],
    completions: &CompletionLog,
) -> anyhow::Result<()> {
    let block_size = disk.geometry()?.block_size();
    let readback = VecRegion::new(pattern.len());
    let restore = VecRegion::from_vec(original);

    disk.read_async(&readback, block_size, 0, offset, SELF_CHECK_TOKEN)?;
    disk.write_async(&restore, block_size, 0, offset, RESTORE_TOKEN)?;

    let log = completions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let expected: Vec<(RequestToken, aero_ramdisk::Result<u64>)> = vec![
        (SELF_CHECK_TOKEN, Ok(block_size)),
        (RESTORE_TOKEN, Ok(block_size)),
    ];
    if log != expected {
        bail!("unexpected completions: {log:?}");
    }
    if readback.to_vec() != pattern {
        bail!("read-back of block at offset {offset} does not match written pattern");
    }
    Ok(())
}

fn dump_disk(disk: &Device, path: &Path) -> anyhow::Result<()> {
    let name = disk.name()?;
    let mut txn = Transaction::read(0, disk.size()? as usize);
    disk.submit(&mut txn)
        .status
        .with_context(|| format!("read disk {name}"))?;
    fs::write(path, txn.transferred()).with_context(|| format!("write {}", path.display()))?;
    tracing::info!(disk = name, path = %path.display(), "disk dumped");
    Ok(())
}
