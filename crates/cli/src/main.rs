// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use pcie_harness_config::{HarnessConfig, PeerMode, REGISTER_BLOCK_BYTES};
use pcie_harness_core::bus::SimBus;
use pcie_harness_core::mmio::MappedBar;
use pcie_harness_core::selftest::{self, FileCompare, LoopbackConsole};
use pcie_harness_core::{
    Console, HarnessError, HarnessResult, PollPolicy, RegisterAccess, TransferOrchestrator,
    TransferPlan, TransferReport, Word,
};

const EXIT_PASS: u8 = 0;
const EXIT_SELFTEST_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

const BANNER: &str = "\n\n\nTest PCIE!\n\n\n";

fn parse_u64_addr(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(&hex.replace('_', ""), 16)
            .map_err(|e| format!("Invalid hex address '{}': {}", s, e))
    } else {
        u64::from_str(trimmed).map_err(|e| format!("Invalid address '{}': {}", s, e))
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "PCIe channel loopback harness",
    long_about = None
)]
struct Cli {
    /// Path to the harness config (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transmit burst length in dwords
    #[arg(long)]
    tx_length: Option<u32>,

    /// Transmit channel index
    #[arg(long)]
    tx_channel: Option<u32>,

    /// Receive buffer capacity in slots
    #[arg(long)]
    rx_capacity: Option<usize>,

    /// Give up waiting for receive ready after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Give up waiting for receive ready after this many status reads
    #[arg(long)]
    max_polls: Option<u64>,

    /// Simulated peer behaviour (echo, silent, scripted)
    #[arg(long)]
    peer: Option<PeerMode>,

    /// Simulated peer response latency in bus cycles
    #[arg(long)]
    latency: Option<u64>,

    /// Base address of the simulated channel block
    #[arg(long, value_parser = parse_u64_addr)]
    base_address: Option<u64>,

    /// Run against a mapped PCIe BAR resource file instead of the simulator
    #[arg(long)]
    bar: Option<PathBuf>,

    /// Offset of the channel block inside the BAR
    #[arg(long, value_parser = parse_u64_addr)]
    bar_offset: Option<u64>,

    /// Run the console file-transfer self-test after the round trip
    #[arg(long)]
    selftest: bool,

    /// Make the console host corrupt the self-test file (implies --selftest)
    #[arg(long)]
    corrupt_selftest: bool,

    /// Disable console stdout echo (still captured for artifacts)
    #[arg(long)]
    no_console_stdout: bool,

    /// Directory to write run artifacts (result.json, console.log)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Enable per-register tracing
    #[arg(short, long)]
    trace: bool,
}

#[derive(Debug, Serialize)]
struct RunResult {
    result_schema_version: String,
    status: String,
    exit_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transfer: Option<TransferReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selftest: Option<FileCompare>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bus_cycles: Option<u64>,
    config_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<HarnessConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peripherals: Option<serde_json::Value>,
}

impl RunResult {
    fn new(status: &str, exit_reason: &str) -> Self {
        Self {
            result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
            status: status.to_string(),
            exit_reason: exit_reason.to_string(),
            message: None,
            backend: None,
            transfer: None,
            selftest: None,
            bus_cycles: None,
            config_hash: String::new(),
            config: None,
            peripherals: None,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    run(cli)
}

fn run(cli: Cli) -> ExitCode {
    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            let msg = format!("{:#}", e);
            error!("{}", msg);
            let mut result = RunResult::new("error", "config_error");
            result.message = Some(msg);
            write_outputs(&cli, &result, None);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let config_hash = match config_hash(&config) {
        Ok(h) => h,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let plan = TransferPlan::from(&config.transfer);
    let policy = PollPolicy::from(&config.poll);
    let (mut console, console_sink) = Console::captured(!cli.no_console_stdout);
    console.puts(BANNER);

    let mut buffer = vec![0 as Word; plan.rx_capacity];
    let mut result = RunResult::new("pass", "completed");
    result.config_hash = config_hash;

    let (outcome, console) = match &cli.bar {
        Some(path) => {
            result.backend = Some("bar".to_string());
            let bar = match MappedBar::open(path) {
                Ok(bar) => bar,
                Err(e) => {
                    let msg = format!("Failed to map BAR {:?}: {}", path, e);
                    error!("{}", msg);
                    result.status = "error".to_string();
                    result.exit_reason = "bar_unavailable".to_string();
                    result.message = Some(msg);
                    result.config = Some(config);
                    write_outputs(&cli, &result, Some(&console_sink));
                    return ExitCode::from(EXIT_RUNTIME_ERROR);
                }
            };
            if (bar.len() as u64)
                < config
                    .peripheral
                    .bar_offset
                    .saturating_add(REGISTER_BLOCK_BYTES)
            {
                tracing::warn!(
                    "BAR {:?} is {} bytes; channel block at {:#x} runs past its end",
                    path,
                    bar.len(),
                    config.peripheral.bar_offset
                );
            }
            let base = config.peripheral.bar_offset;
            let (outcome, _bar, console) =
                run_transfer(bar, base, console, policy, &plan, &mut buffer);
            (outcome, console)
        }
        None => {
            result.backend = Some("simulated".to_string());
            let bus = match SimBus::from_config(&config) {
                Ok(bus) => bus,
                Err(e) => {
                    let msg = format!("{:#}", e);
                    error!("{}", msg);
                    result.status = "error".to_string();
                    result.exit_reason = "config_error".to_string();
                    result.message = Some(msg);
                    write_outputs(&cli, &result, Some(&console_sink));
                    return ExitCode::from(EXIT_CONFIG_ERROR);
                }
            };
            let base = config.peripheral.base_address;
            let (outcome, bus, console) =
                run_transfer(bus, base, console, policy, &plan, &mut buffer);
            result.bus_cycles = Some(bus.total_cycles);
            result.peripherals = Some(bus.snapshot());
            (outcome, console)
        }
    };

    let exit = match outcome {
        Ok(report) => {
            info!(
                "Round trip on channel {}: sent {} words, received {} words ({} dwords) after {} polls",
                report.tx_channel,
                report.sent.len(),
                report.received.len(),
                report.rx_length,
                report.polls
            );
            result.transfer = Some(report);
            if config.selftest.enabled {
                run_selftest(&config, console, &mut result)
            } else {
                EXIT_PASS
            }
        }
        Err(e) => {
            error!("Transfer failed: {}", e);
            result.status = "error".to_string();
            result.exit_reason = exit_reason(&e).to_string();
            result.message = Some(e.to_string());
            EXIT_RUNTIME_ERROR
        }
    };

    result.config = Some(config);
    write_outputs(&cli, &result, Some(&console_sink));
    ExitCode::from(exit)
}

fn run_transfer<B: RegisterAccess>(
    bus: B,
    base: u64,
    console: Console,
    policy: PollPolicy,
    plan: &TransferPlan,
    buffer: &mut [Word],
) -> (HarnessResult<TransferReport>, B, Console) {
    let mut orch = TransferOrchestrator::bind(bus, base, console).with_poll_policy(policy);
    let outcome = orch.run(plan, buffer);
    let (channel, console) = orch.into_parts();
    (outcome, channel.into_inner(), console)
}

fn run_selftest(config: &HarnessConfig, mut console: Console, result: &mut RunResult) -> u8 {
    let mut host = LoopbackConsole::new().with_corruption(config.selftest.corrupt_at);
    match selftest::file_self_test(
        &mut host,
        &mut console,
        &config.selftest.file_name,
        selftest::SELFTEST_TEXT,
    ) {
        Ok(outcome) => {
            result.selftest = Some(outcome);
            if outcome.is_match() {
                EXIT_PASS
            } else {
                result.status = "fail".to_string();
                result.exit_reason = "selftest_mismatch".to_string();
                EXIT_SELFTEST_FAIL
            }
        }
        Err(e) => {
            error!("Self-test failed: {}", e);
            result.status = "error".to_string();
            result.exit_reason = exit_reason(&e).to_string();
            result.message = Some(e.to_string());
            EXIT_RUNTIME_ERROR
        }
    }
}

fn exit_reason(e: &HarnessError) -> &'static str {
    match e {
        HarnessError::ReadyTimeout { .. } => "ready_timeout",
        HarnessError::Cancelled { .. } => "cancelled",
        HarnessError::CapacityExceeded { .. } => "capacity_exceeded",
        HarnessError::TransmitOverrun { .. } => "transmit_overrun",
        HarnessError::LengthMismatch { .. } => "length_mismatch",
        HarnessError::InvalidState { .. } => "invalid_state",
        HarnessError::MemoryViolation(_) => "memory_violation",
        HarnessError::BadAccess { .. } => "bad_access",
        HarnessError::MalformedFrame(_) => "malformed_frame",
        HarnessError::FileNotFound(_) => "file_not_found",
        HarnessError::Io(_) => "io_error",
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };

    if let Some(v) = cli.tx_length {
        config.transfer.tx_length = v;
    }
    if let Some(v) = cli.tx_channel {
        config.transfer.tx_channel = v;
    }
    if let Some(v) = cli.rx_capacity {
        config.transfer.rx_capacity = v;
    }
    if let Some(v) = cli.timeout_ms {
        config.poll.timeout_ms = Some(v);
    }
    if let Some(v) = cli.max_polls {
        config.poll.max_polls = Some(v);
    }
    if let Some(mode) = cli.peer {
        config.peer.mode = mode;
    }
    if let Some(v) = cli.latency {
        config.peer.latency_cycles = v;
    }
    if let Some(v) = cli.base_address {
        config.peripheral.base_address = v;
    }
    if let Some(v) = cli.bar_offset {
        config.peripheral.bar_offset = v;
    }
    if cli.selftest || cli.corrupt_selftest {
        config.selftest.enabled = true;
    }
    if cli.corrupt_selftest && config.selftest.corrupt_at.is_none() {
        config.selftest.corrupt_at = Some(0);
    }

    config
        .validate()
        .context("Invalid configuration after command-line overrides")?;
    Ok(config)
}

/// SHA-256 over the resolved config, so runs with the same effective
/// settings hash the same regardless of where each value came from.
fn config_hash(config: &HarnessConfig) -> anyhow::Result<String> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize resolved config")?;
    let mut hasher = Sha256::new();
    hasher.update(yaml.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn write_outputs(cli: &Cli, result: &RunResult, console: Option<&Arc<Mutex<Vec<u8>>>>) {
    let Some(output_dir) = &cli.output_dir else {
        return;
    };
    if let Err(e) = std::fs::create_dir_all(output_dir) {
        error!("Failed to create output directory {:?}: {}", output_dir, e);
        return;
    }

    write_json(&output_dir.join("result.json"), result);

    if let Some(sink) = console {
        let console_path = output_dir.join("console.log");
        let bytes = sink.lock().map(|g| g.clone()).unwrap_or_default();
        if let Err(e) = std::fs::write(&console_path, bytes) {
            error!("Failed to write console.log: {}", e);
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) {
    match std::fs::File::create(path) {
        Ok(f) => {
            if let Err(e) = serde_json::to_writer_pretty(f, value) {
                error!("Failed to write {:?}: {}", path, e);
            }
        }
        Err(e) => error!("Failed to create {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64_addr() {
        assert_eq!(parse_u64_addr("0x4000_0000"), Ok(0x4000_0000));
        assert_eq!(parse_u64_addr("0X20"), Ok(0x20));
        assert_eq!(parse_u64_addr(" 4096 "), Ok(4096));
        assert!(parse_u64_addr("0xZZ").is_err());
        assert!(parse_u64_addr("ten").is_err());
    }

    #[test]
    fn test_overrides_applied_and_validated() {
        let cli = Cli::parse_from([
            "pcie-harness",
            "--tx-length",
            "8",
            "--peer",
            "silent",
            "--max-polls",
            "10",
            "--corrupt-selftest",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.transfer.tx_length, 8);
        assert_eq!(config.peer.mode, PeerMode::Silent);
        assert_eq!(config.poll.max_polls, Some(10));
        assert!(config.selftest.enabled);
        assert_eq!(config.selftest.corrupt_at, Some(0));

        let cli = Cli::parse_from(["pcie-harness", "--rx-capacity", "0"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_config_hash_is_stable() {
        let a = config_hash(&HarnessConfig::default()).unwrap();
        let b = config_hash(&HarnessConfig::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let mut other = HarnessConfig::default();
        other.transfer.tx_length = 22;
        assert_ne!(a, config_hash(&other).unwrap());
    }
}
