// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SCHEMA_VERSION: &str = "1.0";

/// Bytes spanned by TXCHNL..RXCHNL_DATA.
pub const REGISTER_BLOCK_BYTES: u64 = 0x20;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_name() -> String {
    "pcie-loopback".to_string()
}

fn default_base_address() -> u64 {
    0x4000_0000
}

fn default_window_size() -> String {
    "4KiB".to_string()
}

fn default_tx_channel() -> u32 {
    1
}

fn default_tx_length() -> u32 {
    20
}

fn default_rx_capacity() -> usize {
    100
}

fn default_file_name() -> String {
    "Sendfile.txt".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PeripheralConfig {
    #[serde(default = "default_base_address")]
    pub base_address: u64,
    /// Size of the mapped window, e.g. "4KiB".
    #[serde(default = "default_window_size")]
    pub size: String,
    /// Offset of the register block inside a mapped BAR file.
    #[serde(default)]
    pub bar_offset: u64,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            base_address: default_base_address(),
            size: default_window_size(),
            bar_offset: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    #[serde(default = "default_tx_channel")]
    pub tx_channel: u32,
    /// Transmit burst length in dwords.
    #[serde(default = "default_tx_length")]
    pub tx_length: u32,
    /// Slots in the local receive buffer.
    #[serde(default = "default_rx_capacity")]
    pub rx_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            tx_channel: default_tx_channel(),
            tx_length: default_tx_length(),
            rx_capacity: default_rx_capacity(),
        }
    }
}

/// Readiness poll limits. Both unset means wait indefinitely.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_polls: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerMode {
    #[default]
    #[serde(alias = "loopback")]
    Echo,
    Silent,
    Scripted,
}

impl std::str::FromStr for PeerMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "echo" | "loopback" => Ok(Self::Echo),
            "silent" => Ok(Self::Silent),
            "scripted" => Ok(Self::Scripted),
            _ => Err(format!(
                "unsupported peer mode '{}'; supported: echo, silent, scripted",
                value
            )),
        }
    }
}

/// Behaviour of the simulated device on the far side of the channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    #[serde(default)]
    pub mode: PeerMode,
    /// Cycles between transmit completion and receive readiness.
    #[serde(default)]
    pub latency_cycles: u64,
    /// Words returned by a scripted peer.
    #[serde(default)]
    pub words: Vec<u64>,
    /// Length (dwords) a scripted peer reports; defaults to the words carried.
    #[serde(default)]
    pub reported_length: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SelfTestConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Byte offset the console host corrupts when serving the file back.
    #[serde(default)]
    pub corrupt_at: Option<usize>,
}

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file_name: default_file_name(),
            corrupt_at: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub peripheral: PeripheralConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub selftest: SelfTestConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            name: default_name(),
            peripheral: PeripheralConfig::default(),
            transfer: TransferConfig::default(),
            poll: PollConfig::default(),
            peer: PeerConfig::default(),
            selftest: SelfTestConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to open harness config at {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Harness Config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '{}'",
                self.schema_version,
                SCHEMA_VERSION
            );
        }

        let window = self.window_size()?;
        if window < REGISTER_BLOCK_BYTES {
            anyhow::bail!(
                "Peripheral 'size' must cover the 32-byte register block, got {} bytes",
                window
            );
        }

        if self.peripheral.base_address % 8 != 0 {
            anyhow::bail!(
                "Peripheral 'base_address' {:#x} must be 8-byte aligned",
                self.peripheral.base_address
            );
        }

        if self.peripheral.bar_offset % 8 != 0 {
            anyhow::bail!(
                "Peripheral 'bar_offset' {:#x} must be 8-byte aligned",
                self.peripheral.bar_offset
            );
        }

        if self.peripheral.base_address.checked_add(window).is_none() {
            anyhow::bail!(
                "Peripheral window at {:#x} ({} bytes) runs past the end of the address space",
                self.peripheral.base_address,
                window
            );
        }

        if self
            .peripheral
            .bar_offset
            .checked_add(REGISTER_BLOCK_BYTES)
            .is_none()
        {
            anyhow::bail!(
                "Peripheral 'bar_offset' {:#x} runs past the end of the address space",
                self.peripheral.bar_offset
            );
        }

        if self.transfer.rx_capacity == 0 {
            anyhow::bail!("Transfer 'rx_capacity' must be greater than zero");
        }

        if self.poll.max_polls == Some(0) {
            anyhow::bail!("Poll 'max_polls' must be greater than zero when set");
        }

        if self.peer.mode == PeerMode::Scripted
            && self.peer.words.is_empty()
            && self.peer.reported_length.is_none()
        {
            anyhow::bail!("Scripted peer needs 'words' or 'reported_length'");
        }

        if self.peer.mode != PeerMode::Scripted && !self.peer.words.is_empty() {
            tracing::warn!(
                "Peer 'words' are ignored in {:?} mode",
                self.peer.mode
            );
        }

        if self.selftest.file_name.trim().is_empty() {
            anyhow::bail!("Self-test 'file_name' cannot be empty");
        }

        Ok(())
    }

    /// Mapped window size in bytes.
    pub fn window_size(&self) -> Result<u64> {
        parse_size(&self.peripheral.size)
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
