// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::regs::{self, RxStatus};
use crate::{AccessWidth, HarnessError, HarnessResult, Peripheral, PeripheralTickResult, Word};
use pcie_harness_config::{PeerConfig, PeerMode};
use std::any::Any;
use std::collections::VecDeque;

/// What the device on the far side of the link does with a completed
/// transmit burst.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum PeerBehavior {
    /// Send the burst straight back with the same length.
    #[default]
    Echo,
    /// Swallow the burst and never raise ready.
    Silent,
    /// Answer every burst with fixed words. `reported_len` overrides the
    /// length register, which lets tests model a lying peer.
    Scripted {
        words: Vec<Word>,
        reported_len: Option<u32>,
    },
}

impl From<&PeerConfig> for PeerBehavior {
    fn from(config: &PeerConfig) -> Self {
        match config.mode {
            PeerMode::Echo => Self::Echo,
            PeerMode::Silent => Self::Silent,
            PeerMode::Scripted => Self::Scripted {
                words: config.words.clone(),
                reported_len: config.reported_length,
            },
        }
    }
}

/// A burst the model has seen leave on the transmit side.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TxBurst {
    pub channel: u32,
    pub len: u32,
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, serde::Serialize)]
struct PendingBurst {
    due: u64,
    len: u32,
    words: Vec<Word>,
}

/// FIFO-backed PCIe channel block with a simulated peer.
#[derive(Debug, Default, serde::Serialize)]
pub struct PcieChannel {
    peer: PeerBehavior,
    latency_cycles: u64,
    cycle: u64,

    tx_channel: u32,
    tx_len: u32,
    tx_open: bool,
    tx_fifo: Vec<Word>,
    transmitted: Vec<TxBurst>,
    tx_dropped: u64,

    pending: Option<PendingBurst>,
    rx_len: u32,
    rx_fifo: VecDeque<Word>,
    rx_ready: bool,
    bursts_published: u64,
    rx_underflows: u64,
}

impl PcieChannel {
    pub fn new(peer: PeerBehavior) -> Self {
        Self {
            peer,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, cycles: u64) -> Self {
        self.latency_cycles = cycles;
        self
    }

    pub fn from_config(config: &PeerConfig) -> Self {
        Self::new(PeerBehavior::from(config)).with_latency(config.latency_cycles)
    }

    pub fn transmitted(&self) -> &[TxBurst] {
        &self.transmitted
    }

    pub fn is_rx_ready(&self) -> bool {
        self.rx_ready
    }

    pub fn rx_remaining(&self) -> usize {
        self.rx_fifo.len()
    }

    pub fn bursts_published(&self) -> u64 {
        self.bursts_published
    }

    pub fn tx_dropped(&self) -> u64 {
        self.tx_dropped
    }

    pub fn rx_underflows(&self) -> u64 {
        self.rx_underflows
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    fn open_tx(&mut self, len: u32) {
        if self.tx_open && !self.tx_fifo.is_empty() {
            tracing::warn!(
                "PCIe TX length rewritten with {} of {} words pending; discarding",
                self.tx_fifo.len(),
                regs::words_for_len(self.tx_len)
            );
        }
        self.tx_len = len;
        self.tx_fifo.clear();
        self.tx_open = true;
        if regs::words_for_len(len) == 0 {
            self.complete_tx();
        }
    }

    fn push_tx(&mut self, word: Word) {
        if !self.tx_open {
            // Hardware truncates data beyond the declared length.
            self.tx_dropped += 1;
            tracing::warn!("PCIe TX push {:#x} with no open burst dropped", word);
            return;
        }
        self.tx_fifo.push(word);
        if self.tx_fifo.len() == regs::words_for_len(self.tx_len) {
            self.complete_tx();
        }
    }

    fn complete_tx(&mut self) {
        self.tx_open = false;
        let burst = TxBurst {
            channel: self.tx_channel,
            len: self.tx_len,
            words: std::mem::take(&mut self.tx_fifo),
        };
        tracing::debug!(
            "PCIe TX burst complete on channel {}: {} dwords, {} words",
            burst.channel,
            burst.len,
            burst.words.len()
        );

        let response = match &self.peer {
            PeerBehavior::Echo => Some((burst.len, burst.words.clone())),
            PeerBehavior::Silent => None,
            PeerBehavior::Scripted {
                words,
                reported_len,
            } => {
                let carried = (words.len() as u32) * regs::DWORDS_PER_WORD;
                Some((reported_len.unwrap_or(carried), words.clone()))
            }
        };

        if let Some((len, words)) = response {
            self.pending = Some(PendingBurst {
                due: self.cycle + self.latency_cycles,
                len,
                words,
            });
        }
        self.transmitted.push(burst);
    }

    fn publish(&mut self, burst: PendingBurst) {
        if self.rx_ready && !self.rx_fifo.is_empty() {
            tracing::warn!(
                "PCIe RX burst replaced with {} words unread",
                self.rx_fifo.len()
            );
        }
        // Length and data land before the ready flag.
        self.rx_len = burst.len;
        self.rx_fifo = burst.words.into();
        self.rx_ready = true;
        self.bursts_published += 1;
        tracing::debug!(
            "PCIe RX burst published at cycle {}: {} dwords",
            self.cycle,
            self.rx_len
        );
    }

    fn pop_rx(&mut self) -> Word {
        match self.rx_fifo.pop_front() {
            Some(word) => {
                if self.rx_fifo.is_empty() {
                    self.rx_ready = false;
                }
                word
            }
            None => {
                self.rx_underflows += 1;
                tracing::warn!("PCIe RX pop on empty FIFO");
                0
            }
        }
    }

    fn check_width(offset: u64, width: AccessWidth) -> HarnessResult<()> {
        match regs::describe(offset) {
            Some((_, expected)) if expected == width => Ok(()),
            _ => Err(HarnessError::BadAccess { offset, width }),
        }
    }

    fn status(&self) -> RxStatus {
        if self.rx_ready {
            RxStatus::READY
        } else {
            RxStatus::empty()
        }
    }
}

impl Peripheral for PcieChannel {
    fn read(&mut self, offset: u64, width: AccessWidth) -> HarnessResult<u64> {
        Self::check_width(offset, width)?;
        match offset {
            regs::RXCHNL => Ok(self.status().bits() as u64),
            regs::RXCHNL_LEN => Ok(self.rx_len as u64),
            regs::RXCHNL_DATA => Ok(self.pop_rx()),
            _ => Err(HarnessError::BadAccess { offset, width }),
        }
    }

    fn write(&mut self, offset: u64, width: AccessWidth, value: u64) -> HarnessResult<()> {
        Self::check_width(offset, width)?;
        match offset {
            regs::TXCHNL => self.tx_channel = value as u32,
            regs::TXCHNL_LEN => self.open_tx(value as u32),
            regs::TXCHNL_DATA => self.push_tx(value),
            _ => return Err(HarnessError::BadAccess { offset, width }),
        }
        Ok(())
    }

    fn peek(&self, offset: u64, width: AccessWidth) -> Option<u64> {
        Self::check_width(offset, width).ok()?;
        match offset {
            regs::TXCHNL => Some(self.tx_channel as u64),
            regs::TXCHNL_LEN => Some(self.tx_len as u64),
            regs::RXCHNL => Some(self.status().bits() as u64),
            regs::RXCHNL_LEN => Some(self.rx_len as u64),
            regs::RXCHNL_DATA => self.rx_fifo.front().copied(),
            _ => None,
        }
    }

    fn tick(&mut self) -> PeripheralTickResult {
        self.cycle += 1;
        let due = self
            .pending
            .as_ref()
            .is_some_and(|burst| burst.due <= self.cycle);
        if due {
            if let Some(burst) = self.pending.take() {
                self.publish(burst);
                return PeripheralTickResult { cycles: 1 };
            }
        }
        PeripheralTickResult::default()
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
