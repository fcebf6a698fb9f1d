// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Channel register interface.
//!
//! [`ChannelInterface`] is the only thing that touches the channel block.
//! Each operation is exactly one register access. The interface tracks the
//! software-visible protocol state:
//!
//! ```text
//! BOUND -> TX_CONFIGURED -> TX_DRAINING -> TX_DONE
//!       -> RX_WAITING -> RX_READY -> RX_DRAINING -> RX_DONE
//! ```
//!
//! Transitions only move forward. `RX_WAITING -> RX_READY` is driven by the
//! hardware ready flag; everything else by software calls. An unbound
//! interface cannot be constructed.

use crate::regs::{self, RxStatus};
use crate::{HarnessError, HarnessResult, RegisterAccess, Word};
use pcie_harness_config::PollConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Bound,
    TxConfigured,
    TxDraining,
    TxDone,
    RxWaiting,
    RxReady,
    RxDraining,
    RxDone,
}

/// Shared flag that aborts a readiness wait from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Limits for [`ChannelInterface::wait_receive_ready`]. The default waits
/// forever.
#[derive(Debug, Clone, Default)]
pub struct PollPolicy {
    pub timeout: Option<Duration>,
    pub max_polls: Option<u64>,
    pub cancel: Option<CancelToken>,
}

impl PollPolicy {
    pub fn indefinite() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_polls(mut self, polls: u64) -> Self {
        self.max_polls = Some(polls);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.timeout.is_some() || self.max_polls.is_some() || self.cancel.is_some()
    }
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        Self {
            timeout: config.timeout_ms.map(Duration::from_millis),
            max_polls: config.max_polls,
            cancel: None,
        }
    }
}

pub struct ChannelInterface<B: RegisterAccess> {
    bus: B,
    base: u64,
    state: ChannelState,
    tx_channel: Option<u32>,
    tx_len: u32,
    pushed: usize,
    rx_len: u32,
    popped: usize,
}

impl<B: RegisterAccess> std::fmt::Debug for ChannelInterface<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let base = format!("{:#x}", self.base);
        f.debug_struct("ChannelInterface")
            .field("base", &base)
            .field("state", &self.state)
            .field("tx_channel", &self.tx_channel)
            .field("tx_len", &self.tx_len)
            .field("pushed", &self.pushed)
            .field("rx_len", &self.rx_len)
            .field("popped", &self.popped)
            .finish()
    }
}

impl<B: RegisterAccess> ChannelInterface<B> {
    /// Binds the register block at `base`. No register is touched.
    pub fn bind(bus: B, base: u64) -> Self {
        tracing::debug!("PCIe channel block bound at {:#x}", base);
        Self {
            bus,
            base,
            state: ChannelState::Bound,
            tx_channel: None,
            tx_len: 0,
            pushed: 0,
            rx_len: 0,
            popped: 0,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn pushed(&self) -> usize {
        self.pushed
    }

    pub fn popped(&self) -> usize {
        self.popped
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    fn require(&self, op: &'static str, allowed: &[ChannelState]) -> HarnessResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(HarnessError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    /// Absolute address of the register at `offset`.
    fn reg(&self, offset: u64) -> HarnessResult<u64> {
        self.base
            .checked_add(offset)
            .ok_or(HarnessError::MemoryViolation(self.base))
    }

    fn advance(&mut self, next: ChannelState) {
        if next != self.state {
            tracing::debug!("PCIe channel {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub fn select_transmit_channel(&mut self, index: u32) -> HarnessResult<()> {
        self.require("select_transmit_channel", &[ChannelState::Bound])?;
        let addr = self.reg(regs::TXCHNL)?;
        self.bus.write_u32(addr, index)?;
        self.tx_channel = Some(index);
        tracing::debug!("TXCHNL <- {}", index);
        Ok(())
    }

    /// Declares the next transmit burst as `len` dwords.
    pub fn set_transmit_length(&mut self, len: u32) -> HarnessResult<()> {
        self.require("set_transmit_length", &[ChannelState::Bound])?;
        if self.tx_channel.is_none() {
            tracing::warn!("Transmit length set before a channel was selected");
        }
        let addr = self.reg(regs::TXCHNL_LEN)?;
        self.bus.write_u32(addr, len)?;
        self.tx_len = len;
        self.pushed = 0;
        tracing::debug!("TXCHNL_LEN <- {}", len);
        self.advance(ChannelState::TxConfigured);
        Ok(())
    }

    /// Pushes one word into the transmit FIFO. Words beyond the declared
    /// length are rejected before reaching the hardware.
    pub fn push(&mut self, word: Word) -> HarnessResult<()> {
        self.require(
            "push",
            &[ChannelState::TxConfigured, ChannelState::TxDraining],
        )?;
        let expected = regs::words_for_len(self.tx_len);
        if self.pushed >= expected {
            return Err(HarnessError::TransmitOverrun {
                declared: self.tx_len,
                expected,
                attempted: self.pushed + 1,
            });
        }
        let addr = self.reg(regs::TXCHNL_DATA)?;
        self.bus.write_u64(addr, word)?;
        self.pushed += 1;
        tracing::debug!("TXCHNL_DATA <- {:#x} ({}/{})", word, self.pushed, expected);
        self.advance(ChannelState::TxDraining);
        Ok(())
    }

    /// Closes the transmit phase, checking the pushed count against the
    /// declared length.
    pub fn finish_transmit(&mut self) -> HarnessResult<()> {
        self.require(
            "finish_transmit",
            &[ChannelState::TxConfigured, ChannelState::TxDraining],
        )?;
        let expected = regs::words_for_len(self.tx_len);
        if self.pushed != expected {
            return Err(HarnessError::LengthMismatch {
                declared: self.tx_len,
                expected,
                pushed: self.pushed,
            });
        }
        self.advance(ChannelState::TxDone);
        Ok(())
    }

    /// Reads the receive ready flag. Pure status read; safe to repeat.
    pub fn receive_ready(&mut self) -> HarnessResult<bool> {
        self.require(
            "receive_ready",
            &[
                ChannelState::TxDone,
                ChannelState::RxWaiting,
                ChannelState::RxReady,
            ],
        )?;
        let addr = self.reg(regs::RXCHNL)?;
        let status = RxStatus::from_bits_truncate(self.bus.read_u32(addr)?);
        let ready = status.contains(RxStatus::READY);
        if ready {
            self.advance(ChannelState::RxReady);
        } else if self.state == ChannelState::TxDone {
            self.advance(ChannelState::RxWaiting);
        }
        Ok(ready)
    }

    /// Spins on [`Self::receive_ready`] until it is set or the policy gives
    /// up. Returns the number of status reads issued.
    pub fn wait_receive_ready(&mut self, policy: &PollPolicy) -> HarnessResult<u64> {
        let start = Instant::now();
        let mut polls = 0u64;
        if !policy.is_bounded() {
            tracing::debug!("Waiting for RX ready with no timeout");
        }
        loop {
            if let Some(token) = &policy.cancel {
                if token.is_cancelled() {
                    tracing::warn!("RX ready wait cancelled after {} polls", polls);
                    return Err(HarnessError::Cancelled { polls });
                }
            }

            polls += 1;
            if self.receive_ready()? {
                tracing::debug!("RX ready after {} polls", polls);
                return Ok(polls);
            }

            let out_of_polls = policy.max_polls.is_some_and(|max| polls >= max);
            let out_of_time = policy.timeout.is_some_and(|t| start.elapsed() >= t);
            if out_of_polls || out_of_time {
                let elapsed = start.elapsed();
                tracing::warn!(
                    "RX ready wait gave up after {} polls ({:?})",
                    polls,
                    elapsed
                );
                return Err(HarnessError::ReadyTimeout { polls, elapsed });
            }

            std::hint::spin_loop();
        }
    }

    /// Reads the receive burst length in dwords. Only valid once ready.
    pub fn get_receive_length(&mut self) -> HarnessResult<u32> {
        self.require("get_receive_length", &[ChannelState::RxReady])?;
        let addr = self.reg(regs::RXCHNL_LEN)?;
        let len = self.bus.read_u32(addr)?;
        self.rx_len = len;
        self.popped = 0;
        tracing::debug!("RXCHNL_LEN -> {}", len);
        if regs::words_for_len(len) == 0 {
            self.advance(ChannelState::RxDone);
        } else {
            self.advance(ChannelState::RxDraining);
        }
        Ok(len)
    }

    /// Pops one word from the receive FIFO. Popping past the reported
    /// length is refused.
    pub fn pop(&mut self) -> HarnessResult<Word> {
        self.require("pop", &[ChannelState::RxDraining])?;
        let addr = self.reg(regs::RXCHNL_DATA)?;
        let word = self.bus.read_u64(addr)?;
        self.popped += 1;
        let expected = regs::words_for_len(self.rx_len);
        tracing::debug!("RXCHNL_DATA -> {:#x} ({}/{})", word, self.popped, expected);
        if self.popped >= expected {
            self.advance(ChannelState::RxDone);
        }
        Ok(word)
    }

    /// Drains the reported burst into `buffer`, word `k` landing in slot
    /// `2k`. The reported length is checked against the buffer before the
    /// first pop, so an oversized burst leaves the buffer untouched. A burst
    /// already partly drained with [`Self::pop`] is refused.
    pub fn receive_burst(&mut self, buffer: &mut [Word]) -> HarnessResult<Vec<(usize, Word)>> {
        self.require(
            "receive_burst",
            &[ChannelState::RxDraining, ChannelState::RxDone],
        )?;
        if self.popped != 0 {
            tracing::error!(
                "RX burst already drained by {} pops; slots would be misaligned",
                self.popped
            );
            return Err(HarnessError::InvalidState {
                op: "receive_burst",
                state: self.state,
            });
        }
        let len = self.rx_len as usize;
        if len > buffer.len() {
            tracing::error!(
                "RX length {} does not fit receive buffer of {}",
                len,
                buffer.len()
            );
            return Err(HarnessError::CapacityExceeded {
                reported: self.rx_len,
                capacity: buffer.len(),
            });
        }

        let mut received = Vec::with_capacity(regs::words_for_len(self.rx_len));
        for i in (0..len).step_by(regs::DWORDS_PER_WORD as usize) {
            let word = self.pop()?;
            buffer[i] = word;
            received.push((i, word));
        }
        Ok(received)
    }
}
