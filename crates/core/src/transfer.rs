// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::channel::{ChannelInterface, PollPolicy};
use crate::console::Console;
use crate::regs::DWORDS_PER_WORD;
use crate::{HarnessResult, RegisterAccess, Word};
use pcie_harness_config::TransferConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransferPlan {
    pub tx_channel: u32,
    /// Transmit burst length in dwords.
    pub tx_length: u32,
    /// Slots in the local receive buffer.
    pub rx_capacity: usize,
}

impl Default for TransferPlan {
    fn default() -> Self {
        Self {
            tx_channel: 1,
            tx_length: 20,
            rx_capacity: 100,
        }
    }
}

impl From<&TransferConfig> for TransferPlan {
    fn from(config: &TransferConfig) -> Self {
        Self {
            tx_channel: config.tx_channel,
            tx_length: config.tx_length,
            rx_capacity: config.rx_capacity,
        }
    }
}

/// What one round trip put on and took off the link. Pairs are
/// `(dword index, word)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransferReport {
    pub tx_channel: u32,
    pub tx_length: u32,
    pub sent: Vec<(usize, Word)>,
    pub rx_length: u32,
    pub received: Vec<(usize, Word)>,
    pub polls: u64,
}

/// Drives one transmit-then-receive round trip over a bound channel block
/// and narrates it on the console.
#[derive(Debug)]
pub struct TransferOrchestrator<B: RegisterAccess> {
    channel: ChannelInterface<B>,
    console: Console,
    policy: PollPolicy,
}

impl<B: RegisterAccess> TransferOrchestrator<B> {
    pub fn bind(bus: B, base: u64, console: Console) -> Self {
        Self::new(ChannelInterface::bind(bus, base), console)
    }

    pub fn new(channel: ChannelInterface<B>, console: Console) -> Self {
        Self {
            channel,
            console,
            policy: PollPolicy::indefinite(),
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn channel(&self) -> &ChannelInterface<B> {
        &self.channel
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn into_parts(self) -> (ChannelInterface<B>, Console) {
        (self.channel, self.console)
    }

    /// Sends the `[0, 2, 4, ...]` pattern: one word per even dword index
    /// below `tx_length`, carrying its own index.
    pub fn transmit(&mut self, plan: &TransferPlan) -> HarnessResult<Vec<(usize, Word)>> {
        self.channel.select_transmit_channel(plan.tx_channel)?;
        self.channel.set_transmit_length(plan.tx_length)?;

        let mut sent = Vec::new();
        for i in (0..plan.tx_length as usize).step_by(DWORDS_PER_WORD as usize) {
            self.channel.push(i as Word)?;
            self.console.print(format_args!("datasent[{}] \n", i));
            sent.push((i, i as Word));
        }
        self.channel.finish_transmit()?;

        tracing::info!(
            "TX burst on channel {} done: {} dwords in {} words",
            plan.tx_channel,
            plan.tx_length,
            sent.len()
        );
        Ok(sent)
    }

    /// Waits for the receive burst and drains it into `buffer`.
    pub fn receive(
        &mut self,
        buffer: &mut [Word],
    ) -> HarnessResult<(u32, Vec<(usize, Word)>, u64)> {
        let polls = self.channel.wait_receive_ready(&self.policy)?;
        self.console.puts("SUCCESS: got rx!\n");

        let rx_len = self.channel.get_receive_length()?;
        self.console.print(format_args!("SUCCESS: got len! {} \n", rx_len));

        let received = self.channel.receive_burst(buffer)?;
        for &(i, word) in &received {
            self.console.print(format_args!("data[{}]! {} \n", i, word));
        }

        tracing::info!(
            "RX burst drained: {} dwords in {} words after {} polls",
            rx_len,
            received.len(),
            polls
        );
        Ok((rx_len, received, polls))
    }

    /// Full round trip. The received payload is reported, not checked.
    pub fn run(
        &mut self,
        plan: &TransferPlan,
        buffer: &mut [Word],
    ) -> HarnessResult<TransferReport> {
        let sent = self.transmit(plan)?;
        let (rx_length, received, polls) = self.receive(buffer)?;
        Ok(TransferReport {
            tx_channel: plan.tx_channel,
            tx_length: plan.tx_length,
            sent,
            rx_length,
            received,
            polls,
        })
    }
}
