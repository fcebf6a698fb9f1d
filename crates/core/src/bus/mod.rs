// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::peripherals::pcie::PcieChannel;
use crate::{AccessWidth, HarnessError, HarnessResult, Peripheral, RegisterAccess};
use pcie_harness_config::HarnessConfig;
use std::any::Any;

pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub dev: Box<dyn Peripheral>,
}

/// Simulated system bus. Every register access costs one bus cycle and
/// ticks all attached peripherals once afterwards, so device-side timing
/// advances while software polls.
#[derive(Default)]
pub struct SimBus {
    pub peripherals: Vec<PeripheralEntry>,
    pub total_cycles: u64,
    pub accesses: u64,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with a single PCIe channel block named `pcie` at `base`.
    pub fn with_pcie(base: u64, size: u64, dev: PcieChannel) -> Self {
        let mut bus = Self::new();
        bus.attach("pcie", base, size, Box::new(dev));
        bus
    }

    pub fn from_config(config: &HarnessConfig) -> anyhow::Result<Self> {
        let size = config.window_size()?;
        let dev = PcieChannel::from_config(&config.peer);
        tracing::info!(
            "Simulated PCIe block at {:#x} ({} bytes), peer {:?}, latency {} cycles",
            config.peripheral.base_address,
            size,
            config.peer.mode,
            config.peer.latency_cycles
        );
        Ok(Self::with_pcie(config.peripheral.base_address, size, dev))
    }

    pub fn attach(&mut self, name: &str, base: u64, size: u64, dev: Box<dyn Peripheral>) {
        let overlaps = self
            .peripherals
            .iter()
            .any(|p| {
                base < p.base.saturating_add(p.size) && p.base < base.saturating_add(size)
            });
        if overlaps {
            tracing::warn!(
                "Peripheral '{}' at {:#x} overlaps an existing mapping; first match wins",
                name,
                base
            );
        }
        self.peripherals.push(PeripheralEntry {
            name: name.to_string(),
            base,
            size,
            dev,
        });
    }

    pub fn peripheral<T: Any>(&self, name: &str) -> Option<&T> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.dev.as_any())
            .and_then(|any| any.downcast_ref::<T>())
    }

    pub fn peripheral_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.peripherals
            .iter_mut()
            .find(|p| p.name == name)
            .and_then(|p| p.dev.as_any_mut())
            .and_then(|any| any.downcast_mut::<T>())
    }

    /// The default `pcie` channel block, if one is attached.
    pub fn pcie(&self) -> Option<&PcieChannel> {
        self.peripheral::<PcieChannel>("pcie")
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let map = self
            .peripherals
            .iter()
            .map(|p| (p.name.clone(), p.dev.snapshot()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    pub fn tick_peripherals(&mut self) {
        for p in &mut self.peripherals {
            let res = p.dev.tick();
            self.total_cycles += res.cycles as u64;
        }
    }

    fn locate(&mut self, addr: u64) -> HarnessResult<(&mut PeripheralEntry, u64)> {
        self.peripherals
            .iter_mut()
            .find(|p| addr >= p.base && addr - p.base < p.size)
            .map(|p| {
                let offset = addr - p.base;
                (p, offset)
            })
            .ok_or(HarnessError::MemoryViolation(addr))
    }

    fn read(&mut self, addr: u64, width: AccessWidth) -> HarnessResult<u64> {
        self.total_cycles += 1;
        self.accesses += 1;
        let res = match self.locate(addr) {
            Ok((p, offset)) => p.dev.read(offset, width),
            Err(e) => Err(e),
        };
        self.tick_peripherals();
        res
    }

    fn write(&mut self, addr: u64, width: AccessWidth, value: u64) -> HarnessResult<()> {
        self.total_cycles += 1;
        self.accesses += 1;
        let res = match self.locate(addr) {
            Ok((p, offset)) => p.dev.write(offset, width, value),
            Err(e) => Err(e),
        };
        self.tick_peripherals();
        res
    }
}

impl RegisterAccess for SimBus {
    fn read_u32(&mut self, addr: u64) -> HarnessResult<u32> {
        self.read(addr, AccessWidth::Dword).map(|v| v as u32)
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> HarnessResult<()> {
        self.write(addr, AccessWidth::Dword, value as u64)
    }

    fn read_u64(&mut self, addr: u64) -> HarnessResult<u64> {
        self.read(addr, AccessWidth::Qword)
    }

    fn write_u64(&mut self, addr: u64, value: u64) -> HarnessResult<()> {
        self.write(addr, AccessWidth::Qword, value)
    }
}
