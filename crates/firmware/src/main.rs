// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

#![no_std]
#![no_main]

use core::fmt::Write;
use core::ptr::{read_volatile, write_volatile};
use panic_halt as _;
use riscv_rt::entry;

// Matches the harness default `peripheral.base_address`.
const PCIE_BASE: usize = 0x4000_0000;
const UART_TX_PTR: *mut u8 = 0x4000_C000 as *mut u8;

// Mirrors `pcie_harness_core::regs`; that crate needs std.
const TXCHNL: usize = 0x00;
const TXCHNL_LEN: usize = 0x04;
const TXCHNL_DATA: usize = 0x08;
const RXCHNL: usize = 0x10;
const RXCHNL_LEN: usize = 0x14;
const RXCHNL_DATA: usize = 0x18;

const TX_CHANNEL: u32 = 1;
const TX_LEN: u32 = 20;
const RX_CAPACITY: usize = 100;

struct Uart;

impl Write for Uart {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &byte in s.as_bytes() {
            // SAFETY: fixed device register.
            unsafe { write_volatile(UART_TX_PTR, byte) };
        }
        Ok(())
    }
}

struct Pcie {
    base: usize,
}

impl Pcie {
    fn write32(&mut self, offset: usize, value: u32) {
        // SAFETY: `base` points at the channel register block.
        unsafe { write_volatile((self.base + offset) as *mut u32, value) }
    }

    fn read32(&mut self, offset: usize) -> u32 {
        // SAFETY: `base` points at the channel register block.
        unsafe { read_volatile((self.base + offset) as *const u32) }
    }

    // RV32 has no 64-bit load/store, so a data word moves as two 32-bit
    // accesses, low half first. The block latches the word on the high half.
    fn write64(&mut self, offset: usize, value: u64) {
        self.write32(offset, value as u32);
        self.write32(offset + 4, (value >> 32) as u32);
    }

    fn read64(&mut self, offset: usize) -> u64 {
        let lo = self.read32(offset) as u64;
        let hi = self.read32(offset + 4) as u64;
        (hi << 32) | lo
    }
}

#[entry]
fn main() -> ! {
    let mut uart = Uart;
    let mut pcie = Pcie { base: PCIE_BASE };

    let _ = uart.write_str("\n\n\nTest PCIE!\n\n\n");

    pcie.write32(TXCHNL, TX_CHANNEL);
    pcie.write32(TXCHNL_LEN, TX_LEN);
    for i in (0..TX_LEN).step_by(2) {
        pcie.write64(TXCHNL_DATA, i as u64);
        let _ = write!(uart, "datasent[{}] \n", i);
    }

    while pcie.read32(RXCHNL) & 1 == 0 {
        core::hint::spin_loop();
    }
    let _ = uart.write_str("SUCCESS: got rx!\n");

    let rx_len = pcie.read32(RXCHNL_LEN) as usize;
    let _ = write!(uart, "SUCCESS: got len! {} \n", rx_len);

    let mut rx_data = [0u64; RX_CAPACITY];
    if rx_len > RX_CAPACITY {
        let _ = write!(uart, "FAILURE: len {} exceeds buffer {}\n", rx_len, RX_CAPACITY);
    } else {
        for i in (0..rx_len).step_by(2) {
            rx_data[i] = pcie.read64(RXCHNL_DATA);
            let _ = write!(uart, "data[{}]! {} \n", i, rx_data[i]);
        }
    }

    loop {
        // SAFETY: `wfi` only stalls the hart until the next interrupt.
        unsafe { riscv::asm::wfi() };
    }
}
