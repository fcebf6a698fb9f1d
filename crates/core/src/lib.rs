// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod channel;
pub mod console;
pub mod mmio;
pub mod peripherals;
pub mod regs;
pub mod selftest;
pub mod transfer;

use std::any::Any;
use std::time::Duration;

mod tests;

pub use channel::{CancelToken, ChannelInterface, ChannelState, PollPolicy};
pub use console::Console;
pub use transfer::{TransferOrchestrator, TransferPlan, TransferReport};

/// Atomic unit of a channel transfer (one beat of the 64-bit data path).
pub type Word = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessWidth {
    Dword,
    Qword,
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Receive channel not ready after {polls} polls ({elapsed:?})")]
    ReadyTimeout { polls: u64, elapsed: Duration },
    #[error("Readiness wait cancelled after {polls} polls")]
    Cancelled { polls: u64 },
    #[error("Receive length {reported} exceeds buffer capacity {capacity}")]
    CapacityExceeded { reported: u32, capacity: usize },
    #[error("Transmit overrun: {declared} dwords declared ({expected} words), push #{attempted} rejected")]
    TransmitOverrun {
        declared: u32,
        expected: usize,
        attempted: usize,
    },
    #[error("Transmit length mismatch: {declared} dwords declared ({expected} words), {pushed} pushed")]
    LengthMismatch {
        declared: u32,
        expected: usize,
        pushed: usize,
    },
    #[error("Operation '{op}' not permitted in channel state {state:?}")]
    InvalidState {
        op: &'static str,
        state: ChannelState,
    },
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("Bad {width:?} access to register offset {offset:#x}")]
    BadAccess { offset: u64, width: AccessWidth },
    #[error("Malformed console frame: {0}")]
    MalformedFrame(&'static str),
    #[error("File '{0}' not found on console host")]
    FileNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Debug, Clone, Default)]
pub struct PeripheralTickResult {
    pub cycles: u32,
}

/// Trait representing a memory-mapped peripheral model.
///
/// Accesses are register-granular: every call is exactly one register
/// access of the given width, so FIFO side effects happen once per call.
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&mut self, offset: u64, width: AccessWidth) -> HarnessResult<u64>;
    fn write(&mut self, offset: u64, width: AccessWidth, value: u64) -> HarnessResult<()>;
    /// Side-effect free view of a register, for snapshots and debuggers.
    fn peek(&self, _offset: u64, _width: AccessWidth) -> Option<u64> {
        None
    }
    fn tick(&mut self) -> PeripheralTickResult {
        PeripheralTickResult::default()
    }
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Trait representing register access to the address space holding the
/// channel block. Implementations must not cache, merge or reorder accesses.
pub trait RegisterAccess {
    fn read_u32(&mut self, addr: u64) -> HarnessResult<u32>;
    fn write_u32(&mut self, addr: u64, value: u32) -> HarnessResult<()>;
    fn read_u64(&mut self, addr: u64) -> HarnessResult<u64>;
    fn write_u64(&mut self, addr: u64, value: u64) -> HarnessResult<()>;
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    fn read_u32(&mut self, addr: u64) -> HarnessResult<u32> {
        (**self).read_u32(addr)
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> HarnessResult<()> {
        (**self).write_u32(addr, value)
    }

    fn read_u64(&mut self, addr: u64) -> HarnessResult<u64> {
        (**self).read_u64(addr)
    }

    fn write_u64(&mut self, addr: u64, value: u64) -> HarnessResult<()> {
        (**self).write_u64(addr, value)
    }
}
