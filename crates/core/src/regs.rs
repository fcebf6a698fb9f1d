// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Register map of the PCIe channel block.
//!
//! Offsets are relative to the bound base address and must match the
//! hardware exactly. Lengths are counted in 32-bit dwords; each data
//! register access moves one 64-bit word, i.e. `DWORDS_PER_WORD` dwords.
//!
//! ```text
//! 0x00  TXCHNL       W  32  transmit channel select
//! 0x04  TXCHNL_LEN   W  32  transmit burst length (dwords)
//! 0x08  TXCHNL_DATA  W  64  transmit FIFO push
//! 0x10  RXCHNL       R  32  receive status (bit 0: ready)
//! 0x14  RXCHNL_LEN   R  32  receive burst length (dwords)
//! 0x18  RXCHNL_DATA  R  64  receive FIFO pop
//! ```

use crate::AccessWidth;

/// Width of the PCIe data path in bits.
pub const PCI_DATA_WIDTH: u32 = 64;
pub const DWORDS_PER_WORD: u32 = PCI_DATA_WIDTH / 32;

pub const TXCHNL: u64 = 0x00;
pub const TXCHNL_LEN: u64 = 0x04;
pub const TXCHNL_DATA: u64 = 0x08;
pub const RXCHNL: u64 = 0x10;
pub const RXCHNL_LEN: u64 = 0x14;
pub const RXCHNL_DATA: u64 = 0x18;

/// Size of the register window in bytes.
pub const REGISTER_WINDOW: u64 = 0x20;

bitflags::bitflags! {
    /// RXCHNL status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxStatus: u32 {
        const READY = 1 << 0;
    }
}

/// Number of data words carrying a burst of `len` dwords.
pub fn words_for_len(len: u32) -> usize {
    (len as usize).div_ceil(DWORDS_PER_WORD as usize)
}

/// Register name and access width at `offset`, if one is defined there.
pub fn describe(offset: u64) -> Option<(&'static str, AccessWidth)> {
    match offset {
        TXCHNL => Some(("TXCHNL", AccessWidth::Dword)),
        TXCHNL_LEN => Some(("TXCHNL_LEN", AccessWidth::Dword)),
        TXCHNL_DATA => Some(("TXCHNL_DATA", AccessWidth::Qword)),
        RXCHNL => Some(("RXCHNL", AccessWidth::Dword)),
        RXCHNL_LEN => Some(("RXCHNL_LEN", AccessWidth::Dword)),
        RXCHNL_DATA => Some(("RXCHNL_DATA", AccessWidth::Qword)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_for_len_rounds_up() {
        assert_eq!(words_for_len(0), 0);
        assert_eq!(words_for_len(1), 1);
        assert_eq!(words_for_len(2), 1);
        assert_eq!(words_for_len(19), 10);
        assert_eq!(words_for_len(20), 10);
    }

    #[test]
    fn test_data_registers_are_qword_aligned() {
        for offset in [TXCHNL_DATA, RXCHNL_DATA] {
            assert_eq!(offset % 8, 0);
            assert_eq!(describe(offset).unwrap().1, AccessWidth::Qword);
        }
        assert!(describe(0x0C).is_none());
        assert!(RXCHNL_DATA + 8 <= REGISTER_WINDOW);
    }
}
