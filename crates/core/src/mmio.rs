// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{HarnessError, HarnessResult, RegisterAccess};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Volatile access to physical addresses, for bare-metal targets where the
/// register block is mapped 1:1.
#[derive(Debug)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// # Safety
    ///
    /// Every address later passed to this accessor must be an aligned,
    /// mapped device register that no Rust reference aliases.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterAccess for Mmio {
    fn read_u32(&mut self, addr: u64) -> HarnessResult<u32> {
        // SAFETY: upheld by the caller of `Mmio::new`.
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u32) })
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> HarnessResult<()> {
        // SAFETY: upheld by the caller of `Mmio::new`.
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) };
        Ok(())
    }

    fn read_u64(&mut self, addr: u64) -> HarnessResult<u64> {
        // SAFETY: upheld by the caller of `Mmio::new`.
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u64) })
    }

    fn write_u64(&mut self, addr: u64, value: u64) -> HarnessResult<()> {
        // SAFETY: upheld by the caller of `Mmio::new`.
        unsafe { core::ptr::write_volatile(addr as usize as *mut u64, value) };
        Ok(())
    }
}

/// A PCIe BAR exposed as a file (sysfs `resourceN`, UIO map) and mapped into
/// the process. Addresses are byte offsets into the mapping.
pub struct MappedBar {
    mmap: MmapMut,
    path: PathBuf,
}

impl std::fmt::Debug for MappedBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBar")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .finish()
    }
}

impl MappedBar {
    pub fn open<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: the mapping is only touched through volatile accesses, so
        // concurrent modification by the device is tolerated.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        tracing::info!("Mapped BAR {:?} ({} bytes)", path, mmap.len());
        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    fn ptr<T>(&mut self, addr: u64) -> HarnessResult<*mut T> {
        let size = std::mem::size_of::<T>() as u64;
        let in_bounds = addr
            .checked_add(size)
            .is_some_and(|end| end <= self.mmap.len() as u64);
        if !in_bounds || addr % size != 0 {
            return Err(HarnessError::MemoryViolation(addr));
        }
        // SAFETY: bounds and alignment checked above; the mapping is page
        // aligned.
        Ok(unsafe { self.mmap.as_mut_ptr().add(addr as usize) as *mut T })
    }
}

impl RegisterAccess for MappedBar {
    fn read_u32(&mut self, addr: u64) -> HarnessResult<u32> {
        let ptr = self.ptr::<u32>(addr)?;
        // SAFETY: `ptr` is in bounds and aligned.
        Ok(unsafe { core::ptr::read_volatile(ptr) })
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> HarnessResult<()> {
        let ptr = self.ptr::<u32>(addr)?;
        // SAFETY: `ptr` is in bounds and aligned.
        unsafe { core::ptr::write_volatile(ptr, value) };
        Ok(())
    }

    fn read_u64(&mut self, addr: u64) -> HarnessResult<u64> {
        let ptr = self.ptr::<u64>(addr)?;
        // SAFETY: `ptr` is in bounds and aligned.
        Ok(unsafe { core::ptr::read_volatile(ptr) })
    }

    fn write_u64(&mut self, addr: u64, value: u64) -> HarnessResult<()> {
        let ptr = self.ptr::<u64>(addr)?;
        // SAFETY: `ptr` is in bounds and aligned.
        unsafe { core::ptr::write_volatile(ptr, value) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_bar(size: u64) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push("pcie-harness-tests");
        let _ = std::fs::create_dir_all(&dir);

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = dir.join(format!("bar-{}.bin", nonce));
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(size).unwrap();
        path
    }

    #[test]
    fn test_mapped_bar_access() {
        let path = temp_bar(0x20);
        let mut bar = MappedBar::open(&path).unwrap();
        assert_eq!(bar.len(), 0x20);

        bar.write_u32(0x04, 0xDEAD_BEEF).unwrap();
        bar.write_u64(0x08, 0x0123_4567_89AB_CDEF).unwrap();
        assert_eq!(bar.read_u32(0x04).unwrap(), 0xDEAD_BEEF);
        assert_eq!(bar.read_u64(0x08).unwrap(), 0x0123_4567_89AB_CDEF);

        drop(bar);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_mapped_bar_rejects_out_of_window() {
        let path = temp_bar(0x20);
        let mut bar = MappedBar::open(&path).unwrap();

        assert!(matches!(
            bar.read_u64(0x1C),
            Err(HarnessError::MemoryViolation(0x1C))
        ));
        assert!(matches!(
            bar.write_u32(0x20, 1),
            Err(HarnessError::MemoryViolation(0x20))
        ));

        drop(bar);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_mmio_drives_channel_over_plain_memory() {
        use crate::regs;
        use crate::ChannelInterface;

        // Host memory standing in for the block: RX already published with
        // 2 dwords.
        let mut block = [0u64; (regs::REGISTER_WINDOW / 8) as usize];
        block[(regs::RXCHNL / 8) as usize] = 1 | (2u64 << 32);
        block[(regs::RXCHNL_DATA / 8) as usize] = 0x77;
        let base = block.as_mut_ptr() as u64;

        // SAFETY: `block` outlives the interface and is only touched through it.
        let mut ch = ChannelInterface::bind(unsafe { Mmio::new() }, base);
        ch.select_transmit_channel(1).unwrap();
        ch.set_transmit_length(2).unwrap();
        ch.push(0xAA).unwrap();
        ch.finish_transmit().unwrap();
        assert!(ch.receive_ready().unwrap());
        assert_eq!(ch.get_receive_length().unwrap(), 2);
        assert_eq!(ch.pop().unwrap(), 0x77);
        drop(ch);

        assert_eq!(block[(regs::TXCHNL_DATA / 8) as usize], 0xAA);
        assert_eq!(block[0] & 0xFFFF_FFFF, 1);
        assert_eq!(block[0] >> 32, 2);
    }
}
