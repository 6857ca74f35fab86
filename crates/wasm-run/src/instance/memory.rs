use std::cell::RefCell;
use std::rc::Rc;

use crate::interpreter::Trap;

/// 64 KiB WASM pages.
pub(crate) const PAGE_SIZE: usize = 65536;

/// 4 GiB, the most a 32-bit memory can address.
pub(crate) const MAX_PAGES: u64 = 65536;

/// Linear memory handle. A module that imports its memory holds the same
/// `Rc` as the module exporting it, so stores are visible on both sides.
pub(crate) type SharedMemory = Rc<RefCell<Memory>>;

#[derive(Debug)]
pub(crate) struct Memory {
    data: Vec<u8>,
    /// Max size in pages.
    max: u64,
}

impl Memory {
    pub(crate) fn new(min: u64, max: Option<u64>) -> Result<Self, String> {
        let max = max.unwrap_or(MAX_PAGES).min(MAX_PAGES);
        if min > max {
            return Err(format!("memory of {min} pages exceeds its maximum of {max}"));
        }
        Ok(Self {
            data: vec![0; min as usize * PAGE_SIZE],
            max,
        })
    }

    pub(crate) fn shared(self) -> SharedMemory {
        Rc::new(RefCell::new(self))
    }

    pub(crate) fn pages(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    /// Grow by `delta` pages, returning the previous size, or `None` if
    /// the maximum would be exceeded.
    pub(crate) fn grow(&mut self, delta: u32) -> Option<u32> {
        let old = self.pages();
        let new = old as u64 + delta as u64;
        if new > self.max {
            return None;
        }
        self.data.resize(new as usize * PAGE_SIZE, 0);
        Some(old)
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, Trap> {
        let end = addr
            .checked_add(len as u64)
            .filter(|end| *end <= self.data.len() as u64)
            .ok_or(Trap::MemoryOutOfBounds)?;
        Ok(addr as usize..end as usize)
    }

    pub(crate) fn load<const N: usize>(&self, addr: u64) -> Result<[u8; N], Trap> {
        let range = self.range(addr, N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[range]);
        Ok(bytes)
    }

    pub(crate) fn store(&mut self, addr: u64, bytes: &[u8]) -> Result<(), Trap> {
        let range = self.range(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn read(&self, addr: u64, len: usize) -> Result<&[u8], Trap> {
        let range = self.range(addr, len)?;
        Ok(&self.data[range])
    }
}
