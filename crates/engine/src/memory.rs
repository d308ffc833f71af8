//! Client memory access
//!
//! Requests carry addresses in the client's address space: the envelope
//! points at its payload, and some payloads point at transfer or device-data
//! buffers. The engine never dereferences those addresses directly; it
//! copies bytes in and out through [`UserMemory`], so the core can be driven
//! by an in-process shim or by tests alike.

use crate::error::{EngineError, Result};
use std::collections::BTreeMap;

/// Byte-level access to the client's memory
pub trait UserMemory {
    /// Fill `buf` from `addr`
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()>;

    /// Store `data` at `addr`
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<()>;

    /// Read `len` bytes starting at `addr`
    fn read_vec(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }
}

/// Memory of the current process, for an in-process interposition shim
#[derive(Debug)]
pub struct ProcessMemory {
    _private: (),
}

impl ProcessMemory {
    /// # Safety
    ///
    /// Every address the engine is handed (the ioctl argument and the
    /// pointers inside payloads) must be valid for reads and writes of the
    /// lengths the request declares, for the duration of the call.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl UserMemory for ProcessMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if addr == 0 {
            return Err(EngineError::Memory {
                addr,
                len: buf.len(),
            });
        }
        // SAFETY: the constructor's contract covers every address a request declares.
        unsafe {
            std::ptr::copy_nonoverlapping(addr as usize as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if addr == 0 {
            return Err(EngineError::Memory {
                addr,
                len: data.len(),
            });
        }
        // SAFETY: as for `read`.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), addr as usize as *mut u8, data.len());
        }
        Ok(())
    }
}

/// Address space made of separately allocated regions
///
/// Lets tests and tools lay out an envelope, its payload and any side
/// buffers at chosen addresses.
#[derive(Debug, Default, Clone)]
pub struct SparseMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `addr`, replacing any region starting there
    pub fn insert(&mut self, addr: u64, bytes: Vec<u8>) {
        self.regions.insert(addr, bytes);
    }

    /// Map `len` zero bytes at `addr`
    pub fn zeroed(&mut self, addr: u64, len: usize) {
        self.insert(addr, vec![0; len]);
    }

    /// Contents of the region starting at `addr`
    pub fn region(&self, addr: u64) -> Option<&[u8]> {
        self.regions.get(&addr).map(Vec::as_slice)
    }

    fn locate(&self, addr: u64, len: usize) -> Result<(u64, usize)> {
        let fault = EngineError::Memory { addr, len };
        let (&base, bytes) = self.regions.range(..=addr).next_back().ok_or(fault)?;
        let start = (addr - base) as usize;
        if start + len > bytes.len() {
            return Err(EngineError::Memory { addr, len });
        }
        Ok((base, start))
    }
}

impl UserMemory for SparseMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let (base, start) = self.locate(addr, buf.len())?;
        buf.copy_from_slice(&self.regions[&base][start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let (base, start) = self.locate(addr, data.len())?;
        if let Some(region) = self.regions.get_mut(&base) {
            region[start..start + data.len()].copy_from_slice(data);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_read_inside_region() {
        let mut mem = SparseMemory::new();
        mem.insert(0x1000, vec![1, 2, 3, 4]);
        assert_eq!(mem.read_vec(0x1001, 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_sparse_write_in_place() {
        let mut mem = SparseMemory::new();
        mem.zeroed(0x2000, 8);
        mem.write(0x2004, &[9, 9]).unwrap();
        assert_eq!(mem.region(0x2000).unwrap(), &[0, 0, 0, 0, 9, 9, 0, 0]);
    }

    #[test]
    fn test_sparse_faults() {
        let mut mem = SparseMemory::new();
        mem.zeroed(0x1000, 4);
        assert!(mem.read_vec(0x0fff, 1).is_err());
        assert!(mem.read_vec(0x1002, 4).is_err());
        assert!(mem.write(0x3000, &[1]).is_err());
    }

    #[test]
    fn test_empty_access_never_faults() {
        let mut mem = SparseMemory::new();
        assert!(mem.read_vec(0, 0).unwrap().is_empty());
        assert!(mem.write(0, &[]).is_ok());
    }

    #[test]
    fn test_process_memory_round_trip() {
        let mut cell = [0u8; 4];
        let addr = cell.as_mut_ptr() as u64;
        let mut mem = unsafe { ProcessMemory::new() };
        mem.write(addr, &[5, 6, 7, 8]).unwrap();
        assert_eq!(mem.read_vec(addr, 4).unwrap(), vec![5, 6, 7, 8]);
        assert!(mem.read_vec(0, 1).is_err());
    }
}
