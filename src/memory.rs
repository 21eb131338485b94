//! # Host Memory
//!
//! The two kinds of memory the negotiation needs from the host:
//!
//! - a small coherent, physically contiguous region both the ARM and the
//!   VideoCore can address (the shared descriptor)
//! - an uncached mapping of the pixel memory the firmware hands back
//!
//! The descriptor is only touched through volatile copies fenced on both
//! sides, because the firmware rewrites it during a round-trip. The pixel
//! mapping is handed to the raster code as a plain byte slice: once the
//! mode is committed the firmware scans it out but never writes it.

use core::ptr::{self, NonNull};
use core::sync::atomic::{fence, Ordering};

use crate::error::Result;

/// Page size used to round coherent allocations
pub const PAGE_SIZE: usize = 4096;

/// Round `len` up to a whole number of pages
#[inline]
pub const fn page_align(len: usize) -> usize {
    (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Region addressable by both host CPU and coprocessor
pub trait SharedRegion {
    /// Address the coprocessor uses to reach this region
    fn bus_address(&self) -> u32;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the region at `offset`
    fn write(&mut self, offset: usize, data: &[u8]);

    /// Copy region contents at `offset` into `data`
    fn read(&self, offset: usize, data: &mut [u8]);
}

/// Coherent DMA region backed by host memory
#[derive(Debug)]
pub struct CoherentRegion {
    ptr: NonNull<u8>,
    len: usize,
    bus_address: u32,
}

impl CoherentRegion {
    /// Wrap an allocation made by the host
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for the life
    /// of the region, and `bus_address` must alias the same memory for the
    /// coprocessor.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize, bus_address: u32) -> Self {
        Self {
            ptr,
            len,
            bus_address,
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl SharedRegion for CoherentRegion {
    fn bus_address(&self) -> u32 {
        self.bus_address
    }

    fn len(&self) -> usize {
        self.len
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "write outside shared region");
        for (i, byte) in data.iter().enumerate() {
            unsafe { ptr::write_volatile(self.ptr.as_ptr().add(offset + i), *byte) };
        }
        fence(Ordering::SeqCst);
    }

    fn read(&self, offset: usize, data: &mut [u8]) {
        assert!(offset + data.len() <= self.len, "read outside shared region");
        fence(Ordering::SeqCst);
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = unsafe { ptr::read_volatile(self.ptr.as_ptr().add(offset + i)) };
        }
    }
}

/// Uncached mapping of firmware-owned pixel memory
#[derive(Debug)]
pub struct IoMapping {
    ptr: NonNull<u8>,
    len: usize,
    bus_address: u32,
}

impl IoMapping {
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// mapping is handed back to [`HostMemory::unmap`].
    pub unsafe fn new(ptr: NonNull<u8>, len: usize, bus_address: u32) -> Self {
        Self {
            ptr,
            len,
            bus_address,
        }
    }

    /// Host virtual address of the first pixel
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Firmware bus address this mapping was created for
    pub fn bus_address(&self) -> u32 {
        self.bus_address
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// Host services for descriptor allocation and framebuffer mapping
pub trait HostMemory {
    type Region: SharedRegion;

    /// Allocate a coherent region of at least `len` bytes.
    /// Fails with [`FbError::AllocationFailure`](crate::FbError::AllocationFailure).
    fn alloc_coherent(&mut self, len: usize) -> Result<Self::Region>;

    fn free_coherent(&mut self, region: Self::Region);

    /// Map `len` bytes of coprocessor memory at `bus_address`; `None` when
    /// the range is not mappable
    fn map_uncached(&mut self, bus_address: u32, len: usize) -> Option<IoMapping>;

    fn unmap(&mut self, mapping: IoMapping);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_align() {
        assert_eq!(page_align(1), PAGE_SIZE);
        assert_eq!(page_align(40), 4096);
        assert_eq!(page_align(4096), 4096);
        assert_eq!(page_align(4097), 8192);
    }

    #[test]
    fn test_coherent_region_round_trip() {
        let mut backing = vec![0u8; 64];
        let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();
        let mut region = unsafe { CoherentRegion::new(ptr, backing.len(), 0xC000_0000) };

        region.write(8, &[1, 2, 3, 4]);
        let mut out = [0u8; 4];
        region.read(8, &mut out);

        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(region.bus_address(), 0xC000_0000);
        assert_eq!(region.len(), 64);
    }

    #[test]
    #[should_panic(expected = "outside shared region")]
    fn test_coherent_region_bounds() {
        let mut backing = vec![0u8; 16];
        let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();
        let mut region = unsafe { CoherentRegion::new(ptr, backing.len(), 0) };
        region.write(14, &[0; 4]);
    }
}
