//! # Simulated VideoCore
//!
//! In-process stand-in for the GPU firmware and the host memory services,
//! used by the test suite and the `vcfb` tool. It answers framebuffer
//! channel requests the way the firmware does: it reads the descriptor,
//! allocates pixel memory for the requested virtual size, and writes back
//! pitch, base and size.
//!
//! Faults can be injected to exercise the host's defenses.

use core::ptr::{self, NonNull};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, trace};

use crate::descriptor::{FbResponse, DESCRIPTOR_SIZE};
use crate::error::{FbError, Result};
use crate::mailbox::{CoprocessorChannel, MailboxError, CHANNEL_FRAMEBUFFER};
use crate::memory::{page_align, CoherentRegion, HostMemory, IoMapping, SharedRegion, PAGE_SIZE};
use crate::{arm_to_gpu, gpu_to_arm};

/// First ARM physical address handed out by the simulator
const SIM_PHYS_BASE: usize = 0x1C00_0000;

/// Scanline alignment applied by the simulated firmware
const PITCH_ALIGN: u32 = 32;

/// Misbehavior to inject into the next round-trips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Coherent allocations fail
    pub fail_alloc: bool,
    /// Firmware never answers
    pub unresponsive: bool,
    /// Nonzero status word returned without touching the descriptor
    pub status: u32,
    /// Returned base address is zero
    pub null_base: bool,
    /// Returned pitch is too small for one scanline
    pub short_pitch: bool,
    /// Returned size does not cover pitch x virtual height
    pub short_screen_size: bool,
    /// Returned depth differs from the request
    pub wrong_depth: bool,
    /// Returned buffer cannot be mapped by the host
    pub unmappable: bool,
}

/// Heap block addressed only through raw pointers
struct RawBlock {
    ptr: NonNull<u8>,
    len: usize,
}

impl RawBlock {
    fn zeroed(len: usize) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        Self {
            ptr: NonNull::from(Box::leak(boxed)).cast::<u8>(),
            len,
        }
    }

    fn read(&self, offset: usize, out: &mut [u8]) {
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = unsafe { ptr::read_volatile(self.ptr.as_ptr().add(offset + i)) };
        }
    }

    fn write(&self, offset: usize, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            unsafe { ptr::write_volatile(self.ptr.as_ptr().add(offset + i), *byte) };
        }
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

#[derive(Default)]
struct SimState {
    /// Live blocks keyed by ARM physical address
    blocks: BTreeMap<usize, RawBlock>,
    /// Framebuffers replaced by a later mode; kept alive until the
    /// simulator goes away since the host may still hold a mapping
    retired: Vec<RawBlock>,
    next_phys: usize,
    framebuffer: Option<usize>,
    faults: Faults,
    calls: usize,
    live_mappings: usize,
    live_regions: usize,
    last_response: Option<FbResponse>,
    /// A request timed out and its reply has not been drained
    reply_owed: bool,
    resets: usize,
}

impl SimState {
    fn allocate(&mut self, len: usize) -> usize {
        if self.next_phys == 0 {
            self.next_phys = SIM_PHYS_BASE;
        }
        let phys = self.next_phys;
        self.next_phys += page_align(len.max(1)) + PAGE_SIZE;
        self.blocks.insert(phys, RawBlock::zeroed(len));
        phys
    }

    /// Block containing `[phys, phys + len)`
    fn find(&self, phys: usize, len: usize) -> Option<(&usize, &RawBlock)> {
        self.blocks
            .range(..=phys)
            .next_back()
            .filter(|(start, block)| phys + len <= **start + block.len)
    }

    /// Serve one framebuffer channel request
    fn serve(&mut self, bus_address: u32) -> core::result::Result<u32, MailboxError> {
        self.calls += 1;

        if self.faults.unresponsive {
            debug!("sim: firmware unresponsive");
            self.reply_owed = true;
            return Err(MailboxError::Timeout);
        }
        if self.faults.status != 0 {
            return Ok(self.faults.status);
        }

        let phys = gpu_to_arm(bus_address);
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        match self.find(phys, DESCRIPTOR_SIZE) {
            Some((start, block)) => block.read(phys - start, &mut bytes),
            None => return Err(MailboxError::Disconnected),
        }
        let mut desc = FbResponse::decode(&bytes);
        trace!("sim: request {:?}", desc);

        let bpp = desc.bits_per_pixel.max(0) as u32;
        let row_bytes = (desc.xres_virtual.max(0) as u32 * bpp + 7) / 8;
        let pitch = (row_bytes + PITCH_ALIGN - 1) / PITCH_ALIGN * PITCH_ALIGN;
        let size = pitch as usize * desc.yres_virtual.max(0) as usize;

        let current_fb = self.framebuffer;
        let fb_phys = match current_fb {
            Some(current) if self.blocks.get(&current).is_some_and(|b| b.len >= size) => current,
            previous => {
                if let Some(block) = previous.and_then(|p| self.blocks.remove(&p)) {
                    self.retired.push(block);
                }
                let fresh = self.allocate(size);
                self.framebuffer = Some(fresh);
                fresh
            }
        };

        desc.pitch = pitch as i32;
        desc.base = arm_to_gpu(fb_phys) as i32;
        desc.screen_size = size as i32;

        if self.faults.null_base {
            desc.base = 0;
        }
        if self.faults.short_pitch {
            desc.pitch = 1;
        }
        if self.faults.short_screen_size {
            desc.screen_size = (size / 2).max(1) as i32;
        }
        if self.faults.wrong_depth {
            desc.bits_per_pixel = if bpp == 32 { 16 } else { 32 };
        }

        if let Some((start, block)) = self.find(phys, DESCRIPTOR_SIZE) {
            block.write(phys - start, &desc.encode());
        }
        self.last_response = Some(desc);
        debug!(
            "sim: allocated {} bytes at 0x{:08x}, pitch {}",
            size, desc.base as u32, desc.pitch
        );
        Ok(0)
    }
}

/// Simulated firmware; hand out [`SimMemory`] and [`SimChannel`] views
#[derive(Clone, Default)]
pub struct VideoCoreSim {
    state: Rc<RefCell<SimState>>,
}

impl VideoCoreSim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host memory services backed by the simulator
    pub fn memory(&self) -> SimMemory {
        SimMemory {
            state: Rc::clone(&self.state),
        }
    }

    /// Framebuffer mailbox channel to the simulator
    pub fn channel(&self) -> SimChannel {
        SimChannel {
            state: Rc::clone(&self.state),
        }
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.borrow_mut().faults = faults;
    }

    /// Round-trips served so far
    pub fn calls(&self) -> usize {
        self.state.borrow().calls
    }

    /// Channel resets requested so far
    pub fn resets(&self) -> usize {
        self.state.borrow().resets
    }

    pub fn live_mappings(&self) -> usize {
        self.state.borrow().live_mappings
    }

    pub fn live_regions(&self) -> usize {
        self.state.borrow().live_regions
    }

    /// Descriptor contents written back by the last successful round-trip
    pub fn last_response(&self) -> Option<FbResponse> {
        self.state.borrow().last_response
    }
}

/// Host memory view of the simulator
pub struct SimMemory {
    state: Rc<RefCell<SimState>>,
}

impl HostMemory for SimMemory {
    type Region = CoherentRegion;

    fn alloc_coherent(&mut self, len: usize) -> Result<CoherentRegion> {
        let mut state = self.state.borrow_mut();
        if state.faults.fail_alloc {
            return Err(FbError::AllocationFailure(format!(
                "no coherent memory for {} bytes",
                len
            )));
        }
        let len = page_align(len);
        let phys = state.allocate(len);
        state.live_regions += 1;
        let ptr = state.blocks[&phys].ptr;
        Ok(unsafe { CoherentRegion::new(ptr, len, arm_to_gpu(phys)) })
    }

    fn free_coherent(&mut self, region: CoherentRegion) {
        let mut state = self.state.borrow_mut();
        if state.blocks.remove(&gpu_to_arm(region.bus_address())).is_some() {
            state.live_regions -= 1;
        }
    }

    fn map_uncached(&mut self, bus_address: u32, len: usize) -> Option<IoMapping> {
        let mut state = self.state.borrow_mut();
        if state.faults.unmappable {
            return None;
        }
        let phys = gpu_to_arm(bus_address);
        let ptr = {
            let (start, block) = state.find(phys, len)?;
            unsafe { NonNull::new_unchecked(block.ptr.as_ptr().add(phys - start)) }
        };
        state.live_mappings += 1;
        Some(unsafe { IoMapping::new(ptr, len, bus_address) })
    }

    fn unmap(&mut self, _mapping: IoMapping) {
        let mut state = self.state.borrow_mut();
        state.live_mappings = state.live_mappings.saturating_sub(1);
    }
}

/// Mailbox view of the simulator
pub struct SimChannel {
    state: Rc<RefCell<SimState>>,
}

impl CoprocessorChannel for SimChannel {
    fn call(&mut self, channel: u8, bus_address: u32, _timeout: Duration) -> core::result::Result<u32, MailboxError> {
        if channel != CHANNEL_FRAMEBUFFER {
            return Err(MailboxError::InvalidChannel(channel));
        }
        let mut state = self.state.borrow_mut();
        if state.reply_owed {
            return Err(MailboxError::Busy(channel));
        }
        state.serve(bus_address)
    }

    fn reset(&mut self, _timeout: Duration) -> core::result::Result<(), MailboxError> {
        let mut state = self.state.borrow_mut();
        state.resets += 1;
        if !state.reply_owed {
            return Ok(());
        }
        if state.faults.unresponsive {
            return Err(MailboxError::Timeout);
        }
        debug!("sim: late reply drained");
        state.reply_owed = false;
        Ok(())
    }
}
