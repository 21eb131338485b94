//! # Framebuffer Session
//!
//! Owns one negotiation with the firmware: the shared descriptor, the
//! negotiated mode, the mapped pixel memory and the color map.
//!
//! ```text
//!   new() ──► DescriptorAllocated ──commit──► ModeCommitted ──map──► Mapped
//!                     ▲                            │                  │
//!                     └────── map failed ──────────┘        commit ◄──┘
//!   teardown() from any state ──► TornDown
//! ```
//!
//! The firmware's answer, not the request, decides the buffer layout. A
//! response is sanity checked before anything is mapped; a rejected
//! response leaves the previous mapping in place.

use core::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::cmap::ColorMap;
use crate::config::FbConfig;
use crate::descriptor::{FbRequest, FbResponse, DESCRIPTOR_SIZE};
use crate::error::{CoprocessorFault, FbError, Result};
use crate::format::Visual;
use crate::mailbox::{CoprocessorChannel, MailboxError, CHANNEL_FRAMEBUFFER};
use crate::memory::{page_align, HostMemory, IoMapping, SharedRegion};
use crate::mode::{ModeRequest, ModeValidator, NegotiatedMode};
use crate::raster::{CopyArea, FillRect, Image, Surface};

/// Lifecycle position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Descriptor exists, nothing mapped
    DescriptorAllocated,
    /// Firmware accepted a mode, buffer not yet mapped
    ModeCommitted,
    /// Pixel memory is mapped and drawable
    Mapped,
    TornDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::DescriptorAllocated => "descriptor-allocated",
            SessionState::ModeCommitted => "mode-committed",
            SessionState::Mapped => "mapped",
            SessionState::TornDown => "torn-down",
        };
        f.write_str(name)
    }
}

/// Buffer layout the firmware settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescription {
    /// Bus address of the first pixel
    pub smem_start: u32,
    /// Bytes covered by the virtual resolution (pitch x virtual height)
    pub smem_len: usize,
    /// Bytes per scanline
    pub line_length: u32,
    /// Bytes mapped into the host
    pub screen_size: usize,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub bits_per_pixel: u32,
    pub visual: Visual,
}

impl BufferDescription {
    /// Check a firmware response against the mode that was requested
    fn from_response(mode: &NegotiatedMode, response: &FbResponse) -> core::result::Result<Self, CoprocessorFault> {
        let invalid = |reason: String| Err(CoprocessorFault::InvalidResponse(reason));

        if response.base == 0 {
            return invalid("null buffer base".to_string());
        }
        if response.pitch <= 0 {
            return invalid(format!("pitch {}", response.pitch));
        }
        if response.xres_virtual <= 0 || response.yres_virtual <= 0 {
            return invalid(format!(
                "virtual resolution {}x{}",
                response.xres_virtual, response.yres_virtual
            ));
        }
        if response.bits_per_pixel != mode.bits_per_pixel as i32 {
            return invalid(format!(
                "depth {} differs from requested {}",
                response.bits_per_pixel, mode.bits_per_pixel
            ));
        }

        let xres_virtual = response.xres_virtual as u32;
        let yres_virtual = response.yres_virtual as u32;
        let line_length = response.pitch as u32;
        let row_bytes = (u64::from(xres_virtual) * u64::from(mode.bits_per_pixel) + 7) / 8;
        if u64::from(line_length) < row_bytes {
            return invalid(format!(
                "pitch {} cannot hold {} pixels at {} bpp",
                line_length, xres_virtual, mode.bits_per_pixel
            ));
        }

        let smem_len = match response.smem_len() {
            Some(len) if len > 0 => len,
            _ => return invalid("pitch x virtual height overflows".to_string()),
        };

        let screen_size = match response.screen_size {
            0 => smem_len,
            size if size < 0 || (size as usize) < smem_len => {
                return invalid(format!(
                    "buffer size {} smaller than {} bytes of scanlines",
                    size, smem_len
                ));
            }
            size => size as usize,
        };

        let smem_start = response.base_address();
        if u64::from(smem_start) + screen_size as u64 > u64::from(u32::MAX) + 1 {
            return invalid(format!(
                "buffer 0x{:08x}+{} wraps the bus address space",
                smem_start, screen_size
            ));
        }

        Ok(Self {
            smem_start,
            smem_len,
            line_length,
            screen_size,
            xres_virtual,
            yres_virtual,
            bits_per_pixel: mode.bits_per_pixel,
            visual: Visual::for_depth(mode.bits_per_pixel),
        })
    }
}

/// One framebuffer negotiated with the firmware
pub struct FramebufferSession<M: HostMemory, C: CoprocessorChannel> {
    memory: M,
    channel: C,
    validator: ModeValidator,
    timeout: Duration,
    descriptor: Option<M::Region>,
    mapping: Option<IoMapping>,
    mode: Option<NegotiatedMode>,
    response: Option<FbResponse>,
    buffer: Option<BufferDescription>,
    cmap: ColorMap,
    state: SessionState,
    /// Last round-trip timed out; the firmware may still answer it
    reply_owed: bool,
}

impl<M: HostMemory, C: CoprocessorChannel> FramebufferSession<M, C> {
    /// Allocate the shared descriptor.
    ///
    /// Fails with [`FbError::AllocationFailure`] when the host cannot
    /// provide coherent memory; no session exists in that case.
    pub fn new(mut memory: M, channel: C, config: &FbConfig) -> Result<Self> {
        let region = memory.alloc_coherent(page_align(DESCRIPTOR_SIZE)).map_err(|e| {
            error!("unable to allocate framebuffer descriptor: {}", e);
            e
        })?;

        if region.len() < DESCRIPTOR_SIZE {
            let len = region.len();
            memory.free_coherent(region);
            return Err(FbError::AllocationFailure(format!(
                "descriptor region of {} bytes is smaller than {}",
                len, DESCRIPTOR_SIZE
            )));
        }

        debug!(
            "session: descriptor at bus 0x{:08x} ({} bytes)",
            region.bus_address(),
            region.len()
        );

        Ok(Self {
            memory,
            channel,
            validator: ModeValidator::new(config),
            timeout: config.commit_timeout(),
            descriptor: Some(region),
            mapping: None,
            mode: None,
            response: None,
            buffer: None,
            cmap: ColorMap::new(),
            state: SessionState::DescriptorAllocated,
            reply_owed: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Mode last accepted by the firmware
    pub fn mode(&self) -> Option<&NegotiatedMode> {
        self.mode.as_ref()
    }

    /// Layout of the currently mapped buffer
    pub fn buffer(&self) -> Option<&BufferDescription> {
        self.buffer.as_ref()
    }

    /// Descriptor snapshot from the last accepted round-trip
    pub fn response(&self) -> Option<&FbResponse> {
        self.response.as_ref()
    }

    pub fn mapping(&self) -> Option<&IoMapping> {
        self.mapping.as_ref()
    }

    pub fn cmap(&self) -> &ColorMap {
        &self.cmap
    }

    /// Normalize `request` without touching the firmware
    pub fn check(&self, request: &ModeRequest) -> Result<NegotiatedMode> {
        let hint = self.buffer.map(|b| b.screen_size).unwrap_or(0);
        self.validator.validate(request, hint)
    }

    /// Hand `mode` to the firmware and map the buffer it returns.
    ///
    /// `mode` should come from [`check`](Self::check). On a transport
    /// failure or a rejected response the session keeps its previous mode
    /// and mapping. If the new buffer cannot be mapped the previous mapping
    /// is already gone and the session drops back to
    /// [`SessionState::DescriptorAllocated`] with no mode.
    ///
    /// After a timeout the next commit first waits for the late reply; if
    /// the firmware is still silent nothing new is posted.
    pub fn commit(&mut self, mode: NegotiatedMode) -> Result<BufferDescription> {
        if self.state == SessionState::TornDown {
            return Err(FbError::SessionClosed);
        }

        let response = self.round_trip(&mode)?;
        let buffer = BufferDescription::from_response(&mode, &response).map_err(|fault| {
            warn!("session: rejecting firmware response {:?}: {}", response, fault);
            fault
        })?;

        self.state = SessionState::ModeCommitted;
        self.mode = None;
        self.response = None;
        debug!("session: {} committed, state {}", mode, self.state);

        let buffer = self.map(buffer)?;
        self.mode = Some(mode);
        self.response = Some(response);
        Ok(buffer)
    }

    /// Consume the reply to a timed-out request before the descriptor is reused
    fn drain_late_reply(&mut self) -> Result<()> {
        if !self.reply_owed {
            return Ok(());
        }
        self.channel.reset(self.timeout).map_err(|e| {
            warn!("session: firmware still owes a reply: {}", e);
            CoprocessorFault::Transport(e)
        })?;
        self.reply_owed = false;
        debug!("session: late firmware reply drained");
        Ok(())
    }

    /// Write the request, ring the mailbox, read the answer
    fn round_trip(&mut self, mode: &NegotiatedMode) -> Result<FbResponse> {
        self.drain_late_reply()?;

        let region = self.descriptor.as_mut().ok_or(FbError::SessionClosed)?;

        FbRequest::from_mode(mode).store(region);
        let bus_address = region.bus_address();

        debug!(
            "session: requesting {} via descriptor 0x{:08x}",
            mode, bus_address
        );

        let status = match self.channel.call(CHANNEL_FRAMEBUFFER, bus_address, self.timeout) {
            Ok(status) => status,
            Err(e) => {
                warn!("session: framebuffer round-trip failed: {}", e);
                if e == MailboxError::Timeout {
                    self.reply_owed = true;
                }
                return Err(CoprocessorFault::Transport(e).into());
            }
        };
        if status != 0 {
            warn!("session: firmware returned status 0x{:08x}", status);
            return Err(CoprocessorFault::Status(status).into());
        }

        Ok(FbResponse::load(&*region))
    }

    fn map(&mut self, buffer: BufferDescription) -> Result<BufferDescription> {
        self.release_mapping();

        match self.memory.map_uncached(buffer.smem_start, buffer.screen_size) {
            Some(mapping) => {
                info!(
                    "framebuffer: start=0x{:08x} len={} pitch={} {}x{} {}bpp",
                    buffer.smem_start,
                    buffer.screen_size,
                    buffer.line_length,
                    buffer.xres_virtual,
                    buffer.yres_virtual,
                    buffer.bits_per_pixel
                );
                self.mapping = Some(mapping);
                self.buffer = Some(buffer);
                self.state = SessionState::Mapped;
                Ok(buffer)
            }
            None => {
                error!(
                    "session: cannot map firmware buffer at 0x{:08x} ({} bytes)",
                    buffer.smem_start, buffer.screen_size
                );
                self.state = SessionState::DescriptorAllocated;
                Err(CoprocessorFault::Unmappable {
                    base: buffer.smem_start,
                    len: buffer.screen_size,
                }
                .into())
            }
        }
    }

    fn release_mapping(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            debug!("session: unmapping 0x{:08x}", mapping.bus_address());
            self.memory.unmap(mapping);
        }
        self.buffer = None;
    }

    /// Release the mapping and the descriptor. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.state == SessionState::TornDown {
            return;
        }
        self.release_mapping();
        if self.drain_late_reply().is_err() {
            warn!("session: releasing descriptor with a firmware reply outstanding");
        }
        if let Some(region) = self.descriptor.take() {
            self.memory.free_coherent(region);
        }
        self.state = SessionState::TornDown;
        debug!("session: torn down");
    }

    /// Update one color map entry from 16-bit channel intensities
    pub fn set_color_entry(&mut self, index: u32, red: u32, green: u32, blue: u32, transp: u32) -> Result<()> {
        let format = self.mode.map(|m| m.color).unwrap_or_default();
        self.cmap.set_entry(&format, index, red, green, blue, transp)
    }

    /// Pixel value for a color index. True-color modes translate through
    /// the color map; palette modes draw the index itself.
    fn resolve_color(&self, color: u32) -> u32 {
        match self.buffer.map(|b| b.visual) {
            Some(Visual::TrueColor) => self.cmap.get(color as usize).unwrap_or(color),
            _ => color,
        }
    }

    fn surface(&mut self) -> Result<Surface<'_>> {
        match (self.mapping.as_mut(), self.buffer) {
            (Some(mapping), Some(buffer)) => Ok(Surface::new(
                mapping.as_mut_slice(),
                buffer.line_length as usize,
                buffer.bits_per_pixel,
                buffer.xres_virtual,
                buffer.yres_virtual,
            )),
            _ => Err(FbError::NotMapped),
        }
    }

    pub fn fill_rect(&mut self, rect: &FillRect) -> Result<()> {
        let pixel = self.resolve_color(rect.color);
        self.surface()?.fill_rect(rect, pixel);
        Ok(())
    }

    pub fn copy_area(&mut self, area: &CopyArea) -> Result<()> {
        self.surface()?.copy_area(area);
        Ok(())
    }

    pub fn image_blit(&mut self, image: &Image<'_>) -> Result<()> {
        let fg = self.resolve_color(image.fg_color);
        let bg = self.resolve_color(image.bg_color);
        if self.surface()?.image_blit(image, fg, bg) {
            Ok(())
        } else {
            Err(FbError::UnsupportedOperation("image depth does not match framebuffer"))
        }
    }

    /// Screen blanking is not implemented by the firmware interface
    pub fn blank(&mut self, level: u32) -> Result<()> {
        debug!("session: blank({}) requested", level);
        Err(FbError::UnsupportedOperation("blank"))
    }
}

impl<M: HostMemory, C: CoprocessorChannel> Drop for FramebufferSession<M, C> {
    fn drop(&mut self) {
        self.teardown();
    }
}
