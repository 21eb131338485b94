//! # Framebuffer Device
//!
//! Attach/detach glue: builds a session from configuration, applies the
//! default mode, and reports the fixed screen information and monitor
//! limits the display stack asks for.

use log::info;

use crate::config::FbConfig;
use crate::error::Result;
use crate::format::Visual;
use crate::mailbox::CoprocessorChannel;
use crate::memory::HostMemory;
use crate::mode::{ModeRequest, NegotiatedMode};
use crate::session::{BufferDescription, FramebufferSession};

/// Identifier reported to the display stack (at most 16 characters)
pub const FB_ID: &str = "BCM2708 FB";

/// Memory organization of the framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FbType {
    PackedPixels,
}

/// Hardware acceleration available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accel {
    None,
}

/// Screen information that only changes when a mode is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInfo {
    pub id: &'static str,
    pub fb_type: FbType,
    pub visual: Visual,
    pub line_length: u32,
    pub smem_start: u32,
    pub smem_len: usize,
    /// Panning is not supported; all steps are zero
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    pub accel: Accel,
}

/// Monitor timing limits advertised for the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSpecs {
    /// Horizontal frequency range in Hz
    pub hfmin: u32,
    pub hfmax: u32,
    /// Vertical refresh range in Hz
    pub vfmin: u32,
    pub vfmax: u32,
    /// Pixel clock range in Hz
    pub dclkmin: u32,
    pub dclkmax: u32,
}

impl Default for MonitorSpecs {
    fn default() -> Self {
        Self {
            hfmin: 0,
            hfmax: 100_000,
            vfmin: 0,
            vfmax: 400,
            dclkmin: 1_000_000,
            dclkmax: 100_000_000,
        }
    }
}

/// An attached framebuffer
pub struct FramebufferDevice<M: HostMemory, C: CoprocessorChannel> {
    session: FramebufferSession<M, C>,
    config: FbConfig,
    monspecs: MonitorSpecs,
}

impl<M: HostMemory, C: CoprocessorChannel> FramebufferDevice<M, C> {
    /// Create the session and bring up the configured default mode.
    ///
    /// On failure everything allocated so far is released.
    pub fn attach(memory: M, channel: C, config: FbConfig) -> Result<Self> {
        let mut session = FramebufferSession::new(memory, channel, &config)?;

        let request = ModeRequest::new(config.width, config.height).with_depth(config.default_depth);
        let mode = session.check(&request)?;

        info!(
            "registering framebuffer ({}, {})",
            config.width, config.height
        );
        session.commit(mode)?;

        Ok(Self {
            session,
            config,
            monspecs: MonitorSpecs::default(),
        })
    }

    /// Tear the session down and release the device
    pub fn detach(mut self) {
        info!("removing framebuffer");
        self.session.teardown();
    }

    /// Validate and apply a new mode
    pub fn set_mode(&mut self, request: &ModeRequest) -> Result<BufferDescription> {
        let mode = self.session.check(request)?;
        self.session.commit(mode)
    }

    /// Mode currently in effect
    pub fn var(&self) -> Option<&NegotiatedMode> {
        self.session.mode()
    }

    pub fn fixed_info(&self) -> FixedInfo {
        let buffer = self.session.buffer();
        let depth = self
            .session
            .mode()
            .map(|m| m.bits_per_pixel)
            .unwrap_or(self.config.default_depth);

        FixedInfo {
            id: FB_ID,
            fb_type: FbType::PackedPixels,
            visual: buffer.map(|b| b.visual).unwrap_or(Visual::for_depth(depth)),
            line_length: buffer.map(|b| b.line_length).unwrap_or(0),
            smem_start: buffer.map(|b| b.smem_start).unwrap_or(0),
            smem_len: buffer.map(|b| b.smem_len).unwrap_or(0),
            xpanstep: 0,
            ypanstep: 0,
            ywrapstep: 0,
            accel: Accel::None,
        }
    }

    pub fn monitor_specs(&self) -> &MonitorSpecs {
        &self.monspecs
    }

    pub fn config(&self) -> &FbConfig {
        &self.config
    }

    pub fn set_color_entry(&mut self, index: u32, red: u32, green: u32, blue: u32, transp: u32) -> Result<()> {
        self.session.set_color_entry(index, red, green, blue, transp)
    }

    pub fn session(&self) -> &FramebufferSession<M, C> {
        &self.session
    }

    /// Session access for raster operations
    pub fn session_mut(&mut self) -> &mut FramebufferSession<M, C> {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FbError;
    use crate::session::SessionState;
    use crate::sim::{Faults, VideoCoreSim};

    #[test]
    fn test_attach_applies_default_mode() {
        let sim = VideoCoreSim::new();
        let device = FramebufferDevice::attach(sim.memory(), sim.channel(), FbConfig::default()).unwrap();

        let var = device.var().unwrap();
        assert_eq!((var.xres, var.yres), (800, 480));
        assert_eq!((var.xres_virtual, var.yres_virtual), (800, 480));
        assert_eq!(var.bits_per_pixel, 16);

        let fix = device.fixed_info();
        assert_eq!(fix.id, "BCM2708 FB");
        assert!(fix.id.len() <= 16);
        assert_eq!(fix.fb_type, FbType::PackedPixels);
        assert_eq!(fix.visual, Visual::TrueColor);
        assert_eq!(fix.line_length, 1600);
        assert_eq!(fix.smem_len, 1600 * 480);
        assert_eq!((fix.xpanstep, fix.ypanstep, fix.ywrapstep), (0, 0, 0));
        assert_eq!(device.session().state(), SessionState::Mapped);
    }

    #[test]
    fn test_configured_geometry() {
        let sim = VideoCoreSim::new();
        let config = FbConfig {
            width: 1280,
            height: 720,
            default_depth: 32,
            ..FbConfig::default()
        };
        let device = FramebufferDevice::attach(sim.memory(), sim.channel(), config).unwrap();
        assert_eq!(device.fixed_info().line_length, 5120);
    }

    #[test]
    fn test_attach_failure_releases_descriptor() {
        let sim = VideoCoreSim::new();
        sim.set_faults(Faults {
            unresponsive: true,
            ..Faults::default()
        });
        let result = FramebufferDevice::attach(sim.memory(), sim.channel(), FbConfig::default());
        assert!(matches!(result, Err(FbError::CoprocessorFault(_))));
        assert_eq!(sim.live_regions(), 0);
    }

    #[test]
    fn test_set_mode_and_detach() {
        let sim = VideoCoreSim::new();
        let mut device = FramebufferDevice::attach(sim.memory(), sim.channel(), FbConfig::default()).unwrap();

        let buffer = device
            .set_mode(&ModeRequest::new(640, 480).with_depth(8).with_max_virtual_height())
            .unwrap();
        assert_eq!(buffer.visual, Visual::PseudoColor);
        assert_eq!(device.fixed_info().visual, Visual::PseudoColor);

        device.detach();
        assert_eq!(sim.live_mappings(), 0);
        assert_eq!(sim.live_regions(), 0);
    }

    #[test]
    fn test_monitor_specs() {
        let sim = VideoCoreSim::new();
        let device = FramebufferDevice::attach(sim.memory(), sim.channel(), FbConfig::default()).unwrap();
        let specs = device.monitor_specs();
        assert_eq!(specs.hfmax, 100_000);
        assert_eq!(specs.vfmax, 400);
        assert_eq!(specs.dclkmax, 100_000_000);
    }
}
