//! # VideoCore Framebuffer Negotiation
//!
//! Host-side driver for the framebuffer exposed by the BCM2708/BCM2711
//! VideoCore GPU. The host validates a requested display mode, places a
//! ten-word descriptor in coherent memory, hands it to the firmware over
//! the mailbox framebuffer channel, and maps the pixel buffer the firmware
//! hands back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Display stack / vcfb          │
//! │  ┌─────────────────────────────────┐    │
//! │  │      FramebufferDevice          │    │
//! │  │  (attach, fixed info, monspecs) │    │
//! │  └──────────────┬──────────────────┘    │
//! │                 │                        │
//! │  ┌──────────────┴──────────────────┐    │
//! │  │      FramebufferSession         │    │
//! │  │  - ModeValidator (check)        │    │
//! │  │  - descriptor round-trip        │    │
//! │  │  - ColorMap / raster ops        │    │
//! │  └──────┬───────────────┬──────────┘    │
//! │         │               │               │
//! │  ┌──────┴──────┐ ┌──────┴──────────┐    │
//! │  │ HostMemory  │ │ CoprocessorChan │    │
//! │  │ (coherent,  │ │ (Mailbox, ch 1) │    │
//! │  │  io-mapped) │ │                 │    │
//! │  └─────────────┘ └─────────────────┘    │
//! ├─────────────────────────────────────────┤
//! │  VideoCore GPU (or VideoCoreSim)        │
//! └─────────────────────────────────────────┘
//! ```

pub mod cmap;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod format;
pub mod mailbox;
pub mod memory;
pub mod mode;
pub mod raster;
pub mod session;
pub mod sim;

pub use cmap::ColorMap;
pub use config::{ConfigError, FbConfig};
pub use descriptor::{FbRequest, FbResponse};
pub use device::{FixedInfo, FramebufferDevice, MonitorSpecs};
pub use error::{CoprocessorFault, FbError, Result};
pub use format::{Bitfield, ColorFormat, Visual};
pub use mailbox::{CoprocessorChannel, Mailbox, MailboxError};
pub use memory::{HostMemory, IoMapping, SharedRegion};
pub use mode::{ModeRequest, ModeValidator, NegotiatedMode, ScanMode};
pub use raster::{CopyArea, FillRect, Image, Rop};
pub use session::{BufferDescription, FramebufferSession, SessionState};
pub use sim::VideoCoreSim;

/// BCM2708 peripheral base address (ARM physical)
pub const BCM2708_PERIPH_BASE: usize = 0x2000_0000;

/// BCM2711 peripheral base address (Raspberry Pi 4)
pub const BCM2711_PERIPH_BASE: usize = 0xFE00_0000;

/// Offset of the mailbox block from the peripheral base
pub const MAILBOX_OFFSET: usize = 0xB880;

/// GPU bus address to ARM physical address translation
#[inline]
pub const fn gpu_to_arm(gpu_addr: u32) -> usize {
    // Top two bits select the cache alias; all of them map to ARM 0x00000000+
    (gpu_addr & 0x3FFF_FFFF) as usize
}

/// ARM physical address to GPU bus address translation
#[inline]
pub const fn arm_to_gpu(arm_addr: usize) -> u32 {
    // Uncached alias
    (arm_addr as u32) | 0xC000_0000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_translation() {
        assert_eq!(gpu_to_arm(0xC000_1000), 0x1000);
        assert_eq!(gpu_to_arm(0x8000_1000), 0x1000);
        assert_eq!(gpu_to_arm(0x4000_1000), 0x1000);
        assert_eq!(arm_to_gpu(0x1C00_0000), 0xDC00_0000);
        assert_eq!(gpu_to_arm(arm_to_gpu(0x1C00_4000)), 0x1C00_4000);
    }

    #[test]
    fn test_mailbox_offsets() {
        assert_eq!(BCM2708_PERIPH_BASE + MAILBOX_OFFSET, 0x2000_B880);
        assert_eq!(BCM2711_PERIPH_BASE + MAILBOX_OFFSET, 0xFE00_B880);
    }
}
