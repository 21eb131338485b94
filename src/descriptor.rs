//! # Shared Descriptor
//!
//! Wire layout of the framebuffer descriptor the host and the VideoCore
//! exchange over the framebuffer mailbox channel.
//!
//! ```text
//! +0x00  xres           in
//! +0x04  yres           in
//! +0x08  xres_virtual   in
//! +0x0C  yres_virtual   in
//! +0x10  pitch              out
//! +0x14  bits_per_pixel in
//! +0x18  xoffset        in
//! +0x1C  yoffset        in
//! +0x20  base               out
//! +0x24  screen_size        out
//! ```
//!
//! All words are little-endian `i32`. The host writes an [`FbRequest`];
//! after the round-trip the same bytes are read back as an [`FbResponse`]
//! and the request is never consulted again.

use byteorder::{ByteOrder, LittleEndian};

use crate::memory::SharedRegion;
use crate::mode::NegotiatedMode;

/// Number of 32-bit words in the descriptor
pub const DESCRIPTOR_WORDS: usize = 10;

/// Descriptor size in bytes
pub const DESCRIPTOR_SIZE: usize = DESCRIPTOR_WORDS * 4;

/// Word indices
const XRES: usize = 0;
const YRES: usize = 1;
const XRES_VIRTUAL: usize = 2;
const YRES_VIRTUAL: usize = 3;
const PITCH: usize = 4;
const BPP: usize = 5;
const XOFFSET: usize = 6;
const YOFFSET: usize = 7;
const BASE: usize = 8;
const SCREEN_SIZE: usize = 9;

/// Saturate a host value into a descriptor word
fn to_wire(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Host-authored half of the descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbRequest {
    pub xres: i32,
    pub yres: i32,
    pub xres_virtual: i32,
    pub yres_virtual: i32,
    pub bits_per_pixel: i32,
    pub xoffset: i32,
    pub yoffset: i32,
}

impl FbRequest {
    pub fn from_mode(mode: &NegotiatedMode) -> Self {
        Self {
            xres: to_wire(mode.xres),
            yres: to_wire(mode.yres),
            xres_virtual: to_wire(mode.xres_virtual),
            yres_virtual: to_wire(mode.yres_virtual),
            bits_per_pixel: to_wire(mode.bits_per_pixel),
            xoffset: to_wire(mode.xoffset),
            yoffset: to_wire(mode.yoffset),
        }
    }

    /// Encode with the firmware output fields zeroed
    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut words = [0i32; DESCRIPTOR_WORDS];
        words[XRES] = self.xres;
        words[YRES] = self.yres;
        words[XRES_VIRTUAL] = self.xres_virtual;
        words[YRES_VIRTUAL] = self.yres_virtual;
        words[BPP] = self.bits_per_pixel;
        words[XOFFSET] = self.xoffset;
        words[YOFFSET] = self.yoffset;
        words[PITCH] = 0;
        words[BASE] = 0;
        words[SCREEN_SIZE] = 0;

        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        LittleEndian::write_i32_into(&words, &mut bytes);
        bytes
    }

    /// Publish the request into the shared region
    pub fn store<R: SharedRegion>(&self, region: &mut R) {
        region.write(0, &self.encode());
    }
}

/// Firmware-authored contents of the descriptor after a round-trip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FbResponse {
    pub xres: i32,
    pub yres: i32,
    pub xres_virtual: i32,
    pub yres_virtual: i32,
    /// Bytes per scanline
    pub pitch: i32,
    pub bits_per_pixel: i32,
    pub xoffset: i32,
    pub yoffset: i32,
    /// Bus address of the pixel memory
    pub base: i32,
    /// Size of the pixel memory in bytes
    pub screen_size: i32,
}

impl FbResponse {
    pub fn decode(bytes: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let mut words = [0i32; DESCRIPTOR_WORDS];
        LittleEndian::read_i32_into(bytes, &mut words);
        Self {
            xres: words[XRES],
            yres: words[YRES],
            xres_virtual: words[XRES_VIRTUAL],
            yres_virtual: words[YRES_VIRTUAL],
            pitch: words[PITCH],
            bits_per_pixel: words[BPP],
            xoffset: words[XOFFSET],
            yoffset: words[YOFFSET],
            base: words[BASE],
            screen_size: words[SCREEN_SIZE],
        }
    }

    /// Encode the full descriptor, output fields included
    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let words = [
            self.xres,
            self.yres,
            self.xres_virtual,
            self.yres_virtual,
            self.pitch,
            self.bits_per_pixel,
            self.xoffset,
            self.yoffset,
            self.base,
            self.screen_size,
        ];
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        LittleEndian::write_i32_into(&words, &mut bytes);
        bytes
    }

    /// Snapshot the shared region after the firmware answered
    pub fn load<R: SharedRegion>(region: &R) -> Self {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        region.read(0, &mut bytes);
        Self::decode(&bytes)
    }

    /// Base as the unsigned bus address it really is
    pub fn base_address(&self) -> u32 {
        self.base as u32
    }

    /// Bytes covered by `pitch` rows of the virtual height
    pub fn smem_len(&self) -> Option<usize> {
        let pitch = usize::try_from(self.pitch).ok()?;
        let rows = usize::try_from(self.yres_virtual).ok()?;
        pitch.checked_mul(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{ModeRequest, ModeValidator};

    #[test]
    fn test_request_layout() {
        let mode = ModeValidator::default()
            .validate(&ModeRequest::new(800, 480).with_virtual(1024, 600).with_pan(3, 7), 0)
            .unwrap();
        let bytes = FbRequest::from_mode(&mode).encode();

        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[0x00..0x04], &800i32.to_le_bytes());
        assert_eq!(&bytes[0x04..0x08], &480i32.to_le_bytes());
        assert_eq!(&bytes[0x08..0x0C], &1024i32.to_le_bytes());
        assert_eq!(&bytes[0x0C..0x10], &600i32.to_le_bytes());
        assert_eq!(&bytes[0x10..0x14], &[0; 4]);
        assert_eq!(&bytes[0x14..0x18], &16i32.to_le_bytes());
        assert_eq!(&bytes[0x18..0x1C], &3i32.to_le_bytes());
        assert_eq!(&bytes[0x1C..0x20], &7i32.to_le_bytes());
        assert_eq!(&bytes[0x20..0x28], &[0; 8]);
    }

    #[test]
    fn test_response_reads_output_fields() {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        bytes[0x10..0x14].copy_from_slice(&1600i32.to_le_bytes());
        bytes[0x0C..0x10].copy_from_slice(&480i32.to_le_bytes());
        bytes[0x20..0x24].copy_from_slice(&0x5C00_0000u32.to_le_bytes());
        bytes[0x24..0x28].copy_from_slice(&768_000i32.to_le_bytes());

        let response = FbResponse::decode(&bytes);
        assert_eq!(response.pitch, 1600);
        assert_eq!(response.base_address(), 0x5C00_0000);
        assert_eq!(response.screen_size, 768_000);
        assert_eq!(response.smem_len(), Some(768_000));
    }

    #[test]
    fn test_smem_len_rejects_negative_geometry() {
        let response = FbResponse {
            pitch: -4,
            yres_virtual: 480,
            ..FbResponse::default()
        };
        assert_eq!(response.smem_len(), None);
    }

    #[test]
    fn test_oversized_values_saturate() {
        let mode = NegotiatedMode {
            xres: u32::MAX,
            ..ModeValidator::default().validate(&ModeRequest::new(8, 8), 0).unwrap()
        };
        assert_eq!(FbRequest::from_mode(&mode).xres, i32::MAX);
    }
}
