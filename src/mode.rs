//! # Mode Validation
//!
//! Normalizes a requested display mode into one the allocation protocol
//! can satisfy. Every step nudges the request toward a legal mode; only an
//! unsupported depth or an impossible vertical timing is rejected.

use core::fmt;
use core::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::FbConfig;
use crate::error::{FbError, Result};
use crate::format::{self, Bitfield, ColorFormat, Visual};

/// Vertical timing mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    #[default]
    Normal,
    /// Every line is shown twice
    Doubled,
    /// Alternating fields
    Interlaced,
}

impl ScanMode {
    /// Lines the display actually scans for `yres` visible lines
    pub fn effective_lines(self, yres: u32) -> u64 {
        let yres = u64::from(yres);
        match self {
            ScanMode::Normal => yres,
            ScanMode::Doubled => yres * 2,
            ScanMode::Interlaced => (yres + 1) / 2,
        }
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "progressive" => Ok(ScanMode::Normal),
            "double" | "doubled" => Ok(ScanMode::Doubled),
            "interlace" | "interlaced" => Ok(ScanMode::Interlaced),
            other => Err(format!("unknown scan mode: {}", other)),
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Normal => write!(f, "normal"),
            ScanMode::Doubled => write!(f, "doubled"),
            ScanMode::Interlaced => write!(f, "interlaced"),
        }
    }
}

/// Mode as asked for by the display stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRequest {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    /// `None` asks for the largest virtual height available
    pub yres_virtual: Option<u32>,
    /// Zero leaves the depth to the driver default
    pub bits_per_pixel: u32,
    pub xoffset: i32,
    pub yoffset: i32,
    pub scan: ScanMode,
    /// Caller's current channel layout; only the green length is honored
    pub color: ColorFormat,
}

impl ModeRequest {
    /// Request a `xres` x `yres` mode with a matching virtual size
    pub fn new(xres: u32, yres: u32) -> Self {
        Self {
            xres,
            yres,
            xres_virtual: xres,
            yres_virtual: Some(yres),
            bits_per_pixel: 0,
            xoffset: 0,
            yoffset: 0,
            scan: ScanMode::Normal,
            color: ColorFormat::default(),
        }
    }

    pub fn with_depth(mut self, bits_per_pixel: u32) -> Self {
        self.bits_per_pixel = bits_per_pixel;
        self
    }

    pub fn with_virtual(mut self, xres_virtual: u32, yres_virtual: u32) -> Self {
        self.xres_virtual = xres_virtual;
        self.yres_virtual = Some(yres_virtual);
        self
    }

    /// Ask for the maximum virtual height
    pub fn with_max_virtual_height(mut self) -> Self {
        self.yres_virtual = None;
        self
    }

    pub fn with_pan(mut self, xoffset: i32, yoffset: i32) -> Self {
        self.xoffset = xoffset;
        self.yoffset = yoffset;
        self
    }

    pub fn with_scan(mut self, scan: ScanMode) -> Self {
        self.scan = scan;
        self
    }

    /// Select RGB555 (5) or RGB565 (6) for 16 bpp modes
    pub fn with_green_length(mut self, length: u32) -> Self {
        self.color.green.length = length;
        self
    }
}

/// Mode after normalization; every field is self-consistent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedMode {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub bits_per_pixel: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub scan: ScanMode,
    pub color: ColorFormat,
}

impl NegotiatedMode {
    pub fn visual(&self) -> Visual {
        Visual::for_depth(self.bits_per_pixel)
    }
}

impl From<NegotiatedMode> for ModeRequest {
    fn from(mode: NegotiatedMode) -> Self {
        Self {
            xres: mode.xres,
            yres: mode.yres,
            xres_virtual: mode.xres_virtual,
            yres_virtual: Some(mode.yres_virtual),
            bits_per_pixel: mode.bits_per_pixel,
            xoffset: mode.xoffset as i32,
            yoffset: mode.yoffset as i32,
            scan: mode.scan,
            color: mode.color,
        }
    }
}

impl fmt::Display for NegotiatedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({}x{}) {}bpp +{}+{} {}",
            self.xres,
            self.yres,
            self.xres_virtual,
            self.yres_virtual,
            self.bits_per_pixel,
            self.xoffset,
            self.yoffset,
            self.scan
        )
    }
}

/// Clamp a pan offset into the virtual area.
///
/// Offsets beyond `span` land on `span - 1`, one short of the largest legal
/// offset, matching what existing consumers expect. A zero span saturates
/// to 0 instead of going negative.
fn clamp_offset(offset: i32, span: u32) -> u32 {
    let offset = offset.max(0) as u32;
    if offset > span {
        span.saturating_sub(1)
    } else {
        offset
    }
}

/// Normalizes mode requests against platform limits
#[derive(Debug, Clone)]
pub struct ModeValidator {
    default_depth: u32,
    default_virtual_height: u32,
    max_scanlines: u32,
}

impl Default for ModeValidator {
    fn default() -> Self {
        Self::new(&FbConfig::default())
    }
}

impl ModeValidator {
    pub fn new(config: &FbConfig) -> Self {
        Self {
            default_depth: config.default_depth,
            default_virtual_height: config.default_virtual_height,
            max_scanlines: config.max_scanlines,
        }
    }

    /// Normalize `request` into a mode the firmware can be asked for.
    ///
    /// `screen_size_hint` is the size of the current allocation in bytes.
    /// It is reported but does not bound the virtual height.
    pub fn validate(&self, request: &ModeRequest, screen_size_hint: usize) -> Result<NegotiatedMode> {
        let bits_per_pixel = if request.bits_per_pixel == 0 {
            self.default_depth
        } else {
            request.bits_per_pixel
        };

        debug!(
            "check: {}x{} ({}x{:?}) {}bpp, current allocation {} bytes ({} pixels)",
            request.xres,
            request.yres,
            request.xres_virtual,
            request.yres_virtual,
            bits_per_pixel,
            screen_size_hint,
            (screen_size_hint as u64 * 8).checked_div(u64::from(bits_per_pixel)).unwrap_or(0)
        );

        let mut color = format::derive(bits_per_pixel, request.color.green.length)?;

        let xres_virtual = request.xres_virtual.max(request.xres);

        let yres_virtual = match request.yres_virtual {
            Some(height) => height,
            None => {
                debug!(
                    "check: virtual resolution set to maximum of {}x{}",
                    xres_virtual, self.default_virtual_height
                );
                self.default_virtual_height
            }
        };
        let yres_virtual = yres_virtual.max(request.yres);

        let xoffset = clamp_offset(request.xoffset, xres_virtual - request.xres);
        let yoffset = clamp_offset(request.yoffset, yres_virtual - request.yres);
        if (xoffset as i64, yoffset as i64) != (request.xoffset as i64, request.yoffset as i64) {
            debug!(
                "check: pan offset {},{} clamped to {},{}",
                request.xoffset, request.yoffset, xoffset, yoffset
            );
        }

        color.red.msb_right = false;
        color.green.msb_right = false;
        color.blue.msb_right = false;
        color.transp = Bitfield::default();

        let lines = request.scan.effective_lines(request.yres);
        if lines > u64::from(self.max_scanlines) {
            debug!(
                "check: vertical total {} ({} scan) exceeds {}",
                lines, request.scan, self.max_scanlines
            );
            return Err(FbError::UnsupportedTiming {
                lines: u32::try_from(lines).unwrap_or(u32::MAX),
                max: self.max_scanlines,
            });
        }

        Ok(NegotiatedMode {
            xres: request.xres,
            yres: request.yres,
            xres_virtual,
            yres_virtual,
            bits_per_pixel,
            xoffset,
            yoffset,
            scan: request.scan,
            color,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(request: ModeRequest) -> Result<NegotiatedMode> {
        ModeValidator::default().validate(&request, 0)
    }

    #[test]
    fn test_unset_depth_defaults_to_16() {
        let mode = validate(ModeRequest::new(800, 480)).unwrap();
        assert_eq!(mode.bits_per_pixel, 16);
        assert_eq!(mode.color.green.length, 6);
        assert_eq!(mode.visual(), Visual::TrueColor);
    }

    #[test]
    fn test_invalid_depth_rejected() {
        for bpp in [3, 24] {
            let request = ModeRequest::new(800, 480).with_depth(bpp).with_pan(5, 5);
            let before = request;
            assert!(matches!(validate(request), Err(FbError::InvalidDepth(d)) if d == bpp));
            assert_eq!(request, before);
        }
    }

    #[test]
    fn test_virtual_raised_to_physical() {
        let mode = validate(ModeRequest::new(800, 480).with_depth(32).with_virtual(640, 200)).unwrap();
        assert_eq!(mode.xres_virtual, 800);
        assert_eq!(mode.yres_virtual, 480);
    }

    #[test]
    fn test_max_virtual_height_uses_platform_default() {
        let mode = validate(ModeRequest::new(640, 400).with_max_virtual_height()).unwrap();
        assert_eq!(mode.yres_virtual, 480);

        // Default never undercuts the physical height
        let mode = validate(ModeRequest::new(1024, 768).with_max_virtual_height()).unwrap();
        assert_eq!(mode.yres_virtual, 768);
    }

    #[test]
    fn test_memory_hint_does_not_bound_virtual_height() {
        let request = ModeRequest::new(800, 480).with_max_virtual_height();
        let mode = ModeValidator::default().validate(&request, 64).unwrap();
        assert_eq!(mode.yres_virtual, 480);
    }

    #[test]
    fn test_negative_pan_clamped_to_zero() {
        let mode = validate(ModeRequest::new(800, 480).with_virtual(800, 600).with_pan(-4, -1)).unwrap();
        assert_eq!((mode.xoffset, mode.yoffset), (0, 0));
    }

    #[test]
    fn test_pan_clamp_off_by_one() {
        let request = ModeRequest::new(800, 480).with_virtual(800, 600).with_pan(0, 200);
        let mode = validate(request).unwrap();
        assert_eq!(mode.yoffset, 119);
    }

    #[test]
    fn test_pan_at_span_is_kept() {
        let request = ModeRequest::new(800, 480).with_virtual(800, 600).with_pan(0, 120);
        assert_eq!(validate(request).unwrap().yoffset, 120);
    }

    #[test]
    fn test_pan_without_virtual_space_never_negative() {
        let request = ModeRequest::new(800, 480).with_virtual(800, 480).with_pan(10, 10);
        let mode = validate(request).unwrap();
        assert_eq!((mode.xoffset, mode.yoffset), (0, 0));
    }

    #[test]
    fn test_doubled_scan_rejected() {
        let request = ModeRequest::new(800, 700).with_scan(ScanMode::Doubled);
        assert!(matches!(
            validate(request),
            Err(FbError::UnsupportedTiming { lines: 1400, max: 1200 })
        ));
        assert!(validate(ModeRequest::new(800, 700)).is_ok());
    }

    #[test]
    fn test_interlaced_halves_rounding_up() {
        assert_eq!(ScanMode::Interlaced.effective_lines(1201), 601);
        assert!(validate(ModeRequest::new(1920, 2399).with_scan(ScanMode::Interlaced)).is_ok());
        assert!(validate(ModeRequest::new(1920, 2401).with_scan(ScanMode::Interlaced)).is_err());
        assert!(validate(ModeRequest::new(1920, 1201)).is_err());
    }

    #[test]
    fn test_caller_bitfield_flags_cleared() {
        let mut request = ModeRequest::new(800, 480).with_depth(16).with_green_length(5);
        request.color.transp = Bitfield::new(15, 1);
        request.color.red.msb_right = true;

        let mode = validate(request).unwrap();
        assert_eq!(mode.color.transp, Bitfield::default());
        assert!(!mode.color.red.msb_right);
        assert_eq!(mode.color.red.offset, 10);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let requests = [
            ModeRequest::new(800, 480).with_max_virtual_height(),
            ModeRequest::new(800, 480).with_depth(16).with_virtual(800, 600).with_pan(-3, 500),
            ModeRequest::new(640, 480).with_depth(8).with_virtual(1024, 480).with_pan(900, 0),
            ModeRequest::new(720, 576).with_depth(32).with_scan(ScanMode::Interlaced),
            ModeRequest::new(320, 240).with_depth(16).with_green_length(5),
        ];
        for request in requests {
            let once = validate(request).unwrap();
            let twice = validate(ModeRequest::from(once)).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_scan_mode_parse() {
        assert_eq!("Doubled".parse::<ScanMode>().unwrap(), ScanMode::Doubled);
        assert_eq!("interlace".parse::<ScanMode>().unwrap(), ScanMode::Interlaced);
        assert!("sideways".parse::<ScanMode>().is_err());
    }
}
