//! # Pixel Formats
//!
//! Derives the per-channel bitfield layout for a color depth.
//!
//! Depths up to 8 bits are palette indexed: red, green and blue all alias
//! the same index field. 16 and 32 bit depths pack the channels from bit 0
//! upward in blue, green, red order. No depth carries a transparency channel.

use serde::{Deserialize, Serialize};

use crate::error::{FbError, Result};

/// Position of one color channel inside a pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitfield {
    /// Bit offset from the least significant bit
    pub offset: u32,
    /// Width in bits
    pub length: u32,
    /// Most significant bit is on the right (never set by this driver)
    pub msb_right: bool,
}

impl Bitfield {
    pub const fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            msb_right: false,
        }
    }

    /// Mask covering `length` bits, unshifted
    #[inline]
    pub const fn mask(&self) -> u32 {
        if self.length >= 32 {
            u32::MAX
        } else {
            (1u32 << self.length) - 1
        }
    }

    /// Scale a 16-bit channel intensity down to this field and position it
    #[inline]
    pub const fn convert(&self, value: u32) -> u32 {
        if self.length == 0 || self.length > 16 {
            return 0;
        }
        ((value >> (16 - self.length)) & self.mask()) << self.offset
    }

    /// Bit range occupied by this field
    fn span(&self) -> core::ops::Range<u32> {
        self.offset..self.offset + self.length
    }
}

/// How pixel values are interpreted by the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visual {
    /// Pixel value is an index into the color map
    PseudoColor,
    /// Pixel value directly encodes channel intensities
    TrueColor,
}

impl Visual {
    pub const fn for_depth(bits_per_pixel: u32) -> Self {
        if bits_per_pixel <= 8 {
            Visual::PseudoColor
        } else {
            Visual::TrueColor
        }
    }
}

/// Red/green/blue/transparency layout of a pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorFormat {
    pub red: Bitfield,
    pub green: Bitfield,
    pub blue: Bitfield,
    pub transp: Bitfield,
}

impl ColorFormat {
    /// True when the three color channels share one index field
    pub fn is_indexed(&self) -> bool {
        self.red == self.green && self.green == self.blue && self.red.offset == 0
    }

    /// True when no two non-empty direct-color channels share a bit
    pub fn is_disjoint(&self) -> bool {
        let fields = [self.blue, self.green, self.red];
        fields.iter().enumerate().all(|(i, a)| {
            fields[i + 1..].iter().all(|b| {
                a.length == 0
                    || b.length == 0
                    || a.span().end <= b.span().start
                    || b.span().end <= a.span().start
            })
        })
    }
}

/// Derive the channel layout for `bits_per_pixel`.
///
/// `green_hint` is the caller's current green length; at 16 bpp a value of
/// 5 or 6 selects RGB555 or RGB565 and anything else falls back to RGB565.
pub fn derive(bits_per_pixel: u32, green_hint: u32) -> Result<ColorFormat> {
    let mut format = ColorFormat::default();

    match bits_per_pixel {
        1 | 2 | 4 | 8 => {
            let index = Bitfield::new(0, bits_per_pixel);
            format.red = index;
            format.green = index;
            format.blue = index;
            return Ok(format);
        }
        16 => {
            format.red.length = 5;
            format.blue.length = 5;
            format.green.length = if green_hint == 5 || green_hint == 6 {
                green_hint
            } else {
                6
            };
        }
        32 => {
            format.red.length = 8;
            format.green.length = 8;
            format.blue.length = 8;
        }
        other => return Err(FbError::InvalidDepth(other)),
    }

    // Direct color: pack bottom-up from the lengths chosen above
    format.blue.offset = 0;
    format.green.offset = format.blue.offset + format.blue.length;
    format.red.offset = format.green.offset + format.green.length;

    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_depths() {
        for bpp in [1, 2, 4, 8] {
            let fmt = derive(bpp, 0).unwrap();
            for field in [fmt.red, fmt.green, fmt.blue] {
                assert_eq!(field.length, bpp);
                assert_eq!(field.offset, 0);
            }
            assert_eq!(fmt.transp, Bitfield::default());
            assert!(fmt.is_indexed());
        }
    }

    #[test]
    fn test_rgb565_default() {
        let fmt = derive(16, 0).unwrap();
        assert_eq!(fmt.blue, Bitfield::new(0, 5));
        assert_eq!(fmt.green, Bitfield::new(5, 6));
        assert_eq!(fmt.red, Bitfield::new(11, 5));
        assert!(fmt.is_disjoint());
    }

    #[test]
    fn test_rgb555_preserved() {
        let fmt = derive(16, 5).unwrap();
        assert_eq!(fmt.blue.offset, 0);
        assert_eq!(fmt.green, Bitfield::new(5, 5));
        assert_eq!(fmt.red, Bitfield::new(10, 5));
    }

    #[test]
    fn test_green_hint_out_of_range_falls_back() {
        assert_eq!(derive(16, 8).unwrap().green.length, 6);
    }

    #[test]
    fn test_32bpp() {
        let fmt = derive(32, 0).unwrap();
        assert_eq!(fmt.blue, Bitfield::new(0, 8));
        assert_eq!(fmt.green, Bitfield::new(8, 8));
        assert_eq!(fmt.red, Bitfield::new(16, 8));
        assert_eq!(fmt.transp.length, 0);
    }

    #[test]
    fn test_unsupported_depths() {
        for bpp in [0, 3, 12, 24, 64] {
            assert!(matches!(derive(bpp, 0), Err(FbError::InvalidDepth(d)) if d == bpp));
        }
    }

    #[test]
    fn test_convert_takes_top_bits() {
        let red = Bitfield::new(11, 5);
        assert_eq!(red.convert(0xFFFF), 0x1F << 11);
        assert_eq!(red.convert(0x8000), 0x10 << 11);
        assert_eq!(Bitfield::default().convert(0xFFFF), 0);
    }

    #[test]
    fn test_visual_for_depth() {
        assert_eq!(Visual::for_depth(8), Visual::PseudoColor);
        assert_eq!(Visual::for_depth(16), Visual::TrueColor);
    }
}
