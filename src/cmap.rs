//! 16-entry pseudo palette.

use crate::error::{FbError, Result};
use crate::format::ColorFormat;

/// Entries kept by the driver
pub const CMAP_LEN: usize = 16;

/// Highest register index the display stack may address
const MAX_REGISTER: u32 = 255;

/// Color lookup table, one packed pixel value per entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorMap {
    entries: [u32; CMAP_LEN],
}

impl ColorMap {
    pub const fn new() -> Self {
        Self {
            entries: [0; CMAP_LEN],
        }
    }

    /// Pack 16-bit channel intensities into entry `index` using `format`.
    ///
    /// Indices 16..=255 are accepted and ignored. Transparency is folded
    /// through the format's transp field, which is always zero width.
    pub fn set_entry(
        &mut self,
        format: &ColorFormat,
        index: u32,
        red: u32,
        green: u32,
        blue: u32,
        transp: u32,
    ) -> Result<()> {
        if index > MAX_REGISTER {
            return Err(FbError::ColorIndexOutOfRange(index));
        }
        if let Some(entry) = self.entries.get_mut(index as usize) {
            *entry = format.transp.convert(transp)
                | format.blue.convert(blue)
                | format.green.convert(green)
                | format.red.convert(red);
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.entries.get(index).copied()
    }

    pub fn entries(&self) -> &[u32; CMAP_LEN] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::derive;

    #[test]
    fn test_rgb565_magenta() {
        let fmt = derive(16, 0).unwrap();
        let mut cmap = ColorMap::new();
        cmap.set_entry(&fmt, 0, 0xFFFF, 0x0000, 0xFFFF, 0x1234).unwrap();
        assert_eq!(cmap.get(0), Some((0x1F << 11) | 0x1F));
        assert_eq!(cmap.get(0), Some(0xF81F));
    }

    #[test]
    fn test_out_of_table_index_is_noop() {
        let fmt = derive(16, 0).unwrap();
        let mut cmap = ColorMap::new();
        cmap.set_entry(&fmt, 16, 0xFFFF, 0xFFFF, 0xFFFF, 0).unwrap();
        cmap.set_entry(&fmt, 255, 0xFFFF, 0xFFFF, 0xFFFF, 0).unwrap();
        assert_eq!(cmap, ColorMap::new());
    }

    #[test]
    fn test_register_space_exceeded() {
        let fmt = derive(16, 0).unwrap();
        let mut cmap = ColorMap::new();
        assert!(matches!(
            cmap.set_entry(&fmt, 256, 0, 0, 0, 0),
            Err(FbError::ColorIndexOutOfRange(256))
        ));
    }

    #[test]
    fn test_32bpp_white() {
        let fmt = derive(32, 0).unwrap();
        let mut cmap = ColorMap::new();
        cmap.set_entry(&fmt, 15, 0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF).unwrap();
        assert_eq!(cmap.get(15), Some(0x00FF_FFFF));
    }

    #[test]
    fn test_palette_mode_channels_alias() {
        let fmt = derive(8, 0).unwrap();
        let mut cmap = ColorMap::new();
        cmap.set_entry(&fmt, 1, 0xAB00, 0x0000, 0x0000, 0).unwrap();
        assert_eq!(cmap.get(1), Some(0xAB));
    }
}
