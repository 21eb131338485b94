//! # Raster Operations
//!
//! Generic packed-pixel drawing on a mapped framebuffer: rectangle fill,
//! area copy and image/glyph blit. Works for every supported depth.
//! Pixels narrower than a byte are packed most significant bits first, so
//! the leftmost pixel of a byte sits in its high bits. Wider pixels are
//! stored little-endian.
//!
//! All operations clip to the surface; nothing is written outside the
//! virtual resolution or the backing memory.

/// How a fill combines with existing pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rop {
    #[default]
    Copy,
    Xor,
}

/// Solid rectangle fill; `color` is a color index or pixel value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillRect {
    pub dx: u32,
    pub dy: u32,
    pub width: u32,
    pub height: u32,
    pub color: u32,
    pub rop: Rop,
}

/// Copy a `width` x `height` block from (sx, sy) to (dx, dy)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyArea {
    pub dx: u32,
    pub dy: u32,
    pub width: u32,
    pub height: u32,
    pub sx: u32,
    pub sy: u32,
}

/// Image to draw at (dx, dy).
///
/// With `depth == 1` the data is a monochrome bitmap (one bit per pixel,
/// rows padded to whole bytes, MSB first) drawn in `fg_color`/`bg_color`.
/// Otherwise `depth` must match the surface and `data` holds packed pixels.
#[derive(Debug, Clone, Copy)]
pub struct Image<'a> {
    pub dx: u32,
    pub dy: u32,
    pub width: u32,
    pub height: u32,
    pub fg_color: u32,
    pub bg_color: u32,
    pub depth: u32,
    pub data: &'a [u8],
}

/// Packed-pixel view of framebuffer memory
pub struct Surface<'a> {
    mem: &'a mut [u8],
    pitch: usize,
    bits_per_pixel: u32,
    width: u32,
    height: u32,
}

impl<'a> Surface<'a> {
    /// Wrap `mem` laid out as rows of `pitch` bytes.
    ///
    /// The drawable height is reduced to the rows that fit in `mem`, and the
    /// width to the pixels that fit in one pitch.
    pub fn new(mem: &'a mut [u8], pitch: usize, bits_per_pixel: u32, width: u32, height: u32) -> Self {
        let bpp = bits_per_pixel.max(1) as usize;
        let fit_rows = if pitch == 0 { 0 } else { mem.len() / pitch };
        let fit_cols = pitch * 8 / bpp;
        Self {
            mem,
            pitch,
            bits_per_pixel,
            width: width.min(u32::try_from(fit_cols).unwrap_or(u32::MAX)),
            height: height.min(u32::try_from(fit_rows).unwrap_or(u32::MAX)),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel_mask(&self) -> u32 {
        if self.bits_per_pixel >= 32 {
            u32::MAX
        } else {
            (1u32 << self.bits_per_pixel) - 1
        }
    }

    /// Write a pixel with bounds checking
    ///
    /// Returns false if coordinates are out of bounds.
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, value: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let value = value & self.pixel_mask();
        let bpp = self.bits_per_pixel as usize;
        let row = y as usize * self.pitch;

        if bpp >= 8 {
            let start = row + x as usize * bpp / 8;
            let bytes = value.to_le_bytes();
            self.mem[start..start + bpp / 8].copy_from_slice(&bytes[..bpp / 8]);
        } else {
            let bit = x as usize * bpp;
            let shift = 8 - bpp - bit % 8;
            let mask = (self.pixel_mask() as u8) << shift;
            let byte = &mut self.mem[row + bit / 8];
            *byte = (*byte & !mask) | ((value as u8) << shift);
        }
        true
    }

    /// Read a pixel; out of bounds reads return 0
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> u32 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        let bpp = self.bits_per_pixel as usize;
        let row = y as usize * self.pitch;

        if bpp >= 8 {
            let start = row + x as usize * bpp / 8;
            let mut bytes = [0u8; 4];
            bytes[..bpp / 8].copy_from_slice(&self.mem[start..start + bpp / 8]);
            u32::from_le_bytes(bytes)
        } else {
            let bit = x as usize * bpp;
            let shift = 8 - bpp - bit % 8;
            u32::from(self.mem[row + bit / 8] >> shift) & self.pixel_mask()
        }
    }

    /// Fill a rectangle, clamped to the surface
    pub fn fill_rect(&mut self, rect: &FillRect, pixel: u32) {
        let x_end = rect.dx.saturating_add(rect.width).min(self.width);
        let y_end = rect.dy.saturating_add(rect.height).min(self.height);

        for py in rect.dy.min(self.height)..y_end {
            for px in rect.dx.min(self.width)..x_end {
                let value = match rect.rop {
                    Rop::Copy => pixel,
                    Rop::Xor => self.get_pixel(px, py) ^ pixel,
                };
                self.put_pixel(px, py, value);
            }
        }
    }

    /// Copy a block within the surface; overlapping areas are handled
    pub fn copy_area(&mut self, area: &CopyArea) {
        if area.sx >= self.width || area.dx >= self.width || area.sy >= self.height || area.dy >= self.height {
            return;
        }
        let width = area.width.min(self.width - area.sx).min(self.width - area.dx);
        let height = area.height.min(self.height - area.sy).min(self.height - area.dy);

        // Rows are staged through `line`, so horizontal overlap is safe
        let mut line = vec![0u32; width as usize];
        if area.dy > area.sy {
            for row in (0..height).rev() {
                self.copy_row(area, row, &mut line);
            }
        } else {
            for row in 0..height {
                self.copy_row(area, row, &mut line);
            }
        }
    }

    fn copy_row(&mut self, area: &CopyArea, row: u32, line: &mut [u32]) {
        for (i, px) in line.iter_mut().enumerate() {
            *px = self.get_pixel(area.sx + i as u32, area.sy + row);
        }
        for (i, px) in line.iter().enumerate() {
            self.put_pixel(area.dx + i as u32, area.dy + row, *px);
        }
    }

    /// Draw an image; `fg`/`bg` are resolved pixel values for 1-bit images.
    /// Returns false when the image depth cannot be drawn on this surface.
    pub fn image_blit(&mut self, image: &Image<'_>, fg: u32, bg: u32) -> bool {
        let depth = image.depth as usize;
        if image.depth != 1 && image.depth != self.bits_per_pixel {
            return false;
        }
        let stride = (image.width as usize * depth + 7) / 8;
        let mask = if depth >= 32 { u32::MAX } else { (1u32 << depth) - 1 };

        for row in 0..image.height {
            let y = image.dy.saturating_add(row);
            if y >= self.height {
                break;
            }
            let line = match image.data.get(row as usize * stride..(row as usize + 1) * stride) {
                Some(line) => line,
                None => break,
            };
            for col in 0..image.width {
                let x = image.dx.saturating_add(col);
                if x >= self.width {
                    break;
                }
                let bit = col as usize * depth;
                let value = if depth >= 8 {
                    let mut bytes = [0u8; 4];
                    bytes[..depth / 8].copy_from_slice(&line[bit / 8..bit / 8 + depth / 8]);
                    u32::from_le_bytes(bytes)
                } else {
                    u32::from(line[bit / 8] >> (8 - depth - bit % 8)) & mask
                };
                let pixel = if image.depth == 1 {
                    if value != 0 { fg } else { bg }
                } else {
                    value
                };
                self.put_pixel(x, y, pixel);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(dx: u32, dy: u32, width: u32, height: u32) -> FillRect {
        FillRect {
            dx,
            dy,
            width,
            height,
            color: 0,
            rop: Rop::Copy,
        }
    }

    #[test]
    fn test_fill_rect_16bpp() {
        let mut mem = vec![0u8; 8 * 2 * 4];
        let mut surface = Surface::new(&mut mem, 16, 16, 8, 4);
        surface.fill_rect(&fill(1, 1, 2, 2), 0xF81F);

        assert_eq!(surface.get_pixel(1, 1), 0xF81F);
        assert_eq!(surface.get_pixel(2, 2), 0xF81F);
        assert_eq!(surface.get_pixel(0, 0), 0);
        assert_eq!(surface.get_pixel(3, 1), 0);
        assert_eq!(&mem[16 + 2..16 + 4], &[0x1F, 0xF8]);
    }

    #[test]
    fn test_fill_rect_clamps_to_surface() {
        let mut mem = vec![0u8; 4 * 4 * 4];
        let mut surface = Surface::new(&mut mem, 16, 32, 4, 4);
        surface.fill_rect(&fill(2, 2, 100, u32::MAX), 0x00FF_FFFF);

        assert_eq!(surface.get_pixel(3, 3), 0x00FF_FFFF);
        assert_eq!(surface.get_pixel(1, 3), 0);
        assert!(!surface.put_pixel(4, 0, 1));
    }

    #[test]
    fn test_xor_fill() {
        let mut mem = vec![0u8; 4];
        let mut surface = Surface::new(&mut mem, 4, 8, 4, 1);
        surface.put_pixel(0, 0, 0x0F);
        let mut rect = fill(0, 0, 2, 1);
        rect.rop = Rop::Xor;
        surface.fill_rect(&rect, 0xFF);

        assert_eq!(mem, vec![0xF0, 0xFF, 0, 0]);
    }

    #[test]
    fn test_sub_byte_pixels_msb_first() {
        let mut mem = vec![0u8; 2];
        let mut surface = Surface::new(&mut mem, 2, 4, 4, 1);
        surface.put_pixel(0, 0, 0xA);
        surface.put_pixel(3, 0, 0x5);
        assert_eq!(surface.get_pixel(0, 0), 0xA);
        assert_eq!(surface.get_pixel(1, 0), 0);
        assert_eq!(mem, vec![0xA0, 0x05]);
    }

    #[test]
    fn test_sub_byte_overwrite_keeps_neighbours() {
        let mut mem = vec![0xFFu8];
        let mut surface = Surface::new(&mut mem, 1, 2, 4, 1);
        assert!(surface.put_pixel(1, 0, 0b01));
        assert_eq!(surface.get_pixel(0, 0), 0b11);
        assert_eq!(surface.get_pixel(1, 0), 0b01);
        assert_eq!(mem, vec![0b1101_1111]);
    }

    #[test]
    fn test_height_limited_by_memory() {
        let mut mem = vec![0u8; 10];
        let surface = Surface::new(&mut mem, 4, 8, 4, 480);
        assert_eq!(surface.dimensions(), (4, 2));
    }

    #[test]
    fn test_copy_area_overlapping_down() {
        let mut mem = vec![0u8; 4 * 4];
        let mut surface = Surface::new(&mut mem, 4, 8, 4, 4);
        for y in 0..4 {
            surface.fill_rect(&fill(0, y, 4, 1), y + 1);
        }
        surface.copy_area(&CopyArea {
            dx: 0,
            dy: 1,
            width: 4,
            height: 3,
            sx: 0,
            sy: 0,
        });
        assert_eq!(mem, vec![1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn test_copy_area_overlapping_left() {
        let mut mem = vec![1u8, 2, 3, 4];
        let mut surface = Surface::new(&mut mem, 4, 8, 4, 1);
        surface.copy_area(&CopyArea {
            dx: 0,
            dy: 0,
            width: 3,
            height: 1,
            sx: 1,
            sy: 0,
        });
        assert_eq!(mem, vec![2, 3, 4, 4]);
    }

    #[test]
    fn test_glyph_blit() {
        let glyph = [0b1000_0001u8, 0b0100_0010];
        let mut mem = vec![0u8; 8 * 2 * 2];
        let mut surface = Surface::new(&mut mem, 16, 16, 8, 2);
        let image = Image {
            dx: 0,
            dy: 0,
            width: 8,
            height: 2,
            fg_color: 1,
            bg_color: 0,
            depth: 1,
            data: &glyph,
        };
        assert!(surface.image_blit(&image, 0xFFFF, 0x0001));

        assert_eq!(surface.get_pixel(0, 0), 0xFFFF);
        assert_eq!(surface.get_pixel(1, 0), 0x0001);
        assert_eq!(surface.get_pixel(7, 0), 0xFFFF);
        assert_eq!(surface.get_pixel(1, 1), 0xFFFF);
        assert_eq!(surface.get_pixel(0, 1), 0x0001);
    }

    #[test]
    fn test_full_depth_blit_and_mismatch() {
        let pixels = [0x11u8, 0x22, 0x33, 0x44];
        let mut mem = vec![0u8; 4];
        let mut surface = Surface::new(&mut mem, 4, 8, 4, 1);
        let mut image = Image {
            dx: 1,
            dy: 0,
            width: 4,
            height: 1,
            fg_color: 0,
            bg_color: 0,
            depth: 8,
            data: &pixels,
        };
        assert!(surface.image_blit(&image, 0, 0));
        assert_eq!(mem, vec![0, 0x11, 0x22, 0x33]);

        let mut mem = vec![0u8; 4];
        let mut surface = Surface::new(&mut mem, 4, 8, 4, 1);
        image.depth = 16;
        assert!(!surface.image_blit(&image, 0, 0));
    }
}
