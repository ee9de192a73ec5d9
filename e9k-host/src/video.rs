use crate::abi;

/// Pixel formats the bridge accepts from a core.
///
/// `Xrgb8888` frames are passed through; the 16-bit formats are converted
/// so everything downstream only ever sees XRGB8888.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    /// 15-bit 0RGB1555, the libretro default.
    Orgb1555,
    /// 32-bit XRGB8888.
    #[default]
    Xrgb8888,
    /// 16-bit RGB565.
    Rgb565,
}

impl PixelFormat {
    pub(crate) fn from_retro(value: u32) -> Option<Self> {
        match value {
            abi::PIXEL_FORMAT_0RGB1555 => Some(Self::Orgb1555),
            abi::PIXEL_FORMAT_XRGB8888 => Some(Self::Xrgb8888),
            abi::PIXEL_FORMAT_RGB565 => Some(Self::Rgb565),
            _ => None,
        }
    }
}

/// The most recent video frame, always in XRGB8888.
#[derive(Clone, Copy, Debug)]
pub struct FrameRef<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
}

/// Storage for the latest converted frame.
#[derive(Clone, Debug, Default)]
pub(crate) struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    pub seq: u64,
}

impl FrameBuffer {
    /// Stores one frame as delivered by the core's video callback.
    pub fn store(&mut self, src: &[u8], width: u32, height: u32, pitch: usize, format: PixelFormat) {
        // Some cores negotiate XRGB8888 but then deliver 2-byte pixels;
        // treat those frames as 0RGB1555.
        let bytes_per_pixel = if width > 0 { pitch / width as usize } else { 0 };
        let format = if format == PixelFormat::Xrgb8888 && bytes_per_pixel == 2 {
            PixelFormat::Orgb1555
        } else {
            format
        };

        match format {
            PixelFormat::Xrgb8888 => {
                let needed = height as usize * pitch;
                self.data.clear();
                self.data.extend_from_slice(&src[..needed.min(src.len())]);
                self.data.resize(needed, 0);
                self.pitch = pitch;
            }
            PixelFormat::Rgb565 | PixelFormat::Orgb1555 => {
                let needed = width as usize * height as usize * 4;
                self.data.resize(needed, 0);
                for y in 0..height as usize {
                    let src_row = &src[y * pitch..];
                    let dst_row = &mut self.data[y * width as usize * 4..];
                    for x in 0..width as usize {
                        let p = u16::from_le_bytes([src_row[x * 2], src_row[x * 2 + 1]]);
                        let rgb = match format {
                            PixelFormat::Rgb565 => expand_rgb565(p),
                            _ => expand_0rgb1555(p),
                        };
                        dst_row[x * 4..x * 4 + 4].copy_from_slice(&rgb.to_le_bytes());
                    }
                }
                self.pitch = width as usize * 4;
            }
        }
        self.width = width;
        self.height = height;
        self.seq += 1;
    }

    pub fn frame(&self) -> Option<FrameRef<'_>> {
        if self.data.is_empty() || self.width == 0 || self.height == 0 {
            return None;
        }
        Some(FrameRef {
            pixels: &self.data,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
        })
    }
}

fn expand_rgb565(p: u16) -> u32 {
    let r = (((p >> 11) & 0x1f) << 3) as u32;
    let g = (((p >> 5) & 0x3f) << 2) as u32;
    let b = ((p & 0x1f) << 3) as u32;
    0xff00_0000 | (r << 16) | (g << 8) | b
}

fn expand_0rgb1555(p: u16) -> u32 {
    let r = (((p >> 10) & 0x1f) << 3) as u32;
    let g = (((p >> 5) & 0x1f) << 3) as u32;
    let b = ((p & 0x1f) << 3) as u32;
    0xff00_0000 | (r << 16) | (g << 8) | b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_rgb565() {
        assert_eq!(expand_rgb565(0xffff), 0xfff8_fcf8);
        assert_eq!(expand_rgb565(0x0000), 0xff00_0000);
        assert_eq!(expand_rgb565(0xf800), 0xfff8_0000);
        assert_eq!(expand_rgb565(0x07e0), 0xff00_fc00);
        assert_eq!(expand_rgb565(0x001f), 0xff00_00f8);
    }

    #[test]
    fn test_expand_0rgb1555() {
        assert_eq!(expand_0rgb1555(0x7c00), 0xfff8_0000);
        assert_eq!(expand_0rgb1555(0x03e0), 0xff00_f800);
        assert_eq!(expand_0rgb1555(0x001f), 0xff00_00f8);
    }

    #[test]
    fn test_store_xrgb8888_pass_through() {
        let mut fb = FrameBuffer::default();
        let src = vec![0x11u8; 2 * 2 * 4];
        fb.store(&src, 2, 2, 8, PixelFormat::Xrgb8888);
        assert_eq!(fb.data, src);
        assert_eq!(fb.pitch, 8);
        let frame = fb.frame().unwrap();
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 2);
    }

    #[test]
    fn test_store_rgb565_converts() {
        let mut fb = FrameBuffer::default();
        let src: Vec<u8> = [0xf800u16, 0x07e0, 0x001f, 0x0000]
            .iter()
            .flat_map(|p| p.to_le_bytes())
            .collect();
        fb.store(&src, 2, 2, 4, PixelFormat::Rgb565);
        assert_eq!(fb.pitch, 8);
        let px = |i: usize| {
            u32::from_le_bytes(fb.data[i * 4..i * 4 + 4].try_into().unwrap())
        };
        assert_eq!(px(0), 0xfff8_0000);
        assert_eq!(px(1), 0xff00_fc00);
        assert_eq!(px(2), 0xff00_00f8);
        assert_eq!(px(3), 0xff00_0000);
    }

    #[test]
    fn test_two_byte_xrgb8888_downgrades_to_1555() {
        let mut fb = FrameBuffer::default();
        let src: Vec<u8> = 0x7c00u16.to_le_bytes().to_vec();
        fb.store(&src, 1, 1, 2, PixelFormat::Xrgb8888);
        let px = u32::from_le_bytes(fb.data[0..4].try_into().unwrap());
        assert_eq!(px, 0xfff8_0000);
    }
}
