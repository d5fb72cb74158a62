//! Framebuffer pixel conversion.
//!
//! Cores hand back RGB565, XRGB8888 or 0RGB1555 rows; consumers get ABGR8888,
//! which is RGBA byte order in little-endian memory.

use crate::abi::PixelFormat;

/// Optional post-processing applied while converting a frame.
#[derive(Debug, Clone, Copy, Default)]
pub enum PixelProcess {
    /// Pass colors through untouched.
    #[default]
    None,
    /// Contrast boost compensating for the original non-backlit display.
    ColorCorrection,
    /// Remap every pixel to one of four palette colors by luminance. Colors
    /// are ABGR8888, ordered lightest to darkest.
    Palette([u32; 4]),
}

/// The classic pea-green DMG shades, lightest first.
pub const DMG_PALETTE: [u32; 4] = [0xFF0F_BC9B, 0xFF0F_AC8B, 0xFF30_6230, 0xFF0F_380F];

/// Converts an ARGB color (e.g. from a host-side palette picker) to ABGR8888.
pub fn argb_to_abgr(c: u32) -> u32 {
    (c & 0xFF00_FF00) | ((c & 0x00FF_0000) >> 16) | ((c & 0x0000_00FF) << 16)
}

#[inline]
fn correct(c: u8) -> u8 {
    ((i32::from(c) - 128) * 110 / 100 + 128).clamp(0, 255) as u8
}

#[inline]
fn pack_abgr(r: u8, g: u8, b: u8) -> u32 {
    0xFF00_0000 | (u32::from(b) << 16) | (u32::from(g) << 8) | u32::from(r)
}

#[inline]
fn process(r: u8, g: u8, b: u8, proc: PixelProcess) -> u32 {
    match proc {
        PixelProcess::None => pack_abgr(r, g, b),
        PixelProcess::ColorCorrection => pack_abgr(correct(r), correct(g), correct(b)),
        PixelProcess::Palette(colors) => {
            // Fast luminance approximation: (2r + 5g + b) / 8.
            let lum = (u32::from(r) * 2 + u32::from(g) * 5 + u32::from(b)) >> 3;
            match lum {
                192.. => colors[0],
                128.. => colors[1],
                64.. => colors[2],
                _ => colors[3],
            }
        }
    }
}

/// Converts one framebuffer into `out` (resized to `width * height`).
///
/// `src` is the raw row data from the core, `pitch` the row stride in bytes.
pub fn convert_frame(
    src: &[u8],
    width: usize,
    height: usize,
    pitch: usize,
    format: PixelFormat,
    proc: PixelProcess,
    out: &mut Vec<u32>,
) {
    out.clear();
    out.reserve(width * height);

    let bpp = format.bytes_per_pixel();
    for y in 0..height {
        let row = &src[y * pitch..y * pitch + width * bpp];
        match format {
            PixelFormat::Xrgb8888 => {
                for px in row.chunks_exact(4) {
                    let pixel = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                    let r = (pixel >> 16) as u8;
                    let g = (pixel >> 8) as u8;
                    let b = pixel as u8;
                    out.push(process(r, g, b, proc));
                }
            }
            PixelFormat::Rgb565 => {
                for px in row.chunks_exact(2) {
                    let pixel = u16::from_ne_bytes([px[0], px[1]]);
                    let r = ((pixel >> 11) & 0x1F) as u8;
                    let g = ((pixel >> 5) & 0x3F) as u8;
                    let b = (pixel & 0x1F) as u8;
                    out.push(process(
                        (r << 3) | (r >> 2),
                        (g << 2) | (g >> 4),
                        (b << 3) | (b >> 2),
                        proc,
                    ));
                }
            }
            PixelFormat::Rgb1555 => {
                for px in row.chunks_exact(2) {
                    let pixel = u16::from_ne_bytes([px[0], px[1]]);
                    let r = ((pixel >> 10) & 0x1F) as u8;
                    let g = ((pixel >> 5) & 0x1F) as u8;
                    let b = (pixel & 0x1F) as u8;
                    out.push(process(
                        (r << 3) | (r >> 2),
                        (g << 3) | (g >> 2),
                        (b << 3) | (b >> 2),
                        proc,
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb565_expands_with_bit_replication() {
        // Pure red, full intensity: 0xF800.
        let src = 0xF800u16.to_ne_bytes();
        let mut out = Vec::new();
        convert_frame(&src, 1, 1, 2, PixelFormat::Rgb565, PixelProcess::None, &mut out);
        assert_eq!(out, [0xFF00_00FF]);
    }

    #[test]
    fn rgb1555_expands_with_bit_replication() {
        // Pure blue: 0x001F.
        let src = 0x001Fu16.to_ne_bytes();
        let mut out = Vec::new();
        convert_frame(&src, 1, 1, 2, PixelFormat::Rgb1555, PixelProcess::None, &mut out);
        assert_eq!(out, [0xFFFF_0000]);
    }

    #[test]
    fn xrgb8888_swaps_red_and_blue() {
        let src = 0x00AA_BBCCu32.to_ne_bytes();
        let mut out = Vec::new();
        convert_frame(&src, 1, 1, 4, PixelFormat::Xrgb8888, PixelProcess::None, &mut out);
        assert_eq!(out, [0xFFCC_BBAA]);
    }

    #[test]
    fn pitch_larger_than_row_is_respected() {
        // Two rows of one pixel each, 8-byte pitch.
        let mut src = [0u8; 16];
        src[0..2].copy_from_slice(&0xF800u16.to_ne_bytes());
        src[8..10].copy_from_slice(&0x001Fu16.to_ne_bytes());
        let mut out = Vec::new();
        convert_frame(&src, 1, 2, 8, PixelFormat::Rgb565, PixelProcess::None, &mut out);
        assert_eq!(out, [0xFF00_00FF, 0xFFFF_0000]);
    }

    #[test]
    fn palette_classifies_by_luminance() {
        let proc = PixelProcess::Palette(DMG_PALETTE);
        assert_eq!(process(255, 255, 255, proc), DMG_PALETTE[0]);
        assert_eq!(process(170, 170, 170, proc), DMG_PALETTE[1]);
        assert_eq!(process(100, 100, 100, proc), DMG_PALETTE[2]);
        assert_eq!(process(10, 10, 10, proc), DMG_PALETTE[3]);
    }

    #[test]
    fn color_correction_clamps() {
        assert_eq!(correct(255), 255);
        assert_eq!(correct(0), 0);
        // Midpoint is a fixed point of the contrast curve.
        assert_eq!(correct(128), 128);
    }

    #[test]
    fn argb_round_trips_through_abgr() {
        let argb = 0xFF9B_BC0F;
        assert_eq!(argb_to_abgr(argb), 0xFF0F_BC9B);
        assert_eq!(argb_to_abgr(argb_to_abgr(argb)), argb);
    }
}
