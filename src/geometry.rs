//! Framebuffer geometry probe.
//!
//! The kernel exposes the framebuffer's dimensions and depth through sysfs:
//! `virtual_size` holds `WIDTH,HEIGHT` and `bits_per_pixel` a decimal depth.
//! Both are read once at startup; the geometry is immutable afterwards.

use std::fs;
use std::path::Path;

use crate::error::FbtermError;
use crate::pixel::PixelFormat;

#[derive(Debug, Clone, Copy)]
pub struct ScreenGeometry {
    pub width_px: usize,
    pub height_px: usize,
    pub format: PixelFormat,
}

impl ScreenGeometry {
    /// Read width, height and depth from a sysfs framebuffer directory
    /// (normally `/sys/class/graphics/fb0`).
    pub fn probe(sysfs_dir: &Path) -> Result<Self, FbtermError> {
        let bpp_path = sysfs_dir.join("bits_per_pixel");
        let raw = fs::read_to_string(&bpp_path)
            .map_err(|e| FbtermError::DeviceProbe(format!("{}: {e}", bpp_path.display())))?;
        // The first two ASCII digits are the depth.
        let digits: String = raw.chars().take_while(char::is_ascii_digit).take(2).collect();
        let bpp: u32 = digits.parse().map_err(|_| {
            FbtermError::DeviceProbe(format!("{}: unparseable depth {raw:?}", bpp_path.display()))
        })?;
        let format = PixelFormat::from_bpp(bpp).ok_or_else(|| {
            FbtermError::DeviceProbe(format!("unsupported depth {bpp} bpp (want 16 or 32)"))
        })?;

        let size_path = sysfs_dir.join("virtual_size");
        let raw = fs::read_to_string(&size_path)
            .map_err(|e| FbtermError::DeviceProbe(format!("{}: {e}", size_path.display())))?;
        let (w, h) = raw
            .trim()
            .split_once(',')
            .ok_or_else(|| {
                FbtermError::DeviceProbe(format!("{}: malformed size {raw:?}", size_path.display()))
            })?;
        let width_px: usize = w.trim().parse().map_err(|_| {
            FbtermError::DeviceProbe(format!("{}: malformed width {w:?}", size_path.display()))
        })?;
        let height_px: usize = h.trim().parse().map_err(|_| {
            FbtermError::DeviceProbe(format!("{}: malformed height {h:?}", size_path.display()))
        })?;

        Ok(Self { width_px, height_px, format })
    }

    pub const fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    /// Length in bytes of one pixel row.
    pub const fn stride(&self) -> usize {
        self.width_px * self.bytes_per_pixel()
    }

    /// Size in bytes of one full screen.
    pub const fn total_bytes(&self) -> usize {
        self.stride() * self.height_px
    }
}
