use anyhow::{anyhow, Result};

use crate::frame::RGB_CHANNELS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    #[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
    Rgb24,
    Nv12,
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = rgb_len(width, height)?;
            if pixels.len() != expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
    }
}

/// Nearest-neighbour resize of packed RGB24. Returns the input unchanged when the
/// dimensions already match.
pub(crate) fn resize_rgb_nearest(
    pixels: Vec<u8>,
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
) -> Result<Vec<u8>> {
    if dst_width == 0 || dst_height == 0 {
        return Err(anyhow!("resize target must be non-zero"));
    }
    let expected = rgb_len(src_width, src_height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "resize input length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }
    if src_width == dst_width && src_height == dst_height {
        return Ok(pixels);
    }

    let (sw, sh) = (src_width as usize, src_height as usize);
    let (dw, dh) = (dst_width as usize, dst_height as usize);
    let mut out = vec![0u8; rgb_len(dst_width, dst_height)?];
    for y in 0..dh {
        let sy = (y * sh / dh).min(sh - 1);
        for x in 0..dw {
            let sx = (x * sw / dw).min(sw - 1);
            let src = (sy * sw + sx) * RGB_CHANNELS;
            let dst = (y * dw + x) * RGB_CHANNELS;
            out[dst..dst + RGB_CHANNELS].copy_from_slice(&pixels[src..src + RGB_CHANNELS]);
        }
    }
    Ok(out)
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(y + 1.402 * v);
            rgb[offset + 1] = clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v);
            rgb[offset + 2] = clamp_to_u8(y + 1.772 * u);
        }
    }

    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_mid_chroma_is_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn rgb_length_is_checked() {
        assert!(normalize_to_rgb(&[0u8; 8], 1, 3, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn downscale_picks_nearest_source_pixel() -> Result<()> {
        // 4x2 image where each pixel's red channel is its column index.
        let mut src = Vec::new();
        for _row in 0..2 {
            for col in 0..4u8 {
                src.extend_from_slice(&[col, 0, 0]);
            }
        }
        let out = resize_rgb_nearest(src, 4, 2, 2, 1)?;
        assert_eq!(out, vec![0, 0, 0, 2, 0, 0]);
        Ok(())
    }

    #[test]
    fn resize_to_same_size_is_identity() -> Result<()> {
        let src: Vec<u8> = (0..12).collect();
        assert_eq!(resize_rgb_nearest(src.clone(), 2, 2, 2, 2)?, src);
        Ok(())
    }
}
