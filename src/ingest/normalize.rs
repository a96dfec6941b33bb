use anyhow::{anyhow, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
    Mjpeg,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

/// Convert a captured buffer to packed RGB8 of `width * height * 3` bytes.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = plane_len(width, height, 3)?;
            // Drivers may pad the last buffer; anything shorter is a truncated frame.
            if pixels.len() < expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok(pixels[..expected].to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
        PixelFormat::Mjpeg => mjpeg_to_rgb(pixels, width, height),
    }
}

fn plane_len(width: u32, height: u32, bytes_per_pixel: usize) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(bytes_per_pixel))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = plane_len(width, height, 2)?;
    if pixels.len() < expected || width % 2 != 0 {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {} for {}x{}, got {}",
            expected,
            width,
            height,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(plane_len(width, height, 3)?);
    for chunk in pixels[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = plane_len(width, height, 1)?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i];
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3]
                .copy_from_slice(&yuv_to_rgb(y, pixels[uv_index], pixels[uv_index + 1]));
        }
    }
    Ok(rgb)
}

fn mjpeg_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let image = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)
        .context("decode MJPG frame")?
        .into_rgb8();
    if image.dimensions() != (width, height) {
        return Err(anyhow!(
            "MJPG frame is {}x{}, negotiated {}x{}",
            image.width(),
            image.height(),
            width,
            height
        ));
    }
    Ok(image.into_raw())
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
