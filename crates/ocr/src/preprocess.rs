use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Decode raw image bytes (JPEG / PNG / WEBP / …) and shrink anything whose
/// longer side exceeds `max_side`. Colour is kept; variants decide what to drop.
pub fn load_and_normalize(data: &[u8], max_side: u32) -> Result<DynamicImage, PreprocessError> {
    let img = image::load_from_memory(data)?;
    Ok(downscale(img, max_side))
}

fn downscale(img: DynamicImage, max_side: u32) -> DynamicImage {
    if img.width() > max_side || img.height() > max_side {
        img.resize(max_side, max_side, image::imageops::FilterType::Lanczos3)
    } else {
        img
    }
}

/// Stretch grey levels to the full 0..=255 range.
pub fn contrast_stretch(gray: &GrayImage) -> GrayImage {
    let (min_px, max_px) = gray
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));

    if max_px <= min_px {
        return gray.clone();
    }

    let range = (max_px - min_px) as u32;
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0];
        Luma([((p - min_px) as u32 * 255 / range) as u8])
    })
}

/// PNG bytes for recognizers that take encoded input.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_gray(width: u32, height: u32, value: u8) -> GrayImage {
        ImageBuffer::from_fn(width, height, |_, _| Luma([value]))
    }

    #[test]
    fn stretch_leaves_uniform_image_alone() {
        let img = solid_gray(10, 10, 128);
        assert_eq!(contrast_stretch(&img), img);
    }

    #[test]
    fn stretch_reaches_full_range() {
        let img: GrayImage = ImageBuffer::from_fn(100, 1, |x, _| Luma([(60 + x) as u8]));
        let out = contrast_stretch(&img);
        let min = out.pixels().map(|p| p[0]).min().unwrap();
        let max = out.pixels().map(|p| p[0]).max().unwrap();
        assert_eq!((min, max), (0, 255));
    }

    #[test]
    fn decode_round_trips_png() {
        let png = encode_png(&DynamicImage::ImageLuma8(solid_gray(4, 4, 100))).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
        let img = load_and_normalize(&png, 2800).unwrap();
        assert_eq!((img.width(), img.height()), (4, 4));
    }

    #[test]
    fn large_image_is_downscaled() {
        let img = DynamicImage::ImageLuma8(solid_gray(300, 120, 200));
        let out = downscale(img, 100);
        assert!(out.width() <= 100 && out.height() <= 100);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            load_and_normalize(b"not an image", 2800),
            Err(PreprocessError::Decode(_))
        ));
    }
}
