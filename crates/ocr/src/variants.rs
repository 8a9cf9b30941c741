use image::{imageops, DynamicImage, GrayImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use std::sync::Arc;

use crate::preprocess::contrast_stretch;

const BLUR_3X3: [f32; 9] = [
    1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0,
    2.0 / 16.0, 4.0 / 16.0, 2.0 / 16.0,
    1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0,
];
const SHARPEN_3X3: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// One alternate pixel rendering of the receipt, addressed by `id`.
#[derive(Debug, Clone)]
pub struct Variant {
    pub id: usize,
    pub name: String,
    pub image: Arc<DynamicImage>,
}

impl Variant {
    pub fn new(id: usize, name: impl Into<String>, image: DynamicImage) -> Self {
        Self { id, name: name.into(), image: Arc::new(image) }
    }
}

/// Renders a base image into the fixed variant set recognition runs over.
///
/// Ids must be unique and ascending; fusion uses them as the tie-break order.
pub trait VariantProducer: Send + Sync {
    fn produce(&self, base: &DynamicImage) -> Vec<Variant>;
}

/// `orig`, `gray` (contrast stretch), `otsu` (global threshold), `sharp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardVariants;

impl VariantProducer for StandardVariants {
    fn produce(&self, base: &DynamicImage) -> Vec<Variant> {
        let gray = base.to_luma8();
        let stretched = contrast_stretch(&gray);
        let blurred: GrayImage = imageops::filter3x3(&gray, &BLUR_3X3);
        let otsu = threshold(&blurred, otsu_level(&blurred), ThresholdType::Binary);

        vec![
            Variant::new(0, "orig", base.clone()),
            Variant::new(1, "gray", DynamicImage::ImageLuma8(stretched)),
            Variant::new(2, "otsu", DynamicImage::ImageLuma8(otsu)),
            Variant::new(3, "sharp", base.filter3x3(&SHARPEN_3X3)),
        ]
    }
}
