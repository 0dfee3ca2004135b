use geo_types::Point;
use image::imageops::FilterType;
use tracing::warn;

use crate::error::Result;
use crate::provider::{ImageryProvider, WATERMARK_HEIGHT};
use crate::record::ImageTensor;

/// Retrieves one image per heading and turns each into a `height × width × 3`
/// tensor with the provider watermark cut off.
pub struct ImageryFetcher<P> {
    provider: P,
}

impl<P: ImageryProvider> ImageryFetcher<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Images in heading order. A view that cannot be retrieved or decoded is
    /// dropped with a warning, so the result may be shorter than `headings`.
    pub fn fetch(
        &self,
        location: Point<f64>,
        headings: &[f64],
        width: u32,
        height: u32,
    ) -> Vec<ImageTensor> {
        headings
            .iter()
            .filter_map(|&heading| {
                let view = self
                    .provider
                    .fetch_image(location, heading, width, height + WATERMARK_HEIGHT)
                    .and_then(|bytes| normalize(&bytes, width, height));
                match view {
                    Ok(tensor) => Some(tensor),
                    Err(e) => {
                        warn!(
                            heading,
                            lat = location.y(),
                            lon = location.x(),
                            "Dropping view: {e}"
                        );
                        None
                    }
                }
            })
            .collect()
    }
}

/// Decodes `bytes`, keeps the top-left `width × height` pixels and lays them
/// out as RGB bytes. Images smaller than that are resized, with a warning.
pub fn normalize(bytes: &[u8], width: u32, height: u32) -> Result<ImageTensor> {
    let decoded = image::load_from_memory(bytes)?;
    let cropped = decoded.crop_imm(0, 0, width, height).to_rgb8();
    let rgb = if cropped.dimensions() == (width, height) {
        cropped
    } else {
        warn!(
            got = ?cropped.dimensions(),
            expected = ?(width, height),
            "Image is smaller than expected; resizing."
        );
        image::imageops::resize(&cropped, width, height, FilterType::Triangle)
    };
    Ok(ImageTensor::from_shape_vec(
        (height as usize, width as usize, 3),
        rgb.into_raw(),
    )?)
}
