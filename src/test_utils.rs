//! In-memory imagery provider for tests.

use std::{cell::RefCell, io::Cursor};

use geo_types::Point;
use image::{ImageFormat, Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::provider::{ImageryProvider, STATUS_OK};

/// Answers every request from a fixed script and records what was asked.
pub struct ScriptedProvider {
    places: Option<Vec<Point<f64>>>,
    status: String,
    image_size: Option<(u32, u32)>,
    failing_headings: Vec<f64>,
    status_queries: RefCell<Vec<Point<f64>>>,
    image_requests: RefCell<Vec<(f64, u32, u32)>>,
}

impl ScriptedProvider {
    /// Every location has one nearby place with imagery, and images come back
    /// at the requested size.
    pub fn new() -> Self {
        Self {
            places: None,
            status: STATUS_OK.to_string(),
            image_size: None,
            failing_headings: Vec::new(),
            status_queries: RefCell::new(Vec::new()),
            image_requests: RefCell::new(Vec::new()),
        }
    }

    pub fn with_places(mut self, places: Vec<Point<f64>>) -> Self {
        self.places = Some(places);
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    /// Serve images of this size regardless of what was requested.
    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = Some((width, height));
        self
    }

    /// Answer image requests for this heading with HTTP 500.
    pub fn failing_heading(mut self, heading: f64) -> Self {
        self.failing_headings.push(heading);
        self
    }

    pub fn status_queries(&self) -> Vec<Point<f64>> {
        self.status_queries.borrow().clone()
    }

    pub fn image_requests(&self) -> Vec<(f64, u32, u32)> {
        self.image_requests.borrow().clone()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// PNG that is red except for a white strip of `watermark` rows at the bottom.
pub fn encoded_test_image(width: u32, height: u32, watermark: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |_, y| {
        if y + watermark >= height {
            Rgb([255, 255, 255])
        } else {
            Rgb([200, 10, 10])
        }
    });
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encoding an in-memory PNG");
    bytes
}

impl ImageryProvider for ScriptedProvider {
    fn nearby_places(&self, center: Point<f64>, _radius_m: u32) -> Result<Vec<Point<f64>>> {
        Ok(self.places.clone().unwrap_or_else(|| {
            vec![Point::new(center.x() + 0.001, center.y() + 0.001)]
        }))
    }

    fn imagery_status(&self, location: Point<f64>) -> Result<String> {
        self.status_queries.borrow_mut().push(location);
        Ok(self.status.clone())
    }

    fn fetch_image(
        &self,
        _location: Point<f64>,
        heading: f64,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        self.image_requests.borrow_mut().push((heading, width, height));
        if self.failing_headings.contains(&heading) {
            return Err(Error::Status {
                status: 500,
                url: "scripted".to_string(),
            });
        }
        let (width, height) = self.image_size.unwrap_or((width, height));
        Ok(encoded_test_image(width, height, crate::provider::WATERMARK_HEIGHT))
    }
}
