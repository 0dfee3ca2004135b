//! Dataset records and the stages they pass through during an attempt.
//!
//! Each stage is an immutable value; moving to the next stage consumes it and
//! adds the fields the next pipeline step produced. Only `Located::with_images`
//! yields a `DatasetRecord`, so a record missing any field cannot exist.

use geo::HaversineDistance;
use geo_types::Point;
use ndarray::Array3;

use crate::error::AttemptError;

/// One image tensor, `height × width × 3` RGB bytes.
pub type ImageTensor = Array3<u8>;

#[derive(Debug, Clone, PartialEq)]
pub struct SampledCountry {
    pub country: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlace {
    pub country: String,
    pub city: String,
    pub origin: Point<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub country: String,
    pub city: String,
    pub origin: Point<f64>,
    pub imagery: Point<f64>,
    pub headings: Vec<f64>,
}

/// The persisted unit of output.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    pub country: String,
    pub city: String,
    pub origin: Point<f64>,
    pub imagery: Point<f64>,
    pub headings: Vec<f64>,
    pub images: Vec<ImageTensor>,
}

impl SampledCountry {
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
        }
    }

    pub fn with_city(self, city: impl Into<String>, origin: Point<f64>) -> ResolvedPlace {
        ResolvedPlace {
            country: self.country,
            city: city.into(),
            origin,
        }
    }
}

impl ResolvedPlace {
    pub fn with_imagery(self, imagery: Point<f64>, headings: Vec<f64>) -> Located {
        Located {
            country: self.country,
            city: self.city,
            origin: self.origin,
            imagery,
            headings,
        }
    }
}

impl Located {
    /// Completes the record. Fails when fewer images than headings were
    /// fetched; such a record is discarded rather than stored.
    pub fn with_images(self, images: Vec<ImageTensor>) -> Result<DatasetRecord, AttemptError> {
        if images.len() != self.headings.len() {
            return Err(AttemptError::IncompleteViews {
                expected: self.headings.len(),
                fetched: images.len(),
            });
        }
        Ok(DatasetRecord {
            country: self.country,
            city: self.city,
            origin: self.origin,
            imagery: self.imagery,
            headings: self.headings,
            images,
        })
    }
}

impl DatasetRecord {
    /// Great-circle distance in meters between the sampled city and the
    /// imagery point.
    pub fn offset_m(&self) -> f64 {
        self.origin.haversine_distance(&self.imagery)
    }

    pub fn view_count(&self) -> usize {
        self.images.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn located(headings: Vec<f64>) -> Located {
        SampledCountry::new("Japan")
            .with_city("Tokyo", Point::new(139.6922, 35.6897))
            .with_imagery(Point::new(139.70, 35.69), headings)
    }

    #[test]
    fn stages_carry_fields_forward() {
        let record = located(vec![0.0, 90.0])
            .with_images(vec![ImageTensor::zeros((2, 3, 3)); 2])
            .unwrap();
        assert_eq!(record.country, "Japan");
        assert_eq!(record.city, "Tokyo");
        assert_eq!(record.headings, vec![0.0, 90.0]);
        assert_eq!(record.view_count(), 2);
    }

    #[test]
    fn incomplete_view_sets_are_rejected() {
        let err = located(vec![0.0, 90.0, 180.0])
            .with_images(vec![ImageTensor::zeros((2, 3, 3))])
            .unwrap_err();
        assert_eq!(
            err,
            AttemptError::IncompleteViews {
                expected: 3,
                fetched: 1
            }
        );
    }

    #[test]
    fn offset_is_great_circle_distance() {
        let record = SampledCountry::new("Ecuador")
            .with_city("Somewhere", Point::new(0.0, 0.0))
            .with_imagery(Point::new(0.0, 1.0), vec![0.0])
            .with_images(vec![ImageTensor::zeros((1, 1, 3))])
            .unwrap();
        // one degree of latitude is about 111 km
        assert!((record.offset_m() - 111_195.0).abs() < 500.0);
    }
}
