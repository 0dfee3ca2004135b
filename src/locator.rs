use geo_types::Point;
use rand::{seq::SliceRandom, Rng};
use tracing::debug;

use crate::error::{AttemptError, Result};
use crate::provider::{ImageryProvider, STATUS_OK};

/// Heading offsets from the base heading, per view count: front, right, back, left.
const VIEW_OFFSETS: [f64; 4] = [0.0, 90.0, 180.0, 270.0];

/// Concrete headings for `views` views around `base`, in front/right/back/left
/// order, wrapped into `[0, 360)`.
pub fn view_headings(views: u8, base: f64) -> std::result::Result<Vec<f64>, AttemptError> {
    if !(1..=4).contains(&views) {
        return Err(AttemptError::InvalidViewCount(views));
    }
    Ok(VIEW_OFFSETS[..views as usize]
        .iter()
        .map(|offset| (base + offset).rem_euclid(360.0))
        .collect())
}

/// Finds a point near a coordinate that has street-level imagery.
pub struct ImageryLocator<P> {
    provider: P,
    views: u8,
    random_heading: bool,
}

impl<P: ImageryProvider> ImageryLocator<P> {
    pub fn new(provider: P, views: u8, random_heading: bool) -> Self {
        Self {
            provider,
            views,
            random_heading,
        }
    }

    /// Returns the confirmed imagery point and one heading per configured view.
    ///
    /// The candidate is drawn uniformly from the places result set rather than
    /// taking the closest one, to spread samples out.
    pub fn locate<R: Rng + ?Sized>(
        &self,
        coordinate: Point<f64>,
        radius_m: u32,
        rng: &mut R,
    ) -> Result<(Point<f64>, Vec<f64>)> {
        let places = self.provider.nearby_places(coordinate, radius_m)?;
        let candidate = *places.choose(rng).ok_or(AttemptError::NoPlacesFound {
            lat: coordinate.y(),
            lon: coordinate.x(),
            radius_m,
        })?;
        debug!(
            candidates = places.len(),
            lat = candidate.y(),
            lon = candidate.x(),
            "Picked imagery candidate."
        );

        let status = self.provider.imagery_status(candidate)?;
        if status != STATUS_OK {
            return Err(AttemptError::NoImageryAvailable {
                lat: candidate.y(),
                lon: candidate.x(),
                status,
            }
            .into());
        }

        let base = if self.random_heading {
            rng.gen_range(0.0..360.0)
        } else {
            0.0
        };
        let headings = view_headings(self.views, base)?;
        Ok((candidate, headings))
    }
}
