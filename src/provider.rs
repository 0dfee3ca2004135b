//! Street-level imagery services.
//!
//! `ImageryProvider` is the seam between the acquisition loop and the outside
//! world. `StreetViewClient` talks to the Google Places and Street View APIs,
//! `Throttled` spaces requests out for any provider.

use std::{
    cell::Cell,
    thread,
    time::{Duration, Instant},
};

use geo_types::Point;
use reqwest::blocking::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{trace, warn};

use crate::error::{AttemptError, Error, Result};

/// Height in pixels of the attribution strip the provider draws at the bottom
/// of every image.
pub const WATERMARK_HEIGHT: u32 = 22;

/// Status reported by the metadata endpoint when imagery exists.
pub const STATUS_OK: &str = "OK";

pub trait ImageryProvider {
    /// Candidate places within `radius_m` of `center`.
    fn nearby_places(&self, center: Point<f64>, radius_m: u32) -> Result<Vec<Point<f64>>>;

    /// Raw availability status for imagery at `location`.
    fn imagery_status(&self, location: Point<f64>) -> Result<String>;

    /// Encoded image bytes of the view at `location` facing `heading`.
    fn fetch_image(
        &self,
        location: Point<f64>,
        heading: f64,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>>;
}

impl<P: ImageryProvider + ?Sized> ImageryProvider for &P {
    fn nearby_places(&self, center: Point<f64>, radius_m: u32) -> Result<Vec<Point<f64>>> {
        (**self).nearby_places(center, radius_m)
    }

    fn imagery_status(&self, location: Point<f64>) -> Result<String> {
        (**self).imagery_status(location)
    }

    fn fetch_image(
        &self,
        location: Point<f64>,
        heading: f64,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        (**self).fetch_image(location, heading, width, height)
    }
}

const PLACES_URL: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";
const METADATA_URL: &str = "https://maps.googleapis.com/maps/api/streetview/metadata";
const STREET_VIEW_URL: &str = "https://maps.googleapis.com/maps/api/streetview";

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct Place {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    results: Vec<Place>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Statuses that no amount of retrying will fix (bad key, malformed query).
const FATAL_STATUSES: [&str; 2] = ["REQUEST_DENIED", "INVALID_REQUEST"];

/// Statuses that mean the service could not answer right now.
const TRANSIENT_STATUSES: [&str; 2] = ["OVER_QUERY_LIMIT", "UNKNOWN_ERROR"];

fn check_status(endpoint: &str, status: &str, message: Option<String>) -> Result<()> {
    if FATAL_STATUSES.contains(&status) {
        return Err(Error::Rejected {
            endpoint: endpoint.to_string(),
            status: status.to_string(),
            message: message.unwrap_or_default(),
        });
    }
    if TRANSIENT_STATUSES.contains(&status) {
        warn!(endpoint, status, "Imagery service unavailable; retrying.");
        return Err(AttemptError::ServiceUnavailable {
            endpoint: endpoint.to_string(),
            status: status.to_string(),
        }
        .into());
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        warn!(endpoint, "Undecodable response: {e}");
        AttemptError::BadResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Candidate points of a Places nearby-search body. `OK` and `ZERO_RESULTS`
/// both yield the (possibly empty) result list.
fn parse_places(body: &str) -> Result<Vec<Point<f64>>> {
    let response: PlacesResponse = decode("places search", body)?;
    if let Some(status) = &response.status {
        check_status("places search", status, response.error_message)?;
    }
    Ok(response
        .results
        .into_iter()
        .map(|place| Point::new(place.geometry.location.lng, place.geometry.location.lat))
        .collect())
}

/// Availability status of a Street View metadata body.
fn parse_metadata(body: &str) -> Result<String> {
    let response: MetadataResponse = decode("street view metadata", body)?;
    let status = response.status.unwrap_or_else(|| "MISSING".to_string());
    check_status("street view metadata", &status, response.error_message)?;
    Ok(status)
}

/// Body of a JSON endpoint; an HTTP error status aborts only the attempt.
fn response_body(endpoint: &str, response: Response) -> Result<String> {
    let status = response.status();
    if !status.is_success() {
        warn!(endpoint, status = status.as_u16(), "Imagery service returned an error status.");
        return Err(AttemptError::BadResponse {
            endpoint: endpoint.to_string(),
            reason: format!("HTTP {status}"),
        }
        .into());
    }
    Ok(response.text()?)
}

fn format_location(location: Point<f64>) -> String {
    format!("{},{}", location.y(), location.x())
}

/// Blocking client for the Google Places and Street View static APIs.
pub struct StreetViewClient {
    client: Client,
    api_key: String,
}

impl StreetViewClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }
}

impl ImageryProvider for StreetViewClient {
    fn nearby_places(&self, center: Point<f64>, radius_m: u32) -> Result<Vec<Point<f64>>> {
        let response = self
            .client
            .get(PLACES_URL)
            .query(&[
                ("location", format_location(center)),
                ("radius", radius_m.to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()?;
        let places = parse_places(&response_body("places search", response)?)?;
        trace!(count = places.len(), "Places search returned.");
        Ok(places)
    }

    fn imagery_status(&self, location: Point<f64>) -> Result<String> {
        let response = self
            .client
            .get(METADATA_URL)
            .query(&[
                ("location", format_location(location)),
                ("key", self.api_key.clone()),
            ])
            .send()?;
        parse_metadata(&response_body("street view metadata", response)?)
    }

    fn fetch_image(
        &self,
        location: Point<f64>,
        heading: f64,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(STREET_VIEW_URL)
            .query(&[
                ("location", format_location(location)),
                ("heading", heading.to_string()),
                ("size", format!("{width}x{height}")),
                ("key", self.api_key.clone()),
            ])
            .send()?;
        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url: STREET_VIEW_URL.to_string(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Enforces a minimum delay between consecutive requests to `inner`.
pub struct Throttled<P> {
    inner: P,
    min_interval: Duration,
    last_request: Cell<Option<Instant>>,
}

impl<P> Throttled<P> {
    pub fn new(inner: P, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_request: Cell::new(None),
        }
    }

    fn wait(&self) {
        if let Some(last) = self.last_request.get() {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last_request.set(Some(Instant::now()));
    }
}

impl<P: ImageryProvider> ImageryProvider for Throttled<P> {
    fn nearby_places(&self, center: Point<f64>, radius_m: u32) -> Result<Vec<Point<f64>>> {
        self.wait();
        self.inner.nearby_places(center, radius_m)
    }

    fn imagery_status(&self, location: Point<f64>) -> Result<String> {
        self.wait();
        self.inner.imagery_status(location)
    }

    fn fetch_image(
        &self,
        location: Point<f64>,
        heading: f64,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        self.wait();
        self.inner.fetch_image(location, heading, width, height)
    }
}
