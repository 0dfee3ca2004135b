//! Static lookup tables: country weights, the country → cities index and the
//! city → coordinate index, plus the offline preprocessing that builds them
//! from raw land-area and world-cities CSV files.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
};

use csv::{ReaderBuilder, WriterBuilder};
use geo_types::Point;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TablePaths;
use crate::error::{Error, Result};

/// Total land area of the world in km², used to normalise country areas.
pub const TOTAL_LAND_AREA_KM2: f64 = 129_965_453.0;

/// Country name → ordered city names.
pub type CityIndex = HashMap<String, Vec<String>>;

/// City name → coordinate (x = longitude, y = latitude).
///
/// Keyed by city name alone, so same-named cities in different countries
/// collapse onto the last one seen while building.
pub type CoordinateIndex = HashMap<String, Point<f64>>;

/// Ordered (country, weight) pairs used as relative sampling mass.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryWeights {
    entries: Vec<(String, f64)>,
}

impl CountryWeights {
    /// Validates the table: non-empty, no duplicate countries, finite
    /// non-negative weights and at least one positive weight.
    pub fn new(entries: Vec<(String, f64)>) -> Result<Self> {
        const SOURCE: &str = "country weights";
        if entries.is_empty() {
            return Err(Error::table(SOURCE, "no countries"));
        }
        let mut seen = HashSet::new();
        for (country, weight) in &entries {
            if !seen.insert(country.as_str()) {
                return Err(Error::table(SOURCE, format!("duplicate country '{country}'")));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::table(
                    SOURCE,
                    format!("invalid weight {weight} for '{country}'"),
                ));
            }
        }
        if entries.iter().all(|(_, weight)| *weight == 0.0) {
            return Err(Error::table(SOURCE, "all weights are zero"));
        }
        Ok(Self { entries })
    }

    /// Reads a headerless `country,weight` CSV file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(false).from_path(path)?;
        let mut entries = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let (Some(country), Some(weight)) = (record.get(0), record.get(1)) else {
                return Err(Error::table(path, format!("line {} has fewer than 2 columns", line + 1)));
            };
            let weight: f64 = weight.trim().parse().map_err(|_| {
                Error::table(path, format!("line {}: '{weight}' is not a number", line + 1))
            })?;
            entries.push((country.to_string(), weight));
        }
        Self::new(entries).map_err(|err| match err {
            Error::Table { reason, .. } => Error::table(path, reason),
            other => other,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
        for (country, weight) in &self.entries {
            writer.serialize((country, weight))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three tables an acquisition run reads from.
#[derive(Debug, Clone)]
pub struct TableSet {
    pub weights: CountryWeights,
    pub cities: CityIndex,
    pub coordinates: CoordinateIndex,
}

impl TableSet {
    pub fn load(paths: &TablePaths) -> Result<Self> {
        let weights = CountryWeights::load(&paths.country_weights)?;
        let cities = load_city_index(&paths.city_index)?;
        let coordinates = load_coordinate_index(&paths.coordinate_index)?;
        info!(
            countries = weights.len(),
            city_countries = cities.len(),
            cities = coordinates.len(),
            "Loaded lookup tables."
        );
        Ok(Self {
            weights,
            cities,
            coordinates,
        })
    }

    /// Weighted countries that have no entry in the city index, sorted.
    /// Every draw of one of these ends in `UnknownCountry`.
    pub fn missing_countries(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = self
            .weights
            .entries()
            .iter()
            .map(|(country, _)| country.as_str())
            .filter(|country| !self.cities.contains_key(*country))
            .collect();
        missing.sort_unstable();
        missing
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string(value)?)?;
    Ok(())
}

pub fn load_city_index(path: &Path) -> Result<CityIndex> {
    read_json(path)
}

/// Coordinates are stored on disk as `{"city": [lat, lon]}`.
pub fn load_coordinate_index(path: &Path) -> Result<CoordinateIndex> {
    let raw: HashMap<String, (f64, f64)> = read_json(path)?;
    Ok(raw
        .into_iter()
        .map(|(city, (lat, lon))| (city, Point::new(lon, lat)))
        .collect())
}

pub fn write_city_index(path: &Path, index: &CityIndex) -> Result<()> {
    write_json(path, index)
}

pub fn write_coordinate_index(path: &Path, index: &CoordinateIndex) -> Result<()> {
    let raw: HashMap<&String, (f64, f64)> = index
        .iter()
        .map(|(city, point)| (city, (point.y(), point.x())))
        .collect();
    write_json(path, &raw)
}

/// Builds country weights from a land-area CSV whose first column is the
/// country name and which has one column per year. Countries without a value
/// for `year` are skipped. The result is sorted by weight, largest first.
pub fn build_country_weights(land_area_csv: &Path, year: &str) -> Result<CountryWeights> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(land_area_csv)?;
    let year_column = reader
        .headers()?
        .iter()
        .position(|header| header.trim() == year)
        .ok_or_else(|| Error::table(land_area_csv, format!("no column for year {year}")))?;

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let (Some(country), Some(area)) = (record.get(0), record.get(year_column)) else {
            continue;
        };
        let area = area.trim();
        if area.is_empty() {
            continue;
        }
        let area: f64 = area
            .parse()
            .map_err(|_| Error::table(land_area_csv, format!("bad area '{area}' for '{country}'")))?;
        entries.push((country.to_string(), area / TOTAL_LAND_AREA_KM2));
    }
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    CountryWeights::new(entries)
}

#[derive(Debug, Deserialize)]
struct WorldCityRow {
    city: String,
    lat: f64,
    lng: f64,
    country: String,
}

/// Builds the city index and the coordinate index from a world-cities CSV
/// with `city`, `lat`, `lng` and `country` columns.
pub fn build_city_tables(world_cities_csv: &Path) -> Result<(CityIndex, CoordinateIndex)> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(world_cities_csv)?;
    let mut cities = CityIndex::new();
    let mut coordinates = CoordinateIndex::new();
    let mut collisions = 0usize;
    for row in reader.deserialize() {
        let row: WorldCityRow = row?;
        if coordinates
            .insert(row.city.clone(), Point::new(row.lng, row.lat))
            .is_some()
        {
            collisions += 1;
        }
        cities.entry(row.country).or_default().push(row.city);
    }
    if collisions > 0 {
        warn!(collisions, "City names repeat across rows; later coordinates overwrite earlier ones.");
    }
    Ok((cities, coordinates))
}

/// Loads the cached city tables from `cache_dir`, building and caching them
/// from `world_cities_csv` when they are not there yet.
pub fn load_or_build_city_tables(
    cache_dir: &Path,
    world_cities_csv: &Path,
) -> Result<(CityIndex, CoordinateIndex)> {
    let city_path = cache_dir.join("city_index.json");
    let coordinate_path = cache_dir.join("coordinate_index.json");
    match (load_city_index(&city_path), load_coordinate_index(&coordinate_path)) {
        (Ok(cities), Ok(coordinates)) => {
            info!("Loaded cached city tables from {}.", cache_dir.display());
            Ok((cities, coordinates))
        }
        _ => {
            info!("Could not load cached city tables; building from scratch.");
            let (cities, coordinates) = build_city_tables(world_cities_csv)?;
            write_city_index(&city_path, &cities)?;
            write_coordinate_index(&coordinate_path, &coordinates)?;
            Ok((cities, coordinates))
        }
    }
}
