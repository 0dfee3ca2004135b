use geo_types::Point;
use rand::{
    distributions::{Distribution, WeightedIndex},
    seq::SliceRandom,
    Rng,
};

use crate::datasets::{CityIndex, CoordinateIndex, CountryWeights};
use crate::error::{AttemptError, Error, Result};

/// Draws countries with probability proportional to their weight.
#[derive(Debug, Clone)]
pub struct GeoWeightedSampler {
    countries: Vec<String>,
    distribution: WeightedIndex<f64>,
}

impl GeoWeightedSampler {
    pub fn new(weights: &CountryWeights) -> Result<Self> {
        let distribution = WeightedIndex::new(weights.entries().iter().map(|(_, weight)| *weight))
            .map_err(|e| Error::table("country weights", e.to_string()))?;
        let countries = weights
            .entries()
            .iter()
            .map(|(country, _)| country.clone())
            .collect();
        Ok(Self {
            countries,
            distribution,
        })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.countries[self.distribution.sample(rng)]
    }
}

/// Picks a random city of a country and looks up its coordinate.
#[derive(Debug, Clone, Copy)]
pub struct PlaceResolver<'a> {
    cities: &'a CityIndex,
    coordinates: &'a CoordinateIndex,
}

impl<'a> PlaceResolver<'a> {
    pub fn new(cities: &'a CityIndex, coordinates: &'a CoordinateIndex) -> Self {
        Self {
            cities,
            coordinates,
        }
    }

    pub fn resolve_city<R: Rng + ?Sized>(
        &self,
        country: &str,
        rng: &mut R,
    ) -> std::result::Result<(&'a str, Point<f64>), AttemptError> {
        let cities = self
            .cities
            .get(country)
            .ok_or_else(|| AttemptError::UnknownCountry(country.to_string()))?;
        let city = cities
            .choose(rng)
            .ok_or_else(|| AttemptError::EmptyCityList(country.to_string()))?;
        let coordinate = self
            .coordinates
            .get(city)
            .ok_or_else(|| AttemptError::UnknownCity(city.clone()))?;
        Ok((city.as_str(), *coordinate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashMap;

    fn table(pairs: &[(&str, f64)]) -> CountryWeights {
        CountryWeights::new(pairs.iter().map(|(c, w)| (c.to_string(), *w)).collect()).unwrap()
    }

    #[test]
    fn sample_frequencies_follow_weights() {
        let weights = table(&[("Russia", 6.0), ("Canada", 3.0), ("Malta", 1.0), ("Nauru", 0.0)]);
        let sampler = GeoWeightedSampler::new(&weights).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let draws = 100_000;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(sampler.sample(&mut rng)).or_default() += 1;
        }

        for (country, weight) in weights.entries() {
            let share = *counts.get(country.as_str()).unwrap_or(&0) as f64 / draws as f64;
            let expected = weight / 10.0;
            assert!(
                (share - expected).abs() < 0.01,
                "{country}: got {share}, expected {expected}"
            );
        }
        assert!(!counts.contains_key("Nauru"));
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let weights = table(&[("A", 1.0), ("B", 2.0), ("C", 3.0)]);
        let sampler = GeoWeightedSampler::new(&weights).unwrap();
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..50).map(|_| sampler.sample(&mut rng).to_string()).collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }

    fn indexes() -> (CityIndex, CoordinateIndex) {
        let cities = CityIndex::from([
            (
                "Japan".to_string(),
                vec!["Tokyo".to_string(), "Osaka".to_string()],
            ),
            ("Peru".to_string(), vec!["Lima".to_string()]),
            ("Nowhere".to_string(), vec![]),
        ]);
        let coordinates = CoordinateIndex::from([
            ("Tokyo".to_string(), Point::new(139.6922, 35.6897)),
            ("Osaka".to_string(), Point::new(135.5022, 34.6939)),
        ]);
        (cities, coordinates)
    }

    #[test]
    fn resolves_a_city_of_the_country() {
        let (cities, coordinates) = indexes();
        let resolver = PlaceResolver::new(&cities, &coordinates);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let (city, coordinate) = resolver.resolve_city("Japan", &mut rng).unwrap();
            assert!(cities["Japan"].iter().any(|c| c == city));
            assert_eq!(coordinates[city], coordinate);
        }
    }

    #[test]
    fn resolution_errors() {
        let (cities, coordinates) = indexes();
        let resolver = PlaceResolver::new(&cities, &coordinates);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            resolver.resolve_city("Atlantis", &mut rng),
            Err(AttemptError::UnknownCountry("Atlantis".to_string()))
        );
        assert_eq!(
            resolver.resolve_city("Nowhere", &mut rng),
            Err(AttemptError::EmptyCityList("Nowhere".to_string()))
        );
        assert_eq!(
            resolver.resolve_city("Peru", &mut rng),
            Err(AttemptError::UnknownCity("Lima".to_string()))
        );
    }
}
