//! The acquisition loop: sample a country, resolve a city, locate imagery
//! near it, fetch the views and persist the record, starting over whenever an
//! attempt hits a recoverable error.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::archive::RecordSink;
use crate::error::{Error, Result};
use crate::fetcher::ImageryFetcher;
use crate::locator::ImageryLocator;
use crate::provider::ImageryProvider;
use crate::record::{DatasetRecord, SampledCountry};
use crate::sampling::{GeoWeightedSampler, PlaceResolver};

/// Limits on how long one record may be retried. Both unset means retry
/// until an attempt succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u64>,
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn max_attempts(attempts: u64) -> Self {
        Self {
            max_attempts: Some(attempts),
            max_elapsed: None,
        }
    }

    fn exhausted(&self, attempts: u64, started: Instant) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.max_elapsed.is_some_and(|max| started.elapsed() >= max)
    }
}

/// Image geometry requested for every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records: usize,
    pub attempts: u64,
}

pub struct AcquisitionLoop<'a, P, R> {
    sampler: &'a GeoWeightedSampler,
    resolver: PlaceResolver<'a>,
    locator: ImageryLocator<P>,
    fetcher: ImageryFetcher<P>,
    size: ImageSize,
    radius_m: u32,
    policy: RetryPolicy,
    rng: R,
}

impl<'a, P, R> AcquisitionLoop<'a, P, R>
where
    P: ImageryProvider + Clone,
    R: Rng,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sampler: &'a GeoWeightedSampler,
        resolver: PlaceResolver<'a>,
        provider: P,
        views: u8,
        random_heading: bool,
        size: ImageSize,
        radius_m: u32,
        rng: R,
    ) -> Self {
        Self {
            sampler,
            resolver,
            locator: ImageryLocator::new(provider.clone(), views, random_heading),
            fetcher: ImageryFetcher::new(provider),
            size,
            radius_m,
            policy: RetryPolicy::unbounded(),
            rng,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// One pass through the state machine.
    pub fn attempt(&mut self) -> Result<DatasetRecord> {
        let sampled = SampledCountry::new(self.sampler.sample(&mut self.rng));
        let (city, origin) = self.resolver.resolve_city(&sampled.country, &mut self.rng)?;
        let place = sampled.with_city(city, origin);
        let (imagery, headings) = self
            .locator
            .locate(place.origin, self.radius_m, &mut self.rng)?;
        let located = place.with_imagery(imagery, headings);
        let images = self.fetcher.fetch(
            located.imagery,
            &located.headings,
            self.size.width,
            self.size.height,
        );
        Ok(located.with_images(images)?)
    }

    /// Retries attempts until one produces a complete record. Returns the
    /// record and the number of attempts it took.
    pub fn acquire(&mut self) -> Result<(DatasetRecord, u64)> {
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt() {
                Ok(record) => return Ok((record, attempts)),
                Err(e) if e.is_recoverable() => {
                    debug!(attempt = attempts, "Attempt failed: {e}. Retrying...");
                    if self.policy.exhausted(attempts, started) {
                        return Err(Error::RetriesExhausted {
                            attempts,
                            last: e.to_string(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Acquires and stores `target` records, calling `on_record` after each
    /// one is persisted.
    pub fn run<S, F>(&mut self, target: usize, sink: &mut S, mut on_record: F) -> Result<RunSummary>
    where
        S: RecordSink,
        F: FnMut(&str, &DatasetRecord),
    {
        let mut summary = RunSummary::default();
        while summary.records < target {
            let (record, attempts) = self.acquire()?;
            let name = sink.append(&record)?;
            summary.records += 1;
            summary.attempts += attempts;
            info!(
                entry = %name,
                country = %record.country,
                city = %record.city,
                attempts,
                "Stored record."
            );
            on_record(&name, &record);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveReader, ArchiveWriter};
    use crate::datasets::{CityIndex, CoordinateIndex, CountryWeights};
    use crate::error::AttemptError;
    use crate::test_utils::ScriptedProvider;
    use geo_types::Point;
    use rand::{rngs::StdRng, SeedableRng};

    struct Fixture {
        sampler: GeoWeightedSampler,
        cities: CityIndex,
        coordinates: CoordinateIndex,
    }

    impl Fixture {
        fn new(weights: &[(&str, f64)]) -> Self {
            let weights = CountryWeights::new(
                weights.iter().map(|(c, w)| (c.to_string(), *w)).collect(),
            )
            .unwrap();
            Self {
                sampler: GeoWeightedSampler::new(&weights).unwrap(),
                cities: CityIndex::from([
                    ("Japan".to_string(), vec!["Tokyo".to_string(), "Osaka".to_string()]),
                    ("Peru".to_string(), vec!["Lima".to_string()]),
                ]),
                coordinates: CoordinateIndex::from([
                    ("Tokyo".to_string(), Point::new(139.6922, 35.6897)),
                    ("Osaka".to_string(), Point::new(135.5022, 34.6939)),
                    ("Lima".to_string(), Point::new(-77.0375, -12.06)),
                ]),
            }
        }

        fn acquisition<'a>(
            &'a self,
            provider: &'a ScriptedProvider,
            views: u8,
        ) -> AcquisitionLoop<'a, &'a ScriptedProvider, StdRng> {
            AcquisitionLoop::new(
                &self.sampler,
                PlaceResolver::new(&self.cities, &self.coordinates),
                provider,
                views,
                false,
                ImageSize {
                    width: 16,
                    height: 12,
                },
                1_000,
                StdRng::seed_from_u64(2024),
            )
        }
    }

    #[test]
    fn produces_exactly_the_target_number_of_entries() {
        let fixture = Fixture::new(&[("Japan", 3.0), ("Peru", 1.0)]);
        let provider = ScriptedProvider::new();
        let dir = tempfile::tempdir().unwrap();
        let mut archive = ArchiveWriter::new(dir.path().join("dataset.zip"));

        let mut seen = Vec::new();
        let summary = fixture
            .acquisition(&provider, 3)
            .run(6, &mut archive, |name, _| seen.push(name.to_string()))
            .unwrap();
        assert_eq!(summary.records, 6);
        assert_eq!(summary.attempts, 6);
        assert_eq!(seen.len(), 6);

        let mut reader = ArchiveReader::open(archive.path()).unwrap();
        assert_eq!(reader.len(), 6);
        for entry in reader.entries() {
            let attributes = reader.attributes(&entry).unwrap();
            let images = reader.images(&entry).unwrap();
            assert_eq!(attributes.headings.len(), 3);
            assert_eq!(images.shape(), &[3, 12, 16, 3]);
        }
    }

    #[test]
    fn unknown_countries_are_retried() {
        // Atlantis has no cities, so roughly half of all attempts fail
        let fixture = Fixture::new(&[("Atlantis", 1.0), ("Peru", 1.0)]);
        let provider = ScriptedProvider::new();
        let mut acquisition = fixture.acquisition(&provider, 1);
        for _ in 0..10 {
            let (record, attempts) = acquisition.acquire().unwrap();
            assert_eq!(record.country, "Peru");
            assert_eq!(record.city, "Lima");
            assert!(attempts >= 1);
        }
    }

    #[test]
    fn no_places_never_writes_an_entry() {
        let fixture = Fixture::new(&[("Japan", 1.0)]);
        let provider = ScriptedProvider::new().with_places(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let mut archive = ArchiveWriter::new(dir.path().join("dataset.zip"));

        let err = fixture
            .acquisition(&provider, 2)
            .with_retry_policy(RetryPolicy::max_attempts(250))
            .run(1, &mut archive, |_, _| {})
            .unwrap_err();
        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 250);
                assert!(last.contains("no places found"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!archive.path().exists());
    }

    #[test]
    fn incomplete_records_are_discarded() {
        let fixture = Fixture::new(&[("Japan", 1.0)]);
        let provider = ScriptedProvider::new().failing_heading(180.0);
        let mut acquisition = fixture
            .acquisition(&provider, 3)
            .with_retry_policy(RetryPolicy::max_attempts(3));
        let err = acquisition.acquire().unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(
            acquisition.attempt().unwrap_err().to_string(),
            AttemptError::IncompleteViews {
                expected: 3,
                fetched: 2
            }
            .to_string()
        );
    }

    #[test]
    fn elapsed_budget_stops_retrying() {
        let fixture = Fixture::new(&[("Japan", 1.0)]);
        let provider = ScriptedProvider::new().with_status("ZERO_RESULTS");
        let policy = RetryPolicy {
            max_attempts: None,
            max_elapsed: Some(Duration::from_millis(20)),
        };
        let err = fixture
            .acquisition(&provider, 1)
            .with_retry_policy(policy)
            .acquire()
            .unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { .. }));
    }

    #[test]
    fn same_seed_gives_same_records() {
        let fixture = Fixture::new(&[("Japan", 1.0), ("Peru", 1.0)]);
        let provider = ScriptedProvider::new();
        let cities = |fixture: &Fixture| {
            let mut acquisition = fixture.acquisition(&provider, 1);
            (0..8)
                .map(|_| acquisition.acquire().unwrap().0.city)
                .collect::<Vec<_>>()
        };
        assert_eq!(cities(&fixture), cities(&fixture));
    }
}
