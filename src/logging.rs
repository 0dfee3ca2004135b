//! Tracing subscriber setup for the binary. The library only emits events.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output style of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: LogFormat,
    /// Explicit filter directive, e.g. `streetsampler=debug`. Wins over
    /// `verbosity` and `RUST_LOG`.
    pub filter: Option<String>,
}

impl LoggingConfig {
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        if let Some(filter) = &self.filter {
            return Ok(EnvFilter::try_new(filter)?);
        }
        if self.verbosity == 0 {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return Ok(filter);
            }
        }
        Ok(EnvFilter::try_new(self.verbosity_to_filter())?)
    }

    /// Installs the global subscriber. Logs go to stderr so they do not
    /// interleave with command output.
    pub fn init(self) -> anyhow::Result<()> {
        let filter = self.env_filter()?;
        let registry = tracing_subscriber::registry().with(filter);
        match self.format {
            LogFormat::Full => registry
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .try_init()?,
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        let config = LoggingConfig::default();
        assert_eq!(config.verbosity_to_filter(), "info");
        assert_eq!(config.clone().with_verbosity(1).verbosity_to_filter(), "debug");
        assert_eq!(config.with_verbosity(5).verbosity_to_filter(), "trace");
    }

    #[test]
    fn explicit_filter_wins() {
        let config = LoggingConfig::default()
            .with_verbosity(2)
            .with_format(LogFormat::Compact)
            .with_filter(Some("streetsampler=warn".to_string()));
        let filter = config.env_filter().unwrap().to_string().to_lowercase();
        assert!(filter.contains("streetsampler"));
        assert!(filter.contains("warn"));
        assert!(!filter.contains("trace"));
    }

    #[test]
    fn missing_filter_falls_back_to_verbosity() {
        let config = LoggingConfig::default().with_verbosity(1).with_filter(None);
        let filter = config.env_filter().unwrap().to_string().to_lowercase();
        assert_eq!(filter, "debug");
    }

    #[test]
    fn invalid_filter_is_an_error() {
        let config = LoggingConfig::default().with_filter(Some("streetsampler=loud".to_string()));
        assert!(config.env_filter().is_err());
    }
}
