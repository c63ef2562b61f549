//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default trailing debounce window for change-driven refetches.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(40);

/// Default delay before each attempt to reopen a lost change feed.
pub const DEFAULT_FEED_REOPEN_BACKOFF: Duration = Duration::from_millis(250);

/// Default number of consecutive failed reopen attempts before giving up.
pub const DEFAULT_FEED_REOPEN_ATTEMPTS: usize = 5;

/// Tunables shared by every binding of an [`Engine`](crate::Engine).
///
/// ```toml
/// debounce_ms = 40
/// feed_reopen_backoff_ms = 250
/// feed_reopen_attempts = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
	/// Trailing debounce window, in milliseconds.
	pub debounce_ms: u64,
	/// Delay before each feed reopen attempt, in milliseconds.
	pub feed_reopen_backoff_ms: u64,
	/// Consecutive failed reopen attempts before a binding stops reopening.
	pub feed_reopen_attempts: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			debounce_ms: millis(DEFAULT_DEBOUNCE),
			feed_reopen_backoff_ms: millis(DEFAULT_FEED_REOPEN_BACKOFF),
			feed_reopen_attempts: DEFAULT_FEED_REOPEN_ATTEMPTS,
		}
	}
}

impl EngineConfig {
	/// Parses and validates TOML text.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses, and validates a TOML file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&text)
	}

	/// Rejects values the engine cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.debounce_ms == 0 {
			return Err(ConfigError::Invalid("debounce_ms must be greater than zero".into()));
		}
		Ok(())
	}

	/// Sets the debounce window.
	#[must_use]
	pub fn with_debounce(mut self, window: Duration) -> Self {
		self.debounce_ms = millis(window);
		self
	}

	/// Sets the feed reopen policy.
	#[must_use]
	pub fn with_feed_reopen(mut self, backoff: Duration, attempts: usize) -> Self {
		self.feed_reopen_backoff_ms = millis(backoff);
		self.feed_reopen_attempts = attempts;
		self
	}

	/// Debounce window.
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	/// Delay before each feed reopen attempt.
	pub fn feed_reopen_backoff(&self) -> Duration {
		Duration::from_millis(self.feed_reopen_backoff_ms)
	}
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_toml_yields_defaults() {
		assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
		assert_eq!(EngineConfig::default().debounce(), DEFAULT_DEBOUNCE);
	}

	#[test]
	fn partial_toml_overrides_fields() {
		let config = EngineConfig::from_toml_str("debounce_ms = 15\nfeed_reopen_attempts = 2\n").unwrap();
		assert_eq!(config.debounce(), Duration::from_millis(15));
		assert_eq!(config.feed_reopen_attempts, 2);
		assert_eq!(config.feed_reopen_backoff(), DEFAULT_FEED_REOPEN_BACKOFF);
	}

	#[test]
	fn zero_debounce_is_rejected() {
		let err = EngineConfig::from_toml_str("debounce_ms = 0").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let err = EngineConfig::from_toml_str("debounce = 10").unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
	}

	#[test]
	fn missing_file_reports_path() {
		let err = EngineConfig::load(Path::new("/nonexistent/tavola.toml")).unwrap_err();
		assert!(err.to_string().contains("/nonexistent/tavola.toml"), "got {err}");
	}

	#[test]
	fn oversized_durations_saturate() {
		let config = EngineConfig::default()
			.with_debounce(Duration::MAX)
			.with_feed_reopen(Duration::MAX, 1);
		assert_eq!(config.debounce_ms, u64::MAX);
		assert_eq!(config.feed_reopen_backoff_ms, u64::MAX);
		assert_eq!(EngineConfig::default().with_debounce(Duration::from_millis(25)).debounce_ms, 25);
	}
}
