//! Cursor configuration.

use std::time::Duration;

use mongodb::options::SelectionCriteria;

use crate::error::{CursorError, CursorResult};

/// Default number of documents a single pull may buffer.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Environment variable overriding the high water mark.
pub const ENV_HIGH_WATER_MARK: &str = "FATHOM_HIGH_WATER_MARK";
/// Environment variable setting the driver batch size.
pub const ENV_BATCH_SIZE: &str = "FATHOM_BATCH_SIZE";
/// Environment variable setting the tailable await time, in milliseconds.
pub const ENV_MAX_AWAIT_TIME_MS: &str = "FATHOM_MAX_AWAIT_TIME_MS";

/// Options applied when a cursor adapter is created.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorOptions {
    /// Upper bound on buffered documents; each pull requests at most this many.
    pub high_water_mark: usize,
    /// Driver batch size.
    pub batch_size: Option<u32>,
    /// Maximum time the server waits for new documents on tailable cursors.
    pub max_await_time: Option<Duration>,
    /// Read preference.
    pub read_preference: Option<ReadPreference>,
    /// Keep the server cursor alive past the idle timeout.
    pub no_cursor_timeout: bool,
}

/// Read preference for cursor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(pref: ReadPreference) -> Self {
        use mongodb::options::ReadPreference as Driver;

        let pref = match pref {
            ReadPreference::Primary => Driver::Primary,
            ReadPreference::PrimaryPreferred => Driver::PrimaryPreferred {
                options: Default::default(),
            },
            ReadPreference::Secondary => Driver::Secondary {
                options: Default::default(),
            },
            ReadPreference::SecondaryPreferred => Driver::SecondaryPreferred {
                options: Default::default(),
            },
            ReadPreference::Nearest => Driver::Nearest {
                options: Default::default(),
            },
        };
        SelectionCriteria::ReadPreference(pref)
    }
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            batch_size: None,
            max_await_time: None,
            read_preference: None,
            no_cursor_timeout: false,
        }
    }
}

impl CursorOptions {
    /// Create a builder for options.
    pub fn builder() -> CursorOptionsBuilder {
        CursorOptionsBuilder::new()
    }

    /// Read options from the process environment.
    ///
    /// Unset variables keep their defaults; unparsable values are errors.
    pub fn from_env() -> CursorResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read options through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> CursorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(raw) = lookup(ENV_HIGH_WATER_MARK) {
            builder = builder.high_water_mark(parse_var(ENV_HIGH_WATER_MARK, &raw)?);
        }
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            builder = builder.batch_size(parse_var(ENV_BATCH_SIZE, &raw)?);
        }
        if let Some(raw) = lookup(ENV_MAX_AWAIT_TIME_MS) {
            let ms: u64 = parse_var(ENV_MAX_AWAIT_TIME_MS, &raw)?;
            builder = builder.max_await_time(Duration::from_millis(ms));
        }

        builder.build()
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> CursorResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| CursorError::config(format!("invalid value for {}: {:?}", name, raw)))
}

/// Builder for cursor options.
#[derive(Debug, Default)]
pub struct CursorOptionsBuilder {
    high_water_mark: Option<usize>,
    batch_size: Option<u32>,
    max_await_time: Option<Duration>,
    read_preference: Option<ReadPreference>,
    no_cursor_timeout: bool,
}

impl CursorOptionsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the high water mark.
    pub fn high_water_mark(mut self, mark: usize) -> Self {
        self.high_water_mark = Some(mark);
        self
    }

    /// Set the driver batch size.
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the tailable await time.
    pub fn max_await_time(mut self, duration: Duration) -> Self {
        self.max_await_time = Some(duration);
        self
    }

    /// Set the read preference.
    pub fn read_preference(mut self, pref: ReadPreference) -> Self {
        self.read_preference = Some(pref);
        self
    }

    /// Disable the server idle timeout.
    pub fn no_cursor_timeout(mut self, enabled: bool) -> Self {
        self.no_cursor_timeout = enabled;
        self
    }

    /// Build the options.
    pub fn build(self) -> CursorResult<CursorOptions> {
        let high_water_mark = self.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK);
        if high_water_mark == 0 {
            return Err(CursorError::config("high water mark must be at least 1"));
        }

        Ok(CursorOptions {
            high_water_mark,
            batch_size: self.batch_size,
            max_await_time: self.max_await_time,
            read_preference: self.read_preference,
            no_cursor_timeout: self.no_cursor_timeout,
        })
    }
}
