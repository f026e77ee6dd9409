//! # Config - Mapped Stream Settings
//!
//! Construction-time options shared by every mapped stream: the map mode, the
//! slice eviction policy, the slice size exponent and the durability switch.
//!
//! ## Slice shift
//!
//! A stream maps its file in power-of-two slices of `1 << slice_shift` bytes.
//! The default leaves headroom in the process address space:
//!
//! ```text
//! 64-bit targets   30 -> 1024 MiB per slice
//! 32-bit targets   29 ->  512 MiB per slice
//! ```
//!
//! Smaller shifts (`28` = 256 MiB, `27` = 128 MiB, ...) trade more map calls
//! for less address space in use at any one time.
//!
//! ## Environment
//!
//! [`StreamConfig::from_env`] reads:
//!
//! ```text
//! MMSTREAM_MAP_MODE       ro | rw                 (default: ro)
//! MMSTREAM_CACHE_MODE     none | soft | hard      (default: soft)
//! MMSTREAM_SLICE_SHIFT    1..=30                  (default: 30, or 29 on 32-bit)
//! MMSTREAM_SYNC           true | false            (default: false)
//! MMSTREAM_SOFT_CAPACITY  evicted slices kept     (default: 4)
//! MMSTREAM_HARD_UNMAP     true | false            (default: true)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use config::{CacheMode, MapMode, StreamConfig};
//!
//! let cfg = StreamConfig::read_write()
//!     .with_cache_mode(CacheMode::HardFlush)
//!     .with_slice_shift(20);
//! assert_eq!(cfg.map_mode, MapMode::ReadWrite);
//! assert_eq!(cfg.slice_size(), 1 << 20);
//! cfg.validate().unwrap();
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default slice shift for the target's pointer width.
pub const DEFAULT_SLICE_SHIFT: u32 = if cfg!(target_pointer_width = "32") {
    29
} else {
    30
};

/// Smallest accepted slice shift (2-byte slices).
pub const MIN_SLICE_SHIFT: u32 = 1;

/// Largest accepted slice shift. Keeps every single map call below 2 GiB.
pub const MAX_SLICE_SHIFT: u32 = 30;

/// Default number of soft-evicted slices kept mapped before the oldest one
/// is reclaimed.
pub const DEFAULT_SOFT_CAPACITY: usize = 4;

/// Errors produced while building or validating a [`StreamConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The slice shift lies outside `[MIN_SLICE_SHIFT, MAX_SLICE_SHIFT]`.
    #[error("slice shift {0} not within [{MIN_SLICE_SHIFT}..={MAX_SLICE_SHIFT}]")]
    SliceShift(u32),

    /// An option could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Option (or environment variable) name.
        key: String,
        /// The rejected raw value.
        value: String,
    },
}

/// How slices are mapped. Fixed for the life of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapMode {
    /// Shared read-only mapping.
    #[default]
    ReadOnly,
    /// Shared read-write mapping; stores reach the file.
    ReadWrite,
}

impl MapMode {
    /// Returns `true` for [`MapMode::ReadWrite`].
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, MapMode::ReadWrite)
    }
}

impl fmt::Display for MapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapMode::ReadOnly => f.write_str("ro"),
            MapMode::ReadWrite => f.write_str("rw"),
        }
    }
}

impl FromStr for MapMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ro" | "read-only" | "readonly" => Ok(MapMode::ReadOnly),
            "rw" | "read-write" | "readwrite" => Ok(MapMode::ReadWrite),
            _ => Err(ConfigError::InvalidValue {
                key: "map_mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// What happens to a slice once the cursor leaves it.
///
/// The mode is a starting point: [`CacheMode::HardFlush`] downgrades itself
/// to [`CacheMode::SoftFlush`] at runtime when eager unmapping is not
/// available, so callers should query the stream for the effective mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Keep every mapped slice resident until the stream is closed. Suits
    /// readers that hop around the file.
    NoFlush,
    /// Drop the strong mapping but keep a resurrectable handle to it, so a
    /// short hop back can reuse the mapping without a new map call.
    #[default]
    SoftFlush,
    /// Unmap the vacated slice eagerly. Suits strictly sequential traversal.
    HardFlush,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::NoFlush => f.write_str("none"),
            CacheMode::SoftFlush => f.write_str("soft"),
            CacheMode::HardFlush => f.write_str("hard"),
        }
    }
}

impl FromStr for CacheMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "no-flush" | "noflush" => Ok(CacheMode::NoFlush),
            "soft" | "soft-flush" | "softflush" => Ok(CacheMode::SoftFlush),
            "hard" | "hard-flush" | "hardflush" => Ok(CacheMode::HardFlush),
            _ => Err(ConfigError::InvalidValue {
                key: "cache_mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Options recognised at stream construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Read-only or read-write mapping.
    pub map_mode: MapMode,
    /// Initial slice eviction policy.
    pub cache_mode: CacheMode,
    /// Slice size exponent: each slice spans `1 << slice_shift` bytes.
    pub slice_shift: u32,
    /// If `true`, every write syncs the touched slice before returning and
    /// every resize forces file metadata.
    pub synchronous: bool,
    /// Allow eager unmapping. `false` behaves as if the platform lacked it,
    /// which makes [`CacheMode::HardFlush`] fall back to soft eviction.
    pub hard_unmap: bool,
    /// Soft-evicted slices kept mapped before the oldest is reclaimed.
    pub soft_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            map_mode: MapMode::ReadOnly,
            cache_mode: CacheMode::SoftFlush,
            slice_shift: DEFAULT_SLICE_SHIFT,
            synchronous: false,
            hard_unmap: true,
            soft_capacity: DEFAULT_SOFT_CAPACITY,
        }
    }
}

impl StreamConfig {
    /// Defaults with a read-only mapping.
    #[must_use]
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Defaults with a read-write mapping.
    #[must_use]
    pub fn read_write() -> Self {
        Self {
            map_mode: MapMode::ReadWrite,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_map_mode(mut self, map_mode: MapMode) -> Self {
        self.map_mode = map_mode;
        self
    }

    #[must_use]
    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    #[must_use]
    pub fn with_slice_shift(mut self, slice_shift: u32) -> Self {
        self.slice_shift = slice_shift;
        self
    }

    #[must_use]
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    #[must_use]
    pub fn with_hard_unmap(mut self, hard_unmap: bool) -> Self {
        self.hard_unmap = hard_unmap;
        self
    }

    #[must_use]
    pub fn with_soft_capacity(mut self, soft_capacity: usize) -> Self {
        self.soft_capacity = soft_capacity;
        self
    }

    /// Slice size in bytes, `1 << slice_shift`.
    #[must_use]
    pub fn slice_size(&self) -> u64 {
        1u64 << self.slice_shift
    }

    /// Checks the options are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SliceShift`] if the shift is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SLICE_SHIFT..=MAX_SLICE_SHIFT).contains(&self.slice_shift) {
            return Err(ConfigError::SliceShift(self.slice_shift));
        }
        Ok(())
    }

    /// Builds a config from `MMSTREAM_*` environment variables. Unset
    /// variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value or the
    /// resulting config fails [`validate`](StreamConfig::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](StreamConfig::from_env) but reads values through
    /// `lookup`, so callers (and tests) can supply their own source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](StreamConfig::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("MMSTREAM_MAP_MODE") {
            cfg.map_mode = v.parse()?;
        }
        if let Some(v) = lookup("MMSTREAM_CACHE_MODE") {
            cfg.cache_mode = v.parse()?;
        }
        if let Some(v) = lookup("MMSTREAM_SLICE_SHIFT") {
            cfg.slice_shift = parse_value("MMSTREAM_SLICE_SHIFT", &v)?;
        }
        if let Some(v) = lookup("MMSTREAM_SYNC") {
            cfg.synchronous = parse_value("MMSTREAM_SYNC", &v)?;
        }
        if let Some(v) = lookup("MMSTREAM_SOFT_CAPACITY") {
            cfg.soft_capacity = parse_value("MMSTREAM_SOFT_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("MMSTREAM_HARD_UNMAP") {
            cfg.hard_unmap = parse_value("MMSTREAM_HARD_UNMAP", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests;
