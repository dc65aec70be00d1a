//! Envelope runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into [`crate::EnvelopeService`].
//! Nothing in the pipeline reads environment variables while sealing or opening, so concurrent
//! envelope operations always see one consistent policy.

use crate::constants::{DEFAULT_COMPRESSION_FLOOR, DEFAULT_MAX_INFLATED_SIZE};
use crate::{EnvelopeError, EnvelopeResult};
use chrono::Duration;

/// Envelope policy resolved at startup.
#[derive(Clone, Debug)]
pub struct EnvelopeConfig {
    compression_floor: usize,
    default_expiry: Option<Duration>,
    allow_plaintext: bool,
    edwards_curve_signatures: bool,
    sniff_compression: bool,
    max_inflated_size: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            compression_floor: DEFAULT_COMPRESSION_FLOOR,
            default_expiry: None,
            allow_plaintext: false,
            edwards_curve_signatures: true,
            sniff_compression: false,
            max_inflated_size: DEFAULT_MAX_INFLATED_SIZE,
        }
    }
}

impl EnvelopeConfig {
    /// Payloads shorter than this many bytes are never compressed.
    pub fn with_compression_floor(mut self, floor: usize) -> Self {
        self.compression_floor = floor;
        self
    }

    /// Lifetime stamped into envelopes sealed with `Expiration::Default`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidInput`] for zero or negative durations.
    pub fn with_default_expiry(mut self, expiry: Option<Duration>) -> EnvelopeResult<Self> {
        if let Some(expiry) = expiry {
            if expiry <= Duration::zero() {
                return Err(EnvelopeError::InvalidInput(
                    "default expiry must be positive".into(),
                ));
            }
        }
        self.default_expiry = expiry;
        Ok(self)
    }

    /// Permit envelopes that are neither signed nor encrypted.
    pub fn with_plaintext(mut self, allow: bool) -> Self {
        self.allow_plaintext = allow;
        self
    }

    pub fn with_edwards_curve_signatures(mut self, enabled: bool) -> Self {
        self.edwards_curve_signatures = enabled;
        self
    }

    /// Try to inflate payloads that carry no `zip` header.
    pub fn with_sniff_compression(mut self, enabled: bool) -> Self {
        self.sniff_compression = enabled;
        self
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidInput`] for a zero limit.
    pub fn with_max_inflated_size(mut self, limit: usize) -> EnvelopeResult<Self> {
        if limit == 0 {
            return Err(EnvelopeError::InvalidInput(
                "max inflated size must be greater than zero".into(),
            ));
        }
        self.max_inflated_size = limit;
        Ok(self)
    }

    pub fn compression_floor(&self) -> usize {
        self.compression_floor
    }

    pub fn default_expiry(&self) -> Option<Duration> {
        self.default_expiry
    }

    pub fn allow_plaintext(&self) -> bool {
        self.allow_plaintext
    }

    pub fn edwards_curve_signatures(&self) -> bool {
        self.edwards_curve_signatures
    }

    pub fn sniff_compression(&self) -> bool {
        self.sniff_compression
    }

    pub fn max_inflated_size(&self) -> usize {
        self.max_inflated_size
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the compression floor from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default floor.
pub fn compression_floor_from_env_value(value: Option<String>) -> EnvelopeResult<usize> {
    match non_blank(value) {
        None => Ok(DEFAULT_COMPRESSION_FLOOR),
        Some(v) => v.parse::<usize>().map_err(|_| {
            EnvelopeError::InvalidInput(format!("compression floor '{v}' is not a byte count"))
        }),
    }
}

/// Parse the default expiry (whole seconds) from an optional string value.
///
/// `None`, empty, or `0` mean no default expiry.
pub fn default_expiry_from_env_value(value: Option<String>) -> EnvelopeResult<Option<Duration>> {
    let Some(v) = non_blank(value) else {
        return Ok(None);
    };
    let seconds = v.parse::<i64>().map_err(|_| {
        EnvelopeError::InvalidInput(format!("default expiry '{v}' is not a number of seconds"))
    })?;
    match seconds {
        0 => Ok(None),
        s if s < 0 => Err(EnvelopeError::InvalidInput(
            "default expiry cannot be negative".into(),
        )),
        s => Ok(Some(Duration::seconds(s))),
    }
}

/// Parse a boolean flag from an optional string value, falling back to `default`.
pub fn flag_from_env_value(value: Option<String>, default: bool) -> EnvelopeResult<bool> {
    match non_blank(value).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(EnvelopeError::InvalidInput(format!(
                "'{v}' is not a boolean flag"
            ))),
        },
    }
}
