//! Small shared helpers: duration (de)serialization, list truncation and
//! file checksums.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::errors::{RemedyError, RemedyResult};

/// Serialize a `Duration` as fractional seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "invalid duration in seconds: {}",
                secs
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Serialize a `Duration` as fractional hours.
pub mod duration_hours {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() / 3600.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let hours = f64::deserialize(deserializer)?;
        if !hours.is_finite() || hours < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "invalid duration in hours: {}",
                hours
            )));
        }
        Ok(Duration::from_secs_f64(hours * 3600.0))
    }
}

/// Join at most `limit` items, summarising the rest as "and N more".
pub fn truncated_list(items: &[String], limit: usize) -> String {
    if items.len() <= limit {
        return items.join(", ");
    }
    format!(
        "{} and {} more",
        items[..limit].join(", "),
        items.len() - limit
    )
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> RemedyResult<String> {
    let data = std::fs::read(path).map_err(|e| RemedyError::io(e, path.to_path_buf()))?;
    Ok(sha256_hex(&data))
}
