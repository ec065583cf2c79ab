///! Cache fingerprints derived from quantized observation parameters
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use super::observation::Observation;

/// Coordinates are shared between requests at 1e-4 degree (about 11 m)
pub const COORDINATE_SCALE: f64 = 10_000.0;

const FINGERPRINT_VERSION: &str = "v1";
const FINGERPRINT_HEX_LEN: usize = 64;

/// Round a coordinate in degrees to integer ticks of 1e-4 degree.
///
/// Integer ticks keep `-0.00001` and `0.00001` on the same key.
pub fn quantize(degrees: f64) -> i64 {
    (degrees * COORDINATE_SCALE).round() as i64
}

/// Stable cache key for a render
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed fingerprint: {0:?}")]
pub struct FingerprintParseError(pub String);

impl Fingerprint {
    /// Accept only the 64-character lowercase hex form produced by `fingerprint`.
    pub fn parse(s: &str) -> Result<Self, FingerprintParseError> {
        let well_formed = s.len() == FINGERPRINT_HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err(FingerprintParseError(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the fingerprint of an observation.
///
/// The key covers the quantized coordinates, the absolute instant truncated to
/// the minute, the original UTC offset and the title. The offset and title are
/// part of the key because both are drawn into the caption: two observations
/// share a fingerprint only if their images are byte-identical. The same sky
/// under two different titles is therefore rendered and cached twice.
pub fn fingerprint(observation: &Observation) -> Fingerprint {
    let instant = observation.instant();
    let canonical = format!(
        "{}|lat={}|lon={}|t={}|tz={}|title={}",
        FINGERPRINT_VERSION,
        observation.latitude_ticks,
        observation.longitude_ticks,
        instant.format("%Y-%m-%dT%H:%MZ"),
        observation.utc_offset_hours(),
        observation.title.as_deref().unwrap_or(""),
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}
