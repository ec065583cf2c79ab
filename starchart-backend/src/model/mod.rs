///! Data model: observation requests, cache fingerprints and archived artifacts

mod observation;
pub use observation::{Observation, ObservationRequest, ValidationError, MAX_TITLE_CHARS};

mod fingerprint;
pub use fingerprint::{fingerprint, quantize, Fingerprint, FingerprintParseError, COORDINATE_SCALE};

mod artifact;
pub use artifact::{
    ArtifactId, ArtifactPage, ArtifactSummary, LocationRange, Metadata, PermanentArtifact,
};
