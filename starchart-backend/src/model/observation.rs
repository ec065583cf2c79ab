///! Observation requests and their validated form
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fingerprint::{quantize, COORDINATE_SCALE};

/// Longest accepted title, in characters
pub const MAX_TITLE_CHARS: usize = 255;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;
const MIN_OFFSET_HOURS: i32 = -12;
const MAX_OFFSET_HOURS: i32 = 14;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),

    #[error("year {0} is outside [1900, 2100]")]
    Year(i32),

    #[error("no such calendar date: {year:04}-{month:02}-{day:02}")]
    Date { year: i32, month: u32, day: u32 },

    #[error("no such time of day: {hour:02}:{minute:02}")]
    Time { hour: u32, minute: u32 },

    #[error("timezone offset {0}h is outside [-12, 14]")]
    TimezoneOffset(i32),

    #[error("title is longer than 255 characters")]
    TitleTooLong,
}

/// Raw generation request as received at the boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    /// Signed whole hours east of UTC
    pub timezone_offset: i32,
    #[serde(default)]
    pub title: Option<String>,
}

impl ObservationRequest {
    /// Check ranges and the calendar, then quantize the coordinates.
    pub fn validate(&self) -> Result<Observation, ValidationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::Latitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::Longitude(self.longitude));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&self.year) {
            return Err(ValidationError::Year(self.year));
        }
        if !(MIN_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(&self.timezone_offset) {
            return Err(ValidationError::TimezoneOffset(self.timezone_offset));
        }

        let date = NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or(
            ValidationError::Date {
                year: self.year,
                month: self.month,
                day: self.day,
            },
        )?;
        let wall_clock = date.and_hms_opt(self.hour, self.minute, 0).ok_or(
            ValidationError::Time {
                hour: self.hour,
                minute: self.minute,
            },
        )?;

        let offset = FixedOffset::east_opt(self.timezone_offset * 3600)
            .ok_or(ValidationError::TimezoneOffset(self.timezone_offset))?;
        // Fixed offsets have no gaps or folds, so the mapping is always single.
        let local_time = offset
            .from_local_datetime(&wall_clock)
            .single()
            .ok_or(ValidationError::Time {
                hour: self.hour,
                minute: self.minute,
            })?;

        let title = match self.title.as_deref().map(str::trim) {
            Some(t) if t.chars().count() > MAX_TITLE_CHARS => {
                return Err(ValidationError::TitleTooLong);
            }
            Some("") | None => None,
            Some(t) => Some(t.to_string()),
        };

        Ok(Observation {
            latitude_ticks: quantize(self.latitude),
            longitude_ticks: quantize(self.longitude),
            local_time,
            title,
        })
    }
}

/// A validated observation.
///
/// Coordinates are held as integer ticks of 1e-4 degree, which is the
/// resolution the cache shares renders at. Everything downstream (fingerprint,
/// ephemeris, captions) reads the quantized values so that two requests with
/// the same fingerprint always render the same image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub latitude_ticks: i64,
    pub longitude_ticks: i64,
    /// Wall-clock time at the observer with its original UTC offset
    pub local_time: DateTime<FixedOffset>,
    pub title: Option<String>,
}

impl Observation {
    pub fn latitude(&self) -> f64 {
        self.latitude_ticks as f64 / COORDINATE_SCALE
    }

    pub fn longitude(&self) -> f64 {
        self.longitude_ticks as f64 / COORDINATE_SCALE
    }

    /// Absolute instant of the observation
    pub fn instant(&self) -> DateTime<Utc> {
        self.local_time.with_timezone(&Utc)
    }

    pub fn utc_offset_hours(&self) -> i32 {
        self.local_time.offset().local_minus_utc() / 3600
    }
}
