///! Apparent horizontal coordinates of catalog entries
use chrono::{DateTime, Utc};

use super::catalog::{Catalog, CatalogEntry, ObserverFrame};
use super::ephemeris::EarthOrientation;

/// Where a catalog entry appears in the observer's sky
#[derive(Debug, Clone, PartialEq)]
pub struct HorizontalPosition<'a> {
    pub entry: &'a CatalogEntry,
    /// Degrees above the geometric horizon, no refraction
    pub altitude_deg: f64,
    /// Degrees from north through east, in [0, 360)
    pub azimuth_deg: f64,
}

/// Altitude and azimuth of every catalog entry for one observer and instant.
///
/// Pure and deterministic: the same inputs always give the same output, in
/// catalog order.
pub fn positions<'a>(
    catalog: &'a Catalog,
    observer: &ObserverFrame,
    instant: DateTime<Utc>,
) -> Vec<HorizontalPosition<'a>> {
    let orientation = EarthOrientation::at(instant, catalog.ephemeris());
    let local_sidereal = orientation.local_sidereal_deg(observer.longitude_deg);

    catalog
        .entries()
        .iter()
        .map(|entry| {
            let (ra, dec) = orientation.apparent(entry.ra_deg, entry.dec_deg);
            let (altitude_deg, azimuth_deg) = horizontal(ra, dec, local_sidereal, observer);
            HorizontalPosition {
                entry,
                altitude_deg,
                azimuth_deg,
            }
        })
        .collect()
}

/// Equatorial of date to horizontal, all angles in degrees
fn horizontal(ra_deg: f64, dec_deg: f64, local_sidereal_deg: f64, observer: &ObserverFrame) -> (f64, f64) {
    let hour_angle = (local_sidereal_deg - ra_deg).to_radians();
    let (sin_h, cos_h) = hour_angle.sin_cos();
    let (sin_dec, cos_dec) = dec_deg.to_radians().sin_cos();

    // Components in the local horizontal frame: up, east, north
    let up = observer.sin_lat * sin_dec + observer.cos_lat * cos_dec * cos_h;
    let east = -cos_dec * sin_h;
    let north = sin_dec * observer.cos_lat - cos_dec * observer.sin_lat * cos_h;

    // atan2 keeps full precision near the zenith, where asin(up) does not
    let altitude = up.atan2(east.hypot(north)).to_degrees();
    let azimuth = east.atan2(north).to_degrees().rem_euclid(360.0);
    // rem_euclid of a tiny negative angle rounds up to exactly 360
    let azimuth = if azimuth >= 360.0 { 0.0 } else { azimuth };

    (altitude, azimuth)
}
