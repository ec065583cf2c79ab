///! Earth orientation at an instant: precession, nutation, annual aberration
///! and Greenwich apparent sidereal time.
///!
///! Low-precision series (Meeus, Astronomical Algorithms), good to a few
///! arcseconds over 1900-2100, far below the resolution of a rendered map.
use chrono::{DateTime, Utc};
use nalgebra::{Matrix3, Vector3};

use super::catalog::EphemerisParams;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_CENTURY: f64 = 36_525.0;
const ARCSEC_PER_RADIAN: f64 = 206_264.806;
/// Constant of aberration, arcseconds
const ABERRATION_CONSTANT: f64 = 20.495_52;

/// Julian date of a UTC instant
pub fn julian_date(instant: DateTime<Utc>) -> f64 {
    let seconds =
        instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_nanos()) * 1e-9;
    seconds / SECONDS_PER_DAY + UNIX_EPOCH_JD
}

fn arcsec(value: f64) -> f64 {
    (value / 3600.0).to_radians()
}

/// Frame rotation about x
fn r1(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, s, 0.0, -s, c)
}

/// Frame rotation about y
fn r2(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, 0.0, -s, 0.0, 1.0, 0.0, s, 0.0, c)
}

/// Frame rotation about z
fn r3(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Mean J2000 -> mean equator and equinox of date
fn precession(t: f64) -> Matrix3<f64> {
    let t2 = t * t;
    let t3 = t2 * t;
    let zeta = arcsec(2306.2181 * t + 0.30188 * t2 + 0.017998 * t3);
    let z = arcsec(2306.2181 * t + 1.09468 * t2 + 0.018203 * t3);
    let theta = arcsec(2004.3109 * t - 0.42665 * t2 - 0.041833 * t3);
    r3(-z) * r2(theta) * r3(-zeta)
}

/// Mean obliquity of the ecliptic, radians
fn mean_obliquity(t: f64) -> f64 {
    let t2 = t * t;
    (23.439_291_111 - 0.013_004_167 * t - 1.6389e-7 * t2 + 5.036e-7 * t2 * t).to_radians()
}

/// Nutation in longitude and obliquity, radians
fn nutation(t: f64) -> (f64, f64) {
    let omega = (125.044_52 - 1934.136_261 * t).to_radians();
    let sun = (280.4665 + 36_000.7698 * t).to_radians();
    let moon = (218.3165 + 481_267.8813 * t).to_radians();

    let dpsi = -17.20 * omega.sin() - 1.32 * (2.0 * sun).sin() - 0.23 * (2.0 * moon).sin()
        + 0.21 * (2.0 * omega).sin();
    let deps = 9.20 * omega.cos() + 0.57 * (2.0 * sun).cos() + 0.10 * (2.0 * moon).cos()
        - 0.09 * (2.0 * omega).cos();
    (arcsec(dpsi), arcsec(deps))
}

/// Geometric ecliptic longitude of the Sun, degrees
fn sun_longitude(t: f64) -> f64 {
    let mean_longitude = 280.466_46 + 36_000.769_83 * t + 0.000_303_2 * t * t;
    let anomaly = (357.529_11 + 35_999.050_29 * t - 0.000_153_7 * t * t).to_radians();
    let center = (1.914_602 - 0.004_817 * t - 0.000_014 * t * t) * anomaly.sin()
        + (0.019_993 - 0.000_101 * t) * (2.0 * anomaly).sin()
        + 0.000_289 * (3.0 * anomaly).sin();
    (mean_longitude + center).rem_euclid(360.0)
}

/// Greenwich mean sidereal time (IAU 1982), degrees
fn mean_sidereal_time(jd_ut1: f64) -> f64 {
    let d = jd_ut1 - J2000;
    let t = d / DAYS_PER_CENTURY;
    280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t - t * t * t / 38_710_000.0
}

/// Orientation of the Earth at one instant, shared by every star of a render
#[derive(Debug, Clone, PartialEq)]
pub struct EarthOrientation {
    /// Mean J2000 equatorial -> true equator and equinox of date
    frame: Matrix3<f64>,
    /// Earth velocity over c in the frame of date
    velocity: Option<Vector3<f64>>,
    /// Greenwich apparent sidereal time, degrees in [0, 360)
    sidereal_deg: f64,
}

impl EarthOrientation {
    pub fn at(instant: DateTime<Utc>, params: &EphemerisParams) -> Self {
        let jd_utc = julian_date(instant);
        let jd_ut1 = jd_utc + params.dut1_seconds / SECONDS_PER_DAY;
        let jd_tt = jd_ut1 + params.delta_t_seconds / SECONDS_PER_DAY;
        let t = (jd_tt - J2000) / DAYS_PER_CENTURY;

        let eps0 = mean_obliquity(t);
        let (dpsi, deps) = if params.nutation {
            nutation(t)
        } else {
            (0.0, 0.0)
        };
        let eps = eps0 + deps;

        let nutation_matrix = r1(-eps) * r3(-dpsi) * r1(eps0);
        let frame = nutation_matrix * precession(t);

        let velocity = params.aberration.then(|| {
            let lambda = sun_longitude(t).to_radians();
            let kappa = ABERRATION_CONSTANT / ARCSEC_PER_RADIAN;
            let ecliptic = Vector3::new(lambda.sin(), -lambda.cos(), 0.0) * kappa;
            r1(-eps) * ecliptic
        });

        let equation_of_equinoxes = dpsi.to_degrees() * eps.cos();
        let sidereal_deg = (mean_sidereal_time(jd_ut1) + equation_of_equinoxes).rem_euclid(360.0);

        Self {
            frame,
            velocity,
            sidereal_deg,
        }
    }

    /// Greenwich apparent sidereal time, degrees
    pub fn sidereal_deg(&self) -> f64 {
        self.sidereal_deg
    }

    /// Local apparent sidereal time at an east-positive longitude, degrees
    pub fn local_sidereal_deg(&self, longitude_deg: f64) -> f64 {
        (self.sidereal_deg + longitude_deg).rem_euclid(360.0)
    }

    /// Apparent right ascension and declination of date for a J2000
    /// catalog position. All angles in degrees.
    pub fn apparent(&self, ra_deg: f64, dec_deg: f64) -> (f64, f64) {
        let (sin_ra, cos_ra) = ra_deg.to_radians().sin_cos();
        let (sin_dec, cos_dec) = dec_deg.to_radians().sin_cos();
        let mut u = self.frame * Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec);

        if let Some(v) = &self.velocity {
            u = (u + v - u * u.dot(v)).normalize();
        }

        let ra = u.y.atan2(u.x).to_degrees().rem_euclid(360.0);
        let dec = u.z.clamp(-1.0, 1.0).asin().to_degrees();
        (ra, dec)
    }
}
