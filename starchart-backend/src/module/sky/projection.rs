///! Visibility filter and zenith-centred stereographic projection
use super::position::HorizontalPosition;

/// Faintest magnitude still drawn (inclusive)
pub const LIMITING_MAGNITUDE: f64 = 6.0;

const MIN_OPACITY: f64 = 0.35;

/// A visible star mapped onto the unit sky disc.
///
/// `x`/`y` use math orientation: north is +y, east is -x. The horizon lies on
/// the unit circle and the zenith at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedStar {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub magnitude: f64,
    /// Marker radius in canvas pixels
    pub radius: f64,
    pub opacity: f64,
}

/// Distance from the disc centre of a given altitude: 0 at the zenith,
/// 1 on the horizon.
pub fn altitude_radius(altitude_deg: f64) -> f64 {
    ((90.0 - altitude_deg) / 2.0).to_radians().tan()
}

/// Marker radius in pixels, larger for brighter stars
pub fn magnitude_radius(magnitude: f64) -> f64 {
    0.6 + 0.45 * (LIMITING_MAGNITUDE - magnitude + 1.0)
}

/// Marker opacity in [0.35, 1.0], higher for brighter stars
pub fn magnitude_opacity(magnitude: f64) -> f64 {
    let brightness = (LIMITING_MAGNITUDE - magnitude) / 7.0;
    (MIN_OPACITY + (1.0 - MIN_OPACITY) * brightness).clamp(MIN_OPACITY, 1.0)
}

fn is_visible(position: &HorizontalPosition<'_>) -> bool {
    position.altitude_deg > 0.0 && position.entry.magnitude <= LIMITING_MAGNITUDE
}

/// Keep stars above the horizon and at or brighter than the limiting
/// magnitude, then project them. Output is ordered faint to bright so the
/// brightest stars are painted last.
pub fn project(positions: &[HorizontalPosition<'_>]) -> Vec<ProjectedStar> {
    let mut stars: Vec<ProjectedStar> = positions
        .iter()
        .filter(|p| is_visible(p))
        .map(|p| {
            let r = altitude_radius(p.altitude_deg);
            let (sin_az, cos_az) = p.azimuth_deg.to_radians().sin_cos();
            let magnitude = p.entry.magnitude;
            ProjectedStar {
                id: p.entry.id.clone(),
                x: -r * sin_az,
                y: r * cos_az,
                magnitude,
                radius: magnitude_radius(magnitude),
                opacity: magnitude_opacity(magnitude),
            }
        })
        .collect();

    // Stable, so equal magnitudes keep catalog order
    stars.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
    stars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::sky::CatalogEntry;
    use proptest::prelude::*;

    fn entry(id: &str, magnitude: f64) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            ra_deg: 0.0,
            dec_deg: 0.0,
            magnitude,
        }
    }

    fn at<'a>(entry: &'a CatalogEntry, altitude_deg: f64, azimuth_deg: f64) -> HorizontalPosition<'a> {
        HorizontalPosition {
            entry,
            altitude_deg,
            azimuth_deg,
        }
    }

    #[test]
    fn test_horizon_is_excluded() {
        let star = entry("A", 1.0);
        assert!(project(&[at(&star, 0.0, 10.0)]).is_empty());
        assert!(project(&[at(&star, -5.0, 10.0)]).is_empty());
        assert_eq!(project(&[at(&star, 0.001, 10.0)]).len(), 1);
    }

    #[test]
    fn test_limiting_magnitude_is_inclusive() {
        let edge = entry("Edge", 6.0);
        let faint = entry("Faint", 6.01);
        let projected = project(&[at(&edge, 45.0, 0.0), at(&faint, 45.0, 0.0)]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].id, "Edge");
    }

    #[test]
    fn test_zenith_and_horizon_radius() {
        assert!(altitude_radius(90.0).abs() < 1e-12);
        assert!((altitude_radius(0.0) - 1.0).abs() < 1e-12);

        let star = entry("Z", 2.0);
        let projected = project(&[at(&star, 90.0, 123.0)]);
        assert!(projected[0].x.abs() < 1e-12 && projected[0].y.abs() < 1e-12);
    }

    #[test]
    fn test_orientation_north_up_east_left() {
        let star = entry("S", 2.0);
        let north = &project(&[at(&star, 10.0, 0.0)])[0];
        assert!(north.y > 0.0 && north.x.abs() < 1e-12);
        let east = &project(&[at(&star, 10.0, 90.0)])[0];
        assert!(east.x < 0.0 && east.y.abs() < 1e-12);
    }

    #[test]
    fn test_sorted_faint_to_bright() {
        let a = entry("A", 1.0);
        let b = entry("B", 4.0);
        let c = entry("C", -1.0);
        let d = entry("D", 4.0);
        let projected = project(&[
            at(&a, 30.0, 0.0),
            at(&b, 30.0, 0.0),
            at(&c, 30.0, 0.0),
            at(&d, 30.0, 0.0),
        ]);
        let ids: Vec<&str> = projected.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "D", "A", "C"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(project(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_radius_monotonic_in_altitude(a in 0.0f64..90.0, b in 0.0f64..90.0) {
            prop_assume!(a < b);
            prop_assert!(altitude_radius(a) > altitude_radius(b));
        }

        #[test]
        fn prop_size_and_opacity_decrease_with_magnitude(a in -2.0f64..6.0, b in -2.0f64..6.0) {
            prop_assume!(a < b);
            prop_assert!(magnitude_radius(a) > magnitude_radius(b));
            prop_assert!(magnitude_opacity(a) >= magnitude_opacity(b));
            prop_assert!((MIN_OPACITY..=1.0).contains(&magnitude_opacity(a)));
        }

        #[test]
        fn prop_visible_stars_land_inside_unit_disc(alt in 0.001f64..90.0, az in 0.0f64..360.0) {
            let star = entry("P", 3.0);
            let projected = project(&[at(&star, alt, az)]);
            prop_assert_eq!(projected.len(), 1);
            prop_assert!(projected[0].x.hypot(projected[0].y) < 1.0);
        }
    }
}
