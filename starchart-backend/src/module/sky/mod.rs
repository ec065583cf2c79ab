///! Sky computation
///!
///! ## Pipeline
///! - `catalog`: bright-star dataset, loaded once per process
///! - `ephemeris`: Earth orientation and solar motion at an instant
///! - `position`: apparent altitude/azimuth of every catalog entry
///! - `projection`: horizon/magnitude filter and stereographic mapping

mod catalog;
pub use catalog::{
    Catalog, CatalogEntry, CatalogSource, EphemerisParams, ObserverFrame, SharedCatalog,
};

mod ephemeris;
pub use ephemeris::{julian_date, EarthOrientation};

mod position;
pub use position::{positions, HorizontalPosition};

mod projection;
pub use projection::{
    altitude_radius, magnitude_opacity, magnitude_radius, project, ProjectedStar,
    LIMITING_MAGNITUDE,
};
