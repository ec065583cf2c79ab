///! Bright-star catalog and the one-time loading barrier around it
///!
///! CSV columns: `id,ra_deg,dec_deg,magnitude` with J2000 coordinates.
///! The pipe-separated Hipparcos main catalog (`hip_main.dat`) is also
///! accepted and brought from its J1991.25 epoch to J2000.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

const BUNDLED_CATALOG: &str = include_str!("../../../resources/bright_stars.csv");
const DEFAULT_DOWNLOAD_NAME: &str = "catalog.csv";

/// Hipparcos main catalog on the CDS archive, selected with `catalog_source = "hipparcos"`
pub const HIPPARCOS_URL: &str = "https://cdsarc.cds.unistra.fr/ftp/cats/I/239/hip_main.dat";

/// Years from the Hipparcos epoch J1991.25 to J2000
const HIPPARCOS_EPOCH_OFFSET_YEARS: f64 = 8.75;
const MAS_PER_DEGREE: f64 = 3.6e6;

/// One star of the catalog. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    /// Right ascension, J2000, degrees
    pub ra_deg: f64,
    /// Declination, J2000, degrees
    pub dec_deg: f64,
    /// Apparent visual magnitude
    pub magnitude: f64,
}

impl CatalogEntry {
    fn check(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("empty identifier");
        }
        if !self.ra_deg.is_finite() || !(0.0..360.0).contains(&self.ra_deg) {
            bail!("right ascension {} outside [0, 360)", self.ra_deg);
        }
        if !self.dec_deg.is_finite() || !(-90.0..=90.0).contains(&self.dec_deg) {
            bail!("declination {} outside [-90, 90]", self.dec_deg);
        }
        if !self.magnitude.is_finite() {
            bail!("magnitude is not a number");
        }
        Ok(())
    }
}

/// Earth orientation parameters used by the ephemeris.
///
/// Read from an optional TOML resource; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisParams {
    /// UT1 - UTC, seconds
    #[serde(default)]
    pub dut1_seconds: f64,

    /// TT - UT1, seconds
    #[serde(default = "default_delta_t")]
    pub delta_t_seconds: f64,

    #[serde(default = "default_true")]
    pub nutation: bool,

    #[serde(default = "default_true")]
    pub aberration: bool,
}

fn default_delta_t() -> f64 {
    69.2
}

fn default_true() -> bool {
    true
}

impl Default for EphemerisParams {
    fn default() -> Self {
        Self {
            dut1_seconds: 0.0,
            delta_t_seconds: default_delta_t(),
            nutation: true,
            aberration: true,
        }
    }
}

impl EphemerisParams {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .context(format!("Failed to read ephemeris parameters: {:?}", path))?;
        let params: EphemerisParams =
            toml::from_str(&content).context("Failed to parse ephemeris parameters")?;
        Ok(params)
    }
}

/// Where the star dataset comes from
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogSource {
    /// Dataset compiled into the binary
    Bundled,
    File(PathBuf),
    /// Downloaded once into `download_dir`, reused afterwards
    Url { url: String, download_dir: PathBuf },
}

impl CatalogSource {
    /// `"bundled"`, `"hipparcos"`, an `http(s)://` URL, or a filesystem path
    pub fn parse(source: &str, download_dir: impl AsRef<Path>) -> Self {
        let source = source.trim();
        if source.is_empty() || source.eq_ignore_ascii_case("bundled") {
            Self::Bundled
        } else if source.eq_ignore_ascii_case("hipparcos") {
            Self::Url {
                url: HIPPARCOS_URL.to_string(),
                download_dir: download_dir.as_ref().to_path_buf(),
            }
        } else if source.starts_with("http://") || source.starts_with("https://") {
            Self::Url {
                url: source.to_string(),
                download_dir: download_dir.as_ref().to_path_buf(),
            }
        } else {
            Self::File(PathBuf::from(source))
        }
    }
}

/// Reference frame of a ground location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverFrame {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub sin_lat: f64,
    pub cos_lat: f64,
}

/// Immutable star dataset plus the ephemeris parameters it is observed with
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    ephemeris: EphemerisParams,
}

impl Catalog {
    /// Load the star dataset and the optional ephemeris resource.
    pub async fn load(source: &CatalogSource, ephemeris_path: Option<&Path>) -> Result<Self> {
        let ephemeris = match ephemeris_path {
            Some(path) => EphemerisParams::load(path).await?,
            None => EphemerisParams::default(),
        };

        let content = match source {
            CatalogSource::Bundled => {
                tracing::info!("Loading bundled bright-star catalog");
                BUNDLED_CATALOG.to_string()
            }
            CatalogSource::File(path) => {
                tracing::info!("Loading star catalog from: {:?}", path);
                tokio::fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read catalog file: {:?}", path))?
            }
            CatalogSource::Url { url, download_dir } => {
                let path = download_catalog(url, download_dir).await?;
                tokio::fs::read_to_string(&path)
                    .await
                    .context(format!("Failed to read downloaded catalog: {:?}", path))?
            }
        };

        Self::parse(&content, ephemeris)
    }

    /// Catalog compiled into the binary, with default ephemeris parameters
    pub fn bundled() -> Result<Self> {
        Self::from_csv(BUNDLED_CATALOG, EphemerisParams::default())
    }

    /// Parse either supported format, chosen from the first non-empty line
    pub fn parse(content: &str, ephemeris: EphemerisParams) -> Result<Self> {
        let first_line = content.lines().find(|line| !line.trim().is_empty());
        match first_line {
            Some(line) if line.starts_with("H|") => Self::from_hipparcos(content, ephemeris),
            _ => Self::from_csv(content, ephemeris),
        }
    }

    /// Parse CSV content. Bad rows are skipped; an empty result is an error.
    pub fn from_csv(content: &str, ephemeris: EphemerisParams) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut entries = Vec::new();
        let mut error_count = 0;

        for (index, result) in reader.deserialize::<CatalogEntry>().enumerate() {
            let row = index + 1;
            match result {
                Ok(entry) => match entry.check() {
                    Ok(()) => entries.push(entry),
                    Err(e) => {
                        error_count += 1;
                        tracing::warn!("Skipping catalog row {}: {}", row, e);
                    }
                },
                Err(e) => {
                    error_count += 1;
                    tracing::warn!("Error parsing catalog row {}: {}", row, e);
                }
            }
        }

        if entries.is_empty() {
            bail!("Star catalog has no usable entries ({} rejected rows)", error_count);
        }

        tracing::info!(
            "Loaded {} catalog entries ({} rejected rows)",
            entries.len(),
            error_count
        );

        Ok(Self { entries, ephemeris })
    }

    /// Parse `hip_main.dat` content. Rows without a position or magnitude are skipped.
    pub fn from_hipparcos(content: &str, ephemeris: EphemerisParams) -> Result<Self> {
        let mut entries = Vec::new();
        let mut error_count = 0;

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = index + 1;
            match parse_hipparcos_row(line).and_then(|entry| entry.check().map(|()| entry)) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    error_count += 1;
                    tracing::debug!("Skipping Hipparcos row {}: {}", row, e);
                }
            }
        }

        if entries.is_empty() {
            bail!("Hipparcos catalog has no usable entries ({} rejected rows)", error_count);
        }

        tracing::info!(
            "Loaded {} Hipparcos entries ({} rejected rows)",
            entries.len(),
            error_count
        );

        Ok(Self { entries, ephemeris })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ephemeris(&self) -> &EphemerisParams {
        &self.ephemeris
    }

    /// Reusable frame for a ground location
    pub fn resolve_observer(&self, latitude_deg: f64, longitude_deg: f64) -> ObserverFrame {
        let (sin_lat, cos_lat) = latitude_deg.to_radians().sin_cos();
        ObserverFrame {
            latitude_deg,
            longitude_deg,
            sin_lat,
            cos_lat,
        }
    }
}

/// One `hip_main.dat` record, with proper motion applied up to J2000
fn parse_hipparcos_row(line: &str) -> Result<CatalogEntry> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() < 14 || fields[0] != "H" {
        bail!("not a Hipparcos record");
    }

    let number = |index: usize, name: &str| -> Result<f64> {
        let field = fields[index];
        if field.is_empty() {
            bail!("missing {}", name);
        }
        field
            .parse::<f64>()
            .context(format!("invalid {}: {:?}", name, field))
    };

    let hip: u32 = fields[1]
        .parse()
        .context(format!("invalid HIP number: {:?}", fields[1]))?;
    let magnitude = number(5, "Vmag")?;
    let ra_epoch = number(8, "RAdeg")?;
    let dec_epoch = number(9, "DEdeg")?;
    // Proper motion is absent for a few hundred entries; treat it as zero
    let pm_ra = number(12, "pmRA").unwrap_or(0.0);
    let pm_dec = number(13, "pmDE").unwrap_or(0.0);

    let dec_deg = (dec_epoch + pm_dec * HIPPARCOS_EPOCH_OFFSET_YEARS / MAS_PER_DEGREE).clamp(-90.0, 90.0);
    // pmRA is already multiplied by cos(dec)
    let cos_dec = dec_epoch.to_radians().cos();
    let ra_shift = if cos_dec.abs() < 1e-9 {
        0.0
    } else {
        pm_ra * HIPPARCOS_EPOCH_OFFSET_YEARS / MAS_PER_DEGREE / cos_dec
    };
    let ra_deg = (ra_epoch + ra_shift).rem_euclid(360.0);
    let ra_deg = if ra_deg >= 360.0 { 0.0 } else { ra_deg };

    Ok(CatalogEntry {
        id: format!("HIP {}", hip),
        ra_deg,
        dec_deg,
        magnitude,
    })
}

/// Fetch a remote catalog unless a previous download is already on disk.
async fn download_catalog(url: &str, download_dir: &Path) -> Result<PathBuf> {
    let file_name = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains('?'))
        .unwrap_or(DEFAULT_DOWNLOAD_NAME);
    let path = download_dir.join(file_name);

    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::info!("Using previously downloaded catalog: {:?}", path);
        return Ok(path);
    }

    tokio::fs::create_dir_all(download_dir)
        .await
        .context(format!("Failed to create catalog directory: {:?}", download_dir))?;

    tracing::info!("Downloading star catalog from {}", url);

    let response = reqwest::get(url)
        .await
        .context("Failed to download star catalog")?;
    if !response.status().is_success() {
        bail!("HTTP error while downloading catalog: {}", response.status());
    }
    let content = response
        .text()
        .await
        .context("Failed to read catalog response body")?;

    // Write under a temporary name so an interrupted download is never reused
    let partial = path.with_extension("partial");
    tokio::fs::write(&partial, content)
        .await
        .context("Failed to write catalog file")?;
    tokio::fs::rename(&partial, &path)
        .await
        .context("Failed to move downloaded catalog into place")?;

    tracing::info!("Downloaded star catalog to: {}", path.display());
    Ok(path)
}

/// Process-wide catalog behind an init-once barrier.
///
/// Concurrent callers of `ready` wait for the single load in progress and
/// never observe a partially built catalog.
pub struct SharedCatalog {
    source: CatalogSource,
    ephemeris_path: Option<PathBuf>,
    cell: OnceCell<Arc<Catalog>>,
}

impl SharedCatalog {
    pub fn new(source: CatalogSource, ephemeris_path: Option<PathBuf>) -> Self {
        Self {
            source,
            ephemeris_path,
            cell: OnceCell::new(),
        }
    }

    /// Wrap an already loaded catalog
    pub fn preloaded(catalog: Catalog) -> Self {
        Self {
            source: CatalogSource::Bundled,
            ephemeris_path: None,
            cell: OnceCell::new_with(Some(Arc::new(catalog))),
        }
    }

    /// Load on first call; later calls return the shared instance.
    pub async fn ready(&self) -> Result<Arc<Catalog>> {
        let catalog = self
            .cell
            .get_or_try_init(|| async {
                let catalog = Catalog::load(&self.source, self.ephemeris_path.as_deref()).await?;
                Ok::<_, anyhow::Error>(Arc::new(catalog))
            })
            .await?;
        Ok(catalog.clone())
    }

    /// Catalog if loading has completed
    pub fn get(&self) -> Option<Arc<Catalog>> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE_CSV: &str = r#"id,ra_deg,dec_deg,magnitude
Sirius,101.28708,-16.71611,-1.46
Vega,279.23458,38.78361,0.03
Broken,400.0,10.0,1.0
NoMagnitude,10.0,10.0,
Polaris,37.95458,89.26417,1.98"#;

    #[test]
    fn test_parse_csv_skips_bad_rows() {
        let catalog = Catalog::from_csv(SAMPLE_CSV, EphemerisParams::default()).unwrap();
        assert_eq!(catalog.len(), 3);
        let ids: Vec<&str> = catalog.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["Sirius", "Vega", "Polaris"]);
    }

    #[test]
    fn test_empty_catalog_is_an_error() {
        let result = Catalog::from_csv("id,ra_deg,dec_deg,magnitude\n", EphemerisParams::default());
        assert!(result.is_err());
    }

    // Sirius, Vega and Polaris from hip_main.dat, plus a row with no position
    const SAMPLE_HIPPARCOS: &str = "\
H|       32349| |06 45 09.25|-16 42 47.3|-1.44| |H|101.28854105|-16.71314306| |  379.21| -546.01|-1223.08|  1.12
H|       91262| |18 36 56.19|+38 46 58.8| 0.03| |H|279.23410832| 38.78299311| |  128.93|  201.02|  286.23|  0.56
H|       11767| |02 31 47.08|+89 15 50.9| 1.97|1|H|037.94614689| 89.26413805| |    7.56|   44.22|  -11.74|  0.39
H|       55203| |11 18 10.95|+31 31 44.9| 4.33| |H|            |            | |        |        |        |
";

    #[test]
    fn test_bundled_catalog() {
        let catalog = Catalog::bundled().unwrap();
        assert!(catalog.len() > 500);
        let sirius = catalog.entries().iter().find(|e| e.id == "Sirius").unwrap();
        assert!(sirius.magnitude < -1.0);
        // Naked-eye dataset: nothing fainter than magnitude 6
        assert!(catalog.entries().iter().all(|e| e.magnitude <= 6.0));
        let faint = catalog
            .entries()
            .iter()
            .filter(|e| e.magnitude > 4.0 && e.magnitude <= 6.0)
            .count();
        assert!(faint >= 150, "only {} stars between magnitude 4 and 6", faint);
    }

    #[test]
    fn test_parse_hipparcos() {
        let catalog = Catalog::parse(SAMPLE_HIPPARCOS, EphemerisParams::default()).unwrap();
        let ids: Vec<&str> = catalog.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["HIP 32349", "HIP 91262", "HIP 11767"]);

        let sirius = &catalog.entries()[0];
        assert_eq!(sirius.magnitude, -1.44);
        // 8.75 years of proper motion: about -0.0030 deg in Dec, -0.0014 deg in RA
        let expected_dec = -16.71314306 - 1223.08 * 8.75 / 3.6e6;
        assert!((sirius.dec_deg - expected_dec).abs() < 1e-9);
        assert!(sirius.ra_deg < 101.2875 && sirius.ra_deg > 101.2869);

        // Lands on the J2000 position of the bundled CSV to within an arcsecond
        let bundled = Catalog::bundled().unwrap();
        let csv_sirius = bundled.entries().iter().find(|e| e.id == "Sirius").unwrap();
        assert!((csv_sirius.dec_deg - sirius.dec_deg).abs() < 3e-4);
        assert!((csv_sirius.ra_deg - sirius.ra_deg).abs() < 3e-4);
    }

    #[test]
    fn test_csv_is_detected_as_csv() {
        let catalog = Catalog::parse(SAMPLE_CSV, EphemerisParams::default()).unwrap();
        assert_eq!(catalog.len(), 3);
        assert!(Catalog::parse("H|   1| |\n", EphemerisParams::default()).is_err());
    }

    #[test]
    fn test_catalog_source_parse() {
        assert_eq!(CatalogSource::parse("bundled", "data"), CatalogSource::Bundled);
        assert_eq!(CatalogSource::parse("", "data"), CatalogSource::Bundled);
        assert_eq!(
            CatalogSource::parse("stars.csv", "data"),
            CatalogSource::File(PathBuf::from("stars.csv"))
        );
        assert_eq!(
            CatalogSource::parse("https://example.org/hip.csv", "data"),
            CatalogSource::Url {
                url: "https://example.org/hip.csv".to_string(),
                download_dir: PathBuf::from("data"),
            }
        );
        assert_eq!(
            CatalogSource::parse("Hipparcos", "data"),
            CatalogSource::Url {
                url: HIPPARCOS_URL.to_string(),
                download_dir: PathBuf::from("data"),
            }
        );
    }

    #[tokio::test]
    async fn test_load_from_file_with_ephemeris() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("stars.csv");
        let eph_path = temp_dir.path().join("ephemeris.toml");
        tokio::fs::write(&csv_path, SAMPLE_CSV).await.unwrap();
        tokio::fs::write(&eph_path, "dut1_seconds = 0.1\naberration = false\n")
            .await
            .unwrap();

        let catalog = Catalog::load(&CatalogSource::File(csv_path), Some(&eph_path))
            .await
            .unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.ephemeris().dut1_seconds, 0.1);
        assert!(!catalog.ephemeris().aberration);
        assert!(catalog.ephemeris().nutation);
        assert_eq!(catalog.ephemeris().delta_t_seconds, 69.2);
    }

    #[tokio::test]
    async fn test_load_hipparcos_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hip_main.dat");
        tokio::fs::write(&path, SAMPLE_HIPPARCOS).await.unwrap();

        let catalog = Catalog::load(&CatalogSource::File(path), None).await.unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_load() {
        let shared = SharedCatalog::new(CatalogSource::File(PathBuf::from("/nonexistent/stars.csv")), None);
        assert!(shared.ready().await.is_err());
        assert!(shared.get().is_none());
    }

    #[tokio::test]
    async fn test_shared_catalog_loads_once() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("stars.csv");
        tokio::fs::write(&csv_path, SAMPLE_CSV).await.unwrap();

        let shared = Arc::new(SharedCatalog::new(CatalogSource::File(csv_path.clone()), None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                tokio::spawn(async move { shared.ready().await.unwrap() })
            })
            .collect();

        let mut loaded = Vec::new();
        for handle in handles {
            loaded.push(handle.await.unwrap());
        }
        assert!(loaded.iter().all(|c| Arc::ptr_eq(c, &loaded[0])));

        // Later changes to the file are not observed
        tokio::fs::remove_file(&csv_path).await.unwrap();
        let again = shared.ready().await.unwrap();
        assert!(Arc::ptr_eq(&again, &loaded[0]));
    }

    #[test]
    fn test_resolve_observer() {
        let catalog = Catalog::bundled().unwrap();
        let frame = catalog.resolve_observer(90.0, 0.0);
        assert!((frame.sin_lat - 1.0).abs() < 1e-12);
        assert!(frame.cos_lat.abs() < 1e-12);
    }
}
