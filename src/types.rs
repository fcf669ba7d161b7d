use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw digital numbers as delivered by the instrument
pub type DnImage = Array2<u16>;

/// Floating-point working raster (radiance, reflectance, ratios)
pub type RealImage = Array2<f64>;

/// 3-channel raster stored as (rows, cols, channel)
pub type RgbCube = Array3<f64>;

/// 8-bit visualization image stored as (rows, cols, channel)
pub type ByteImage = Array3<u8>;

/// Sensor families supported by the product chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    /// ASTER VNIR/SWIR (bands 1..9)
    Aster,
    /// Sentinel-2 MSI (resampled to 10m)
    Sentinel2,
}

impl Sensor {
    /// Band indices a complete mosaic carries for this sensor
    pub fn bands(&self) -> &'static [u8] {
        match self {
            Sensor::Aster => &[1, 2, 3, 4, 5, 6, 7, 8, 9],
            Sensor::Sentinel2 => &[2, 3, 4, 5, 6, 7, 8, 11, 12],
        }
    }

    /// Band label used in file names
    pub fn band_label(&self, band: u8) -> String {
        match self {
            Sensor::Aster if band == 3 => "Data3N".to_string(),
            Sensor::Aster => format!("Data{}", band),
            Sensor::Sentinel2 => format!("B{:02}", band),
        }
    }

    /// Suffix of per-band mosaic files
    pub fn mosaic_suffix(&self) -> &'static str {
        match self {
            Sensor::Aster => "_reflectance.tif",
            Sensor::Sentinel2 => "_10m.tif",
        }
    }

    /// Recover the band index from a tile or mosaic file name
    pub fn band_from_filename(&self, name: &str) -> Option<u8> {
        let pattern = match self {
            Sensor::Aster => r"Data([0-9]+)",
            Sensor::Sentinel2 => r"B([0-9]{2})",
        };
        let re = regex::Regex::new(pattern).ok()?;
        let caps = re.captures(name)?;
        caps[1].parse::<u8>().ok()
    }
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sensor::Aster => write!(f, "ASTER"),
            Sensor::Sentinel2 => write!(f, "Sentinel-2"),
        }
    }
}

/// Per-band amplification setting recorded in the scene metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GainMode {
    High,
    Normal,
    Low1,
    Low2,
}

impl GainMode {
    /// Parse a metadata gain label (HGH, NOR, LO1, LO2 and long forms)
    pub fn parse(label: &str) -> ReflectaResult<Self> {
        match label.trim().to_uppercase().as_str() {
            "HGH" | "HIGH" => Ok(GainMode::High),
            "NOR" | "NORMAL" => Ok(GainMode::Normal),
            "LO1" | "LOW1" | "LOW" => Ok(GainMode::Low1),
            "LO2" | "LOW2" => Ok(GainMode::Low2),
            other => Err(ReflectaError::Configuration(format!(
                "Unknown gain mode label: '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for GainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GainMode::High => write!(f, "HIGH"),
            GainMode::Normal => write!(f, "NORMAL"),
            GainMode::Low1 => write!(f, "LOW1"),
            GainMode::Low2 => write!(f, "LOW2"),
        }
    }
}

/// Geospatial transformation parameters (GDAL coefficient order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,  // negative for north-up rasters
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of a (fractional) pixel position
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Pixel sizes must be nonzero for the transform to be invertible
    pub fn validate(&self) -> ReflectaResult<()> {
        if self.pixel_width == 0.0 || self.pixel_height == 0.0 {
            return Err(ReflectaError::InvalidFormat(format!(
                "Geotransform has zero pixel size: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// CRS plus geotransform shared by georeferenced rasters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    pub geo_transform: GeoTransform,
    /// CRS identifier as WKT (empty when unknown)
    pub projection: String,
}

impl GeoReference {
    pub fn new(geo_transform: GeoTransform, projection: impl Into<String>) -> Self {
        Self {
            geo_transform,
            projection: projection.into(),
        }
    }

    /// True when both references describe the same pixel grid
    pub fn same_grid(&self, other: &GeoReference) -> bool {
        let a = self.geo_transform.to_gdal();
        let b = other.geo_transform.to_gdal();
        self.projection == other.projection
            && a.iter()
                .zip(b.iter())
                .all(|(&x, &y)| approx::relative_eq!(x, y, epsilon = 1e-9, max_relative = 1e-12))
    }
}

/// One band of one scene capture (or one merged mosaic band)
#[derive(Debug, Clone)]
pub struct RasterTile {
    pub band: u8,
    pub data: RealImage,
    pub georef: GeoReference,
    pub nodata: Option<f64>,
}

impl RasterTile {
    pub fn new(band: u8, data: RealImage, georef: GeoReference, nodata: Option<f64>) -> Self {
        Self {
            band,
            data,
            georef,
            nodata,
        }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// True where the sample is finite and not the nodata sentinel
    pub fn is_valid(&self, value: f64) -> bool {
        is_valid_sample(value, self.nodata)
    }

    pub fn valid_mask(&self) -> Array2<bool> {
        self.data.mapv(|v| self.is_valid(v))
    }

    /// Map extent as (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let (rows, cols) = self.shape();
        let gt = &self.georef.geo_transform;
        let (x0, y0) = gt.pixel_to_map(0.0, 0.0);
        let (x1, y1) = gt.pixel_to_map(cols as f64, rows as f64);
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Shared validity rule for statistics and display scaling
pub fn is_valid_sample(value: f64, nodata: Option<f64>) -> bool {
    if !value.is_finite() {
        return false;
    }
    match nodata {
        Some(nd) => value != nd,
        None => true,
    }
}

/// Per-band merged rasters on one shared grid
#[derive(Debug, Clone)]
pub struct Mosaic {
    pub georef: GeoReference,
    pub nodata: Option<f64>,
    pub bands: BTreeMap<u8, RasterTile>,
}

impl Mosaic {
    pub fn new(georef: GeoReference, nodata: Option<f64>) -> Self {
        Self {
            georef,
            nodata,
            bands: BTreeMap::new(),
        }
    }

    /// Add a merged band; its grid must match the mosaic grid
    pub fn insert(&mut self, tile: RasterTile) -> ReflectaResult<()> {
        if !self.georef.same_grid(&tile.georef) {
            return Err(ReflectaError::Processing(format!(
                "Band {} does not share the mosaic grid",
                tile.band
            )));
        }
        if let Some(existing) = self.bands.values().next() {
            if existing.shape() != tile.shape() {
                return Err(ReflectaError::Processing(format!(
                    "Band {} shape {:?} differs from mosaic shape {:?}",
                    tile.band,
                    tile.shape(),
                    existing.shape()
                )));
            }
        }
        self.bands.insert(tile.band, tile);
        Ok(())
    }

    pub fn band(&self, band: u8) -> Option<&RasterTile> {
        self.bands.get(&band)
    }

    /// (rows, cols) of the shared grid, if any band is present
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.bands.values().next().map(|t| t.shape())
    }

    /// Bands from `required` absent in this mosaic, in ascending order
    pub fn missing_bands(&self, required: &[u8]) -> Vec<u8> {
        let mut missing: Vec<u8> = required
            .iter()
            .copied()
            .filter(|b| !self.bands.contains_key(b))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

/// Kind tag of a derived product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductKind {
    Composite,
    Ratio,
    Pca,
}

impl ProductKind {
    /// Output sub-directory name
    pub fn dir_name(&self) -> &'static str {
        match self {
            ProductKind::Composite => "composite",
            ProductKind::Ratio => "ratio",
            ProductKind::Pca => "pca",
        }
    }
}

/// Named recipe for a 3-channel derived product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductDefinition {
    /// Channel i is mosaic band `channels[i]`
    Composite { name: String, channels: [u8; 3] },
    /// Channel i is `channels[i].0 / channels[i].1`
    Ratio { name: String, channels: [(u8, u8); 3] },
    /// Channel i is principal component `components[i]` of `bands`
    Pca {
        name: String,
        bands: Vec<u8>,
        components: [usize; 3],
    },
}

impl ProductDefinition {
    pub fn name(&self) -> &str {
        match self {
            ProductDefinition::Composite { name, .. }
            | ProductDefinition::Ratio { name, .. }
            | ProductDefinition::Pca { name, .. } => name,
        }
    }

    pub fn kind(&self) -> ProductKind {
        match self {
            ProductDefinition::Composite { .. } => ProductKind::Composite,
            ProductDefinition::Ratio { .. } => ProductKind::Ratio,
            ProductDefinition::Pca { .. } => ProductKind::Pca,
        }
    }

    /// Every band index this recipe reads
    pub fn referenced_bands(&self) -> Vec<u8> {
        match self {
            ProductDefinition::Composite { channels, .. } => channels.to_vec(),
            ProductDefinition::Ratio { channels, .. } => {
                channels.iter().flat_map(|&(a, b)| [a, b]).collect()
            }
            ProductDefinition::Pca { bands, .. } => bands.clone(),
        }
    }
}

/// 3-channel float product carrying the source mosaic georeference
#[derive(Debug, Clone)]
pub struct DerivedProduct {
    pub name: String,
    pub kind: ProductKind,
    pub channels: RgbCube,
    pub georef: GeoReference,
    pub nodata: Option<f64>,
}

impl DerivedProduct {
    /// Pixel validity across all three channels
    pub fn valid_mask(&self) -> Array2<bool> {
        let (rows, cols, _) = self.channels.dim();
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            (0..3).all(|k| is_valid_sample(self.channels[[r, c, k]], self.nodata))
        })
    }
}

/// Error types for the reflectance product chain
#[derive(Debug, thiserror::Error)]
pub enum ReflectaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Mosaic incomplete, missing bands {missing:?}")]
    DataIncomplete { missing: Vec<u8> },

    #[error("Raster I/O failed for {path}: {source}")]
    RasterIo {
        path: PathBuf,
        #[source]
        source: gdal::errors::GdalError,
    },

    #[error("Export from {source_path} to {destination} failed: {reason}")]
    Export {
        source_path: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for reflectance operations
pub type ReflectaResult<T> = Result<T, ReflectaError>;
