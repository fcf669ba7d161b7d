//! Scene calibration and per-AOI product orchestration
//!
//! Units of work run in input order. A failure is recorded against the
//! smallest enclosing unit (band, product or work unit) and processing moves
//! on to the next one.

use crate::core::band_algebra::BandAlgebra;
use crate::core::calibrate::{to_dn_image, CalibrationProcessor, CalibrationTable, SceneGeometry};
use crate::core::catalog::ProductCatalog;
use crate::core::dstretch::{decorrelation_stretch, StretchParams};
use crate::core::mosaic::MosaicMerger;
use crate::core::stats::SignConvention;
use crate::io::scene::capture_datetime_from_path;
use crate::io::{AccessorConfig, GeoImageWriter, RasterAccessor, SceneMetadata, VisualizationFormat};
use crate::types::{
    DnImage, GeoReference, Mosaic, ProductDefinition, ProductKind, RasterTile, ReflectaError, ReflectaResult,
    Sensor,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Start-up configuration of the product chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub accessor: AccessorConfig,
    pub stretch: StretchParams,
    pub visualization_format: VisualizationFormat,
    pub sign_convention: SignConvention,
}

/// Raw bands of one ASTER scene with its metadata and grid
#[derive(Debug, Clone)]
pub struct SceneInput {
    /// File stem used for every calibrated output
    pub stem: String,
    pub metadata: SceneMetadata,
    pub georef: GeoReference,
    pub bands: BTreeMap<u8, DnImage>,
}

impl SceneInput {
    /// Build from DN tiles sharing one grid
    pub fn from_tiles(stem: impl Into<String>, metadata: SceneMetadata, tiles: Vec<RasterTile>) -> ReflectaResult<Self> {
        let georef = tiles
            .first()
            .map(|t| t.georef.clone())
            .ok_or_else(|| ReflectaError::InvalidFormat("Scene has no band tiles".to_string()))?;

        let mut bands = BTreeMap::new();
        for tile in tiles {
            if !tile.georef.same_grid(&georef) {
                return Err(ReflectaError::InvalidFormat(format!(
                    "Band {} is not on the scene grid",
                    tile.band
                )));
            }
            bands.insert(tile.band, to_dn_image(&tile.data));
        }

        Ok(Self {
            stem: stem.into(),
            metadata,
            georef,
            bands,
        })
    }

    /// Build from raw DN bands, placing them on the scene's UTM grid
    ///
    /// The grid comes from the corner coordinates in `metadata`; every band
    /// must share one shape.
    pub fn from_dn_bands(
        stem: impl Into<String>,
        metadata: SceneMetadata,
        bands: BTreeMap<u8, DnImage>,
    ) -> ReflectaResult<Self> {
        let (rows, cols) = bands
            .values()
            .next()
            .map(|dn| dn.dim())
            .ok_or_else(|| ReflectaError::InvalidFormat("Scene has no bands".to_string()))?;
        if let Some((band, dn)) = bands.iter().find(|(_, dn)| dn.dim() != (rows, cols)) {
            return Err(ReflectaError::InvalidFormat(format!(
                "Band {} is {:?}, scene is {:?}",
                band,
                dn.dim(),
                (rows, cols)
            )));
        }

        let georef = metadata.utm_georeference(rows, cols)?;
        Ok(Self {
            stem: stem.into(),
            metadata,
            georef,
            bands,
        })
    }
}

/// Files written for one calibrated band
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedPaths {
    pub band: u8,
    pub dn: PathBuf,
    pub radiance: PathBuf,
    pub reflectance: PathBuf,
}

/// Outcome of calibrating one scene
#[derive(Debug, Clone, Default)]
pub struct CalibrationReport {
    pub written: Vec<CalibratedPaths>,
    /// Bands that were skipped, with the reason
    pub failed: Vec<(u8, String)>,
}

/// Writes DN, radiance and reflectance GeoTIFFs for each band of a scene
#[derive(Debug, Clone)]
pub struct SceneCalibrator {
    accessor: RasterAccessor,
    table: CalibrationTable,
}

impl SceneCalibrator {
    pub fn new(accessor: RasterAccessor) -> Self {
        Self {
            accessor,
            table: CalibrationTable::aster(),
        }
    }

    pub fn calibrate_scene(&self, scene: &SceneInput, out_dir: &Path) -> ReflectaResult<CalibrationReport> {
        log::info!("🛰️ Calibrating scene {} ({} bands)", scene.stem, scene.bands.len());
        let geometry = SceneGeometry::from_metadata(&scene.metadata)?;
        log::debug!(
            "Scene geometry: earth-sun distance {:.6} AU, solar angle {}",
            geometry.earth_sun_distance,
            geometry.solar_zenith
        );

        let mut report = CalibrationReport::default();
        for (&band, dn) in &scene.bands {
            match self.calibrate_band(scene, band, dn, geometry, out_dir) {
                Ok(paths) => report.written.push(paths),
                Err(e) => {
                    log::error!("Skipping band {} of {}: {}", band, scene.stem, e);
                    report.failed.push((band, e.to_string()));
                }
            }
        }

        log::info!(
            "✅ Scene {} calibrated: {} bands written, {} skipped",
            scene.stem,
            report.written.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn calibrate_band(
        &self,
        scene: &SceneInput,
        band: u8,
        dn: &DnImage,
        geometry: SceneGeometry,
        out_dir: &Path,
    ) -> ReflectaResult<CalibratedPaths> {
        let gain = scene.metadata.gain_mode(band)?;
        let processor = CalibrationProcessor::new(&self.table, band, gain, geometry)?;
        let calibrated = processor.calibrate(dn.view());

        let base = format!("{}_Image{}", scene.stem, Sensor::Aster.band_label(band));
        let paths = CalibratedPaths {
            band,
            dn: out_dir.join(format!("{}.tif", base)),
            radiance: out_dir.join(format!("{}_radiance.tif", base)),
            reflectance: out_dir.join(format!("{}_reflectance.tif", base)),
        };

        self.accessor.write_array(dn, &scene.georef, Some(0.0), &paths.dn)?;
        self.accessor
            .write_array(&calibrated.radiance, &scene.georef, Some(0.0), &paths.radiance)?;
        self.accessor
            .write_array(&calibrated.reflectance, &scene.georef, Some(0.0), &paths.reflectance)?;
        Ok(paths)
    }
}

/// Visualization and geo-referenced files of one product
#[derive(Debug, Clone, PartialEq)]
pub struct ProductOutputs {
    pub name: String,
    pub kind: ProductKind,
    pub preview: PathBuf,
    pub linear: PathBuf,
    pub perceptual: PathBuf,
    pub georeferenced: PathBuf,
}

/// Outcome of one AOI/date unit of work
#[derive(Debug, Clone, Default)]
pub struct ProcessingReport {
    pub mosaics: BTreeMap<u8, PathBuf>,
    pub products: Vec<ProductOutputs>,
    /// Products that failed, with the reason
    pub skipped_products: Vec<(String, String)>,
    /// Catalog bands absent from the mosaic; non-empty means no products were made
    pub missing_bands: Vec<u8>,
}

impl ProcessingReport {
    pub fn is_complete(&self) -> bool {
        self.missing_bands.is_empty() && self.skipped_products.is_empty()
    }
}

/// Tiles of one AOI captured on one date
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub aoi: String,
    pub date: NaiveDate,
    pub tiles: Vec<PathBuf>,
}

impl WorkUnit {
    /// Group tile paths by the capture date embedded in their path
    ///
    /// Paths without a recognisable timestamp are logged and left out.
    pub fn group_by_capture_date(aoi: &str, paths: &[PathBuf]) -> Vec<WorkUnit> {
        let mut by_date: BTreeMap<NaiveDate, Vec<PathBuf>> = BTreeMap::new();
        for path in paths {
            match capture_datetime_from_path(path) {
                Some(dt) => by_date.entry(dt.date()).or_default().push(path.clone()),
                None => log::warn!("No capture date in {}, ignoring", path.display()),
            }
        }
        by_date
            .into_iter()
            .map(|(date, tiles)| WorkUnit {
                aoi: aoi.to_string(),
                date,
                tiles,
            })
            .collect()
    }

    /// `<root>/<aoi>/<YYYYMMDD>`
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.aoi).join(self.date.format("%Y%m%d").to_string())
    }
}

/// Outcome of a batch of work units
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<(String, NaiveDate, ProcessingReport)>,
    pub failed: Vec<(String, NaiveDate, String)>,
}

/// Mosaic, derive and stretch every catalog product for one sensor
#[derive(Debug, Clone)]
pub struct ProductPipeline {
    sensor: Sensor,
    catalog: ProductCatalog,
    config: PipelineConfig,
    accessor: RasterAccessor,
    merger: MosaicMerger,
    algebra: BandAlgebra,
    writer: GeoImageWriter,
}

impl ProductPipeline {
    pub fn new(sensor: Sensor, config: PipelineConfig) -> Self {
        let accessor = RasterAccessor::new(config.accessor.clone());
        let writer = GeoImageWriter::new(config.visualization_format, &config.accessor);
        Self {
            sensor,
            catalog: ProductCatalog::for_sensor(sensor),
            algebra: BandAlgebra::new(config.sign_convention),
            merger: MosaicMerger::new(),
            accessor,
            writer,
            config,
        }
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    /// Read tiles and group them by the band named in each file name
    ///
    /// Unreadable or unrecognised files are logged and skipped.
    pub fn load_tiles(&self, paths: &[PathBuf]) -> BTreeMap<u8, Vec<RasterTile>> {
        let mut by_band: BTreeMap<u8, Vec<RasterTile>> = BTreeMap::new();
        for path in paths {
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            let Some(band) = self.sensor.band_from_filename(&name) else {
                log::warn!("Cannot tell band of {}, ignoring", path.display());
                continue;
            };
            match self.accessor.read_tile(path, band) {
                Ok(tile) => by_band.entry(band).or_default().push(tile),
                Err(e) => log::error!("Skipping tile {}: {}", path.display(), e),
            }
        }
        by_band
    }

    /// Run one AOI/date unit: mosaics, then every catalog product
    pub fn process(
        &self,
        tiles_by_band: &BTreeMap<u8, Vec<RasterTile>>,
        out_dir: &Path,
    ) -> ReflectaResult<ProcessingReport> {
        log::info!("🎯 Processing {} products into {}", self.sensor, out_dir.display());
        let mut report = ProcessingReport::default();

        let mosaic = self.merger.build_mosaic(tiles_by_band)?;
        let mosaic_dir = out_dir.join("mosaic");
        for (&band, tile) in &mosaic.bands {
            let path = mosaic_dir.join(format!("{}{}", self.sensor.band_label(band), self.sensor.mosaic_suffix()));
            self.accessor.write_tile::<u16, _>(tile, &path)?;
            report.mosaics.insert(band, path);
        }

        if let Err(e) = BandAlgebra::check_complete(&mosaic, &self.catalog) {
            if let ReflectaError::DataIncomplete { missing } = &e {
                report.missing_bands = missing.clone();
            }
            log::warn!("Skipping derived products: {}", e);
            return Ok(report);
        }

        for definition in &self.catalog.products {
            match self.make_product(&mosaic, definition, out_dir) {
                Ok(outputs) => report.products.push(outputs),
                Err(e) => {
                    log::error!("Product {} failed: {}", definition.name(), e);
                    report.skipped_products.push((definition.name().to_string(), e.to_string()));
                }
            }
        }

        log::info!(
            "✅ {} products written, {} skipped",
            report.products.len(),
            report.skipped_products.len()
        );
        Ok(report)
    }

    fn make_product(
        &self,
        mosaic: &Mosaic,
        definition: &ProductDefinition,
        out_dir: &Path,
    ) -> ReflectaResult<ProductOutputs> {
        let product = self.algebra.derive(mosaic, definition)?;
        let stretched = decorrelation_stretch(&product, &self.config.stretch)?;

        let dir = out_dir.join(product.kind.dir_name());
        let name = &product.name;
        let preview = self
            .writer
            .write_image(&stretched.preview, self.writer.visualization_path(&dir, name))?;
        let linear = self
            .writer
            .write_image(&stretched.linear, self.writer.visualization_path(&dir, &format!("{}-dcs", name)))?;
        let perceptual = self.writer.write_image(
            &stretched.perceptual,
            self.writer.visualization_path(&dir, &format!("{}-dcs-lab", name)),
        )?;
        let georeferenced = self.writer.stamp_georeference(&linear, &product.georef)?;

        Ok(ProductOutputs {
            name: product.name.clone(),
            kind: product.kind,
            preview,
            linear,
            perceptual,
            georeferenced,
        })
    }

    /// Run work units in order; a failed unit never stops the batch
    pub fn process_batch(&self, units: &[WorkUnit], out_root: &Path) -> BatchReport {
        let mut batch = BatchReport::default();
        for unit in units {
            log::info!("📦 Work unit {} {} ({} tiles)", unit.aoi, unit.date, unit.tiles.len());
            let tiles = self.load_tiles(&unit.tiles);
            match self.process(&tiles, &unit.output_dir(out_root)) {
                Ok(report) => batch.completed.push((unit.aoi.clone(), unit.date, report)),
                Err(e) => {
                    log::error!("Work unit {} {} failed: {}", unit.aoi, unit.date, e);
                    batch.failed.push((unit.aoi.clone(), unit.date, e.to_string()));
                }
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_capture_date() {
        let paths = vec![
            PathBuf::from("/ard/20200101_101500/B02_10m.tif"),
            PathBuf::from("/ard/20190615_053012/B02_10m.tif"),
            PathBuf::from("/ard/20190615_053012/B03_10m.tif"),
            PathBuf::from("/ard/undated/B04_10m.tif"),
        ];
        let units = WorkUnit::group_by_capture_date("shokpar", &paths);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].date, NaiveDate::from_ymd_opt(2019, 6, 15).unwrap());
        assert_eq!(units[0].tiles.len(), 2);
        assert_eq!(
            units[1].output_dir(Path::new("/out")),
            PathBuf::from("/out/shokpar/20200101")
        );
    }

    #[test]
    fn test_report_completeness() {
        let mut report = ProcessingReport::default();
        assert!(report.is_complete());
        report.missing_bands = vec![11];
        assert!(!report.is_complete());
    }
}
