use crate::io::raster::AccessorConfig;
use crate::types::{ByteImage, GeoReference, ReflectaError, ReflectaResult};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::s;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Image format for 8-bit visualization products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualizationFormat {
    Jpeg,
    Png,
}

impl Default for VisualizationFormat {
    fn default() -> Self {
        VisualizationFormat::Jpeg
    }
}

impl VisualizationFormat {
    pub fn driver_name(&self) -> &'static str {
        match self {
            VisualizationFormat::Jpeg => "JPEG",
            VisualizationFormat::Png => "PNG",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            VisualizationFormat::Jpeg => "jpg",
            VisualizationFormat::Png => "png",
        }
    }
}

/// Writes 8-bit RGB images and their geo-tagged GeoTIFF copies
#[derive(Debug, Clone)]
pub struct GeoImageWriter {
    format: VisualizationFormat,
    tiled: bool,
    compress: Option<String>,
}

impl GeoImageWriter {
    pub fn new(format: VisualizationFormat, accessor: &AccessorConfig) -> Self {
        Self {
            format,
            tiled: accessor.tiled,
            compress: accessor.compress.clone(),
        }
    }

    /// `<dir>/<stem>.<ext>` for this writer's format
    pub fn visualization_path(&self, dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{}.{}", stem, self.format.extension()))
    }

    /// Encode a (rows, cols, bands) byte image through an in-memory dataset
    pub fn write_image<P: AsRef<Path>>(&self, image: &ByteImage, path: P) -> ReflectaResult<PathBuf> {
        let path = path.as_ref();
        let (rows, cols, bands) = image.dim();
        log::debug!("Writing {}x{}x{} {} image: {}", rows, cols, bands, self.format.driver_name(), path.display());

        let raster_err = |source: gdal::errors::GdalError| ReflectaError::RasterIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mem = DriverManager::get_driver_by_name("MEM")?;
        let dataset = mem
            .create_with_band_type::<u8, _>("", cols as isize, rows as isize, bands as isize)
            .map_err(raster_err)?;

        for k in 0..bands {
            let samples: Vec<u8> = image.slice(s![.., .., k]).iter().copied().collect();
            let buffer = Buffer::new((cols, rows), samples);
            let mut band = dataset.rasterband(k as isize + 1).map_err(raster_err)?;
            band.write((0, 0), (cols, rows), &buffer).map_err(raster_err)?;
        }

        let driver = DriverManager::get_driver_by_name(self.format.driver_name())?;
        dataset.create_copy(&driver, path, &[]).map_err(raster_err)?;
        Ok(path.to_path_buf())
    }

    /// Copy a visualization image into `<stem>.tif` carrying `georef`
    ///
    /// Pixels are copied unchanged; only CRS and geotransform are stamped.
    pub fn stamp_georeference<P: AsRef<Path>>(&self, source: P, georef: &GeoReference) -> ReflectaResult<PathBuf> {
        let source = source.as_ref();
        let destination = source.with_extension("tif");
        let export_err = |reason: String| ReflectaError::Export {
            source_path: source.to_path_buf(),
            destination: destination.clone(),
            reason,
        };

        let dataset = Dataset::open(source).map_err(|e| export_err(format!("cannot open source: {}", e)))?;

        let mut options = Vec::new();
        if self.tiled {
            options.push(RasterCreationOption { key: "TILED", value: "YES" });
        }
        if let Some(ref compress) = self.compress {
            options.push(RasterCreationOption { key: "COMPRESS", value: compress.as_str() });
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut stamped = dataset
            .create_copy(&driver, &destination, &options)
            .map_err(|e| export_err(format!("cannot create copy: {}", e)))?;

        stamped
            .set_geo_transform(&georef.geo_transform.to_gdal())
            .map_err(|e| export_err(format!("cannot set geotransform: {}", e)))?;
        if !georef.projection.is_empty() {
            stamped
                .set_projection(&georef.projection)
                .map_err(|e| export_err(format!("cannot set projection: {}", e)))?;
        }

        log::info!("🌍 Geo-referenced copy written: {}", destination.display());
        Ok(destination)
    }
}

impl Default for GeoImageWriter {
    fn default() -> Self {
        Self::new(VisualizationFormat::default(), &AccessorConfig::default())
    }
}
