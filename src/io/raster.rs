use crate::types::{GeoReference, GeoTransform, RasterTile, ReflectaError, ReflectaResult};
use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use num_traits::{NumCast, Zero};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Start-up settings for the GDAL-backed accessor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessorConfig {
    /// GDAL block cache ceiling in megabytes (None keeps the GDAL default)
    pub cache_max_mb: Option<u64>,
    /// Creation options for persisted GeoTIFFs
    pub tiled: bool,
    pub compress: Option<String>,
}

impl Default for AccessorConfig {
    fn default() -> Self {
        Self {
            cache_max_mb: None,
            tiled: true,
            compress: Some("DEFLATE".to_string()),
        }
    }
}

/// Reads and writes single-band geo-rasters as [`RasterTile`]s
#[derive(Debug, Clone)]
pub struct RasterAccessor {
    config: AccessorConfig,
}

impl RasterAccessor {
    /// Create an accessor; GDAL's global cache is only touched when
    /// `cache_max_mb` is set
    pub fn new(config: AccessorConfig) -> Self {
        if let Some(mb) = config.cache_max_mb {
            let bytes = (mb as i64).saturating_mul(1024 * 1024);
            log::debug!("Setting GDAL cache ceiling to {} MB", mb);
            // SAFETY: plain setter on GDAL's global block cache size
            unsafe { gdal_sys::GDALSetCacheMax64(bytes as gdal_sys::GIntBig) };
        }
        Self { config }
    }

    /// Open band 1 of a raster file as a tile tagged with `band`
    pub fn read_tile<P: AsRef<Path>>(&self, path: P, band: u8) -> ReflectaResult<RasterTile> {
        let path = path.as_ref();
        log::debug!("Reading band {} tile: {}", band, path.display());

        let raster_err = |source: gdal::errors::GdalError| ReflectaError::RasterIo {
            path: path.to_path_buf(),
            source,
        };

        let dataset = Dataset::open(path).map_err(raster_err)?;
        let geo_transform = GeoTransform::from_gdal(dataset.geo_transform().map_err(raster_err)?);
        geo_transform.validate()?;
        let projection = dataset.projection();
        let (width, height) = dataset.raster_size();

        let rasterband = dataset.rasterband(1).map_err(raster_err)?;
        let nodata = rasterband.no_data_value();
        let band_data = rasterband
            .read_as::<f64>((0, 0), (width, height), (width, height), None)
            .map_err(raster_err)?;

        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| ReflectaError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        log::debug!("Tile size: {}x{}, nodata: {:?}", width, height, nodata);

        Ok(RasterTile::new(
            band,
            data,
            GeoReference::new(geo_transform, projection),
            nodata,
        ))
    }

    /// Persist a tile as a single-band GeoTIFF with sample type `T`
    ///
    /// Samples that do not fit `T` (NaN, out of range) are written as the
    /// nodata sentinel. A tile without one gets zero, tagged as nodata
    /// whenever that fill was needed.
    pub fn write_tile<T, P>(&self, tile: &RasterTile, path: P) -> ReflectaResult<()>
    where
        T: GdalType + NumCast + Zero + Copy,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let fill: T = tile.nodata.and_then(|nd| NumCast::from(nd)).unwrap_or_else(T::zero);
        let mut filled = 0usize;
        let samples: Vec<T> = tile
            .data
            .iter()
            .map(|&v| {
                NumCast::from(v).unwrap_or_else(|| {
                    filled += 1;
                    fill
                })
            })
            .collect();

        let nodata = match tile.nodata {
            None if filled > 0 => {
                log::debug!("{} unrepresentable samples filled with nodata 0", filled);
                Some(0.0)
            }
            other => other,
        };
        self.write_samples(samples, tile.shape(), &tile.georef, nodata, path)
    }

    /// Persist an already-typed array with the given georeference
    pub fn write_array<T, P>(
        &self,
        data: &Array2<T>,
        georef: &GeoReference,
        nodata: Option<f64>,
        path: P,
    ) -> ReflectaResult<()>
    where
        T: GdalType + Copy,
        P: AsRef<Path>,
    {
        let samples: Vec<T> = data.iter().cloned().collect();
        self.write_samples(samples, data.dim(), georef, nodata, path.as_ref())
    }

    fn write_samples<T: GdalType + Copy>(
        &self,
        samples: Vec<T>,
        (height, width): (usize, usize),
        georef: &GeoReference,
        nodata: Option<f64>,
        path: &Path,
    ) -> ReflectaResult<()> {
        log::info!("Writing GeoTIFF: {}", path.display());

        let raster_err = |source: gdal::errors::GdalError| ReflectaError::RasterIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut options = Vec::new();
        if self.config.tiled {
            options.push(RasterCreationOption { key: "TILED", value: "YES" });
        }
        if let Some(ref compress) = self.config.compress {
            options.push(RasterCreationOption { key: "COMPRESS", value: compress.as_str() });
        }

        let mut dataset = driver
            .create_with_band_type_with_options::<T, _>(path, width as isize, height as isize, 1, &options)
            .map_err(raster_err)?;

        dataset
            .set_geo_transform(&georef.geo_transform.to_gdal())
            .map_err(raster_err)?;
        if !georef.projection.is_empty() {
            dataset.set_projection(&georef.projection).map_err(raster_err)?;
        }

        let mut rasterband = dataset.rasterband(1).map_err(raster_err)?;
        let buffer = Buffer::new((width, height), samples);
        rasterband.write((0, 0), (width, height), &buffer).map_err(raster_err)?;

        if let Some(nd) = nodata {
            rasterband.set_no_data_value(Some(nd)).map_err(raster_err)?;
        }

        Ok(())
    }
}

impl Default for RasterAccessor {
    fn default() -> Self {
        Self::new(AccessorConfig::default())
    }
}

/// WKT for an EPSG code, via GDAL/PROJ
pub fn wkt_from_epsg(epsg: u32) -> ReflectaResult<String> {
    let srs = gdal::spatial_ref::SpatialRef::from_epsg(epsg)?;
    Ok(srs.to_wkt()?)
}
