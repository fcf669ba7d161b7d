use anyhow::Result;
use gdal::raster::Buffer;
use gdal::{DriverManager, Metadata};
use ndarray::Array2;
use reflecta::core::pipeline::{PipelineConfig, ProductPipeline, SceneCalibrator, SceneInput, WorkUnit};
use reflecta::io::{RasterAccessor, SceneMetadata, VisualizationFormat};
use reflecta::types::{GeoReference, GeoTransform, ProductKind, RasterTile, ReflectaError, Sensor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn band_pattern(band: u8, x_offset: usize) -> Array2<f64> {
    let b = band as usize;
    Array2::from_shape_fn((10, 12), |(r, c)| {
        let c = c + x_offset;
        (((r * (b + 3) + c * (2 * b + 1) + b * b) % 97 + 1) * (b + 1)) as f64
    })
}

/// Two adjacent 10x12 tiles per band under `<dir>/<capture>/`
fn write_sentinel_tiles(dir: &Path, capture: &str, bands: &[u8]) -> Result<Vec<PathBuf>> {
    let accessor = RasterAccessor::default();
    let mut paths = Vec::new();
    for &band in bands {
        for i in 0..2 {
            let georef = GeoReference::new(
                GeoTransform::north_up(300000.0 + 120.0 * i as f64, 5000000.0, 10.0, -10.0),
                "",
            );
            let tile = RasterTile::new(band, band_pattern(band, 12 * i), georef, Some(0.0));
            let path = dir.join(capture).join(format!("B{:02}_part{}.tif", band, i));
            accessor.write_tile::<u16, _>(&tile, &path)?;
            paths.push(path);
        }
    }
    Ok(paths)
}

fn pipeline(format: VisualizationFormat) -> ProductPipeline {
    let config = PipelineConfig {
        visualization_format: format,
        ..PipelineConfig::default()
    };
    ProductPipeline::new(Sensor::Sentinel2, config)
}

#[test]
fn test_sentinel2_full_catalog() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let paths = write_sentinel_tiles(dir.path(), "20190615_053012", Sensor::Sentinel2.bands())?;
    let out = dir.path().join("out");

    let pipeline = pipeline(VisualizationFormat::Png);
    let tiles = pipeline.load_tiles(&paths);
    assert_eq!(tiles.len(), 9);
    assert!(tiles.values().all(|t| t.len() == 2));

    let report = pipeline.process(&tiles, &out)?;
    assert!(report.is_complete(), "skipped: {:?}", report.skipped_products);
    assert_eq!(report.mosaics.len(), 9);
    assert_eq!(report.products.len(), pipeline.catalog().products.len());
    assert!(out.join("mosaic").join("B11_10m.tif").exists());

    let composite = report.products.iter().find(|p| p.name == "4_3_2").unwrap();
    assert_eq!(composite.kind, ProductKind::Composite);
    assert_eq!(composite.preview, out.join("composite").join("4_3_2.png"));
    assert_eq!(composite.linear, out.join("composite").join("4_3_2-dcs.png"));
    assert_eq!(composite.perceptual, out.join("composite").join("4_3_2-dcs-lab.png"));
    assert_eq!(composite.georeferenced, out.join("composite").join("4_3_2-dcs.tif"));

    for product in &report.products {
        assert!(product.preview.exists());
        assert!(product.linear.exists());
        assert!(product.perceptual.exists());
        assert!(product.georeferenced.exists());
    }
    assert!(out.join("pca").join("pca-salehi-dcs.tif").exists());
    assert!(out.join("ratio").join("4-3_4-2_11-12-dcs-lab.png").exists());

    // Mosaic of band 4 spans both tiles and keeps their samples
    let accessor = RasterAccessor::default();
    let mosaic_b04 = accessor.read_tile(&report.mosaics[&4], 4)?;
    assert_eq!(mosaic_b04.shape(), (10, 24));
    assert_eq!(mosaic_b04.data[[3, 17]], band_pattern(4, 12)[[3, 5]]);

    let stamped = accessor.read_tile(&composite.georeferenced, 1)?;
    assert_eq!(stamped.georef.geo_transform, mosaic_b04.georef.geo_transform);
    Ok(())
}

#[test]
fn test_incomplete_mosaic_skips_products() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let bands: Vec<u8> = Sensor::Sentinel2.bands().iter().copied().filter(|&b| b != 12).collect();
    let paths = write_sentinel_tiles(dir.path(), "20190615_053012", &bands)?;
    let out = dir.path().join("out");

    let pipeline = pipeline(VisualizationFormat::Png);
    let report = pipeline.process(&pipeline.load_tiles(&paths), &out)?;

    assert_eq!(report.missing_bands, vec![12]);
    assert!(report.products.is_empty());
    assert_eq!(report.mosaics.len(), 8);
    assert!(!out.join("composite").exists());
    Ok(())
}

#[test]
fn test_batch_continues_after_failed_unit() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let mut paths = write_sentinel_tiles(dir.path(), "20190615_053012", Sensor::Sentinel2.bands())?;
    paths.push(dir.path().join("20200101_000000").join("B02_missing.tif"));
    let out = dir.path().join("out");

    let units = WorkUnit::group_by_capture_date("shokpar", &paths);
    assert_eq!(units.len(), 2);

    let batch = pipeline(VisualizationFormat::Jpeg).process_batch(&units, &out);
    assert_eq!(batch.completed.len(), 1);
    assert_eq!(batch.failed.len(), 1);
    assert_eq!(batch.failed[0].0, "shokpar");

    let (_, date, report) = &batch.completed[0];
    assert_eq!(date.format("%Y%m%d").to_string(), "20190615");
    assert!(report.is_complete());
    assert!(out
        .join("shokpar")
        .join("20190615")
        .join("composite")
        .join("12_11_2-dcs.jpg")
        .exists());
    Ok(())
}

#[test]
fn test_aster_scene_calibration_feeds_mosaic() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let metadata = SceneMetadata::from_items(vec![
        ("CALENDARDATE", "20190615"),
        ("SOLARDIRECTION", "140.25, 62.5"),
        ("GAIN.1", "01, HGH"),
        ("GAIN.2", "02, NOR"),
        ("GAIN.3", "3N, NOR"),
        ("GAIN.4", "3B, NOR"),
        ("GAIN.5", "04, LO1"),
        ("GAIN.6", "05, XYZ"),
    ])?;

    let georef = GeoReference::new(GeoTransform::north_up(500000.0, 4800000.0, 15.0, -15.0), "");
    let tiles: Vec<RasterTile> = (1..=5u8)
        .map(|band| {
            let data = Array2::from_shape_fn((8, 8), |(r, c)| if c == 0 { 0.0 } else { (40 * band as usize + r * 8 + c) as f64 });
            RasterTile::new(band, data, georef.clone(), Some(0.0))
        })
        .collect();
    let scene = SceneInput::from_tiles("AST_L1T_00306152019053012", metadata, tiles)?;

    let calibrator = SceneCalibrator::new(RasterAccessor::default());
    let report = calibrator.calibrate_scene(&scene, dir.path())?;

    assert_eq!(report.written.len(), 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 5);

    let band3 = report.written.iter().find(|p| p.band == 3).unwrap();
    assert_eq!(
        band3.reflectance,
        dir.path().join("AST_L1T_00306152019053012_ImageData3N_reflectance.tif")
    );
    assert!(band3.dn.exists());
    assert!(band3.radiance.exists());

    let accessor = RasterAccessor::default();
    let reflectance = accessor.read_tile(&band3.reflectance, 3)?;
    assert_eq!(reflectance.nodata, Some(0.0));
    assert!(reflectance.data.column(0).iter().all(|&v| v == 0.0));
    assert!(reflectance.data.column(1).iter().all(|&v| v > 0.0));

    // Reflectance files feed the ASTER mosaic; bands 5..9 were never produced
    let refl_paths: Vec<PathBuf> = report.written.iter().map(|p| p.reflectance.clone()).collect();
    let pipeline = ProductPipeline::new(Sensor::Aster, PipelineConfig::default());
    let tiles = pipeline.load_tiles(&refl_paths);
    assert_eq!(tiles.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);

    let out = dir.path().join("out");
    let products = pipeline.process(&tiles, &out)?;
    assert_eq!(products.missing_bands, vec![5, 6, 7, 8, 9]);
    assert!(out.join("mosaic").join("Data3N_reflectance.tif").exists());
    Ok(())
}

const UTM_SCENE_ITEMS: [(&str, &str); 8] = [
    ("CALENDARDATE", "20190615"),
    ("SOLARDIRECTION", "140.25, 62.5"),
    ("GAIN.1", "01, HGH"),
    ("GAIN.2", "02, NOR"),
    ("UPPERLEFTM", "4800000.0, 500000.0"),
    ("LOWERRIGHTM", "4799880.0, 500120.0"),
    ("NORTHBOUNDINGCOORDINATE", "43.4"),
    ("UTMZONENUMBER", "43"),
];

#[test]
fn test_aster_scene_georeferenced_from_utm_metadata() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;

    // An 8x8 scene, 15 m pixels, UTM zone 43N corners in its metadata
    let mem = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset = mem.create_with_band_type::<u16, _>("", 8, 8, 2)?;
    for (key, value) in UTM_SCENE_ITEMS {
        dataset.set_metadata_item(key, value, "")?;
    }
    for band in 1..=2isize {
        let samples: Vec<u16> = (0..64).map(|i| if i % 8 == 0 { 0 } else { 50 * band as u16 + i }).collect();
        dataset.rasterband(band)?.write((0, 0), (8, 8), &Buffer::new((8, 8), samples))?;
    }

    let metadata = SceneMetadata::from_dataset(&dataset)?;
    let mut bands = BTreeMap::new();
    for band in 1..=2u8 {
        let raw = dataset.rasterband(band as isize)?.read_as::<u16>((0, 0), (8, 8), (8, 8), None)?;
        bands.insert(band, Array2::from_shape_vec((8, 8), raw.data)?);
    }
    let scene = SceneInput::from_dn_bands("AST_L1T_00306152019053012", metadata, bands)?;

    let report = SceneCalibrator::new(RasterAccessor::default()).calibrate_scene(&scene, dir.path())?;
    assert_eq!(report.written.len(), 2);
    assert!(report.failed.is_empty());

    let band1 = report.written.iter().find(|p| p.band == 1).unwrap();
    let reflectance = RasterAccessor::default().read_tile(&band1.reflectance, 1)?;
    assert!(reflectance.georef.projection.contains("UTM zone 43N"));
    assert_eq!(
        reflectance.georef.geo_transform,
        GeoTransform::north_up(499992.5, 4800007.5, 15.0, -15.0)
    );
    assert_eq!(reflectance.nodata, Some(0.0));
    assert!(reflectance.data.column(0).iter().all(|&v| v == 0.0));
    Ok(())
}

#[test]
fn test_scene_bands_of_different_shape_are_rejected() -> Result<()> {
    let metadata = SceneMetadata::from_items(UTM_SCENE_ITEMS)?;
    let mut bands = BTreeMap::new();
    bands.insert(1u8, Array2::<u16>::ones((8, 8)));
    bands.insert(2u8, Array2::<u16>::ones((8, 4)));

    let result = SceneInput::from_dn_bands("scene", metadata, bands);
    assert!(matches!(result, Err(ReflectaError::InvalidFormat(_))));
    Ok(())
}

#[test]
fn test_horizon_sun_fails_whole_scene() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let items: Vec<(&str, &str)> = UTM_SCENE_ITEMS
        .iter()
        .map(|&(k, v)| if k == "SOLARDIRECTION" { (k, "140.25, 0.0") } else { (k, v) })
        .collect();
    let metadata = SceneMetadata::from_items(items)?;
    let mut bands = BTreeMap::new();
    bands.insert(1u8, Array2::<u16>::from_elem((8, 8), 120));
    let scene = SceneInput::from_dn_bands("scene", metadata, bands)?;

    let result = SceneCalibrator::new(RasterAccessor::default()).calibrate_scene(&scene, dir.path());
    assert!(matches!(result, Err(ReflectaError::Configuration(_))));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_mosaic_gaps_are_tagged_nodata_on_disk() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let accessor = RasterAccessor::default();

    // Two band-2 tiles without a nodata tag, one tile width apart
    let mut paths = Vec::new();
    for (i, x0) in [300000.0, 300240.0].into_iter().enumerate() {
        let georef = GeoReference::new(GeoTransform::north_up(x0, 5000000.0, 10.0, -10.0), "");
        let tile = RasterTile::new(2, band_pattern(2, 0), georef, None);
        let path = dir.path().join(format!("B02_part{}.tif", i));
        accessor.write_tile::<u16, _>(&tile, &path)?;
        paths.push(path);
    }

    let pipeline = pipeline(VisualizationFormat::Png);
    let tiles = pipeline.load_tiles(&paths);
    assert_eq!(tiles[&2][0].nodata, None);

    let report = pipeline.process(&tiles, &dir.path().join("out"))?;
    assert!(!report.missing_bands.is_empty());

    let mosaic = accessor.read_tile(&report.mosaics[&2], 2)?;
    assert_eq!(mosaic.shape(), (10, 36));
    assert_eq!(mosaic.nodata, Some(0.0));
    assert!(mosaic.data.column(18).iter().all(|&v| v == 0.0));
    assert_eq!(mosaic.data[[4, 30]], band_pattern(2, 0)[[4, 6]]);
    Ok(())
}
