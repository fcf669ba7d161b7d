use anyhow::Result;
use ndarray::Array2;
use reflecta::io::raster::{wkt_from_epsg, AccessorConfig, RasterAccessor};
use reflecta::types::{GeoReference, GeoTransform, RasterTile, ReflectaError};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn accessor() -> RasterAccessor {
    RasterAccessor::new(AccessorConfig {
        cache_max_mb: Some(256),
        ..AccessorConfig::default()
    })
}

#[test]
fn test_tile_roundtrip_keeps_grid_and_nodata() -> Result<()> {
    init_logging();
    let dir = TempDir::new()?;
    let georef = GeoReference::new(GeoTransform::north_up(499992.5, 4800007.5, 15.0, -15.0), "");
    let data = Array2::from_shape_fn((7, 9), |(r, c)| if r == c { 0.0 } else { (r * 100 + c) as f64 });
    let tile = RasterTile::new(5, data.clone(), georef.clone(), Some(0.0));

    let path = dir.path().join("nested").join("scene_ImageData5_reflectance.tif");
    let accessor = accessor();
    accessor.write_tile::<u16, _>(&tile, &path)?;

    let back = accessor.read_tile(&path, 5)?;
    assert_eq!(back.band, 5);
    assert_eq!(back.shape(), (7, 9));
    assert_eq!(back.nodata, Some(0.0));
    assert_eq!(back.georef.geo_transform, georef.geo_transform);
    assert_eq!(back.data, data);
    assert_eq!(back.valid_mask().iter().filter(|&&v| !v).count(), 7);
    Ok(())
}

#[test]
fn test_write_tile_maps_unrepresentable_samples_to_nodata() -> Result<()> {
    let dir = TempDir::new()?;
    let georef = GeoReference::new(GeoTransform::north_up(0.0, 20.0, 10.0, -10.0), "");
    let data = Array2::from_shape_vec((1, 4), vec![12.0, f64::NAN, -3.0, 70000.0])?;
    let tile = RasterTile::new(2, data, georef, Some(0.0));

    let path = dir.path().join("B02_10m.tif");
    let accessor = accessor();
    accessor.write_tile::<u16, _>(&tile, &path)?;

    let back = accessor.read_tile(&path, 2)?;
    assert_eq!(back.data.as_slice().unwrap(), &[12.0, 0.0, 0.0, 0.0]);
    Ok(())
}

#[test]
fn test_fill_without_nodata_is_tagged_as_nodata() -> Result<()> {
    let dir = TempDir::new()?;
    let georef = GeoReference::new(GeoTransform::north_up(0.0, 20.0, 10.0, -10.0), "");
    let data = Array2::from_shape_vec((1, 3), vec![12.0, f64::NAN, 40.0])?;
    let tile = RasterTile::new(3, data, georef, None);

    let path = dir.path().join("B03_10m.tif");
    let accessor = accessor();
    accessor.write_tile::<u16, _>(&tile, &path)?;

    let back = accessor.read_tile(&path, 3)?;
    assert_eq!(back.nodata, Some(0.0));
    assert_eq!(back.data.as_slice().unwrap(), &[12.0, 0.0, 40.0]);
    assert_eq!(back.valid_mask().iter().filter(|&&v| v).count(), 2);
    Ok(())
}

#[test]
fn test_float_array_roundtrip() -> Result<()> {
    let dir = TempDir::new()?;
    let georef = GeoReference::new(GeoTransform::north_up(100.0, 200.0, 0.5, -0.5), "");
    let radiance = Array2::from_shape_fn((3, 4), |(r, c)| (r as f32) * 1.25 + c as f32 * 0.5);

    let path = dir.path().join("scene_ImageData1_radiance.tif");
    let accessor = accessor();
    accessor.write_array(&radiance, &georef, Some(0.0), &path)?;

    let back = accessor.read_tile(&path, 1)?;
    for (a, b) in back.data.iter().zip(radiance.iter()) {
        assert_eq!(*a, *b as f64);
    }
    Ok(())
}

#[test]
fn test_missing_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.tif");

    match accessor().read_tile(&path, 1) {
        Err(ReflectaError::RasterIo { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected RasterIo error, got {:?}", other),
    }
}

#[test]
fn test_projection_roundtrip() -> Result<()> {
    let dir = TempDir::new()?;
    let wkt = wkt_from_epsg(32643)?;
    assert!(wkt.contains("UTM zone 43N"));

    let georef = GeoReference::new(GeoTransform::north_up(500000.0, 4800000.0, 15.0, -15.0), wkt);
    let tile = RasterTile::new(1, Array2::from_elem((2, 2), 7.0), georef, None);
    let path = dir.path().join("utm.tif");
    accessor().write_tile::<u16, _>(&tile, &path)?;

    let back = accessor().read_tile(&path, 1)?;
    assert!(back.georef.projection.contains("UTM zone 43N"));
    assert_eq!(back.nodata, None);
    Ok(())
}
