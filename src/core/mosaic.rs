use crate::types::{GeoReference, GeoTransform, Mosaic, RasterTile, RealImage, ReflectaError, ReflectaResult};
use ndarray::Array2;
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Output grid covering the union of a set of tile footprints
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    pub georef: GeoReference,
    pub rows: usize,
    pub cols: usize,
}

impl TargetGrid {
    /// Union grid of `tiles`, using the first tile's pixel size
    pub fn covering<'a, I>(tiles: I) -> ReflectaResult<Self>
    where
        I: IntoIterator<Item = &'a RasterTile>,
    {
        let mut iter = tiles.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| ReflectaError::Processing("No tiles to merge".to_string()))?;

        let reference = first.georef.geo_transform;
        check_north_up(first)?;
        reference.validate()?;

        let (mut min_x, mut min_y, mut max_x, mut max_y) = first.bounds();
        for tile in iter {
            check_north_up(tile)?;
            if tile.georef.projection != first.georef.projection {
                return Err(ReflectaError::Processing(format!(
                    "Band {} tile is in a different CRS than the first tile",
                    tile.band
                )));
            }
            let (x0, y0, x1, y1) = tile.bounds();
            min_x = min_x.min(x0);
            min_y = min_y.min(y0);
            max_x = max_x.max(x1);
            max_y = max_y.max(y1);
        }

        let pw = reference.pixel_width;
        let ph = reference.pixel_height;
        let cols = pixel_count(max_x - min_x, pw.abs());
        let rows = pixel_count(max_y - min_y, ph.abs());

        let origin_x = if pw > 0.0 { min_x } else { max_x };
        let origin_y = if ph < 0.0 { max_y } else { min_y };

        Ok(Self {
            georef: GeoReference::new(
                GeoTransform::north_up(origin_x, origin_y, pw, ph),
                first.georef.projection.clone(),
            ),
            rows,
            cols,
        })
    }
}

/// Whole pixels needed to span `extent`, tolerating float noise at the edge
fn pixel_count(extent: f64, size: f64) -> usize {
    let n = extent / size;
    let rounded = n.round();
    if (n - rounded).abs() < 1e-6 {
        rounded.max(1.0) as usize
    } else {
        n.ceil().max(1.0) as usize
    }
}

fn check_north_up(tile: &RasterTile) -> ReflectaResult<()> {
    let gt = &tile.georef.geo_transform;
    if gt.rotation_x != 0.0 || gt.rotation_y != 0.0 {
        return Err(ReflectaError::InvalidFormat(format!(
            "Band {} tile has a rotated geotransform",
            tile.band
        )));
    }
    gt.validate()
}

/// Merges same-band tiles into one raster on a shared grid
///
/// Tiles are applied in input order at output pixel centres with nearest
/// neighbour sampling; a later valid sample overwrites an earlier one.
#[derive(Debug, Clone, Default)]
pub struct MosaicMerger {
    /// Sentinel for uncovered pixels (defaults to the first tile's nodata)
    pub nodata: Option<f64>,
}

impl MosaicMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one band's tiles onto the union of their footprints
    pub fn merge_band(&self, tiles: &[RasterTile]) -> ReflectaResult<RasterTile> {
        let grid = TargetGrid::covering(tiles)?;
        self.merge_onto_grid(tiles, &grid)
    }

    /// Merge one band's tiles onto an existing grid
    pub fn merge_onto_grid(&self, tiles: &[RasterTile], grid: &TargetGrid) -> ReflectaResult<RasterTile> {
        let first = tiles
            .first()
            .ok_or_else(|| ReflectaError::Processing("No tiles to merge".to_string()))?;
        let band = first.band;
        if let Some(other) = tiles.iter().find(|t| t.band != band) {
            return Err(ReflectaError::Processing(format!(
                "Cannot merge band {} tile into band {} mosaic",
                other.band, band
            )));
        }

        let nodata = self.nodata.or(first.nodata);
        let fill = nodata.unwrap_or(f64::NAN);
        let mut merged: RealImage = Array2::from_elem((grid.rows, grid.cols), fill);

        log::debug!(
            "Merging {} tiles of band {} onto {}x{} grid",
            tiles.len(),
            band,
            grid.rows,
            grid.cols
        );

        for tile in tiles {
            if tile.georef.projection != grid.georef.projection {
                return Err(ReflectaError::Processing(format!(
                    "Band {} tile is in a different CRS than the mosaic grid",
                    band
                )));
            }
            place_tile(tile, grid, &mut merged)?;
        }

        Ok(RasterTile::new(band, merged, grid.georef.clone(), nodata))
    }

    /// Merge every band onto one common grid
    ///
    /// Bands without tiles are absent from the result. A band that fails to
    /// merge is logged and left out; completeness is checked downstream.
    pub fn build_mosaic(&self, tiles_by_band: &BTreeMap<u8, Vec<RasterTile>>) -> ReflectaResult<Mosaic> {
        let jobs: Vec<(u8, &Vec<RasterTile>)> = tiles_by_band
            .iter()
            .filter(|(_, tiles)| !tiles.is_empty())
            .map(|(&band, tiles)| (band, tiles))
            .collect();

        let grid = TargetGrid::covering(jobs.iter().flat_map(|(_, tiles)| tiles.iter()))?;
        log::info!(
            "🧩 Building mosaic of {} bands on {}x{} grid",
            jobs.len(),
            grid.rows,
            grid.cols
        );

        let merge = |&(band, tiles): &(u8, &Vec<RasterTile>)| (band, self.merge_onto_grid(tiles, &grid));

        #[cfg(feature = "parallel")]
        let merged: Vec<(u8, ReflectaResult<RasterTile>)> = jobs.par_iter().map(merge).collect();
        #[cfg(not(feature = "parallel"))]
        let merged: Vec<(u8, ReflectaResult<RasterTile>)> = jobs.iter().map(merge).collect();

        let first_nodata = jobs.first().and_then(|(_, tiles)| tiles[0].nodata);
        let mut mosaic = Mosaic::new(grid.georef.clone(), self.nodata.or(first_nodata));
        for (band, result) in merged {
            match result {
                Ok(tile) => mosaic.insert(tile)?,
                Err(e) => log::error!("Skipping band {} in mosaic: {}", band, e),
            }
        }

        log::info!("✅ Mosaic holds bands {:?}", mosaic.bands.keys().collect::<Vec<_>>());
        Ok(mosaic)
    }
}

/// Nearest-neighbour copy of the valid samples of `tile` into `merged`
fn place_tile(tile: &RasterTile, grid: &TargetGrid, merged: &mut RealImage) -> ReflectaResult<()> {
    check_north_up(tile)?;
    let out = &grid.georef.geo_transform;
    let src = &tile.georef.geo_transform;
    let (src_rows, src_cols) = tile.shape();

    // Output window that can see this tile, widened by one pixel
    let (min_x, min_y, max_x, max_y) = tile.bounds();
    let (c0, c1) = window(min_x, max_x, out.top_left_x, out.pixel_width, grid.cols);
    let (r0, r1) = window(min_y, max_y, out.top_left_y, out.pixel_height, grid.rows);

    for r in r0..r1 {
        let y = out.top_left_y + (r as f64 + 0.5) * out.pixel_height;
        let src_r = ((y - src.top_left_y) / src.pixel_height).floor();
        if src_r < 0.0 || src_r >= src_rows as f64 {
            continue;
        }
        for c in c0..c1 {
            let x = out.top_left_x + (c as f64 + 0.5) * out.pixel_width;
            let src_c = ((x - src.top_left_x) / src.pixel_width).floor();
            if src_c < 0.0 || src_c >= src_cols as f64 {
                continue;
            }
            let value = tile.data[[src_r as usize, src_c as usize]];
            if tile.is_valid(value) {
                merged[[r, c]] = value;
            }
        }
    }
    Ok(())
}

fn window(lo: f64, hi: f64, origin: f64, size: f64, len: usize) -> (usize, usize) {
    let a = (lo - origin) / size;
    let b = (hi - origin) / size;
    let start = a.min(b).floor() - 1.0;
    let end = a.max(b).ceil() + 1.0;
    let clamp = |v: f64| v.max(0.0).min(len as f64) as usize;
    (clamp(start), clamp(end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(band: u8, x0: f64, y0: f64, rows: usize, cols: usize, value: f64) -> RasterTile {
        RasterTile::new(
            band,
            Array2::from_elem((rows, cols), value),
            GeoReference::new(GeoTransform::north_up(x0, y0, 10.0, -10.0), "EPSG:32643"),
            Some(0.0),
        )
    }

    #[test]
    fn test_union_grid() {
        let tiles = vec![tile(1, 0.0, 100.0, 4, 4, 1.0), tile(1, 30.0, 80.0, 4, 4, 2.0)];
        let grid = TargetGrid::covering(&tiles).unwrap();

        assert_eq!((grid.rows, grid.cols), (6, 7));
        assert_eq!(grid.georef.geo_transform.top_left_x, 0.0);
        assert_eq!(grid.georef.geo_transform.top_left_y, 100.0);
    }

    #[test]
    fn test_later_tile_wins_overlap() {
        let a = tile(2, 0.0, 40.0, 4, 4, 5.0);
        let b = tile(2, 20.0, 40.0, 4, 4, 7.0);
        let merger = MosaicMerger::new();

        let ab = merger.merge_band(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(ab.shape(), (4, 6));
        assert_eq!(ab.data[[0, 1]], 5.0);
        assert_eq!(ab.data[[0, 2]], 7.0);
        assert_eq!(ab.data[[3, 5]], 7.0);

        let ba = merger.merge_band(&[b, a]).unwrap();
        assert_eq!(ba.data[[0, 2]], 5.0);
        assert_eq!(ba.data[[0, 3]], 5.0);
        assert_eq!(ba.data[[0, 4]], 7.0);
    }

    #[test]
    fn test_nodata_does_not_overwrite() {
        let a = tile(3, 0.0, 20.0, 2, 2, 9.0);
        let mut b = tile(3, 0.0, 20.0, 2, 2, 4.0);
        b.data[[0, 0]] = 0.0;
        b.data[[1, 1]] = f64::NAN;

        let merged = MosaicMerger::new().merge_band(&[a, b]).unwrap();
        assert_eq!(merged.data[[0, 0]], 9.0);
        assert_eq!(merged.data[[0, 1]], 4.0);
        assert_eq!(merged.data[[1, 1]], 9.0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let tiles = vec![
            tile(4, 0.0, 50.0, 5, 5, 1.0),
            tile(4, 25.0, 35.0, 5, 5, 2.0),
            tile(4, 12.0, 61.0, 3, 3, 3.0),
        ];
        let merger = MosaicMerger::new();
        let first = merger.merge_band(&tiles).unwrap();
        let second = merger.merge_band(&tiles).unwrap();

        assert_eq!(first.georef, second.georef);
        let bits = |t: &RasterTile| t.data.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_absent_band_is_skipped() {
        let mut by_band = BTreeMap::new();
        by_band.insert(1u8, vec![tile(1, 0.0, 20.0, 2, 2, 1.0)]);
        by_band.insert(2u8, Vec::new());
        by_band.insert(3u8, vec![tile(3, 20.0, 20.0, 2, 2, 3.0)]);

        let mosaic = MosaicMerger::new().build_mosaic(&by_band).unwrap();
        assert_eq!(mosaic.bands.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(mosaic.shape(), Some((2, 4)));
        assert_eq!(mosaic.missing_bands(&[1, 2, 3]), vec![2]);
        assert_eq!(mosaic.band(1).unwrap().data[[0, 3]], 0.0);
    }

    #[test]
    fn test_rejects_mixed_bands() {
        let result = MosaicMerger::new().merge_band(&[tile(1, 0.0, 10.0, 1, 1, 1.0), tile(2, 0.0, 10.0, 1, 1, 1.0)]);
        assert!(matches!(result, Err(ReflectaError::Processing(_))));
    }
}
