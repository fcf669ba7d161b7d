use crate::core::catalog::ProductCatalog;
use crate::core::stats::{PrincipalComponents, SignConvention};
use crate::types::{
    is_valid_sample, DerivedProduct, Mosaic, ProductDefinition, RasterTile, ReflectaError, ReflectaResult,
    RgbCube,
};
use ndarray::{s, Array2, Array3, Axis, Zip};

/// Builds derived 3-channel products from a mosaic's bands
#[derive(Debug, Clone, Copy, Default)]
pub struct BandAlgebra {
    sign: SignConvention,
}

impl BandAlgebra {
    pub fn new(sign: SignConvention) -> Self {
        Self { sign }
    }

    /// Every band the catalog references must be present in the mosaic
    pub fn check_complete(mosaic: &Mosaic, catalog: &ProductCatalog) -> ReflectaResult<()> {
        let missing = mosaic.missing_bands(&catalog.required_bands());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReflectaError::DataIncomplete { missing })
        }
    }

    pub fn derive(&self, mosaic: &Mosaic, definition: &ProductDefinition) -> ReflectaResult<DerivedProduct> {
        log::debug!("Deriving {:?} product {}", definition.kind(), definition.name());

        let (channels, nodata) = match definition {
            ProductDefinition::Composite { channels, .. } => (self.composite(mosaic, channels)?, mosaic.nodata),
            ProductDefinition::Ratio { channels, .. } => (self.ratio(mosaic, channels)?, None),
            ProductDefinition::Pca { bands, components, .. } => (self.pca(mosaic, bands, components)?, None),
        };

        Ok(DerivedProduct {
            name: definition.name().to_string(),
            kind: definition.kind(),
            channels,
            georef: mosaic.georef.clone(),
            nodata,
        })
    }

    /// Channel i is band `channels[i]`, unscaled
    fn composite(&self, mosaic: &Mosaic, channels: &[u8; 3]) -> ReflectaResult<RgbCube> {
        let tiles = [band(mosaic, channels[0])?, band(mosaic, channels[1])?, band(mosaic, channels[2])?];
        let (rows, cols) = tiles[0].shape();
        let mut cube = Array3::<f64>::zeros((rows, cols, 3));
        for (k, tile) in tiles.iter().enumerate() {
            cube.slice_mut(s![.., .., k]).assign(&tile.data);
        }
        Ok(cube)
    }

    /// Channel i is `a / b`; division by zero follows IEEE rules, invalid inputs give NaN
    fn ratio(&self, mosaic: &Mosaic, channels: &[(u8, u8); 3]) -> ReflectaResult<RgbCube> {
        let mut planes = Vec::with_capacity(3);
        for &(a, b) in channels {
            let num = band(mosaic, a)?;
            let den = band(mosaic, b)?;
            let plane: Array2<f64> = Zip::from(&num.data).and(&den.data).map_collect(|&x, &y| {
                if num.is_valid(x) && den.is_valid(y) {
                    x / y
                } else {
                    f64::NAN
                }
            });
            planes.push(plane);
        }
        let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
        ndarray::stack(Axis(2), &views)
            .map_err(|e| ReflectaError::Processing(format!("Failed to stack ratio channels: {}", e)))
    }

    /// Selected principal components of `bands`, by descending variance
    fn pca(&self, mosaic: &Mosaic, bands: &[u8], components: &[usize; 3]) -> ReflectaResult<RgbCube> {
        if let Some(&bad) = components.iter().find(|&&c| c >= bands.len()) {
            return Err(ReflectaError::Configuration(format!(
                "Principal component {} requested from {} bands",
                bad,
                bands.len()
            )));
        }

        let tiles = bands
            .iter()
            .map(|&b| band(mosaic, b))
            .collect::<ReflectaResult<Vec<&RasterTile>>>()?;
        let (rows, cols) = tiles
            .first()
            .map(|t| t.shape())
            .ok_or_else(|| ReflectaError::Configuration("PCA product without input bands".to_string()))?;

        let mut cube = Array3::<f64>::zeros((rows, cols, tiles.len()));
        for (k, tile) in tiles.iter().enumerate() {
            cube.slice_mut(s![.., .., k]).assign(&tile.data);
        }
        let valid = Array2::from_shape_fn((rows, cols), |(r, c)| {
            tiles.iter().all(|t| is_valid_sample(t.data[[r, c]], t.nodata))
        });

        let pca = PrincipalComponents::fit(cube.view(), valid.view(), self.sign)?;
        log::debug!("PCA variance explained: {:?}", pca.variance_explained());
        pca.transform(cube.view(), valid.view(), components)
    }
}

fn band(mosaic: &Mosaic, index: u8) -> ReflectaResult<&RasterTile> {
    mosaic
        .band(index)
        .ok_or_else(|| ReflectaError::DataIncomplete { missing: vec![index] })
}
