//! Static product catalogs per sensor

use crate::types::{ProductDefinition, ProductKind, Sensor};
use serde::{Deserialize, Serialize};

/// Immutable list of product recipes for one sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCatalog {
    pub sensor: Sensor,
    pub products: Vec<ProductDefinition>,
}

fn composite(name: &str, channels: [u8; 3]) -> ProductDefinition {
    ProductDefinition::Composite {
        name: name.to_string(),
        channels,
    }
}

fn ratio(name: &str, channels: [(u8, u8); 3]) -> ProductDefinition {
    ProductDefinition::Ratio {
        name: name.to_string(),
        channels,
    }
}

fn pca(name: &str, bands: &[u8], components: [usize; 3]) -> ProductDefinition {
    ProductDefinition::Pca {
        name: name.to_string(),
        bands: bands.to_vec(),
        components,
    }
}

impl ProductCatalog {
    pub fn for_sensor(sensor: Sensor) -> Self {
        match sensor {
            Sensor::Aster => Self::aster(),
            Sensor::Sentinel2 => Self::sentinel2(),
        }
    }

    pub fn aster() -> Self {
        Self {
            sensor: Sensor::Aster,
            products: vec![
                composite("3_2_1", [3, 2, 1]),
                composite("6_4_1", [6, 4, 1]),
                composite("6_4_3", [6, 4, 3]),
                composite("4_6_8", [4, 6, 8]),
                composite("7_2_1", [7, 2, 1]),
                ratio("4-8_4-2_8-9", [(4, 8), (4, 2), (8, 9)]),
                ratio("6-8_4-5_2-4", [(6, 8), (4, 5), (2, 4)]),
                ratio("1-4_3-4_5-2", [(1, 4), (3, 4), (5, 2)]),
                ratio("4-1_4-5_4-7", [(4, 1), (4, 5), (4, 7)]),
                pca("pca-1_2_3", &[1, 2, 3, 4, 5, 6, 7, 8, 9], [0, 1, 2]),
            ],
        }
    }

    pub fn sentinel2() -> Self {
        Self {
            sensor: Sensor::Sentinel2,
            products: vec![
                composite("4_3_2", [4, 3, 2]),
                composite("8_4_3", [8, 4, 3]),
                composite("11_8_4", [11, 8, 4]),
                composite("11_12_2", [11, 12, 2]),
                composite("11_12_4", [11, 12, 4]),
                composite("12_4_2", [12, 4, 2]),
                composite("12_8_3", [12, 8, 3]),
                composite("12_11_2", [12, 11, 2]),
                ratio("3-2_4-3_11-12", [(3, 2), (4, 3), (11, 12)]),
                ratio("4-3_4-2_11-12", [(4, 3), (4, 2), (11, 12)]),
                ratio("4-3_11-2_12-4", [(4, 3), (11, 2), (12, 4)]),
                ratio("4-8_12-11_3-4", [(4, 8), (12, 11), (3, 4)]),
                ratio("11-4_4-2_11-12", [(11, 4), (4, 2), (11, 12)]),
                pca("pca-11_12_2", &[11, 12, 2], [0, 1, 2]),
                pca("pca-11_12_4", &[11, 12, 4], [0, 1, 2]),
                pca("pca-salehi", &[2, 3, 4, 5, 6, 7, 11, 12], [3, 7, 4]),
            ],
        }
    }

    /// Union of bands referenced by every product, ascending
    pub fn required_bands(&self) -> Vec<u8> {
        let mut bands: Vec<u8> = self
            .products
            .iter()
            .flat_map(|p| p.referenced_bands())
            .collect();
        bands.sort_unstable();
        bands.dedup();
        bands
    }

    pub fn of_kind(&self, kind: ProductKind) -> impl Iterator<Item = &ProductDefinition> {
        self.products.iter().filter(move |p| p.kind() == kind)
    }

    pub fn get(&self, name: &str) -> Option<&ProductDefinition> {
        self.products.iter().find(|p| p.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogs_reference_sensor_bands() {
        for sensor in [Sensor::Aster, Sensor::Sentinel2] {
            let catalog = ProductCatalog::for_sensor(sensor);
            for band in catalog.required_bands() {
                assert!(sensor.bands().contains(&band), "{} has no band {}", sensor, band);
            }
        }
    }

    #[test]
    fn test_pca_components_in_range() {
        for sensor in [Sensor::Aster, Sensor::Sentinel2] {
            for product in ProductCatalog::for_sensor(sensor).of_kind(ProductKind::Pca) {
                if let ProductDefinition::Pca { bands, components, .. } = product {
                    assert!(components.iter().all(|&c| c < bands.len()), "{}", product.name());
                }
            }
        }
    }

    #[test]
    fn test_catalog_sizes() {
        let aster = ProductCatalog::aster();
        assert_eq!(aster.of_kind(ProductKind::Composite).count(), 5);
        assert_eq!(aster.of_kind(ProductKind::Ratio).count(), 4);
        assert_eq!(aster.required_bands(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let s2 = ProductCatalog::sentinel2();
        assert_eq!(s2.products.len(), 16);
        assert!(s2.get("pca-salehi").is_some());
    }
}
