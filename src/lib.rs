//! reflecta: Calibrated Reflectance and Derived Band Products
//!
//! This library turns raw ASTER scene bands and Sentinel-2 tiles into
//! top-of-atmosphere reflectance rasters, per-band AOI mosaics, and
//! composite/ratio/principal-component products rendered with a
//! decorrelation stretch.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    DnImage, RealImage, RgbCube, ByteImage, Sensor, GainMode, GeoTransform, GeoReference,
    RasterTile, Mosaic, ProductKind, ProductDefinition, DerivedProduct, ReflectaError, ReflectaResult,
};

pub use io::{RasterAccessor, AccessorConfig, SceneMetadata, GeoImageWriter, VisualizationFormat};
pub use crate::core::{ProductPipeline, PipelineConfig, ProductCatalog};
