//! I/O modules for raster tiles, scene metadata and visualization outputs

pub mod raster;
pub mod scene;
pub mod writer;

pub use raster::{AccessorConfig, RasterAccessor};
pub use scene::SceneMetadata;
pub use writer::{GeoImageWriter, VisualizationFormat};
