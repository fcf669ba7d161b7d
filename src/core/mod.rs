//! Core radiometric and product processing modules

pub mod calibrate;
pub mod catalog;
pub mod stats;
pub mod mosaic;
pub mod band_algebra;
pub mod dstretch;
pub mod pipeline;

// Re-export main types
pub use calibrate::{CalibrationProcessor, CalibrationTable, CalibratedBand, SceneGeometry, earth_sun_distance};
pub use catalog::ProductCatalog;
pub use stats::{ChannelStatistics, PrincipalComponents, SignConvention};
pub use mosaic::{MosaicMerger, TargetGrid};
pub use band_algebra::BandAlgebra;
pub use dstretch::{StretchParams, StretchOutputs, decorrelation_stretch, quantize_to_byte};
pub use pipeline::{
    PipelineConfig, ProductPipeline, ProcessingReport, ProductOutputs, SceneCalibrator, SceneInput,
    CalibrationReport, WorkUnit, BatchReport,
};
