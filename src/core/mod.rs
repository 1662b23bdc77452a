//! Core raster time-series reduction modules

pub mod region;
pub mod reduction;
pub mod cloud_mask;
pub mod compositor;
pub mod spectral_index;
pub mod otsu;
pub mod area;
pub mod climatology;

// Re-export main types
pub use region::{Region, PixelArea, UniformPixelArea, GeodesicPixelArea};
pub use reduction::{RegionReducer, GridReducer};
pub use cloud_mask::{CloudShadowMasker, CloudMaskParams, CloudProbabilityIndex, SceneClassMasker};
pub use compositor::{TemporalCompositor, BucketTemplate, Period, Reducer};
pub use spectral_index::{SpectralIndexClassifier, normalized_difference, WATER_BAND};
pub use otsu::{HistogramOtsuThresholder, OtsuParams, otsu_threshold};
pub use area::AreaAggregator;
pub use climatology::{ClimatologyAnomalyEngine, ClimatologyBaseline, LeapDayPolicy};
