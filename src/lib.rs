//! lakewatch: raster time-series indicators for a fixed region of interest
//!
//! Turns irregular, partially cloud- or noise-corrupted raster observations
//! into regular scalar series: open-water extent from optical (Sentinel-2)
//! and radar (Sentinel-1) imagery, and soil-moisture anomaly against a
//! day-of-year climatology (SMAP).

pub mod types;
pub mod config;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    RasterObservation, MaskedGrid, GridGeometry, GeoTransform, Composite, TimeBucket,
    Histogram, Threshold, ScalarSeries, SeriesPoint, ClassifiedLayer, AttributeValue,
    IndicatorError, IndicatorResult,
};

pub use config::IndicatorConfig;
pub use io::{ArchiveQuery, AttributeFilter, InMemoryArchive, ObservationArchive, RetryPolicy};
pub use pipeline::{OpticalWaterPipeline, RadarWaterPipeline, SoilMoisturePipeline, SoilMoistureSeries};
