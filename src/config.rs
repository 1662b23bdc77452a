//! Immutable run configuration threaded through every pipeline call

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::climatology::LeapDayPolicy;
use crate::core::cloud_mask::CloudMaskParams;
use crate::core::otsu::OtsuParams;
use crate::core::reduction::DEFAULT_MAX_PIXELS;
use crate::core::region::{GeodesicPixelArea, PixelArea, Region, UniformPixelArea};
use crate::io::retry::RetryPolicy;
use crate::types::{BoundingBox, GeoTransform, GridGeometry, IndicatorError, IndicatorResult};

/// Metres per degree of latitude (approximate)
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Lake Eyre basin outline (lon, lat)
const LAKE_EYRE: [[f64; 2]; 16] = [
    [136.74335937499998, -28.09237505565586],
    [136.88618164062498, -28.227977535979104],
    [136.80927734374998, -28.382741075729506],
    [136.78730468749998, -28.69159074212909],
    [136.83124999999998, -29.009140392892075],
    [137.16083984374998, -29.076374558071787],
    [137.01801757812498, -29.325717112252402],
    [137.10590820312498, -29.60311243929047],
    [137.74311523437498, -29.373597989058965],
    [138.13862304687498, -29.047565280530485],
    [137.89692382812498, -28.913015660085264],
    [137.76508789062498, -28.52762707342042],
    [137.53437499999998, -28.01481087863716],
    [137.11689453124998, -27.76234173358644],
    [136.71040039062498, -27.87893910675135],
    [136.74335937499998, -28.09237505565586],
];

/// North-up lon/lat grid covering `bbox` at roughly `scale_m` metres per cell
pub fn grid_over(bbox: &BoundingBox, scale_m: f64) -> GridGeometry {
    let step = scale_m / METRES_PER_DEGREE;
    let cols = ((bbox.max_lon - bbox.min_lon) / step).ceil().max(1.0) as usize;
    let rows = ((bbox.max_lat - bbox.min_lat) / step).ceil().max(1.0) as usize;
    GridGeometry {
        rows,
        cols,
        geo_transform: GeoTransform {
            top_left_x: bbox.min_lon,
            pixel_width: step,
            top_left_y: bbox.max_lat,
            pixel_height: -step,
        },
        native_scale: scale_m,
    }
}

/// Cell area model used for area sums
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PixelAreaModel {
    Geodesic,
    Uniform { cell_size_m: f64 },
}

impl PixelAreaModel {
    pub fn provider(&self) -> Box<dyn PixelArea> {
        match *self {
            PixelAreaModel::Geodesic => Box::new(GeodesicPixelArea),
            PixelAreaModel::Uniform { cell_size_m } => Box::new(UniformPixelArea { cell_size_m }),
        }
    }
}

/// Sentinel-2 open-water settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpticalConfig {
    pub collection: String,
    pub cloud_collection: String,
    pub max_cloud_percentage: f64,
    pub cloud_mask: CloudMaskParams,
    pub green_band: String,
    pub swir_band: String,
    pub index_name: String,
    pub water_threshold: f32,
    pub scale: f64,
    pub max_pixels: u64,
    pub pixel_area: PixelAreaModel,
    pub grid: GridGeometry,
}

/// Sentinel-1 open-water settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarConfig {
    pub collection: String,
    pub instrument_mode: String,
    pub resolution_meters: f64,
    pub orbit_pass: String,
    pub polarisation: String,
    pub otsu: OtsuParams,
    pub area_scale: f64,
    pub max_pixels: u64,
    pub pixel_area: PixelAreaModel,
    pub grid: GridGeometry,
}

/// SMAP soil-moisture anomaly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilMoistureConfig {
    pub collection: String,
    pub band: String,
    /// First date of the daily series
    pub history_start: NaiveDate,
    pub baseline_start: NaiveDate,
    /// Inclusive
    pub baseline_end: NaiveDate,
    pub leap_day_policy: LeapDayPolicy,
    pub scale: f64,
    pub grid: GridGeometry,
}

/// Complete indicator run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub region: Region,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub optical: OpticalConfig,
    pub radar: RadarConfig,
    pub soil_moisture: SoilMoistureConfig,
    pub retry: RetryPolicy,
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        let region = Region::new(LAKE_EYRE.to_vec());
        let bbox = region.bounding_box().unwrap_or(BoundingBox {
            min_lon: 0.0,
            max_lon: 0.0,
            min_lat: 0.0,
            max_lat: 0.0,
        });
        Self {
            start: Utc.with_ymd_and_hms(2025, 4, 29, 0, 0, 0).single().unwrap_or_default(),
            end: Utc.with_ymd_and_hms(2025, 6, 12, 0, 0, 0).single().unwrap_or_default(),
            optical: OpticalConfig {
                collection: "COPERNICUS/S2_SR_HARMONIZED".to_string(),
                cloud_collection: "COPERNICUS/S2_CLOUD_PROBABILITY".to_string(),
                max_cloud_percentage: 80.0,
                cloud_mask: CloudMaskParams::default(),
                green_band: "B3".to_string(),
                swir_band: "B11".to_string(),
                index_name: "MNDWI".to_string(),
                water_threshold: 0.0,
                scale: 10.0,
                max_pixels: DEFAULT_MAX_PIXELS,
                pixel_area: PixelAreaModel::Geodesic,
                grid: grid_over(&bbox, 10.0),
            },
            radar: RadarConfig {
                collection: "COPERNICUS/S1_GRD".to_string(),
                instrument_mode: "IW".to_string(),
                resolution_meters: 10.0,
                orbit_pass: "DESCENDING".to_string(),
                polarisation: "VV".to_string(),
                otsu: OtsuParams::default(),
                area_scale: 10.0,
                max_pixels: DEFAULT_MAX_PIXELS,
                pixel_area: PixelAreaModel::Geodesic,
                grid: grid_over(&bbox, 10.0),
            },
            soil_moisture: SoilMoistureConfig {
                collection: "NASA/SMAP/SPL3SMP_E/006".to_string(),
                band: "soil_moisture".to_string(),
                history_start: ymd(2015, 4, 1),
                baseline_start: ymd(2016, 1, 1),
                baseline_end: ymd(2020, 12, 31),
                leap_day_policy: LeapDayPolicy::Ordinal,
                scale: 9000.0,
                grid: grid_over(&bbox, 9000.0),
            },
            retry: RetryPolicy::default(),
            region,
        }
    }
}

impl IndicatorConfig {
    pub fn from_json_str(json: &str) -> IndicatorResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> IndicatorResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::info!("Loading indicator configuration from {}", path.as_ref().display());
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> IndicatorResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> IndicatorResult<()> {
        let invalid = |msg: String| Err(IndicatorError::InvalidConfig(msg));

        if self.start >= self.end {
            return invalid(format!("start {} must precede end {}", self.start, self.end));
        }
        if self.region.vertex_count() < 4 {
            return invalid("region polygon needs at least 3 distinct vertices".to_string());
        }
        for (name, grid) in [
            ("optical", &self.optical.grid),
            ("radar", &self.radar.grid),
            ("soil_moisture", &self.soil_moisture.grid),
        ] {
            if grid.rows == 0 || grid.cols == 0 || !(grid.native_scale > 0.0) {
                return invalid(format!("{} grid must be non-empty with a positive scale", name));
            }
        }
        for (name, scale) in [
            ("optical.scale", self.optical.scale),
            ("radar.area_scale", self.radar.area_scale),
            ("radar.otsu.scale", self.radar.otsu.scale),
            ("soil_moisture.scale", self.soil_moisture.scale),
        ] {
            if !(scale > 0.0) {
                return invalid(format!("{} must be positive, got {}", name, scale));
            }
        }
        let p = self.optical.cloud_mask.probability_threshold;
        if !(0.0..=100.0).contains(&p) {
            return invalid(format!("cloud probability threshold {} outside 0-100", p));
        }
        if self.radar.otsu.max_buckets == 0 {
            return invalid("radar.otsu.max_buckets must be at least 1".to_string());
        }
        if self.soil_moisture.baseline_start > self.soil_moisture.baseline_end {
            return invalid("soil moisture baseline window is reversed".to_string());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IndicatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.optical.cloud_mask.probability_threshold, 40.0);
        assert_eq!(config.radar.otsu.max_buckets, 256);
        assert_eq!(config.radar.otsu.fallback_threshold, 0.05);
        assert_eq!(config.soil_moisture.grid.native_scale, 9000.0);
    }

    #[test]
    fn test_json_round_trip_preserves_settings() {
        let config = IndicatorConfig::default();
        let json = config.to_json().unwrap();
        let parsed = IndicatorConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.start, config.start);
        assert_eq!(parsed.region, config.region);
        assert_eq!(parsed.soil_moisture.baseline_end, config.soil_moisture.baseline_end);
    }

    #[test]
    fn test_reversed_dates_rejected() {
        let mut config = IndicatorConfig::default();
        std::mem::swap(&mut config.start, &mut config.end);
        assert!(matches!(config.validate(), Err(IndicatorError::InvalidConfig(_))));
    }

    #[test]
    fn test_probability_threshold_range() {
        let mut config = IndicatorConfig::default();
        config.optical.cloud_mask.probability_threshold = 140.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grid_over_covers_bbox() {
        let bbox = BoundingBox {
            min_lon: 0.0,
            max_lon: 1.0,
            min_lat: 0.0,
            max_lat: 0.5,
        };
        let grid = grid_over(&bbox, METRES_PER_DEGREE / 4.0);
        assert_eq!((grid.rows, grid.cols), (2, 4));
        assert_eq!(grid.geo_transform.pixel_width, 0.25);
    }
}
