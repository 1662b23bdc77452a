use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Real-valued cell data (reflectance, backscatter, soil moisture)
pub type CellValue = f32;

/// 2D real-valued grid (rows x cols)
pub type ValueGrid = Array2<CellValue>;

/// 2D per-cell validity flags aligned with a [`ValueGrid`]
pub type ValidityGrid = Array2<bool>;

/// Ordered set of observations as returned by an archive query.
/// No time ordering is assumed by consumers.
pub type ObservationSet = Vec<RasterObservation>;

/// Geospatial transformation parameters (north-up lon/lat grids)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub top_left_y: f64,
    pub pixel_height: f64, // negative for north-up grids
}

impl GeoTransform {
    /// Longitude/latitude of a cell centre
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let lon = self.top_left_x + (col as f64 + 0.5) * self.pixel_width;
        let lat = self.top_left_y + (row as f64 + 0.5) * self.pixel_height;
        (lon, lat)
    }

    /// Latitude bounds (upper edge, lower edge) of a row
    pub fn row_lat_bounds(&self, row: usize) -> (f64, f64) {
        let upper = self.top_left_y + row as f64 * self.pixel_height;
        (upper, upper + self.pixel_height)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Fixed grid every band of a region is aligned to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub rows: usize,
    pub cols: usize,
    pub geo_transform: GeoTransform,
    /// Nominal ground resolution of one cell in metres
    pub native_scale: f64,
}

impl GridGeometry {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// A numeric grid with a first-class per-cell validity mask.
///
/// Masked cells keep whatever value they had but never participate in a
/// reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedGrid {
    values: ValueGrid,
    valid: ValidityGrid,
}

impl MaskedGrid {
    pub fn new(values: ValueGrid, valid: ValidityGrid) -> IndicatorResult<Self> {
        if values.dim() != valid.dim() {
            return Err(IndicatorError::ShapeMismatch {
                expected: values.dim(),
                actual: valid.dim(),
            });
        }
        Ok(Self { values, valid })
    }

    /// Every cell valid
    pub fn from_values(values: ValueGrid) -> Self {
        let valid = Array2::from_elem(values.dim(), true);
        Self { values, valid }
    }

    /// Every cell invalid (zero-filled)
    pub fn fully_masked(shape: (usize, usize)) -> Self {
        Self {
            values: Array2::zeros(shape),
            valid: Array2::from_elem(shape, false),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> &ValueGrid {
        &self.values
    }

    pub fn validity(&self) -> &ValidityGrid {
        &self.valid
    }

    pub fn get(&self, row: usize, col: usize) -> Option<CellValue> {
        match self.valid.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// New grid whose mask is `self.mask AND keep`
    pub fn update_mask(&self, keep: &ValidityGrid) -> IndicatorResult<Self> {
        if keep.dim() != self.dim() {
            return Err(IndicatorError::ShapeMismatch {
                expected: self.dim(),
                actual: keep.dim(),
            });
        }
        let mut valid = self.valid.clone();
        valid.zip_mut_with(keep, |v, &k| *v = *v && k);
        Ok(Self {
            values: self.values.clone(),
            valid,
        })
    }

    /// Keep only valid, non-zero cells
    pub fn self_mask(&self) -> Self {
        let mut valid = self.valid.clone();
        valid.zip_mut_with(&self.values, |v, &x| *v = *v && x != 0.0);
        Self {
            values: self.values.clone(),
            valid,
        }
    }
}

/// Scalar scene attribute (cloud cover, orbit pass, polarisation list, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
    Flag(bool),
    List(Vec<String>),
}

/// One raster acquisition (or derived layer) over the region.
///
/// Transformations always build a new observation with the same timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterObservation {
    /// Unique scene identifier, used as the join key for auxiliary layers
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub bands: BTreeMap<String, MaskedGrid>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl RasterObservation {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            bands: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_band(mut self, name: impl Into<String>, grid: MaskedGrid) -> Self {
        self.bands.insert(name.into(), grid);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn band(&self, name: &str) -> IndicatorResult<&MaskedGrid> {
        self.bands.get(name).ok_or_else(|| IndicatorError::MissingBand {
            band: name.to_string(),
            observation: self.id.clone(),
        })
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// True for the sentinel raster produced for a bucket with no data
    pub fn is_empty_sentinel(&self) -> bool {
        matches!(self.attributes.get(EMPTY_ATTRIBUTE), Some(AttributeValue::Flag(true)))
    }
}

/// Attribute set on sentinel rasters of data-free buckets
pub const EMPTY_ATTRIBUTE: &str = "empty";

/// Representative raster of one time bucket.
///
/// Consumers must handle both arms: an empty bucket is never a zero-filled
/// real observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Composite {
    /// At least one observation contributed
    Real(RasterObservation),
    /// No observation fell in the bucket; fully masked sentinel
    Empty(RasterObservation),
}

impl Composite {
    pub fn raster(&self) -> &RasterObservation {
        match self {
            Composite::Real(raster) | Composite::Empty(raster) => raster,
        }
    }

    pub fn into_raster(self) -> RasterObservation {
        match self {
            Composite::Real(raster) | Composite::Empty(raster) => raster,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Composite::Empty(_))
    }
}

/// Half-open bucket `[start, end)` with its representative raster
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub composite: Composite,
    /// Number of observations reduced into the composite
    pub contributors: usize,
}

/// Histogram over one raster and region: strictly increasing bucket means
/// with their (nonnegative) counts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Histogram {
    pub bucket_means: Vec<f64>,
    pub counts: Vec<f64>,
}

impl Histogram {
    pub fn new(bucket_means: Vec<f64>, counts: Vec<f64>) -> IndicatorResult<Self> {
        if bucket_means.len() != counts.len() {
            return Err(IndicatorError::Processing(format!(
                "Histogram has {} bucket means but {} counts",
                bucket_means.len(),
                counts.len()
            )));
        }
        if bucket_means.windows(2).any(|w| w[0] >= w[1]) {
            return Err(IndicatorError::Processing(
                "Histogram bucket means must be strictly increasing".to_string(),
            ));
        }
        if counts.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(IndicatorError::Processing(
                "Histogram counts must be finite and nonnegative".to_string(),
            ));
        }
        Ok(Self {
            bucket_means,
            counts,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn total_count(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// True when no valid cell was sampled
    pub fn is_empty(&self) -> bool {
        self.total_count() <= 0.0
    }
}

/// Scene-adaptive threshold, or the configured fallback for data-free rasters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    Value(f64),
    Fallback(f64),
}

impl Threshold {
    pub fn value(&self) -> f64 {
        match self {
            Threshold::Value(v) | Threshold::Fallback(v) => *v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Threshold::Fallback(_))
    }
}

/// One time step of a scalar series; `value` is `None` when nothing was computable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// Ordered (label, value) series, one entry per time step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScalarSeries {
    pub points: Vec<SeriesPoint>,
}

impl ScalarSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point labelled `YYYY-MM`
    pub fn push_monthly(&mut self, date: NaiveDate, value: Option<f64>) {
        self.points.push(SeriesPoint {
            label: date.format("%Y-%m").to_string(),
            date,
            value,
        });
    }

    /// Append a point labelled `YYYY-MM-DD`
    pub fn push_daily(&mut self, date: NaiveDate, value: Option<f64>) {
        self.points.push(SeriesPoint {
            label: date.format("%Y-%m-%d").to_string(),
            date,
            value,
        });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn get(&self, label: &str) -> Option<&SeriesPoint> {
        self.points.iter().find(|p| p.label == label)
    }
}

/// Binary water layer for one bucket, kept for downstream visualisation.
/// `water` is `None` when the step could not be computed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedLayer {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub water: Option<RasterObservation>,
    pub threshold: Option<Threshold>,
    /// True when the layer came from an empty bucket
    pub empty: bool,
}

/// Error types for indicator processing
#[derive(Debug, thiserror::Error)]
pub enum IndicatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No auxiliary layer matches join key '{key}'")]
    JoinMismatch { key: String },

    #[error("Band '{band}' missing from observation '{observation}'")]
    MissingBand { band: String, observation: String },

    #[error("Grid shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Too many pixels: {pixels} exceeds limit of {max_pixels}")]
    TooManyPixels { pixels: usize, max_pixels: usize },

    #[error("Collaborator failure: {message}")]
    Collaborator { message: String, transient: bool },

    #[error("Processing error: {0}")]
    Processing(String),
}

impl IndicatorError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            IndicatorError::Collaborator { transient, .. } => *transient,
            IndicatorError::Io(_) => true,
            _ => false,
        }
    }

    /// Failures of the archive/reduction collaborators
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            IndicatorError::Collaborator { .. } | IndicatorError::Io(_) | IndicatorError::TooManyPixels { .. }
        )
    }
}

/// Result type for indicator operations
pub type IndicatorResult<T> = Result<T, IndicatorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_masked_grid_shape_check() {
        let values = Array2::<f32>::zeros((2, 3));
        let valid = Array2::from_elem((3, 2), true);
        assert!(matches!(
            MaskedGrid::new(values, valid),
            Err(IndicatorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_update_mask_is_logical_and() {
        let grid = MaskedGrid::new(array![[1.0, 2.0], [3.0, 4.0]], array![[true, false], [true, true]]).unwrap();
        let keep = array![[true, true], [false, true]];
        let masked = grid.update_mask(&keep).unwrap();
        assert_eq!(masked.validity(), &array![[true, false], [false, true]]);
        assert_eq!(masked.values(), grid.values());
        assert_eq!(masked.get(1, 1), Some(4.0));
        assert_eq!(masked.get(0, 1), None);
    }

    #[test]
    fn test_self_mask_drops_zeros() {
        let grid = MaskedGrid::from_values(array![[0.0, 1.0]]);
        assert_eq!(grid.self_mask().valid_count(), 1);
    }

    #[test]
    fn test_histogram_rejects_non_increasing_means() {
        assert!(Histogram::new(vec![0.0, 0.0], vec![1.0, 1.0]).is_err());
        assert!(Histogram::new(vec![0.0], vec![1.0, 1.0]).is_err());
        assert!(Histogram::empty().is_empty());
    }

    #[test]
    fn test_series_labels() {
        let mut series = ScalarSeries::new();
        let date = NaiveDate::from_ymd_opt(2025, 5, 3).unwrap();
        series.push_monthly(date, Some(1.0));
        series.push_daily(date, None);
        assert_eq!(series.points[0].label, "2025-05");
        assert_eq!(series.points[1].label, "2025-05-03");
        assert_eq!(series.values(), vec![Some(1.0), None]);
    }
}
