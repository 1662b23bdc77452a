//! Region reduction primitives (sum, mean, histogram over a region)
//!
//! [`RegionReducer`] is the seam to whatever engine performs geospatial
//! aggregation. [`GridReducer`] evaluates the reductions in-process over
//! aligned grids.

use crate::core::region::Region;
use crate::types::{GridGeometry, Histogram, IndicatorError, IndicatorResult, MaskedGrid};

/// Region reduction contract.
///
/// A raster with no valid cell inside the region yields `None` (sum/mean)
/// or an empty [`Histogram`], never an error.
pub trait RegionReducer: Send + Sync {
    fn reduce_sum(
        &self,
        grid: &MaskedGrid,
        geometry: &GridGeometry,
        region: &Region,
        scale: f64,
        max_pixels: u64,
    ) -> IndicatorResult<Option<f64>>;

    fn reduce_mean(
        &self,
        grid: &MaskedGrid,
        geometry: &GridGeometry,
        region: &Region,
        scale: f64,
    ) -> IndicatorResult<Option<f64>>;

    fn reduce_histogram(
        &self,
        grid: &MaskedGrid,
        geometry: &GridGeometry,
        region: &Region,
        scale: f64,
        max_buckets: usize,
    ) -> IndicatorResult<Histogram>;
}

/// Pixel budget used by mean and histogram reductions
pub const DEFAULT_MAX_PIXELS: u64 = 10_000_000_000_000;

/// In-process reducer over grids aligned to one [`GridGeometry`]
#[derive(Debug, Clone)]
pub struct GridReducer {
    /// Pixel budget for mean/histogram requests
    pub max_pixels: u64,
    /// Coarsen sampling instead of failing when over budget
    pub best_effort: bool,
}

impl Default for GridReducer {
    fn default() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_PIXELS,
            best_effort: true,
        }
    }
}

/// Sampled cell with the number of native cells it stands for
struct Sample {
    value: f64,
    weight: f64,
}

impl GridReducer {
    pub fn new(max_pixels: u64, best_effort: bool) -> Self {
        Self {
            max_pixels,
            best_effort,
        }
    }

    fn sampling_stride(
        &self,
        geometry: &GridGeometry,
        scale: f64,
        max_pixels: u64,
    ) -> IndicatorResult<usize> {
        if !(scale > 0.0) || !(geometry.native_scale > 0.0) {
            return Err(IndicatorError::InvalidConfig(format!(
                "Reduction scale {} and native scale {} must be positive",
                scale, geometry.native_scale
            )));
        }
        let mut stride = ((scale / geometry.native_scale).round() as usize).max(1);
        let sampled = |stride: usize| {
            (geometry.rows.div_ceil(stride) as u64) * (geometry.cols.div_ceil(stride) as u64)
        };
        while sampled(stride) > max_pixels {
            if !self.best_effort {
                return Err(IndicatorError::TooManyPixels {
                    pixels: sampled(stride) as usize,
                    max_pixels: max_pixels as usize,
                });
            }
            if stride >= geometry.rows.max(geometry.cols) {
                break;
            }
            stride *= 2;
            log::debug!("Best-effort sampling: coarsening stride to {}", stride);
        }
        Ok(stride)
    }

    fn collect_samples(
        &self,
        grid: &MaskedGrid,
        geometry: &GridGeometry,
        region: &Region,
        scale: f64,
        max_pixels: u64,
    ) -> IndicatorResult<Vec<Sample>> {
        if grid.dim() != geometry.shape() {
            return Err(IndicatorError::ShapeMismatch {
                expected: geometry.shape(),
                actual: grid.dim(),
            });
        }
        let stride = self.sampling_stride(geometry, scale, max_pixels)?;
        let in_region = region.mask(geometry);
        let mut samples = Vec::new();
        for row in (0..geometry.rows).step_by(stride) {
            for col in (0..geometry.cols).step_by(stride) {
                if !in_region[[row, col]] {
                    continue;
                }
                if let Some(value) = grid.get(row, col) {
                    if !value.is_finite() {
                        continue;
                    }
                    let block_rows = stride.min(geometry.rows - row);
                    let block_cols = stride.min(geometry.cols - col);
                    samples.push(Sample {
                        value: value as f64,
                        weight: (block_rows * block_cols) as f64,
                    });
                }
            }
        }
        Ok(samples)
    }
}

impl RegionReducer for GridReducer {
    /// Each sampled cell stands for the stride x stride block it anchors
    fn reduce_sum(
        &self,
        grid: &MaskedGrid,
        geometry: &GridGeometry,
        region: &Region,
        scale: f64,
        max_pixels: u64,
    ) -> IndicatorResult<Option<f64>> {
        let samples = self.collect_samples(grid, geometry, region, scale, max_pixels)?;
        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(samples.iter().map(|s| s.value * s.weight).sum()))
    }

    fn reduce_mean(
        &self,
        grid: &MaskedGrid,
        geometry: &GridGeometry,
        region: &Region,
        scale: f64,
    ) -> IndicatorResult<Option<f64>> {
        let samples = self.collect_samples(grid, geometry, region, scale, self.max_pixels)?;
        if samples.is_empty() {
            return Ok(None);
        }
        let sum: f64 = samples.iter().map(|s| s.value).sum();
        Ok(Some(sum / samples.len() as f64))
    }

    /// Equal-width buckets over the sampled range; means are bucket midpoints
    fn reduce_histogram(
        &self,
        grid: &MaskedGrid,
        geometry: &GridGeometry,
        region: &Region,
        scale: f64,
        max_buckets: usize,
    ) -> IndicatorResult<Histogram> {
        if max_buckets == 0 {
            return Err(IndicatorError::InvalidConfig(
                "Histogram needs at least one bucket".to_string(),
            ));
        }
        let samples = self.collect_samples(grid, geometry, region, scale, self.max_pixels)?;
        if samples.is_empty() {
            return Ok(Histogram::empty());
        }

        let (min, max) = samples.iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
            (lo.min(s.value), hi.max(s.value))
        });
        if max - min <= f64::EPSILON * min.abs().max(1.0) {
            return Histogram::new(vec![min], vec![samples.len() as f64]);
        }

        let width = (max - min) / max_buckets as f64;
        let mut counts = vec![0.0; max_buckets];
        for s in &samples {
            let idx = (((s.value - min) / width).floor() as usize).min(max_buckets - 1);
            counts[idx] += 1.0;
        }
        let means = (0..max_buckets)
            .map(|i| min + (i as f64 + 0.5) * width)
            .collect();
        Histogram::new(means, counts)
    }
}
