//! Scene-adaptive binary thresholding (Otsu's method)
//!
//! Radar backscatter over open water is dark, but the dark/bright split
//! drifts with acquisition geometry and season, so a threshold is derived
//! per raster from its region histogram by maximising the between-class
//! variance. Rasters with no valid cell fall back to a fixed sigma-naught.

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::core::reduction::RegionReducer;
use crate::core::region::Region;
use crate::core::spectral_index::WATER_BAND;
use crate::types::{
    GridGeometry, Histogram, IndicatorResult, MaskedGrid, RasterObservation, Threshold,
};

/// Floor for class weights so an empty class never divides by zero
const WEIGHT_EPSILON: f64 = 1e-12;

/// Otsu thresholding parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtsuParams {
    /// Intensity band the histogram is computed over
    pub band: String,
    /// Maximum number of histogram buckets
    pub max_buckets: usize,
    /// Reduction scale in metres
    pub scale: f64,
    /// Threshold for rasters with an empty histogram (linear sigma0;
    /// roughly -15 when working in dB)
    pub fallback_threshold: f64,
}

impl Default for OtsuParams {
    fn default() -> Self {
        Self {
            band: "VV".to_string(),
            max_buckets: 256,
            scale: 30.0,
            fallback_threshold: 0.05,
        }
    }
}

/// Between-class variance for every split index `i`: low class `[0, i]`,
/// high class `(i, n)`.
pub fn between_class_variances(histogram: &Histogram) -> Vec<f64> {
    let n = histogram.len();
    let mut cumulative_weight = Vec::with_capacity(n);
    let mut cumulative_sum = Vec::with_capacity(n);
    let (mut w, mut s) = (0.0, 0.0);
    for (&count, &mean) in histogram.counts.iter().zip(&histogram.bucket_means) {
        w += count;
        s += count * mean;
        cumulative_weight.push(w);
        cumulative_sum.push(s);
    }
    let (total_weight, total_sum) = (w, s);

    (0..n)
        .map(|i| {
            let w_low = cumulative_weight[i].max(WEIGHT_EPSILON);
            let w_high = (total_weight - cumulative_weight[i]).max(WEIGHT_EPSILON);
            let mean_low = cumulative_sum[i] / w_low;
            let mean_high = (total_sum - cumulative_sum[i]) / w_high;
            w_low * w_high * (mean_low - mean_high).powi(2)
        })
        .collect()
}

/// Split index maximising between-class variance; ties go to the lowest
/// index. `None` for an empty histogram.
pub fn otsu_split(histogram: &Histogram) -> Option<usize> {
    if histogram.is_empty() {
        return None;
    }
    let variances = between_class_variances(histogram);
    let mut best = 0;
    for (i, &v) in variances.iter().enumerate().skip(1) {
        if v > variances[best] {
            best = i;
        }
    }
    Some(best)
}

/// Threshold value of a histogram: the bucket mean at the Otsu split
pub fn otsu_threshold(histogram: &Histogram) -> Option<f64> {
    otsu_split(histogram).map(|i| histogram.bucket_means[i])
}

/// Per-raster adaptive thresholding of a radar intensity band
pub struct HistogramOtsuThresholder {
    params: OtsuParams,
}

impl HistogramOtsuThresholder {
    pub fn new() -> Self {
        Self {
            params: OtsuParams::default(),
        }
    }

    pub fn with_params(params: OtsuParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &OtsuParams {
        &self.params
    }

    /// Threshold from a histogram, or the fallback when it is empty
    pub fn threshold_from_histogram(&self, histogram: &Histogram) -> Threshold {
        match otsu_threshold(histogram) {
            Some(value) => Threshold::Value(value),
            None => Threshold::Fallback(self.params.fallback_threshold),
        }
    }

    /// Request the region histogram of `raster` and derive its threshold
    pub fn threshold(
        &self,
        raster: &RasterObservation,
        geometry: &GridGeometry,
        region: &Region,
        reducer: &dyn RegionReducer,
    ) -> IndicatorResult<Threshold> {
        let band = raster.band(&self.params.band)?;
        let histogram = reducer.reduce_histogram(
            band,
            geometry,
            region,
            self.params.scale,
            self.params.max_buckets,
        )?;
        let threshold = self.threshold_from_histogram(&histogram);
        match threshold {
            Threshold::Value(v) => log::debug!(
                "Otsu threshold for {} over {} buckets: {:.5}",
                raster.id,
                histogram.len(),
                v
            ),
            Threshold::Fallback(v) => log::warn!(
                "Empty histogram for {}; using fallback threshold {}",
                raster.id,
                v
            ),
        }
        Ok(threshold)
    }

    /// Binary water layer: valid cells with `value <= threshold` are class 1,
    /// everything else is masked out.
    pub fn apply(
        &self,
        raster: &RasterObservation,
        threshold: Threshold,
    ) -> IndicatorResult<RasterObservation> {
        let band = raster.band(&self.params.band)?;
        let limit = threshold.value();
        let keep = Zip::from(band.values())
            .and(band.validity())
            .map_collect(|&v, &ok| ok && (v as f64) <= limit);
        let water = MaskedGrid::new(keep.mapv(|k| if k { 1.0 } else { 0.0 }), keep)?;

        let mut out = RasterObservation::new(raster.id.clone(), raster.timestamp)
            .with_band(WATER_BAND, water);
        out.attributes = raster.attributes.clone();
        Ok(out)
    }
}

impl Default for HistogramOtsuThresholder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use ndarray::array;

    #[test]
    fn test_uniform_histogram_splits_at_midpoint() {
        let hist = Histogram::new(vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        assert_eq!(otsu_split(&hist), Some(1));
        assert_eq!(otsu_threshold(&hist), Some(1.0));
    }

    #[test]
    fn test_two_populated_buckets_threshold_at_low_value() {
        let hist = Histogram::new(vec![0.01, 0.05, 0.1, 0.2], vec![40.0, 0.0, 0.0, 60.0]).unwrap();
        assert_eq!(otsu_threshold(&hist), Some(0.01));
    }

    #[test]
    fn test_ties_pick_lowest_index() {
        // symmetric bimodal: splits 0 and 1 both separate the modes perfectly
        let hist = Histogram::new(vec![0.0, 1.0, 2.0], vec![2.0, 0.0, 2.0]).unwrap();
        let variances = between_class_variances(&hist);
        assert_relative_eq!(variances[0], variances[1]);
        assert_eq!(otsu_split(&hist), Some(0));
    }

    #[test]
    fn test_last_split_has_no_variance() {
        let hist = Histogram::new(vec![0.0, 1.0], vec![3.0, 5.0]).unwrap();
        let variances = between_class_variances(&hist);
        assert!(variances.iter().all(|v| v.is_finite()));
        assert!(variances[1] < 1e-6);
    }

    #[test]
    fn test_empty_histogram_falls_back() {
        let thresholder = HistogramOtsuThresholder::new();
        let threshold = thresholder.threshold_from_histogram(&Histogram::empty());
        assert_eq!(threshold, Threshold::Fallback(0.05));

        let zero_counts = Histogram::new(vec![0.0, 1.0], vec![0.0, 0.0]).unwrap();
        assert!(thresholder.threshold_from_histogram(&zero_counts).is_fallback());
    }

    #[test]
    fn test_apply_keeps_dark_cells() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let vv = MaskedGrid::new(array![[0.01, 0.08, 0.2, 0.01]], array![[true, true, true, false]]).unwrap();
        let raster = RasterObservation::new("m", ts).with_band("VV", vv);
        let water = HistogramOtsuThresholder::new()
            .apply(&raster, Threshold::Value(0.1))
            .unwrap();
        let band = water.band(WATER_BAND).unwrap();
        assert_eq!(band.get(0, 0), Some(1.0));
        assert_eq!(band.get(0, 1), Some(1.0));
        assert_eq!(band.get(0, 2), None);
        assert_eq!(band.get(0, 3), None);
    }
}
