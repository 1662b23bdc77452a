use ndarray::{Array2, Zip};

use crate::types::{IndicatorResult, IndicatorError, MaskedGrid, RasterObservation};

/// Name of the binary class band produced by classifiers
pub const WATER_BAND: &str = "water";

/// Denominators at or below this magnitude are treated as zero
const ZERO_DENOMINATOR: f32 = 1e-10;

/// `(a - b) / (a + b)` cell-wise.
///
/// Cells invalid in either band, or with a zero denominator, are invalid
/// in the result.
pub fn normalized_difference(a: &MaskedGrid, b: &MaskedGrid) -> IndicatorResult<MaskedGrid> {
    if a.dim() != b.dim() {
        return Err(IndicatorError::ShapeMismatch {
            expected: a.dim(),
            actual: b.dim(),
        });
    }
    let shape = a.dim();
    let mut values = Array2::<f32>::zeros(shape);
    let mut valid = Array2::from_elem(shape, false);
    Zip::from(&mut values)
        .and(&mut valid)
        .and(a.values())
        .and(a.validity())
        .and(b.values())
        .and(b.validity())
        .for_each(|out, ok, &va, &a_ok, &vb, &b_ok| {
            if !(a_ok && b_ok) {
                return;
            }
            let sum = va + vb;
            if sum.abs() <= ZERO_DENOMINATOR || !sum.is_finite() {
                return;
            }
            let index = (va - vb) / sum;
            if index.is_finite() {
                *out = index;
                *ok = true;
            }
        });
    MaskedGrid::new(values, valid)
}

/// Normalised band-difference index with fixed-threshold classification
pub struct SpectralIndexClassifier {
    /// Band name of the index when added to an observation
    index_name: String,
}

impl SpectralIndexClassifier {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
        }
    }

    /// Modified normalised difference water index: (Green - SWIR1) / (Green + SWIR1)
    pub fn mndwi() -> Self {
        Self::new("MNDWI")
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Copy of `observation` with the index of `(a, b)` appended as a band
    pub fn add_index_band(
        &self,
        observation: &RasterObservation,
        index_bands: (&str, &str),
    ) -> IndicatorResult<RasterObservation> {
        let index = normalized_difference(
            observation.band(index_bands.0)?,
            observation.band(index_bands.1)?,
        )?;
        Ok(observation.clone().with_band(self.index_name.clone(), index))
    }

    /// Binary water layer from an existing index band: `index > threshold`
    /// is class 1, everything else is masked out.
    pub fn classify_band(
        &self,
        observation: &RasterObservation,
        band: &str,
        threshold: f32,
    ) -> IndicatorResult<RasterObservation> {
        let index = observation.band(band)?;
        let keep = Zip::from(index.values())
            .and(index.validity())
            .map_collect(|&v, &ok| ok && v > threshold);
        let water = MaskedGrid::new(keep.mapv(|k| if k { 1.0 } else { 0.0 }), keep)?;

        let mut out = RasterObservation::new(observation.id.clone(), observation.timestamp)
            .with_band(WATER_BAND, water);
        out.attributes = observation.attributes.clone();
        Ok(out)
    }

    /// Compute the index of `(a, b)` and classify it in one step
    pub fn classify(
        &self,
        observation: &RasterObservation,
        index_bands: (&str, &str),
        threshold: f32,
    ) -> IndicatorResult<RasterObservation> {
        let indexed = self.add_index_band(observation, index_bands)?;
        self.classify_band(&indexed, &self.index_name, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use ndarray::array;

    fn optical(green: Array2<f32>, swir: Array2<f32>) -> RasterObservation {
        RasterObservation::new("s2", Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap())
            .with_band("B3", MaskedGrid::from_values(green))
            .with_band("B11", MaskedGrid::from_values(swir))
    }

    #[test]
    fn test_normalized_difference_values() {
        let a = MaskedGrid::from_values(array![[3.0, 1.0]]);
        let b = MaskedGrid::from_values(array![[1.0, 3.0]]);
        let nd = normalized_difference(&a, &b).unwrap();
        assert_relative_eq!(nd.get(0, 0).unwrap(), 0.5);
        assert_relative_eq!(nd.get(0, 1).unwrap(), -0.5);
    }

    #[test]
    fn test_zero_denominator_is_invalid_for_any_threshold() {
        let obs = optical(array![[0.0, 0.3]], array![[0.0, 0.1]]);
        let classifier = SpectralIndexClassifier::mndwi();
        for threshold in [-2.0, -1.0, 0.0, 0.5] {
            let water = classifier.classify(&obs, ("B3", "B11"), threshold).unwrap();
            assert_eq!(water.band(WATER_BAND).unwrap().get(0, 0), None);
        }
    }

    #[test]
    fn test_invalid_operand_propagates() {
        let a = MaskedGrid::new(array![[0.5]], array![[false]]).unwrap();
        let b = MaskedGrid::from_values(array![[0.1]]);
        assert_eq!(normalized_difference(&a, &b).unwrap().valid_count(), 0);
    }

    #[test]
    fn test_classification_self_masks_non_water() {
        let obs = optical(array![[0.3, 0.1, 0.2]], array![[0.1, 0.3, 0.2]]);
        let water = SpectralIndexClassifier::mndwi()
            .classify(&obs, ("B3", "B11"), 0.0)
            .unwrap();
        let band = water.band(WATER_BAND).unwrap();
        assert_eq!(band.get(0, 0), Some(1.0));
        assert_eq!(band.get(0, 1), None);
        // index exactly at the threshold is not water
        assert_eq!(band.get(0, 2), None);
        assert_eq!(water.timestamp, obs.timestamp);
    }

    #[test]
    fn test_threshold_is_a_parameter() {
        let obs = optical(array![[0.3]], array![[0.1]]);
        let classifier = SpectralIndexClassifier::mndwi();
        let strict = classifier.classify(&obs, ("B3", "B11"), 0.6).unwrap();
        assert_eq!(strict.band(WATER_BAND).unwrap().valid_count(), 0);
    }

    #[test]
    fn test_missing_band_is_reported() {
        let obs = optical(array![[0.3]], array![[0.1]]);
        let err = SpectralIndexClassifier::mndwi()
            .classify(&obs, ("B3", "B8"), 0.0)
            .unwrap_err();
        assert!(matches!(err, IndicatorError::MissingBand { .. }));
    }
}
