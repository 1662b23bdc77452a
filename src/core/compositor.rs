//! Temporal compositing: fixed-width calendar buckets reduced cell-wise to a
//! single representative raster, with an explicit empty-bucket sentinel.

use chrono::{DateTime, Days, Months, Utc};
use ndarray::Array2;
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{
    AttributeValue, Composite, GridGeometry, IndicatorError, IndicatorResult, MaskedGrid,
    RasterObservation, TimeBucket, EMPTY_ATTRIBUTE,
};

/// Bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Months(u32),
    Days(u64),
}

impl Period {
    pub fn is_zero(&self) -> bool {
        matches!(self, Period::Months(0) | Period::Days(0))
    }

    fn advance(&self, from: DateTime<Utc>, steps: u32) -> Option<DateTime<Utc>> {
        match *self {
            Period::Months(n) => from.checked_add_months(Months::new(n.checked_mul(steps)?)),
            Period::Days(n) => from.checked_add_days(Days::new(n.checked_mul(steps as u64)?)),
        }
    }
}

/// Per-cell reduction across the observations of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reducer {
    /// Robust against transient cloud/noise outliers
    Median,
    /// Emphasises dark (specular) radar returns
    Min,
    Max,
    Mean,
}

impl Reducer {
    fn reduce<T: Float>(&self, values: &mut [T]) -> Option<T> {
        if values.is_empty() {
            return None;
        }
        match self {
            Reducer::Median => median(values),
            Reducer::Min => values.iter().copied().reduce(T::min),
            Reducer::Max => values.iter().copied().reduce(T::max),
            Reducer::Mean => {
                let sum = values.iter().fold(T::zero(), |acc, &v| acc + v);
                T::from(values.len()).map(|n| sum / n)
            }
        }
    }
}

/// Median; an even count averages the two middle values
fn median<T: Float>(values: &mut [T]) -> Option<T> {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        let two = T::one() + T::one();
        Some((values[n / 2 - 1] + values[n / 2]) / two)
    }
}

/// Shape and band names of the sentinel raster for empty buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketTemplate {
    pub geometry: GridGeometry,
    pub bands: Vec<String>,
}

/// Groups observations into consecutive buckets and reduces each one
pub struct TemporalCompositor {
    template: BucketTemplate,
}

impl TemporalCompositor {
    pub fn new(template: BucketTemplate) -> Self {
        Self { template }
    }

    /// Number of whole periods that fit in `[start, end)` (truncated)
    pub fn bucket_count(start: DateTime<Utc>, end: DateTime<Utc>, period: Period) -> usize {
        if period.is_zero() {
            return 0;
        }
        let mut count = 0u32;
        while let Some(next) = period.advance(start, count + 1) {
            if next > end {
                break;
            }
            count += 1;
        }
        count as usize
    }

    /// Bucket boundaries `[start_k, end_k)` in chronological order
    pub fn bucket_bounds(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> IndicatorResult<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
        if period.is_zero() {
            return Err(IndicatorError::InvalidConfig("Bucket period must be positive".to_string()));
        }
        let n = Self::bucket_count(start, end, period) as u32;
        (0..n)
            .map(|k| {
                let lo = period.advance(start, k);
                let hi = period.advance(start, k + 1);
                lo.zip(hi).ok_or_else(|| {
                    IndicatorError::Processing(format!("Bucket {} lies outside the calendar range", k))
                })
            })
            .collect()
    }

    /// Composite `observations` into one raster per bucket of `[start, end)`.
    ///
    /// Output length always equals the bucket count; buckets without data
    /// carry a fully masked sentinel tagged `empty = true`.
    pub fn composite(
        &self,
        observations: &[RasterObservation],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
        reducer: Reducer,
    ) -> IndicatorResult<Vec<TimeBucket>> {
        let bounds = Self::bucket_bounds(start, end, period)?;
        log::info!(
            "Compositing {} observations into {} buckets with {:?} reducer",
            observations.len(),
            bounds.len(),
            reducer
        );

        let build = |&(lo, hi): &(DateTime<Utc>, DateTime<Utc>)| -> IndicatorResult<TimeBucket> {
            let members: Vec<&RasterObservation> = observations
                .iter()
                .filter(|o| o.timestamp >= lo && o.timestamp < hi)
                .collect();
            let composite = if members.is_empty() {
                log::warn!("No observations between {} and {}; using empty sentinel", lo, hi);
                Composite::Empty(self.empty_sentinel(lo))
            } else {
                log::debug!("Reducing {} observations for bucket starting {}", members.len(), lo);
                Composite::Real(reduce_bucket(&members, lo, reducer)?)
            };
            Ok(TimeBucket {
                start: lo,
                end: hi,
                contributors: members.len(),
                composite,
            })
        };

        #[cfg(feature = "parallel")]
        let buckets: IndicatorResult<Vec<TimeBucket>> = {
            use rayon::prelude::*;
            bounds.par_iter().map(build).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let buckets: IndicatorResult<Vec<TimeBucket>> = bounds.iter().map(build).collect();

        buckets
    }

    fn empty_sentinel(&self, timestamp: DateTime<Utc>) -> RasterObservation {
        let shape = self.template.geometry.shape();
        let mut sentinel = RasterObservation::new(format!("empty_{}", timestamp.format("%Y%m%d")), timestamp)
            .with_attribute(EMPTY_ATTRIBUTE, AttributeValue::Flag(true));
        for band in &self.template.bands {
            sentinel = sentinel.with_band(band.clone(), MaskedGrid::fully_masked(shape));
        }
        sentinel
    }
}

fn reduce_bucket(
    members: &[&RasterObservation],
    timestamp: DateTime<Utc>,
    reducer: Reducer,
) -> IndicatorResult<RasterObservation> {
    let band_names: BTreeSet<&String> = members.iter().flat_map(|o| o.bands.keys()).collect();
    let mut out = RasterObservation::new(format!("composite_{}", timestamp.format("%Y%m%d")), timestamp)
        .with_attribute("contributors", AttributeValue::Number(members.len() as f64));

    for name in band_names {
        let grids: Vec<&MaskedGrid> = members.iter().filter_map(|o| o.bands.get(name)).collect();
        let shape = grids[0].dim();
        if let Some(bad) = grids.iter().find(|g| g.dim() != shape) {
            return Err(IndicatorError::ShapeMismatch {
                expected: shape,
                actual: bad.dim(),
            });
        }

        let mut values = Array2::<f32>::zeros(shape);
        let mut valid = Array2::from_elem(shape, false);
        let mut stack: Vec<f32> = Vec::with_capacity(grids.len());
        for ((row, col), cell) in values.indexed_iter_mut() {
            stack.clear();
            stack.extend(grids.iter().filter_map(|g| g.get(row, col)));
            if let Some(v) = reducer.reduce(&mut stack) {
                *cell = v;
                valid[[row, col]] = true;
            }
        }
        out.bands.insert(name.clone(), MaskedGrid::new(values, valid)?);
    }
    Ok(out)
}
