//! Day-of-year climatology and anomalies for scalar series

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{ScalarSeries, SeriesPoint};

/// How day 366 of leap years is keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeapDayPolicy {
    /// Plain ordinal day; 366 is its own bucket
    #[default]
    Ordinal,
    /// Day 366 is merged into day 365, in the baseline and for targets
    FoldDay366,
}

impl LeapDayPolicy {
    pub fn day_key(&self, date: NaiveDate) -> u32 {
        let doy = date.ordinal();
        match self {
            LeapDayPolicy::FoldDay366 if doy == 366 => 365,
            _ => doy,
        }
    }
}

/// Mean value per day-of-year (1..=366). Days with no baseline observation
/// are absent, never zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClimatologyBaseline {
    pub means: BTreeMap<u32, f64>,
    pub policy: LeapDayPolicy,
}

impl ClimatologyBaseline {
    pub fn get(&self, day_of_year: u32) -> Option<f64> {
        self.means.get(&day_of_year).copied()
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Builds day-of-year baselines and anomalies against them
#[derive(Debug, Clone, Copy, Default)]
pub struct ClimatologyAnomalyEngine {
    policy: LeapDayPolicy,
}

impl ClimatologyAnomalyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: LeapDayPolicy) -> Self {
        Self { policy }
    }

    /// Mean per day-of-year over points dated in `[baseline_start, baseline_end]`.
    /// Null values do not contribute.
    pub fn build_baseline(
        &self,
        series: &ScalarSeries,
        baseline_start: NaiveDate,
        baseline_end: NaiveDate,
    ) -> ClimatologyBaseline {
        let mut sums: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
        for point in &series.points {
            if point.date < baseline_start || point.date > baseline_end {
                continue;
            }
            if let Some(value) = point.value {
                let entry = sums.entry(self.policy.day_key(point.date)).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        let means: BTreeMap<u32, f64> = sums
            .into_iter()
            .map(|(day, (sum, n))| (day, sum / n as f64))
            .collect();
        log::info!(
            "Climatology baseline {}..={}: {} of 366 days populated",
            baseline_start,
            baseline_end,
            means.len()
        );
        ClimatologyBaseline {
            means,
            policy: self.policy,
        }
    }

    /// `value - baseline[day_of_year]` per point; null when either side is missing
    pub fn anomaly(&self, series: &ScalarSeries, baseline: &ClimatologyBaseline) -> ScalarSeries {
        let mut missing = 0usize;
        let points = series
            .points
            .iter()
            .map(|point| {
                let reference = baseline.get(baseline.policy.day_key(point.date));
                let value = match (point.value, reference) {
                    (Some(v), Some(r)) => Some(v - r),
                    _ => {
                        missing += 1;
                        None
                    }
                };
                SeriesPoint {
                    label: point.label.clone(),
                    date: point.date,
                    value,
                }
            })
            .collect();
        if missing > 0 {
            log::warn!("{} of {} anomaly steps have no computable value", missing, series.len());
        }
        ScalarSeries { points }
    }
}
