//! Imagery archive access: query contract and an in-memory catalogue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::region::Region;
use crate::types::{AttributeValue, IndicatorResult, ObservationSet, RasterObservation};

/// Attribute predicate applied to archive results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeFilter {
    Eq(String, AttributeValue),
    Lt(String, f64),
    Gt(String, f64),
    ListContains(String, String),
}

impl AttributeFilter {
    pub fn eq(key: &str, value: AttributeValue) -> Self {
        AttributeFilter::Eq(key.to_string(), value)
    }

    pub fn lt(key: &str, value: f64) -> Self {
        AttributeFilter::Lt(key.to_string(), value)
    }

    pub fn list_contains(key: &str, item: &str) -> Self {
        AttributeFilter::ListContains(key.to_string(), item.to_string())
    }

    /// Observations lacking the attribute never match
    pub fn matches(&self, observation: &RasterObservation) -> bool {
        match self {
            AttributeFilter::Eq(key, expected) => observation.attribute(key) == Some(expected),
            AttributeFilter::Lt(key, limit) => matches!(
                observation.attribute(key),
                Some(AttributeValue::Number(v)) if v < limit
            ),
            AttributeFilter::Gt(key, limit) => matches!(
                observation.attribute(key),
                Some(AttributeValue::Number(v)) if v > limit
            ),
            AttributeFilter::ListContains(key, item) => matches!(
                observation.attribute(key),
                Some(AttributeValue::List(items)) if items.iter().any(|i| i == item)
            ),
        }
    }
}

/// Archive query: collection, half-open date range, region and filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveQuery {
    pub collection_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub region: Region,
    pub filters: Vec<AttributeFilter>,
}

impl ArchiveQuery {
    pub fn new(collection_id: &str, start: DateTime<Utc>, end: DateTime<Utc>, region: Region) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            start,
            end,
            region,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: AttributeFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn matches(&self, observation: &RasterObservation) -> bool {
        observation.timestamp >= self.start
            && observation.timestamp < self.end
            && self.filters.iter().all(|f| f.matches(observation))
    }
}

/// Source of raster observations. Collection ids are opaque keys.
pub trait ObservationArchive: Send + Sync {
    fn query(&self, query: &ArchiveQuery) -> IndicatorResult<ObservationSet>;
}

/// Archive backed by observations held in memory. Every observation is
/// assumed to cover the grid the engine runs on.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArchive {
    collections: HashMap<String, Vec<RasterObservation>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection_id: &str, observation: RasterObservation) {
        self.collections
            .entry(collection_id.to_string())
            .or_default()
            .push(observation);
    }

    pub fn with_collection(mut self, collection_id: &str, observations: Vec<RasterObservation>) -> Self {
        self.collections
            .entry(collection_id.to_string())
            .or_default()
            .extend(observations);
        self
    }
}

impl ObservationArchive for InMemoryArchive {
    fn query(&self, query: &ArchiveQuery) -> IndicatorResult<ObservationSet> {
        let mut found: ObservationSet = self
            .collections
            .get(&query.collection_id)
            .map(|all| all.iter().filter(|o| query.matches(o)).cloned().collect())
            .unwrap_or_default();
        found.sort_by_key(|o| o.timestamp);
        log::debug!(
            "Archive query on {} returned {} observations",
            query.collection_id,
            found.len()
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MaskedGrid;
    use chrono::TimeZone;
    use ndarray::Array2;

    fn scene(id: &str, day: u32, cloud: f64, pass: &str) -> RasterObservation {
        RasterObservation::new(id, Utc.with_ymd_and_hms(2025, 5, day, 0, 0, 0).unwrap())
            .with_band("VV", MaskedGrid::from_values(Array2::zeros((1, 1))))
            .with_attribute("CLOUDY_PIXEL_PERCENTAGE", AttributeValue::Number(cloud))
            .with_attribute("orbitProperties_pass", AttributeValue::Text(pass.to_string()))
            .with_attribute(
                "transmitterReceiverPolarisation",
                AttributeValue::List(vec!["VV".to_string(), "VH".to_string()]),
            )
    }

    #[test]
    fn test_query_filters_dates_and_attributes() {
        let archive = InMemoryArchive::new().with_collection(
            "S1",
            vec![
                scene("c", 20, 10.0, "DESCENDING"),
                scene("a", 2, 10.0, "DESCENDING"),
                scene("b", 3, 90.0, "ASCENDING"),
                scene("d", 31, 10.0, "DESCENDING"),
            ],
        );
        let query = ArchiveQuery::new(
            "S1",
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 5, 31, 0, 0, 0).unwrap(),
            Region::new(vec![]),
        )
        .filter(AttributeFilter::eq(
            "orbitProperties_pass",
            AttributeValue::Text("DESCENDING".to_string()),
        ))
        .filter(AttributeFilter::lt("CLOUDY_PIXEL_PERCENTAGE", 80.0))
        .filter(AttributeFilter::list_contains("transmitterReceiverPolarisation", "VV"));

        let ids: Vec<String> = archive.query(&query).unwrap().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_unknown_collection_is_empty() {
        let query = ArchiveQuery::new(
            "missing",
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            Region::new(vec![]),
        );
        assert!(InMemoryArchive::new().query(&query).unwrap().is_empty());
    }

    #[test]
    fn test_missing_attribute_never_matches() {
        let obs = RasterObservation::new("x", Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap());
        assert!(!AttributeFilter::lt("CLOUDY_PIXEL_PERCENTAGE", 80.0).matches(&obs));
    }
}
