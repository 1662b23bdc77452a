use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::types::{IndicatorError, IndicatorResult, MaskedGrid, RasterObservation, ValidityGrid};

/// Sentinel-2 scene classification code for cloud shadow
pub const SCL_CLOUD_SHADOW: u8 = 3;

/// Cloud/shadow masking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudMaskParams {
    /// Cells with probability strictly above this are cloudy (0-100)
    pub probability_threshold: f32,
    /// Scene-classification class code for cloud shadow
    pub shadow_class: u8,
    /// Name of the scene-classification band
    pub scl_band: String,
    /// Name of the probability band in the auxiliary layer
    pub probability_band: String,
}

impl Default for CloudMaskParams {
    fn default() -> Self {
        Self {
            probability_threshold: 40.0,
            shadow_class: SCL_CLOUD_SHADOW,
            scl_band: "SCL".to_string(),
            probability_band: "probability".to_string(),
        }
    }
}

/// Join table from scene id to its cloud-probability layer
#[derive(Debug, Clone, Default)]
pub struct CloudProbabilityIndex {
    layers: HashMap<String, MaskedGrid>,
}

impl CloudProbabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, layer: MaskedGrid) {
        self.layers.insert(key.into(), layer);
    }

    /// Build the join table from an auxiliary collection, keyed by scene id.
    /// The first layer seen for a key wins.
    pub fn from_observations(
        auxiliary: &[RasterObservation],
        probability_band: &str,
    ) -> IndicatorResult<Self> {
        let mut index = Self::new();
        for obs in auxiliary {
            let layer = obs.band(probability_band)?;
            index
                .layers
                .entry(obs.id.clone())
                .or_insert_with(|| layer.clone());
        }
        log::debug!("Cloud probability join table holds {} layers", index.len());
        Ok(index)
    }

    pub fn get(&self, key: &str) -> Option<&MaskedGrid> {
        self.layers.get(key)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Masks optical observations with a joined cloud-probability layer and the
/// cloud-shadow class of the scene classification band.
pub struct CloudShadowMasker {
    params: CloudMaskParams,
}

impl CloudShadowMasker {
    pub fn new() -> Self {
        Self {
            params: CloudMaskParams::default(),
        }
    }

    pub fn with_params(params: CloudMaskParams) -> Self {
        Self { params }
    }

    /// Mask one observation. A missing auxiliary layer is a `JoinMismatch`.
    pub fn mask(
        &self,
        observation: &RasterObservation,
        index: &CloudProbabilityIndex,
    ) -> IndicatorResult<RasterObservation> {
        let probability = index.get(&observation.id).ok_or_else(|| {
            IndicatorError::JoinMismatch {
                key: observation.id.clone(),
            }
        })?;
        let scl = observation.band(&self.params.scl_band)?;
        if probability.dim() != scl.dim() {
            return Err(IndicatorError::ShapeMismatch {
                expected: scl.dim(),
                actual: probability.dim(),
            });
        }

        let threshold = self.params.probability_threshold;
        let shadow = self.params.shadow_class as f32;
        let mut keep = ValidityGrid::from_elem(scl.dim(), true);
        // A cell with no probability or no class value cannot be shown clear
        Zip::from(&mut keep)
            .and(probability.values())
            .and(probability.validity())
            .and(scl.values())
            .and(scl.validity())
            .for_each(|k, &p, &p_ok, &c, &c_ok| {
                let cloudy = p > threshold;
                let shadowed = c == shadow;
                *k = p_ok && c_ok && !(cloudy || shadowed);
            });

        let masked = apply_keep_mask(observation, &keep)?;
        log::debug!(
            "Masked scene {}: {} of {} cells kept",
            observation.id,
            keep.iter().filter(|&&k| k).count(),
            keep.len()
        );
        Ok(masked)
    }

    /// Mask a whole set, failing loudly on the first missing join
    pub fn mask_all(
        &self,
        observations: &[RasterObservation],
        index: &CloudProbabilityIndex,
    ) -> IndicatorResult<Vec<RasterObservation>> {
        log::info!("Applying cloud/shadow mask to {} scenes", observations.len());
        observations
            .iter()
            .map(|obs| self.mask(obs, index))
            .collect()
    }
}

impl Default for CloudShadowMasker {
    fn default() -> Self {
        Self::new()
    }
}

/// Masks purely from the scene classification band, for archives with no
/// cloud-probability product.
pub struct SceneClassMasker {
    scl_band: String,
    excluded: BTreeSet<u8>,
}

impl SceneClassMasker {
    /// Shadow, medium and high cloud probability, thin cirrus
    pub fn new() -> Self {
        Self::with_classes("SCL", [3, 8, 9, 10])
    }

    pub fn with_classes(scl_band: impl Into<String>, classes: impl IntoIterator<Item = u8>) -> Self {
        Self {
            scl_band: scl_band.into(),
            excluded: classes.into_iter().collect(),
        }
    }

    pub fn mask(&self, observation: &RasterObservation) -> IndicatorResult<RasterObservation> {
        let scl = observation.band(&self.scl_band)?;
        let keep = Zip::from(scl.values())
            .and(scl.validity())
            .map_collect(|&c, &ok| {
                let class = c.round();
                ok && !(class >= 0.0 && class <= u8::MAX as f32 && self.excluded.contains(&(class as u8)))
            });
        apply_keep_mask(observation, &keep)
    }
}

impl Default for SceneClassMasker {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_keep_mask(
    observation: &RasterObservation,
    keep: &ValidityGrid,
) -> IndicatorResult<RasterObservation> {
    let mut out = RasterObservation::new(observation.id.clone(), observation.timestamp);
    out.attributes = observation.attributes.clone();
    for (name, grid) in &observation.bands {
        out.bands.insert(name.clone(), grid.update_mask(keep)?);
    }
    Ok(out)
}
