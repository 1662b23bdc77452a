use ndarray::Array2;

use crate::core::reduction::RegionReducer;
use crate::core::region::{PixelArea, Region};
use crate::types::{GridGeometry, IndicatorError, IndicatorResult, MaskedGrid};

const M2_PER_KM2: f64 = 1e6;

/// Reduces a binary class layer to its ground area in km²
pub struct AreaAggregator {
    scale: f64,
    max_pixels: u64,
}

impl AreaAggregator {
    pub fn new(scale: f64, max_pixels: u64) -> Self {
        Self { scale, max_pixels }
    }

    /// Sum of per-cell ground area over valid class cells in `region`.
    ///
    /// A layer with no valid cell measures 0 km², not "unknown".
    pub fn area(
        &self,
        binary: &MaskedGrid,
        geometry: &GridGeometry,
        region: &Region,
        pixel_area: &dyn PixelArea,
        reducer: &dyn RegionReducer,
    ) -> IndicatorResult<f64> {
        if binary.dim() != geometry.shape() {
            return Err(IndicatorError::ShapeMismatch {
                expected: geometry.shape(),
                actual: binary.dim(),
            });
        }
        let cell_area = Array2::from_shape_fn(geometry.shape(), |(row, col)| {
            pixel_area.cell_area_m2(geometry, row, col) as f32
        });
        let weighted = MaskedGrid::new(binary.values() * &cell_area, binary.validity().clone())?;
        let m2 = reducer.reduce_sum(&weighted, geometry, region, self.scale, self.max_pixels)?;
        let km2 = m2.unwrap_or(0.0) / M2_PER_KM2;
        log::debug!("Classified area: {:.3} km² ({} valid cells)", km2, binary.valid_count());
        Ok(km2)
    }
}
