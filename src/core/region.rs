use geo::{BoundingRect, Contains, GeodesicArea, LineString, Point, Polygon, Rect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, GridGeometry, ValidityGrid};

/// Region of interest: a lon/lat polygon (x = lon, y = lat)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub polygon: Polygon<f64>,
}

impl Region {
    /// Polygon from exterior ring vertices; the ring is closed if needed
    pub fn new(vertices: Vec<[f64; 2]>) -> Self {
        Self {
            polygon: Polygon::new(LineString::from(vertices), vec![]),
        }
    }

    /// Axis-aligned rectangle, handy for synthetic grids
    pub fn from_bounds(bounds: BoundingBox) -> Self {
        Self {
            polygon: Rect::new(
                (bounds.min_lon, bounds.min_lat),
                (bounds.max_lon, bounds.max_lat),
            )
            .to_polygon(),
        }
    }

    /// Exterior ring length, closing vertex included
    pub fn vertex_count(&self) -> usize {
        self.polygon.exterior().0.len()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.polygon.bounding_rect().map(|rect| BoundingBox {
            min_lon: rect.min().x,
            max_lon: rect.max().x,
            min_lat: rect.min().y,
            max_lat: rect.max().y,
        })
    }

    /// Interior test; points on the boundary are outside
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.polygon.contains(&Point::new(lon, lat))
    }

    /// Rasterise onto a grid by cell-centre inclusion
    pub fn mask(&self, geometry: &GridGeometry) -> ValidityGrid {
        let bbox = match self.bounding_box() {
            Some(bbox) => bbox,
            None => return Array2::from_elem(geometry.shape(), false),
        };
        Array2::from_shape_fn(geometry.shape(), |(row, col)| {
            let (lon, lat) = geometry.geo_transform.cell_center(row, col);
            bbox.contains(lon, lat) && self.contains(lon, lat)
        })
    }
}

/// Per-cell ground area provider
pub trait PixelArea: Send + Sync {
    fn cell_area_m2(&self, geometry: &GridGeometry, row: usize, col: usize) -> f64;
}

/// Constant cell area for projected (equal-area) grids
#[derive(Debug, Clone, Copy)]
pub struct UniformPixelArea {
    pub cell_size_m: f64,
}

impl PixelArea for UniformPixelArea {
    fn cell_area_m2(&self, _geometry: &GridGeometry, _row: usize, _col: usize) -> f64 {
        self.cell_size_m * self.cell_size_m
    }
}

/// Ellipsoidal (WGS84) area of lon/lat cells: shrinks towards the poles
#[derive(Debug, Clone, Copy, Default)]
pub struct GeodesicPixelArea;

impl PixelArea for GeodesicPixelArea {
    fn cell_area_m2(&self, geometry: &GridGeometry, row: usize, col: usize) -> f64 {
        let gt = &geometry.geo_transform;
        let (lat_a, lat_b) = gt.row_lat_bounds(row);
        let lon_a = gt.top_left_x + col as f64 * gt.pixel_width;
        let lon_b = lon_a + gt.pixel_width;
        Rect::new((lon_a, lat_a), (lon_b, lat_b))
            .to_polygon()
            .geodesic_area_unsigned()
    }
}
