use std::time::Duration;

use geo::Polygon;
use serde::Serialize;

use crate::geometry::Quad;

#[derive(Debug, Clone, Serialize)]
pub struct TextBox {
    pub score: f32,
    pub quad: Quad,
}

impl TextBox {
    pub fn rect(&self) -> Polygon<f32> {
        self.quad.to_polygon()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub net: Duration,
    pub restore: Duration,
    pub nms: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub boxes: Vec<TextBox>,
    pub timings: Timings,
}
