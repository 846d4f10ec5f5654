use geo::{Coord, LineString, Polygon};
use serde::Serialize;

/// Four corners of a (possibly rotated) text box, clockwise in image space
/// when produced by [`restore_rectangle`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Quad(pub [[f32; 2]; 4]);

impl Quad {
    pub fn new(points: [[f32; 2]; 4]) -> Self {
        Self(points)
    }

    pub fn points(&self) -> &[[f32; 2]; 4] {
        &self.0
    }

    /// Length of the edge from vertex `from` to vertex `to`.
    pub fn edge_len(&self, from: usize, to: usize) -> f32 {
        let [x0, y0] = self.0[from];
        let [x1, y1] = self.0[to];
        (x1 - x0).hypot(y1 - y0)
    }

    pub fn map(self, f: impl FnMut([f32; 2]) -> [f32; 2]) -> Self {
        Self(self.0.map(f))
    }

    pub fn truncate(self) -> Self {
        self.map(|[x, y]| [x.trunc(), y.trunc()])
    }

    pub fn to_polygon(&self) -> Polygon<f32> {
        let coords = self.0.iter().map(|&[x, y]| Coord { x, y }).collect();
        Polygon::new(LineString::new(coords), vec![])
    }

    /// Grows the quad along its own edge directions. `horizontal` and
    /// `vertical` are fractions of the `p0 -> p1` and `p0 -> p3` edge lengths
    /// added on each side.
    pub fn pad(self, horizontal: f32, vertical: f32) -> Self {
        if horizontal == 0.0 && vertical == 0.0 {
            return self;
        }
        let [p0, p1, p2, p3] = self.0;
        let along = [
            ((p1[0] - p0[0]) + (p2[0] - p3[0])) * 0.5,
            ((p1[1] - p0[1]) + (p2[1] - p3[1])) * 0.5,
        ];
        let across = [
            ((p3[0] - p0[0]) + (p2[0] - p1[0])) * 0.5,
            ((p3[1] - p0[1]) + (p2[1] - p1[1])) * 0.5,
        ];
        let dx = [along[0] * horizontal, along[1] * horizontal];
        let dy = [across[0] * vertical, across[1] * vertical];
        let shift = |p: [f32; 2], sx: f32, sy: f32| {
            [
                p[0] + sx * dx[0] + sy * dy[0],
                p[1] + sx * dx[1] + sy * dy[1],
            ]
        };
        Self([
            shift(p0, -1.0, -1.0),
            shift(p1, 1.0, -1.0),
            shift(p2, 1.0, 1.0),
            shift(p3, -1.0, 1.0),
        ])
    }
}

/// Reconstructs a rotated box from a pixel's predicted distances to the box
/// edges `(top, right, bottom, left)` and its rotation `angle` in radians.
///
/// `origin` is the pixel location in input image coordinates.
pub fn restore_rectangle(origin: [f32; 2], geometry: [f32; 5]) -> Quad {
    let [top, right, bottom, left, angle] = geometry;
    let height = top + bottom;
    let width = right + left;

    let (template, anchor) = if angle >= 0.0 {
        (
            [[0.0, -height], [width, -height], [width, 0.0], [0.0, 0.0]],
            [left, -bottom],
        )
    } else {
        (
            [[-width, -height], [0.0, -height], [0.0, 0.0], [-width, 0.0]],
            [-right, -bottom],
        )
    };

    let (sin, cos) = angle.sin_cos();
    let rotate = |[x, y]: [f32; 2]| [cos * x + sin * y, -sin * x + cos * y];

    let anchor = rotate(anchor);
    let offset = [origin[0] - anchor[0], origin[1] - anchor[1]];
    Quad(template.map(|p| {
        let [x, y] = rotate(p);
        [x + offset[0], y + offset[1]]
    }))
}

/// Orders the vertices so the one closest to the top-left comes first and
/// the first edge is the long, roughly horizontal one.
pub fn sort_poly(quad: Quad) -> Quad {
    let points = quad.0;
    let mut min_axis = 0;
    for (i, [x, y]) in points.iter().enumerate() {
        let [mx, my] = points[min_axis];
        if x + y < mx + my {
            min_axis = i;
        }
    }
    let p = [0, 1, 2, 3].map(|i| points[(min_axis + i) % 4]);
    if (p[0][0] - p[1][0]).abs() > (p[0][1] - p[1][1]).abs() {
        Quad(p)
    } else {
        Quad([p[0], p[3], p[2], p[1]])
    }
}
