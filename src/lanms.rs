//! Locality-aware non-maximum suppression.
//!
//! Dense per-pixel predictions produce many near-identical boxes for each text
//! line. Neighbouring candidates (in row order) are first merged by a
//! score-weighted average of their vertices, then a regular polygon NMS pass
//! removes what is left over.

use float_ord::FloatOrd;
use geo::Area;
use geo_clipper::Clipper;
use tracing::instrument;

use crate::geometry::Quad;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredQuad {
    pub quad: Quad,
    pub score: f32,
}

impl ScoredQuad {
    pub fn new(quad: Quad, score: f32) -> Self {
        Self { quad, score }
    }
}

/// Intersection over union of two quads on whole-pixel vertices. Returns 0
/// when the union is empty.
pub fn iou(a: &Quad, b: &Quad) -> f32 {
    let a = a.truncate().to_polygon();
    let b = b.truncate().to_polygon();
    let inter = a.intersection(&b, 1.0).unsigned_area();
    let union = a.unsigned_area() + b.unsigned_area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[derive(Default)]
struct PolyMerger {
    data: [f32; 8],
    score: f32,
    count: usize,
}

impl PolyMerger {
    fn add(&mut self, item: &ScoredQuad) {
        let quad = if self.count > 0 {
            normalize_poly(&self.get().quad, &item.quad)
        } else {
            item.quad
        };
        for (i, [x, y]) in quad.points().iter().enumerate() {
            self.data[i * 2] += x * item.score;
            self.data[i * 2 + 1] += y * item.score;
        }
        self.score += item.score;
        self.count += 1;
    }

    /// Weighted average of the added quads, truncated to whole pixels.
    fn get(&self) -> ScoredQuad {
        let inv = 1.0 / self.score.max(1e-8);
        let d = &self.data;
        ScoredQuad {
            quad: Quad([
                [d[0] * inv, d[1] * inv],
                [d[2] * inv, d[3] * inv],
                [d[4] * inv, d[5] * inv],
                [d[6] * inv, d[7] * inv],
            ])
            .truncate(),
            score: self.score,
        }
    }
}

/// Cyclically shifts the vertices of `quad` to the order that minimises the
/// total squared distance to `reference`.
fn normalize_poly(reference: &Quad, quad: &Quad) -> Quad {
    let r = reference.points();
    let p = quad.points();
    let shift = (0..4)
        .min_by_key(|&start| {
            let dist = (0..4)
                .map(|i| {
                    let [x, y] = p[(start + i) % 4];
                    let dx = r[i][0] - x;
                    let dy = r[i][1] - y;
                    dx * dx + dy * dy
                })
                .sum::<f32>();
            FloatOrd(dist)
        })
        .unwrap_or(0);
    Quad([0, 1, 2, 3].map(|i| p[(shift + i) % 4]))
}

fn merge(a: &ScoredQuad, b: &ScoredQuad) -> ScoredQuad {
    let mut merger = PolyMerger::default();
    merger.add(a);
    merger.add(b);
    merger.get()
}

/// Plain polygon NMS. Output is sorted by score, highest first.
pub fn standard_nms(polys: &[ScoredQuad], iou_threshold: f32) -> Vec<ScoredQuad> {
    let mut order = (0..polys.len()).collect::<Vec<_>>();
    order.sort_by_key(|&i| std::cmp::Reverse(FloatOrd(polys[i].score)));

    let mut keep = Vec::new();
    while !order.is_empty() {
        let kept = polys[order.remove(0)];
        keep.push(kept);
        order.retain(|&i| iou(&kept.quad, &polys[i].quad) <= iou_threshold);
    }
    keep
}

/// Merges consecutive overlapping quads, then suppresses the remainder.
///
/// Input vertices are truncated to whole pixels before any comparison.
#[instrument(level = "debug", skip(boxes), fields(candidates = boxes.len()))]
pub fn merge_quadrangle_n9(boxes: &[ScoredQuad], iou_threshold: f32) -> Vec<ScoredQuad> {
    let mut polys: Vec<ScoredQuad> = Vec::new();
    for item in boxes {
        let item = ScoredQuad::new(item.quad.truncate(), item.score);
        match polys.last_mut() {
            Some(last) if iou(&item.quad, &last.quad) > iou_threshold => {
                *last = merge(last, &item);
            }
            _ => polys.push(item),
        }
    }
    log::trace!("{} polygons after locality merge", polys.len());
    standard_nms(&polys, iou_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Quad {
        Quad([[x0, y0], [x1, y0], [x1, y1], [x0, y1]])
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(5.0, 0.0, 15.0, 10.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-4);
        assert_eq!(iou(&a, &rect(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn iou_of_degenerate_quads_is_zero() {
        let a = rect(0.0, 0.0, 0.0, 0.0);
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn neighbours_merge_with_score_weights() {
        let boxes = [
            ScoredQuad::new(rect(0.0, 0.0, 10.0, 10.0), 1.0),
            ScoredQuad::new(rect(3.0, 0.0, 13.0, 10.0), 3.0),
        ];
        let merged = merge_quadrangle_n9(&boxes, 0.2);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, 4.0);
        assert_eq!(merged[0].quad, rect(2.0, 0.0, 12.0, 10.0));
    }

    #[test]
    fn iou_of_fractional_quad_with_itself_is_one() {
        let a = rect(0.4, 0.4, 10.6, 10.6);
        assert_eq!(iou(&a, &a), 1.0);
    }

    #[test]
    fn merged_quads_stay_on_whole_pixels() {
        let boxes = [
            ScoredQuad::new(rect(0.0, 0.0, 10.0, 10.0), 0.7),
            ScoredQuad::new(rect(1.0, 1.0, 11.0, 11.0), 0.9),
            ScoredQuad::new(rect(2.0, 1.0, 12.0, 11.0), 0.8),
        ];
        let merged = merge_quadrangle_n9(&boxes, 0.2);
        assert_eq!(merged.len(), 1);
        for [x, y] in merged[0].quad.points() {
            assert_eq!(x.fract(), 0.0);
            assert_eq!(y.fract(), 0.0);
        }
    }

    #[test]
    fn overlap_equal_to_threshold_is_not_merged() {
        // IoU of these two is exactly one half.
        let boxes = [
            ScoredQuad::new(rect(0.0, 0.0, 10.0, 10.0), 0.6),
            ScoredQuad::new(rect(0.0, 0.0, 10.0, 20.0), 0.9),
        ];
        assert_eq!(iou(&boxes[0].quad, &boxes[1].quad), 0.5);
        let kept = merge_quadrangle_n9(&boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0], boxes[1]);
        assert_eq!(kept[1], boxes[0]);

        let kept = standard_nms(&boxes, 0.5);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn vertex_order_is_aligned_before_merging() {
        let a = ScoredQuad::new(rect(0.0, 0.0, 10.0, 10.0), 1.0);
        let shifted = Quad([[10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]]);
        let b = ScoredQuad::new(shifted, 1.0);
        let merged = merge(&a, &b);
        assert_eq!(merged.quad, a.quad);
    }

    #[test]
    fn distant_boxes_survive_sorted_by_score() {
        let boxes = [
            ScoredQuad::new(rect(0.0, 0.0, 10.0, 10.0), 0.5),
            ScoredQuad::new(rect(50.0, 0.0, 60.0, 10.0), 0.9),
        ];
        let kept = merge_quadrangle_n9(&boxes, 0.2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn non_adjacent_duplicates_are_suppressed() {
        let boxes = [
            ScoredQuad::new(rect(0.0, 0.0, 10.0, 10.0), 0.5),
            ScoredQuad::new(rect(50.0, 0.0, 60.0, 10.0), 0.9),
            ScoredQuad::new(rect(1.0, 0.0, 11.0, 10.0), 0.7),
        ];
        let kept = merge_quadrangle_n9(&boxes, 0.2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(merge_quadrangle_n9(&[], 0.2).is_empty());
    }
}
