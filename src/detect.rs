use std::time::Instant;

use ndarray::{ArrayView2, ArrayView3};
use tracing::instrument;

use crate::{
    geometry::{restore_rectangle, sort_poly},
    lanms::{merge_quadrangle_n9, ScoredQuad},
    util::{polygon_mean, quad_to_map_cells, Scale},
    DetectionOptions, TextBox, Timings,
};

/// Score and geometry maps are predicted at a quarter of the input resolution.
pub const MAP_STRIDE: usize = 4;

/// Number of map channels holding box geometry.
pub const GEOMETRY_CHANNELS: usize = 5;

/// Turns the raw network maps into scored boxes in resized-image coordinates.
///
/// `score_map` is `H x W`, `geo_map` is `H x W x 5` holding the distances to
/// the top, right, bottom and left edges followed by the rotation angle.
#[instrument(level = "debug", skip_all)]
pub fn decode(
    score_map: ArrayView2<f32>,
    geo_map: ArrayView3<f32>,
    options: &DetectionOptions,
    timings: &mut Timings,
) -> Vec<ScoredQuad> {
    let start = Instant::now();
    let candidates = score_map
        .indexed_iter()
        .filter(|(_, score)| **score > options.score_map_threshold)
        .map(|((y, x), score)| {
            let origin = [(x * MAP_STRIDE) as f32, (y * MAP_STRIDE) as f32];
            let geo = geo_map.slice(ndarray::s![y, x, ..]);
            let geometry = [geo[0], geo[1], geo[2], geo[3], geo[4]];
            ScoredQuad::new(restore_rectangle(origin, geometry), *score)
        })
        .collect::<Vec<_>>();
    log::debug!("{} text boxes before nms", candidates.len());
    timings.restore = start.elapsed();

    let start = Instant::now();
    let boxes = merge_quadrangle_n9(&candidates, options.nms_threshold);
    timings.nms = start.elapsed();

    // Re-score by the average score map inside each box; weak boxes that only
    // survived through merging are dropped here.
    boxes
        .into_iter()
        .map(|b| {
            let cells = quad_to_map_cells(&b.quad, MAP_STRIDE as i32);
            ScoredQuad::new(b.quad, polygon_mean(&cells, score_map))
        })
        .filter(|b| b.score > options.box_threshold)
        .collect()
}

/// Maps decoded boxes back onto the source image, orders their vertices and
/// drops boxes with a side shorter than `options.min_edge`.
pub fn to_image_boxes(
    boxes: Vec<ScoredQuad>,
    scale: Scale,
    options: &DetectionOptions,
) -> Vec<TextBox> {
    boxes
        .into_iter()
        .filter_map(|ScoredQuad { quad, score }| {
            let quad = quad
                .map(|[x, y]| [x / scale.ratio_w, y / scale.ratio_h])
                .truncate();
            let quad = sort_poly(quad);
            if quad.edge_len(0, 1) < options.min_edge || quad.edge_len(3, 0) < options.min_edge {
                log::trace!("Dropping undersized box {quad:?}");
                return None;
            }
            Some(TextBox {
                score,
                quad: quad.pad(options.padding_horizontal, options.padding_vertical),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Quad;
    use ndarray::{Array2, Array3};

    fn options() -> DetectionOptions {
        DetectionOptions::default()
    }

    /// A single 24x8 map-cell text region whose pixels all point at the same
    /// axis-aligned box.
    fn synthetic_maps() -> (Array2<f32>, Array3<f32>) {
        let (h, w) = (16, 32);
        let mut score = Array2::<f32>::zeros((h, w));
        let mut geo = Array3::<f32>::zeros((h, w, GEOMETRY_CHANNELS));
        let (x0, y0, x1, y1) = (16.0f32, 16.0f32, 112.0f32, 48.0f32);
        for y in 4..12 {
            for x in 4..28 {
                score[[y, x]] = 0.95;
                let (px, py) = ((x * MAP_STRIDE) as f32, (y * MAP_STRIDE) as f32);
                geo[[y, x, 0]] = py - y0;
                geo[[y, x, 1]] = x1 - px;
                geo[[y, x, 2]] = y1 - py;
                geo[[y, x, 3]] = px - x0;
            }
        }
        (score, geo)
    }

    #[test]
    fn decodes_one_box_from_a_region() {
        let (score, geo) = synthetic_maps();
        let mut timings = Timings::default();
        let boxes = decode(score.view(), geo.view(), &options(), &mut timings);
        assert_eq!(boxes.len(), 1);
        let [x, y] = boxes[0].quad.points()[0];
        assert!((x - 16.0).abs() <= 1.0 && (y - 16.0).abs() <= 1.0);
        assert!(boxes[0].score > 0.1);
    }

    #[test]
    fn below_threshold_maps_yield_nothing() {
        let (mut score, geo) = synthetic_maps();
        score.mapv_inplace(|v| v * 0.5);
        let boxes = decode(score.view(), geo.view(), &options(), &mut Timings::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn weak_area_is_filtered_by_mean_score() {
        let (score, geo) = synthetic_maps();
        let mut options = options();
        options.box_threshold = 0.99;
        let boxes = decode(score.view(), geo.view(), &options, &mut Timings::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn boxes_are_rescaled_and_small_ones_dropped() {
        let scale = Scale {
            ratio_w: 0.5,
            ratio_h: 0.25,
            target_width: 64,
            target_height: 32,
        };
        let boxes = vec![
            ScoredQuad::new(
                Quad::new([[20.0, 8.0], [10.0, 8.0], [10.0, 4.0], [20.0, 4.0]]),
                0.9,
            ),
            ScoredQuad::new(
                Quad::new([[0.0, 0.0], [2.0, 0.0], [2.0, 1.0], [0.0, 1.0]]),
                0.8,
            ),
        ];
        let out = to_image_boxes(boxes, scale, &options());
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].quad.points(),
            &[[20.0, 16.0], [40.0, 16.0], [40.0, 32.0], [20.0, 32.0]]
        );
    }
}
