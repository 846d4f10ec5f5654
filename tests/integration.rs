use std::{f32::consts::FRAC_PI_8, path::Path};

use east_detect::{
    detect::{decode, to_image_boxes, GEOMETRY_CHANNELS, MAP_STRIDE},
    geometry::{restore_rectangle, sort_poly},
    lanms::{iou, merge_quadrangle_n9, ScoredQuad},
    util::resize_image,
    DetectionOptions, EastDetectorBuilder, Timings,
};
use ndarray::{Array2, Array3};

/// Paints a text region into synthetic maps. Every covered cell predicts the
/// box `(x0, y0)..(x1, y1)` in resized-image pixels.
fn paint_region(
    score: &mut Array2<f32>,
    geo: &mut Array3<f32>,
    cells: (std::ops::Range<usize>, std::ops::Range<usize>),
    (x0, y0, x1, y1): (f32, f32, f32, f32),
    value: f32,
) {
    let (rows, cols) = cells;
    for y in rows {
        for x in cols.clone() {
            let (px, py) = ((x * MAP_STRIDE) as f32, (y * MAP_STRIDE) as f32);
            score[[y, x]] = value;
            geo[[y, x, 0]] = py - y0;
            geo[[y, x, 1]] = x1 - px;
            geo[[y, x, 2]] = y1 - py;
            geo[[y, x, 3]] = px - x0;
            geo[[y, x, 4]] = 0.0;
        }
    }
}

#[test]
fn two_text_lines_decode_to_two_boxes() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (h, w) = (32, 64);
    let mut score = Array2::<f32>::zeros((h, w));
    let mut geo = Array3::<f32>::zeros((h, w, GEOMETRY_CHANNELS));
    paint_region(&mut score, &mut geo, (4..8, 4..40), (16.0, 16.0, 160.0, 32.0), 0.9);
    paint_region(&mut score, &mut geo, (20..26, 10..50), (40.0, 80.0, 200.0, 104.0), 0.95);

    let options = DetectionOptions::default();
    let mut timings = Timings::default();
    let boxes = decode(score.view(), geo.view(), &options, &mut timings);
    assert_eq!(boxes.len(), 2);

    let scale = resize_image(512, 256, 2400);
    assert_eq!((scale.target_width, scale.target_height), (512, 256));
    let mut boxes = to_image_boxes(boxes, scale, &options);
    boxes.sort_by(|a, b| a.quad.points()[0][1].total_cmp(&b.quad.points()[0][1]));

    let first = boxes[0].quad.points();
    assert!((first[0][0] - 16.0).abs() <= 1.0);
    assert!((first[2][0] - 160.0).abs() <= 1.0);
    let second = boxes[1].quad.points();
    assert!((second[0][1] - 80.0).abs() <= 1.0);
    assert!((second[2][1] - 104.0).abs() <= 1.0);
}

#[test]
fn rotated_candidates_merge_into_one() {
    // Pixels along the centre line of one box tilted by 22.5 degrees.
    let (sin, cos) = FRAC_PI_8.sin_cos();
    let candidates = (0..20)
        .map(|i| {
            let step = i as f32 * 4.0;
            let origin = [100.0 + step * cos, 160.0 - step * sin];
            let geometry = [10.0, 120.0 - i as f32 * 4.0, 10.0, 20.0 + i as f32 * 4.0, FRAC_PI_8];
            ScoredQuad::new(restore_rectangle(origin, geometry), 0.9)
        })
        .collect::<Vec<_>>();
    let merged = merge_quadrangle_n9(&candidates, 0.2);
    assert_eq!(merged.len(), 1);
    assert!(iou(&merged[0].quad, &candidates[0].quad) > 0.8);

    let sorted = sort_poly(merged[0].quad);
    assert!(sorted.edge_len(0, 1) > sorted.edge_len(1, 2));
}

#[test]
fn detects_text_with_model() {
    let _ = env_logger::builder().is_test(true).try_init();

    let model = Path::new("tests/data/models/east.onnx");
    let image = Path::new("tests/data/test_image.png");
    if !model.exists() || !image.exists() {
        eprintln!("skipping: {} or {} not found", model.display(), image.display());
        return;
    }
    let detector = EastDetectorBuilder::new()
        .model(model)
        .max_side_len(1280)
        .build()
        .expect("Failed to build detector");
    let (_, detection) = detector
        .detect_file(image, DetectionOptions::default())
        .expect("Failed detection.");
    log::debug!("{:?}", detection.timings);
    assert!(!detection.boxes.is_empty());
    for text_box in &detection.boxes {
        assert!(text_box.score > 0.1);
        assert!(text_box.quad.edge_len(0, 1) >= 5.0);
    }
}
