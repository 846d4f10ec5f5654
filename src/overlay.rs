use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::TextBox;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Draws every box as a closed polyline on a copy of `image`.
///
/// Thick lines are drawn as several one pixel lines shifted around the edge.
pub fn draw_boxes(
    image: &DynamicImage,
    boxes: &[TextBox],
    color: Rgb<u8>,
    thickness: u32,
) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let thickness = thickness.max(1) as i32;
    let offsets = (0..thickness).map(|i| (i - (thickness - 1) / 2) as f32);

    for text_box in boxes {
        let points = text_box.quad.points();
        for i in 0..points.len() {
            let [x0, y0] = points[i];
            let [x1, y1] = points[(i + 1) % points.len()];
            for dy in offsets.clone() {
                for dx in offsets.clone() {
                    draw_line_segment_mut(
                        &mut canvas,
                        (x0 + dx, y0 + dy),
                        (x1 + dx, y1 + dy),
                        color,
                    );
                }
            }
        }
    }
    canvas
}
