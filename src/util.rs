use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::{
    drawing::{draw_line_segment_mut, draw_polygon_mut},
    point::Point,
};
use ndarray::{Array4, ArrayView2, Axis};
use tracing::instrument;

use crate::geometry::Quad;

/// The network downsamples by 32, so both input sides must be multiples of it.
const SIDE_MULTIPLE: i64 = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub ratio_w: f32,
    pub ratio_h: f32,
    pub target_width: u32,
    pub target_height: u32,
}

/// Picks the network input size for an image: the longer side is limited to
/// `max_side_len`, then each side is moved down to a multiple of 32 (one step
/// further down when it wasn't one already) with a floor of 32.
pub fn resize_image(width: u32, height: u32, max_side_len: u32) -> Scale {
    let (w, h) = (width as f64, height as f64);
    let max_side = max_side_len as f64;
    let ratio = if h.max(w) > max_side {
        if h > w {
            max_side / h
        } else {
            max_side / w
        }
    } else {
        1.0
    };

    let round_side = |side: f64, name: &str| {
        let side = (side * ratio) as i64;
        let rounded = if side % SIDE_MULTIPLE == 0 {
            side
        } else {
            let floored = (side / SIDE_MULTIPLE - 1) * SIDE_MULTIPLE;
            log::debug!("Target {name} of {side} wasn't a multiple of 32, flooring to {floored}.");
            floored
        };
        rounded.max(SIDE_MULTIPLE) as u32
    };
    let target_width = round_side(w, "width");
    let target_height = round_side(h, "height");

    let ratio_w = target_width as f32 / width as f32;
    let ratio_h = target_height as f32 / height as f32;
    log::debug!("Resize will change image dimensions from (w: {width}, h: {height}) to (w: {target_width}, h: {target_height}) with ratio ({ratio_w}, {ratio_h}).");
    Scale {
        ratio_w,
        ratio_h,
        target_width,
        target_height,
    }
}

/// Converts an image into a `1 x H x W x 3` (or `1 x 3 x H x W` when
/// `channels_first`) tensor of raw RGB values in `[0, 255]`.
#[instrument(level = "debug", skip(image))]
pub(crate) fn to_input_tensor(image: &DynamicImage, channels_first: bool) -> Array4<f32> {
    let image = image.to_rgb8();
    let (width, height) = (image.width() as usize, image.height() as usize);
    let pixel = |y: usize, x: usize, ch: usize| image.get_pixel(x as u32, y as u32)[ch] as f32;
    if channels_first {
        Array4::from_shape_fn((1, 3, height, width), |(_, ch, y, x)| pixel(y, x, ch))
    } else {
        Array4::from_shape_fn((1, height, width, 3), |(_, y, x, ch)| pixel(y, x, ch))
    }
}

pub fn to_luma_image(data: ArrayView2<f32>) -> GrayImage {
    let height = data.len_of(Axis(0));
    let width = data.len_of(Axis(1));
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        Luma([(data[[y as usize, x as usize]].clamp(0.0, 1.0) * 255.0) as u8])
    })
}

/// Mean of `pred_data` over the pixels covered by `quad` (boundary included).
/// `quad` is in map coordinates. Returns 0 when the polygon covers no pixel.
pub(crate) fn polygon_mean(quad: &[Point<i32>; 4], pred_data: ArrayView2<f32>) -> f32 {
    let height = pred_data.len_of(Axis(0));
    let width = pred_data.len_of(Axis(1));
    let mut mask = GrayImage::new(width as u32, height as u32);
    fill_polygon(&mut mask, quad);

    let (sum, count) = pred_data
        .indexed_iter()
        .filter(|((y, x), _)| mask.get_pixel(*x as u32, *y as u32)[0] != 0)
        .fold((0.0f32, 0usize), |(sum, count), (_, value)| {
            (sum + value, count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

fn fill_polygon(mask: &mut GrayImage, quad: &[Point<i32>; 4]) {
    const ON: Luma<u8> = Luma([1]);

    let mut points: Vec<Point<i32>> = Vec::with_capacity(4);
    for point in quad {
        if points.last() != Some(point) {
            points.push(*point);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    match points.as_slice() {
        [] => {}
        [p] => {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < mask.width() && (p.y as u32) < mask.height() {
                mask.put_pixel(p.x as u32, p.y as u32, ON);
            }
        }
        [a, b] => draw_line_segment_mut(
            mask,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            ON,
        ),
        poly => draw_polygon_mut(mask, poly, ON),
    }
}

/// Scales a quad from input image coordinates down to score map cells.
pub(crate) fn quad_to_map_cells(quad: &Quad, stride: i32) -> [Point<i32>; 4] {
    quad.0.map(|[x, y]| {
        Point::new((x as i32).div_euclid(stride), (y as i32).div_euclid(stride))
    })
}
