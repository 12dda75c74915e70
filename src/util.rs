use float_ord::FloatOrd;
use geo::{
    point, Area, BoundingRect, Contains, Coord, EuclideanLength, HasDimensions, LineString,
    MinimumRotatedRect, Polygon, Translate,
};
use geo_clipper::{Clipper, EndType, JoinType};
use image::{DynamicImage, GrayImage, ImageBuffer, Pixel, Rgb};
use imageproc::point::Point;
use ndarray::{s, Array3, ArrayView2, Axis};
use tracing::instrument;

use crate::Quad;

/// Converts `image` into a CHW tensor of `(pixel * norm) - (mean * norm)`.
#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

pub(crate) fn to_luma_image(data: ArrayView2<f32>) -> Option<GrayImage> {
    let height = data.len_of(Axis(0));
    let width = data.len_of(Axis(1));
    let pixel_data = data
        .axis_iter(Axis(0))
        .flat_map(|it| it.into_iter())
        .map(|p| (p * 255.0) as u8)
        .collect::<Vec<u8>>();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
}

pub(crate) fn to_geo_poly(points: &[Point<i32>]) -> Polygon<f32> {
    let points = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(points), vec![])
}

pub(crate) fn max_side(rect: &Polygon<f32>) -> f32 {
    rect.exterior()
        .lines()
        .map(|it| it.euclidean_length() as i32)
        .max()
        .unwrap_or(0) as f32
}

/// Mean probability of the map cells covered by `rect`.
pub(crate) fn box_score_fast(rect: &Polygon<f32>, pred_data: ArrayView2<f32>) -> f32 {
    let Some(bounds) = rect.bounding_rect() else {
        return 0.0;
    };
    let (height, width) = pred_data.dim();
    let min = bounds.min();
    let max = bounds.max();
    let x0 = (min.x.max(0.0) as usize).min(width);
    let y0 = (min.y.max(0.0) as usize).min(height);
    let x1 = (max.x.max(0.0) as usize).clamp(x0, width);
    let y1 = (max.y.max(0.0) as usize).clamp(y0, height);

    let sliced = pred_data.slice(s![y0..y1, x0..x1]);
    let local_rect = rect.translate(-(x0 as f32), -(y0 as f32));

    let contained_values = sliced
        .indexed_iter()
        .filter(|((y, x), _)| local_rect.contains(&point![x: *x as f32, y: *y as f32]))
        .map(|(_, value)| *value)
        .collect::<Vec<_>>();

    if contained_values.is_empty() {
        return 0.0;
    }
    let len = contained_values.len() as f32;
    contained_values.into_iter().sum::<f32>() / len
}

/// Grows `rect` outwards by `area * unclip_ratio / (2 * perimeter)`.
pub(crate) fn unclip(rect: Polygon<f32>, unclip_ratio: f32) -> Option<Polygon<f32>> {
    let distance = (rect.unsigned_area() * 0.5 * unclip_ratio) / rect.exterior().euclidean_length();

    let clipped_rect = rect.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);

    if clipped_rect.is_empty() {
        None
    } else {
        clipped_rect.minimum_rotated_rect()
    }
}

/// Orders the corners of a rotated rectangle as top-left, top-right,
/// bottom-right, bottom-left.
pub(crate) fn order_corners(rect: &Polygon<f32>) -> Option<Quad> {
    let mut points = rect.exterior().0.clone();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() != 4 {
        return None;
    }
    points.sort_by_key(|it| FloatOrd(it.x));

    let (left, right) = points.split_at(2);
    let (top_left, bottom_left) = if left[1].y > left[0].y {
        (left[0], left[1])
    } else {
        (left[1], left[0])
    };
    let (top_right, bottom_right) = if right[1].y > right[0].y {
        (right[0], right[1])
    } else {
        (right[1], right[0])
    };
    Some(Quad::new([top_left, top_right, bottom_right, bottom_left]))
}

/// Clamps every corner into `[0, width - 1] x [0, height - 1]`.
pub(crate) fn clip_to_image(quad: Quad, width: u32, height: u32) -> Quad {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    Quad::new(quad.0.map(|it| Coord {
        x: it.x.clamp(0.0, max_x),
        y: it.y.clamp(0.0, max_y),
    }))
}

#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub factor_x: f32,
    pub factor_y: f32,
    pub target_width: u32,
    pub target_height: u32,
}

/// Fits `image` into `target_size` on its long side, with both sides floored
/// to a multiple of 32.
pub fn scale_normalized(image: &DynamicImage, target_size: u32) -> Scale {
    let aspect_ratio = image.width() as f32 / image.height() as f32;
    let (mut target_width, mut target_height) = if aspect_ratio >= 1.0 {
        let width = image.width().min(target_size);
        let height = (width as f32 / aspect_ratio) as u32;
        (width, height)
    } else {
        let height = image.height().min(target_size);
        let width = (height as f32 * aspect_ratio) as u32;
        (width, height)
    };
    if target_width % 32 != 0 {
        let new_width = (target_width / 32 * 32).max(32);
        log::debug!(
            "Target width of {target_width} wasn't a multiple of 32, flooring to {new_width}."
        );
        target_width = new_width;
    }
    if target_height % 32 != 0 {
        let new_height = (target_height / 32 * 32).max(32);
        log::debug!(
            "Target height of {target_height} wasn't a multiple of 32, flooring to {new_height}."
        );
        target_height = new_height;
    }
    let scale_x = image.width() as f32 / target_width as f32;
    let scale_y = image.height() as f32 / target_height as f32;
    log::debug!("Resize will change image dimensions from (w: {}, h: {}) to (w: {target_width}, h: {target_height}) with scaling factor ({scale_x}, {scale_y}).", image.width(), image.height());
    Scale {
        target_width,
        target_height,
        factor_x: scale_x,
        factor_y: scale_y,
    }
}
