//! Perspective rectification of detected text regions.
//!
//! Each [`Quad`] is mapped onto an axis-aligned rectangle sized after its
//! longest edges, resampled with a bicubic kernel, and turned upright when the
//! result is much taller than wide.

use geo::Coord;
use image::{imageops, Rgb, RgbImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use tracing::instrument;

use crate::{OcrError, Quad, Result};

/// Crops with `height / width` at or above this ratio are rotated 90°.
pub const VERTICAL_RATIO: f32 = 1.5;

/// Bicubic coefficient used by the resampler.
const CUBIC_A: f64 = -0.75;

/// Extracts the region covered by `quad` from `image` as an upright rectangle.
///
/// The output is `trunc(max(top, bottom))` wide and `trunc(max(left, right))`
/// tall, rotated counter-clockwise by 90° when `height / width >=
/// VERTICAL_RATIO`. Samples falling outside the source replicate the nearest
/// edge pixel.
///
/// # Errors
///
/// Returns [`OcrError::EmptyImage`] if `image` has no pixels to sample, and
/// [`OcrError::DegenerateBox`] if the quad collapses to zero width or height,
/// or its corners admit no perspective transform.
#[instrument(level = "trace", skip(image))]
pub fn rectify(image: &RgbImage, quad: &Quad) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(OcrError::EmptyImage { width, height });
    }

    let width = quad.width() as u32;
    let height = quad.height() as u32;
    if width == 0 || height == 0 {
        return Err(OcrError::DegenerateBox(*quad));
    }

    let (w, h) = (width as f32, height as f32);
    let target = [
        Coord { x: 0.0, y: 0.0 },
        Coord { x: w, y: 0.0 },
        Coord { x: w, y: h },
        Coord { x: 0.0, y: h },
    ];
    // Maps output pixels back into the source, so no inversion is needed.
    let transform =
        perspective_transform(&target, quad.points()).ok_or(OcrError::DegenerateBox(*quad))?;

    let crop = warp_perspective(image, &transform, width, height);
    if height as f32 / width as f32 >= VERTICAL_RATIO {
        log::trace!("Rotating {width}x{height} crop upright");
        Ok(imageops::rotate270(&crop))
    } else {
        Ok(crop)
    }
}

/// Solves the homography taking each `from` corner onto the matching `to` corner.
pub(crate) fn perspective_transform(
    from: &[Coord<f32>; 4],
    to: &[Coord<f32>; 4],
) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (src, dst)) in from.iter().zip(to).enumerate() {
        let (x, y) = (src.x as f64, src.y as f64);
        let (u, v) = (dst.x as f64, dst.y as f64);

        let row = i * 2;
        a.row_mut(row)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u]);
        b[row] = u;
        a.row_mut(row + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v]);
        b[row + 1] = v;
    }

    let h = a.lu().solve(&b)?;
    if h.iter().any(|it| !it.is_finite()) {
        return None;
    }
    Some(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Resamples `image` into a `width`×`height` buffer where output pixel `p`
/// takes its value from `transform * p` in the source.
fn warp_perspective(
    image: &RgbImage,
    transform: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let src = transform * Vector3::new(x as f64, y as f64, 1.0);
        if src.z.abs() <= f64::EPSILON {
            return sample_replicate(image, 0, 0);
        }
        bicubic(image, src.x / src.z, src.y / src.z)
    })
}

fn cubic_weights(t: f64) -> [f64; 4] {
    let a = CUBIC_A;
    let near = |d: f64| ((a + 2.0) * d - (a + 3.0)) * d * d + 1.0;
    let far = |d: f64| ((a * d - 5.0 * a) * d + 8.0 * a) * d - 4.0 * a;
    let w0 = far(1.0 + t);
    let w1 = near(t);
    let w2 = near(1.0 - t);
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

fn sample_replicate(image: &RgbImage, x: i64, y: i64) -> Rgb<u8> {
    let x = x.clamp(0, image.width() as i64 - 1) as u32;
    let y = y.clamp(0, image.height() as i64 - 1) as u32;
    *image.get_pixel(x, y)
}

fn bicubic(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (x0, y0) = (x.floor(), y.floor());
    let wx = cubic_weights(x - x0);
    let wy = cubic_weights(y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; 3];
    for (j, wy) in wy.iter().enumerate() {
        for (i, wx) in wx.iter().enumerate() {
            let pixel = sample_replicate(image, x0 - 1 + i as i64, y0 - 1 + j as i64);
            let weight = wx * wy;
            for (channel, value) in acc.iter_mut().zip(pixel.0) {
                *channel += weight * value as f64;
            }
        }
    }
    Rgb(acc.map(|it| it.round().clamp(0.0, 255.0) as u8))
}
