use std::{path::Path, time::Instant};

use geo::{Coord, MapCoords, MinimumRotatedRect, Polygon};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use imageproc::{
    contours::find_contours,
    contrast::{threshold_mut, ThresholdType},
    distance_transform::Norm,
    morphology::dilate_mut,
};
use ndarray::{ArrayView2, Axis};
use ort::{inputs, Session};
use tracing::instrument;

#[cfg(feature = "tensorrt")]
use crate::session::ShapeProfile;
use crate::{
    session::{build_session, SessionConfig},
    util::{
        self, box_score_fast, clip_to_image, max_side, order_corners, scale_normalized,
        subtract_mean_normalize, to_geo_poly, to_luma_image, unclip,
    },
    DetectionResult, Detector, OcrError, Quad, Result,
};

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const LONG_SIDE_THRESHOLD: f32 = 3.0;
const MAX_CANDIDATES: usize = 1000;
/// Boxes no wider or taller than this after clipping are dropped.
const MIN_BOX_SIDE: f32 = 3.0;

/// Post-processing knobs for the DB text detector.
#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    pub max_side_len: u32,
    pub box_score_threshold: f32,
    pub box_threshold: f32,
    pub unclip_ratio: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            max_side_len: 960,
            box_score_threshold: 0.5,
            box_threshold: 0.3,
            unclip_ratio: 1.6,
        }
    }
}

/// Differentiable-binarization text detector.
pub struct DbNet {
    session: Session,
    options: DetectionOptions,
}

impl DbNet {
    #[instrument(level = "debug", skip(config))]
    pub(crate) fn init(
        path: &Path,
        config: &SessionConfig<'_>,
        options: DetectionOptions,
    ) -> ort::Result<Self> {
        #[cfg(feature = "tensorrt")]
        let session = {
            let side = options.max_side_len;
            let profile = ShapeProfile {
                min: "x:1x3x32x32".to_string(),
                opt: format!("x:1x3x{side}x{side}"),
                max: format!("x:1x3x{side}x{side}"),
            };
            build_session(path, config, profile)?
        };
        #[cfg(not(feature = "tensorrt"))]
        let session = build_session(path, config)?;
        Ok(Self { session, options })
    }

    #[instrument(skip(self, image), level = "debug")]
    fn get_text_boxes(&self, image: &DynamicImage) -> Result<Vec<Quad>> {
        let DetectionOptions {
            max_side_len,
            box_score_threshold,
            box_threshold,
            unclip_ratio,
        } = self.options;
        let scale = if max_side_len > 0 {
            scale_normalized(image, max_side_len)
        } else {
            scale_normalized(image, u32::MAX)
        };

        let resized =
            image.resize_exact(scale.target_width, scale.target_height, FilterType::Nearest);
        let input_values =
            subtract_mean_normalize(&resized, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input_values]?)?;
        let pred_mat = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::InvalidOutput("detector produced no outputs".into()))?
            .1
            .try_extract_tensor::<f32>()?;

        let width = pred_mat.len_of(Axis(3));
        let height = pred_mat.len_of(Axis(2));
        let pred_data = pred_mat
            .to_owned()
            .into_shape((height, width))
            .map_err(|err| OcrError::InvalidOutput(format!("detector map shape: {err}")))?;

        let mut mask = to_luma_image(pred_data.view())
            .ok_or_else(|| OcrError::InvalidOutput("detector map size".into()))?;
        let threshold = (box_threshold * 255.0) as u8;
        threshold_mut(&mut mask, threshold, ThresholdType::Binary);
        dilate_mut(&mut mask, Norm::L1, 2);

        let boxes = find_quads(pred_data.view(), mask, scale, box_score_threshold, unclip_ratio)
            .into_iter()
            .map(|quad| clip_to_image(quad, image.width(), image.height()))
            .filter(|quad| quad.width() > MIN_BOX_SIDE && quad.height() > MIN_BOX_SIDE)
            .collect();
        Ok(boxes)
    }
}

impl Detector for DbNet {
    fn detect(&self, image: &DynamicImage) -> Result<DetectionResult> {
        let start = Instant::now();
        let boxes = self.get_text_boxes(image)?;
        Ok(DetectionResult {
            boxes,
            elapsed: start.elapsed(),
        })
    }
}

#[instrument(skip(pred_data, mask), level = "trace")]
fn find_quads(
    pred_data: ArrayView2<f32>,
    mask: GrayImage,
    util::Scale {
        factor_x, factor_y, ..
    }: util::Scale,
    box_score_threshold: f32,
    unclip_ratio: f32,
) -> Vec<Quad> {
    find_contours::<i32>(&mask)
        .into_iter()
        .take(MAX_CANDIDATES)
        .filter(|it| it.points.len() > 2)
        .filter_map(|it| to_geo_poly(&it.points).minimum_rotated_rect())
        .filter(|rect| max_side(rect) >= LONG_SIDE_THRESHOLD)
        .filter(|rect| box_score_fast(rect, pred_data.view()) >= box_score_threshold)
        .filter_map(|rect| unclip(rect, unclip_ratio))
        .filter(|rect| max_side(rect) >= LONG_SIDE_THRESHOLD + 2.0)
        .map(|rect: Polygon<f32>| {
            rect.map_coords(|Coord { x, y }| Coord {
                x: x * factor_x,
                y: y * factor_y,
            })
        })
        .filter_map(|rect| order_corners(&rect))
        .collect()
}
