use std::{path::Path, time::Instant};

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Axis;
use ort::{inputs, Session};
use tracing::instrument;

#[cfg(feature = "tensorrt")]
use crate::session::ShapeProfile;
use crate::{
    session::{build_session, SessionConfig},
    util::subtract_mean_normalize,
    Angle, ClassificationResult, Classifier, OcrError, Result,
};

const DEST_WIDTH: u32 = 192;
const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// Label index of an upside-down crop.
const ROTATED_180: usize = 1;

/// Two-way (0° / 180°) text orientation classifier.
pub struct AngleNet {
    session: Session,
    most_angle: bool,
    threshold: f32,
}

impl AngleNet {
    #[instrument(level = "debug", skip(config))]
    pub(crate) fn init(
        path: &Path,
        config: &SessionConfig<'_>,
        most_angle: bool,
        threshold: f32,
    ) -> ort::Result<Self> {
        #[cfg(feature = "tensorrt")]
        let session = {
            let shape = format!("x:1x3x{DEST_HEIGHT}x{DEST_WIDTH}");
            let profile = ShapeProfile {
                min: shape.clone(),
                opt: shape.clone(),
                max: shape,
            };
            build_session(path, config, profile)?
        };
        #[cfg(not(feature = "tensorrt"))]
        let session = build_session(path, config)?;
        Ok(Self {
            session,
            most_angle,
            threshold,
        })
    }

    #[instrument(level = "debug", skip(self, images))]
    pub fn get_angles(&self, images: &[DynamicImage]) -> Result<Vec<Angle>> {
        let mut angles = images
            .iter()
            .map(|image| self.get_angle(image))
            .collect::<Result<Vec<_>>>()?;

        if self.most_angle {
            vote_most_angle(&mut angles);
        }

        Ok(angles)
    }

    #[instrument(level = "trace", skip(self, image))]
    fn get_angle(&self, image: &DynamicImage) -> Result<Angle> {
        let image = image.resize_exact(DEST_WIDTH, DEST_HEIGHT, FilterType::Nearest);
        let image =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => image]?)?;
        let output = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::InvalidOutput("classifier produced no outputs".into()))?
            .1
            .try_extract_tensor::<f32>()?;

        output
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map(|(index, score)| Angle {
                index,
                score: *score,
            })
            .ok_or_else(|| OcrError::InvalidOutput("classifier output is empty".into()))
    }
}

/// Forces the majority label onto every crop.
fn vote_most_angle(angles: &mut [Angle]) {
    let sum = angles.iter().map(|angle| angle.index).sum::<usize>() as f32;
    let half_percent = angles.len() as f32 / 2.0;
    let most_angle_index = if sum < half_percent { 0 } else { ROTATED_180 };

    for angle in angles.iter_mut() {
        angle.index = most_angle_index;
    }
}

/// After a vote the index no longer matches its score, so the voted label
/// alone decides.
fn should_flip(angle: &Angle, threshold: f32, voted: bool) -> bool {
    angle.index == ROTATED_180 && (voted || angle.score > threshold)
}

impl Classifier for AngleNet {
    fn classify(&self, mut crops: Vec<DynamicImage>) -> Result<ClassificationResult> {
        let start = Instant::now();
        let angles = self.get_angles(&crops)?;
        for (crop, angle) in crops.iter_mut().zip(&angles) {
            if should_flip(angle, self.threshold, self.most_angle) {
                *crop = crop.rotate180();
            }
        }
        Ok(ClassificationResult {
            crops,
            angles,
            elapsed: start.elapsed(),
        })
    }
}
