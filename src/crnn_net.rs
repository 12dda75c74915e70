use std::{path::Path, time::Instant};

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{ArrayView2, Axis, Ix2};
use ort::{inputs, Session};
use tracing::instrument;

#[cfg(feature = "tensorrt")]
use crate::session::ShapeProfile;
use crate::{
    session::{build_session, SessionConfig},
    util::subtract_mean_normalize,
    OcrError, RecognitionBatch, Recognizer, Result, TextLine,
};

const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// CTC text line recognizer.
pub struct CrnnNet {
    session: Session,
    keys: Vec<String>,
}

/// Reads one key per line, with the CTC blank in front and a space at the end.
pub(crate) fn load_keys(keys_path: &Path) -> Result<Vec<String>> {
    let keys =
        std::fs::read_to_string(keys_path).map_err(|err| OcrError::io(keys_path, err))?;
    Ok(["#".to_string()]
        .into_iter()
        .chain(keys.lines().map(|line| line.to_string()))
        .chain([" ".to_string()])
        .collect())
}

impl CrnnNet {
    #[instrument(level = "debug", skip(config))]
    pub(crate) fn init(
        model_path: &Path,
        keys_path: &Path,
        config: &SessionConfig<'_>,
    ) -> Result<Self> {
        #[cfg(feature = "tensorrt")]
        let session = {
            let profile = ShapeProfile {
                min: format!("x:1x3x{DEST_HEIGHT}x1"),
                opt: format!("x:1x3x{DEST_HEIGHT}x256"),
                max: format!("x:1x3x{DEST_HEIGHT}x{}", u16::MAX),
            };
            build_session(model_path, config, profile)?
        };
        #[cfg(not(feature = "tensorrt"))]
        let session = build_session(model_path, config)?;
        let keys = load_keys(keys_path)?;
        log::debug!("Loaded {} recognition keys", keys.len());

        Ok(Self { session, keys })
    }

    #[instrument(level = "debug", skip(self, images))]
    pub fn get_text_lines(&self, images: &[DynamicImage]) -> Result<Vec<TextLine>> {
        images
            .iter()
            .map(|image| self.get_text_line(image))
            .collect()
    }

    #[instrument(level = "trace", skip(self, image))]
    fn get_text_line(&self, image: &DynamicImage) -> Result<TextLine> {
        let scale = DEST_HEIGHT as f32 / image.height() as f32;
        let dest_width = ((image.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let image = image.resize_exact(dest_width, DEST_HEIGHT, FilterType::Nearest);

        let tensor_values =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => tensor_values]?)?;
        let output_tensor = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::InvalidOutput("recognizer produced no outputs".into()))?
            .1
            .try_extract_tensor::<f32>()?;

        log::trace!("Output tensor size: {:?}", output_tensor.dim());
        let output = output_tensor
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|err| OcrError::InvalidOutput(format!("recognizer output shape: {err}")))?;

        Ok(ctc_decode(output, &self.keys))
    }
}

impl Recognizer for CrnnNet {
    fn recognize(&self, crops: &[DynamicImage]) -> Result<RecognitionBatch> {
        let start = Instant::now();
        let lines = self.get_text_lines(crops)?;
        Ok(RecognitionBatch {
            lines,
            elapsed: start.elapsed(),
        })
    }
}

/// Greedy CTC decode: best class per step, repeats collapsed, blanks dropped.
/// The line score is the mean probability of the kept characters.
fn ctc_decode(data: ArrayView2<f32>, keys: &[String]) -> TextLine {
    let mut previous = None;
    let mut text = String::new();
    let mut character_scores = Vec::new();

    for step in data.outer_iter() {
        let Some((index, score)) = step
            .indexed_iter()
            .max_by_key(|(_, value)| FloatOrd(**value))
            .map(|(i, value)| (i, *value))
        else {
            continue;
        };
        let repeated = previous == Some(index);
        previous = Some(index);
        if index == 0 || repeated {
            continue;
        }
        if let Some(key) = keys.get(index) {
            text.push_str(key);
            character_scores.push(score);
        }
    }

    let score = if character_scores.is_empty() {
        0.0
    } else {
        character_scores.iter().sum::<f32>() / character_scores.len() as f32
    };
    TextLine {
        text,
        score,
        character_scores,
    }
}
