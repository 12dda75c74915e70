use std::path::PathBuf;

use angle_net::AngleNet;
use crnn_net::CrnnNet;
use dbnet::DbNet;

mod angle_net;
mod crnn_net;
pub mod dbnet;
mod error;
pub mod rectify;
pub mod render;
mod result;
mod session;
pub mod sort;
pub mod source;
pub mod util;

use image::DynamicImage;
use tracing::instrument;

pub use dbnet::DetectionOptions;
pub use error::*;
pub use result::*;
pub use session::ExecutionProvider;

pub use ort as runtime;

use session::{SessionConfig, DEFAULT_PROVIDERS};

/// Finds text regions in a full image.
pub trait Detector: Send + Sync {
    /// Returns every detected region; an image without text yields no boxes.
    fn detect(&self, image: &DynamicImage) -> Result<DetectionResult>;
}

/// Corrects the orientation of rectified crops.
pub trait Classifier: Send + Sync {
    /// Returns exactly one crop and one angle per input crop, in input order.
    fn classify(&self, crops: Vec<DynamicImage>) -> Result<ClassificationResult>;
}

/// Reads the text of rectified crops.
pub trait Recognizer: Send + Sync {
    /// Returns exactly one line per input crop, in input order.
    fn recognize(&self, crops: &[DynamicImage]) -> Result<RecognitionBatch>;
}

/// Orientation stage of the pipeline, fixed when the system is built.
pub enum ClassifyStage {
    PassThrough,
    Enabled(Box<dyn Classifier>),
}

impl ClassifyStage {
    fn run(
        &self,
        crops: Vec<DynamicImage>,
    ) -> Result<(Vec<DynamicImage>, Option<ClassificationResult>)> {
        match self {
            ClassifyStage::PassThrough => Ok((crops, None)),
            ClassifyStage::Enabled(classifier) => {
                let mut result = classifier.classify(crops)?;
                log::debug!(
                    "cls num: {}, elapsed: {:?}",
                    result.crops.len(),
                    result.elapsed
                );
                let crops = std::mem::take(&mut result.crops);
                Ok((crops, Some(result)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Results scoring below this are dropped by [`TextSystem::filtered`].
    pub drop_score: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { drop_score: 0.5 }
    }
}

pub struct TextSystemBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    cls_path: Option<PathBuf>,
    rec_paths: Option<(PathBuf, PathBuf)>,
    use_angle_cls: bool,
    most_angle: bool,
    cls_thresh: f32,
    detection: DetectionOptions,
    options: PipelineOptions,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
}

impl TextSystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn cls_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.cls_path = Some(path.into());
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.rec_paths = Some((model_path.into(), keys_path.into()));
        self
    }

    /// Enables the orientation classifier between rectification and recognition.
    pub fn use_angle_cls(mut self, use_angle_cls: bool) -> Self {
        self.use_angle_cls = use_angle_cls;
        self
    }

    pub fn most_angle(mut self, most_angle: bool) -> Self {
        self.most_angle = most_angle;
        self
    }

    pub fn cls_thresh(mut self, cls_thresh: f32) -> Self {
        self.cls_thresh = cls_thresh;
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.detection.max_side_len = max_side_len;
        self
    }

    pub fn detection_options(mut self, options: DetectionOptions) -> Self {
        self.detection = options;
        self
    }

    pub fn drop_score(mut self, drop_score: f32) -> Self {
        self.options.drop_score = drop_score;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_models(&mut self) -> Result<(DbNet, Option<AngleNet>, CrnnNet)> {
        let det_path = self
            .det_path
            .take()
            .unwrap_or_else(|| "models/ch_PP-OCRv4_det_infer/ch_PP-OCRv4_det_infer.onnx".into());
        let cls_path = self
            .cls_path
            .take()
            .unwrap_or_else(|| "models/ch_ppocr_mobile_v2.0_cls_infer/cls.onnx".into());
        let (rec_path, keys_path) = self.rec_paths.take().unwrap_or_else(|| {
            (
                "models/ch_PP-OCRv4_rec_infer/ch_PP-OCRv4_rec_infer.onnx".into(),
                "models/ppocr_keys_v1.txt".into(),
            )
        });
        #[cfg(not(feature = "tensorrt"))]
        if let Some(path) = &self.cache_path {
            log::debug!("Engine cache path {} is only used by TensorRT", path.display());
        }
        let config = SessionConfig {
            threads: self.threads,
            execution_providers: &self.execution_providers,
            #[cfg(feature = "tensorrt")]
            cache_path: self.cache_path.clone(),
        };

        let det_model = DbNet::init(&det_path, &config, self.detection)?;
        let cls_model = if self.use_angle_cls {
            Some(AngleNet::init(
                &cls_path,
                &config,
                self.most_angle,
                self.cls_thresh,
            )?)
        } else {
            None
        };
        let rec_model = CrnnNet::init(&rec_path, &keys_path, &config)?;
        Ok((det_model, cls_model, rec_model))
    }

    /// Loads the ONNX models and assembles a [`TextSystem`] around them.
    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<TextSystem> {
        let (det_model, cls_model, rec_model) = self.init_models()?;
        let classify = match cls_model {
            Some(cls_model) => ClassifyStage::Enabled(Box::new(cls_model)),
            None => ClassifyStage::PassThrough,
        };
        Ok(TextSystem::new(
            Box::new(det_model),
            classify,
            Box::new(rec_model),
            self.options,
        ))
    }
}

impl Default for TextSystemBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            cls_path: None,
            rec_paths: None,
            use_angle_cls: false,
            most_angle: false,
            cls_thresh: 0.9,
            detection: DetectionOptions::default(),
            options: PipelineOptions::default(),
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

/// Runs detection, reading-order sorting, rectification, optional orientation
/// correction and recognition over a single image.
///
/// Calls share no state, so one system can serve several threads at once.
/// Each collaborator is invoked at most once per call, with every region
/// batched together.
pub struct TextSystem {
    detector: Box<dyn Detector>,
    classify: ClassifyStage,
    recognizer: Box<dyn Recognizer>,
    options: PipelineOptions,
}

impl TextSystem {
    pub fn new(
        detector: Box<dyn Detector>,
        classify: ClassifyStage,
        recognizer: Box<dyn Recognizer>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            detector,
            classify,
            recognizer,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Recognizes all text in `image`.
    ///
    /// Returns `Ok(None)` when the detector finds no regions; the classifier
    /// and recognizer are not invoked in that case. Any collaborator error
    /// aborts the whole call.
    #[instrument(skip(self, image))]
    pub fn recognize(&self, image: &DynamicImage) -> Result<Option<PipelineResult>> {
        let DetectionResult { boxes, elapsed } = self.detector.detect(image)?;
        log::debug!("dt_boxes num: {}, elapsed: {elapsed:?}", boxes.len());
        if boxes.is_empty() {
            return Ok(None);
        }

        let boxes = sort::sort_boxes(boxes);
        let source = image.to_rgb8();
        let crops = boxes
            .iter()
            .map(|quad| rectify::rectify(&source, quad).map(DynamicImage::ImageRgb8))
            .collect::<Result<Vec<_>>>()?;
        #[cfg(feature = "debug")]
        save_crops(&crops);

        let (crops, classification) = self.classify.run(crops)?;

        let RecognitionBatch {
            lines,
            elapsed: recognition,
        } = self.recognizer.recognize(&crops)?;
        log::debug!("rec_res num: {}, elapsed: {recognition:?}", lines.len());
        if lines.len() != boxes.len() {
            return Err(OcrError::InvalidOutput(format!(
                "recognizer returned {} lines for {} boxes",
                lines.len(),
                boxes.len()
            )));
        }

        Ok(Some(PipelineResult {
            boxes,
            lines,
            timings: Timings {
                detection: elapsed,
                classification: classification.map(|it| it.elapsed),
                recognition,
            },
        }))
    }

    /// [`recognize`](Self::recognize) followed by filtering on the configured
    /// drop score.
    pub fn filtered(&self, image: &DynamicImage) -> Result<Vec<OcrResult>> {
        Ok(self
            .recognize(image)?
            .map(|result| result.filter(self.options.drop_score))
            .unwrap_or_default())
    }
}

#[cfg(feature = "debug")]
fn save_crops(crops: &[DynamicImage]) {
    if let Err(err) = std::fs::create_dir_all("part_images") {
        log::warn!("Failed to create part_images: {err}");
        return;
    }
    for (i, crop) in crops.iter().enumerate() {
        if let Err(err) = crop.save(format!("part_images/{i}.png")) {
            log::warn!("Failed to save crop {i}: {err}");
        }
    }
}
