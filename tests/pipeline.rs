use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use image::{DynamicImage, GenericImageView, RgbImage};
use ocr_pipeline::{
    Angle, ClassificationResult, Classifier, ClassifyStage, DetectionResult, Detector, OcrError,
    PipelineOptions, Quad, RecognitionBatch, Recognizer, Result, Stage, TextLine, TextSystem,
};

#[derive(Default)]
struct Calls {
    detect: usize,
    classify: usize,
    recognize: usize,
    classified_sizes: Vec<(u32, u32)>,
    recognized_sizes: Vec<(u32, u32)>,
}

type Log = Arc<Mutex<Calls>>;

struct FixedDetector {
    boxes: Vec<Quad>,
    log: Log,
}

impl Detector for FixedDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<DetectionResult> {
        self.log.lock().unwrap().detect += 1;
        Ok(DetectionResult {
            boxes: self.boxes.clone(),
            elapsed: Duration::from_millis(3),
        })
    }
}

struct FailingDetector;

impl Detector for FailingDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<DetectionResult> {
        Err(OcrError::stage(Stage::Detection, "model crashed"))
    }
}

struct CountingClassifier {
    log: Log,
}

impl Classifier for CountingClassifier {
    fn classify(&self, crops: Vec<DynamicImage>) -> Result<ClassificationResult> {
        let mut log = self.log.lock().unwrap();
        log.classify += 1;
        log.classified_sizes = crops.iter().map(|it| it.dimensions()).collect();
        let angles = crops.iter().map(|_| Angle { index: 0, score: 1.0 }).collect();
        Ok(ClassificationResult {
            crops,
            angles,
            elapsed: Duration::from_millis(1),
        })
    }
}

struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn classify(&self, _crops: Vec<DynamicImage>) -> Result<ClassificationResult> {
        Err(OcrError::stage(Stage::Classification, "model crashed"))
    }
}

/// Answers with scripted lines, one per crop, in call order.
struct ScriptedRecognizer {
    lines: Vec<(&'static str, f32)>,
    log: Log,
}

impl Recognizer for ScriptedRecognizer {
    fn recognize(&self, crops: &[DynamicImage]) -> Result<RecognitionBatch> {
        let mut log = self.log.lock().unwrap();
        log.recognize += 1;
        log.recognized_sizes = crops.iter().map(|it| it.dimensions()).collect();
        Ok(RecognitionBatch {
            lines: self
                .lines
                .iter()
                .take(crops.len())
                .map(|(text, score)| TextLine::new(*text, *score))
                .collect(),
            elapsed: Duration::from_millis(2),
        })
    }
}

/// Reads the crop width back as text so the box-to-line pairing is visible.
struct WidthRecognizer;

impl Recognizer for WidthRecognizer {
    fn recognize(&self, crops: &[DynamicImage]) -> Result<RecognitionBatch> {
        Ok(RecognitionBatch {
            lines: crops
                .iter()
                .map(|it| TextLine::new(it.width().to_string(), 0.9))
                .collect(),
            elapsed: Duration::ZERO,
        })
    }
}

struct FailingRecognizer;

impl Recognizer for FailingRecognizer {
    fn recognize(&self, _crops: &[DynamicImage]) -> Result<RecognitionBatch> {
        Err(OcrError::stage(Stage::Recognition, "model crashed"))
    }
}

fn page() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(200, 100, |x, y| {
        image::Rgb([x as u8, y as u8, 128])
    }))
}

fn system(
    boxes: Vec<Quad>,
    lines: Vec<(&'static str, f32)>,
    with_classifier: bool,
) -> (TextSystem, Log) {
    let log = Log::default();
    let classify = if with_classifier {
        ClassifyStage::Enabled(Box::new(CountingClassifier { log: log.clone() }))
    } else {
        ClassifyStage::PassThrough
    };
    let system = TextSystem::new(
        Box::new(FixedDetector {
            boxes,
            log: log.clone(),
        }),
        classify,
        Box::new(ScriptedRecognizer {
            lines,
            log: log.clone(),
        }),
        PipelineOptions::default(),
    );
    (system, log)
}

#[test]
fn empty_detection_short_circuits() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (system, log) = system(vec![], vec![("unused", 1.0)], true);
    let result = system.recognize(&page()).expect("recognition failed");
    assert!(result.is_none());

    let log = log.lock().unwrap();
    assert_eq!(log.detect, 1);
    assert_eq!(log.classify, 0);
    assert_eq!(log.recognize, 0);
}

#[test]
fn two_lines_end_to_end() {
    let line2 = Quad::from_rect(0.0, 20.0, 50.0, 30.0);
    let line1 = Quad::from_rect(0.0, 0.0, 50.0, 10.0);
    let (system, log) = system(
        vec![line2, line1],
        vec![("hello", 0.9), ("world", 0.95)],
        false,
    );

    let result = system
        .recognize(&page())
        .expect("recognition failed")
        .expect("text should be found");
    assert_eq!(result.boxes, vec![line1, line2]);

    let kept = result
        .filter(0.5)
        .into_iter()
        .map(|it| (it.text, it.score))
        .collect::<Vec<_>>();
    assert_eq!(
        kept,
        vec![("hello".to_string(), 0.9), ("world".to_string(), 0.95)]
    );

    let log = log.lock().unwrap();
    assert_eq!(log.detect, 1);
    assert_eq!(log.classify, 0);
    assert_eq!(log.recognize, 1);
    assert_eq!(log.recognized_sizes, vec![(50, 10), (50, 10)]);
    assert_eq!(result.timings.classification, None);
}

#[test]
fn crops_follow_reading_order() {
    let boxes = vec![
        Quad::from_rect(0.0, 60.0, 30.0, 70.0),
        Quad::from_rect(120.0, 2.0, 160.0, 12.0),
        Quad::from_rect(0.0, 5.0, 20.0, 15.0),
        Quad::from_rect(40.0, 30.0, 90.0, 40.0),
    ];
    let system = TextSystem::new(
        Box::new(FixedDetector {
            boxes,
            log: Log::default(),
        }),
        ClassifyStage::PassThrough,
        Box::new(WidthRecognizer),
        PipelineOptions::default(),
    );

    let result = system
        .recognize(&page())
        .expect("recognition failed")
        .expect("text should be found");
    assert_eq!(result.len(), 4);
    let texts = result
        .iter()
        .map(|(_, line)| line.text.as_str())
        .collect::<Vec<_>>();
    // (0,5) and (120,2) share a line, so the left box comes first.
    assert_eq!(texts, ["20", "40", "50", "30"]);
    for (quad, line) in result.iter() {
        assert_eq!(quad.width().to_string(), line.text);
    }
}

#[test]
fn classifier_sees_every_crop_once() {
    let boxes = vec![
        Quad::from_rect(10.0, 10.0, 70.0, 30.0),
        // Tall region: rotated before classification.
        Quad::from_rect(100.0, 10.0, 110.0, 40.0),
    ];
    let (system, log) = system(boxes, vec![("a", 0.8), ("b", 0.3)], true);

    let result = system
        .recognize(&page())
        .expect("recognition failed")
        .expect("text should be found");
    assert_eq!(result.len(), 2);
    assert!(result.timings.classification.is_some());

    let log = log.lock().unwrap();
    assert_eq!(log.classify, 1);
    assert_eq!(log.recognize, 1);
    assert_eq!(log.classified_sizes, vec![(60, 20), (30, 10)]);
    assert_eq!(log.recognized_sizes, log.classified_sizes);
}

#[test]
fn filtered_applies_configured_drop_score() {
    let boxes = vec![
        Quad::from_rect(0.0, 0.0, 50.0, 10.0),
        Quad::from_rect(0.0, 20.0, 50.0, 30.0),
    ];
    let (system, _) = system(boxes, vec![("kept", 0.5), ("dropped", 0.49)], false);
    assert_eq!(system.options().drop_score, 0.5);

    let kept = system.filtered(&page()).expect("recognition failed");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].text, "kept");
}

#[test]
fn detector_failure_aborts_the_call() {
    let system = TextSystem::new(
        Box::new(FailingDetector),
        ClassifyStage::PassThrough,
        Box::new(WidthRecognizer),
        PipelineOptions::default(),
    );
    let err = system.recognize(&page()).unwrap_err();
    assert!(matches!(
        err,
        OcrError::Stage {
            stage: Stage::Detection,
            ..
        }
    ));
}

#[test]
fn short_recognizer_output_is_rejected() {
    let boxes = vec![
        Quad::from_rect(0.0, 0.0, 50.0, 10.0),
        Quad::from_rect(0.0, 20.0, 50.0, 30.0),
    ];
    let (system, _) = system(boxes, vec![("only one", 0.9)], false);
    assert!(matches!(
        system.recognize(&page()),
        Err(OcrError::InvalidOutput(_))
    ));
}

#[test]
fn degenerate_box_fails_the_call() {
    let boxes = vec![
        Quad::from_rect(0.0, 0.0, 50.0, 10.0),
        Quad::from_rect(10.0, 40.0, 10.0, 40.0),
    ];
    let (system, log) = system(boxes, vec![("a", 0.9), ("b", 0.9)], true);
    assert!(matches!(
        system.recognize(&page()),
        Err(OcrError::DegenerateBox(_))
    ));
    assert_eq!(log.lock().unwrap().recognize, 0);
}

#[test]
fn classifier_failure_aborts_the_call() {
    let log = Log::default();
    let system = TextSystem::new(
        Box::new(FixedDetector {
            boxes: vec![Quad::from_rect(0.0, 0.0, 50.0, 10.0)],
            log: log.clone(),
        }),
        ClassifyStage::Enabled(Box::new(FailingClassifier)),
        Box::new(ScriptedRecognizer {
            lines: vec![("unused", 1.0)],
            log: log.clone(),
        }),
        PipelineOptions::default(),
    );
    assert!(matches!(
        system.recognize(&page()),
        Err(OcrError::Stage {
            stage: Stage::Classification,
            ..
        })
    ));

    let log = log.lock().unwrap();
    assert_eq!(log.detect, 1);
    assert_eq!(log.recognize, 0);
}

#[test]
fn recognizer_failure_aborts_the_call() {
    let system = TextSystem::new(
        Box::new(FixedDetector {
            boxes: vec![Quad::from_rect(0.0, 0.0, 50.0, 10.0)],
            log: Log::default(),
        }),
        ClassifyStage::PassThrough,
        Box::new(FailingRecognizer),
        PipelineOptions::default(),
    );
    assert!(matches!(
        system.recognize(&page()),
        Err(OcrError::Stage {
            stage: Stage::Recognition,
            ..
        })
    ));
    assert!(matches!(
        system.filtered(&page()),
        Err(OcrError::Stage {
            stage: Stage::Recognition,
            ..
        })
    ));
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn system_is_shared_across_threads() {
    assert_send_sync::<TextSystem>();

    let boxes = vec![
        Quad::from_rect(0.0, 0.0, 50.0, 10.0),
        Quad::from_rect(0.0, 20.0, 30.0, 30.0),
    ];
    let (system, log) = system(boxes, vec![("a", 0.9), ("b", 0.9)], true);
    let image = page();

    thread::scope(|scope| {
        let handles = (0..4)
            .map(|_| scope.spawn(|| system.recognize(&image)))
            .collect::<Vec<_>>();
        for handle in handles {
            let result = handle
                .join()
                .expect("worker panicked")
                .expect("recognition failed")
                .expect("text should be found");
            assert_eq!(result.len(), 2);
        }
    });

    let log = log.lock().unwrap();
    assert_eq!(log.detect, 4);
    assert_eq!(log.classify, 4);
    assert_eq!(log.recognize, 4);
}

#[test]
fn empty_image_fails_the_call() {
    let (system, log) = system(
        vec![Quad::from_rect(0.0, 0.0, 20.0, 10.0)],
        vec![("a", 0.9)],
        false,
    );
    let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
    assert!(matches!(
        system.recognize(&empty),
        Err(OcrError::EmptyImage { .. })
    ));
    assert_eq!(log.lock().unwrap().recognize, 0);
}
