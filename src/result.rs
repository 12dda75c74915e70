use std::time::Duration;

use geo::{Coord, EuclideanLength, Line};
use image::DynamicImage;

/// A detected text region: four corners in top-left, top-right, bottom-right,
/// bottom-left order, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad(pub [Coord<f32>; 4]);

impl Quad {
    pub fn new(points: [Coord<f32>; 4]) -> Self {
        Self(points)
    }

    pub fn from_points(points: [(f32, f32); 4]) -> Self {
        Self(points.map(|(x, y)| Coord { x, y }))
    }

    /// Axis-aligned rectangle from `(x0, y0)` to `(x1, y1)`.
    pub fn from_rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self::from_points([(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    pub fn points(&self) -> &[Coord<f32>; 4] {
        &self.0
    }

    pub fn top_left(&self) -> Coord<f32> {
        self.0[0]
    }

    fn edge(&self, from: usize, to: usize) -> f32 {
        Line::new(self.0[from], self.0[to]).euclidean_length()
    }

    /// Longer of the top and bottom edges.
    pub fn width(&self) -> f32 {
        self.edge(0, 1).max(self.edge(3, 2))
    }

    /// Longer of the left and right edges.
    pub fn height(&self) -> f32 {
        self.edge(0, 3).max(self.edge(1, 2))
    }
}

#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub boxes: Vec<Quad>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub crops: Vec<DynamicImage>,
    pub angles: Vec<Angle>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct Angle {
    pub index: usize,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct RecognitionBatch {
    pub lines: Vec<TextLine>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub score: f32,
    pub character_scores: Vec<f32>,
}

impl TextLine {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            character_scores: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub detection: Duration,
    pub classification: Option<Duration>,
    pub recognition: Duration,
}

/// Sorted boxes paired 1:1 with their recognized lines.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub boxes: Vec<Quad>,
    pub lines: Vec<TextLine>,
    pub timings: Timings,
}

impl PipelineResult {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Quad, &TextLine)> {
        self.boxes.iter().zip(self.lines.iter())
    }

    /// Entries whose score is at least `threshold`, in reading order.
    pub fn filter(&self, threshold: f32) -> Vec<OcrResult> {
        self.iter()
            .filter(|(_, line)| line.score >= threshold)
            .map(|(bounds, line)| OcrResult {
                bounds: *bounds,
                text: line.text.clone(),
                score: line.score,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    pub bounds: Quad,
    pub text: String,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_scores(scores: &[f32]) -> PipelineResult {
        let boxes = (0..scores.len())
            .map(|i| Quad::from_rect(0.0, i as f32 * 20.0, 50.0, i as f32 * 20.0 + 10.0))
            .collect();
        let lines = scores
            .iter()
            .enumerate()
            .map(|(i, score)| TextLine::new(format!("line{i}"), *score))
            .collect();
        PipelineResult {
            boxes,
            lines,
            timings: Timings::default(),
        }
    }

    #[test]
    fn filter_threshold_is_inclusive() {
        let result = result_with_scores(&[0.49, 0.5]);
        let kept = result.filter(0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "line1");
        assert_eq!(kept[0].score, 0.5);
    }

    #[test]
    fn filter_keeps_order_and_source() {
        let result = result_with_scores(&[0.9, 0.1, 0.7, 0.95]);
        let kept = result.filter(0.5);
        let texts = kept.iter().map(|it| it.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, ["line0", "line2", "line3"]);
        assert_eq!(kept[1].bounds, result.boxes[2]);
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn quad_edges() {
        let quad = Quad::from_points([(0.0, 0.0), (3.0, 4.0), (3.0, 14.0), (0.0, 10.0)]);
        assert_eq!(quad.width(), 5.0);
        assert_eq!(quad.height(), 10.0);
        assert_eq!(quad.top_left(), Coord { x: 0.0, y: 0.0 });
    }
}
