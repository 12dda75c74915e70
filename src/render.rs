//! Side-by-side visualization of recognition results.
//!
//! The left half shows the source image with the kept boxes outlined; the
//! right half repeats the outlines on a white canvas and writes each
//! recognized line inside its box.

use std::path::{Path, PathBuf};

use ab_glyph::FontVec;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_polygon_mut, draw_text_mut},
    point::Point,
};
use tracing::instrument;

use crate::{OcrError, PipelineResult, Quad, Result};

const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BACKGROUND_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const PALETTE: [Rgb<u8>; 6] = [
    Rgb([230, 25, 75]),
    Rgb([60, 180, 75]),
    Rgb([0, 130, 200]),
    Rgb([245, 130, 48]),
    Rgb([145, 30, 180]),
    Rgb([70, 240, 240]),
];

pub struct Renderer {
    output_dir: PathBuf,
    font: Option<FontVec>,
    drop_score: f32,
}

impl Renderer {
    pub fn new(output_dir: impl Into<PathBuf>, font: Option<FontVec>, drop_score: f32) -> Self {
        Self {
            output_dir: output_dir.into(),
            font,
            drop_score,
        }
    }

    /// Loads a TrueType/OpenType font from disk.
    pub fn load_font(path: &Path) -> Result<FontVec> {
        let data = std::fs::read(path).map_err(|err| OcrError::io(path, err))?;
        Ok(FontVec::try_from_vec(data)?)
    }

    /// Draws `result` next to `image` and returns the composed canvas.
    pub fn draw(&self, image: &DynamicImage, result: &PipelineResult) -> RgbImage {
        let source = image.to_rgb8();
        let (width, height) = source.dimensions();
        let mut left = source;
        let mut right = RgbImage::from_pixel(width, height, BACKGROUND_COLOR);

        for (i, (quad, line)) in result.iter().enumerate() {
            if line.score < self.drop_score {
                continue;
            }
            let color = PALETTE[i % PALETTE.len()];
            let outline = outline(quad);
            draw_hollow_polygon_mut(&mut left, &outline, color);
            draw_hollow_polygon_mut(&mut right, &outline, color);

            if let Some(font) = &self.font {
                let scale = (quad.height() * 0.8).max(10.0);
                let origin = quad.top_left();
                draw_text_mut(
                    &mut right,
                    TEXT_COLOR,
                    origin.x as i32,
                    origin.y as i32,
                    scale,
                    font,
                    &line.text,
                );
            }
        }

        let mut canvas = RgbImage::from_pixel(width * 2, height, BACKGROUND_COLOR);
        imageops::replace(&mut canvas, &left, 0, 0);
        imageops::replace(&mut canvas, &right, width as i64, 0);
        canvas
    }

    /// Writes the visualization for `name` into the output directory as
    /// `<stem>.png`, creating the directory if needed.
    #[instrument(level = "debug", skip(self, image, result))]
    pub fn render(
        &self,
        image: &DynamicImage,
        result: &PipelineResult,
        name: &Path,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|err| OcrError::io(&self.output_dir, err))?;
        let stem = name
            .file_stem()
            .ok_or_else(|| OcrError::NotAnImage(name.to_path_buf()))?;
        let path = self
            .output_dir
            .join(format!("{}.png", stem.to_string_lossy()));

        self.draw(image, result).save(&path)?;
        log::info!("The visualized image saved in {}", path.display());
        Ok(path)
    }
}

fn outline(quad: &Quad) -> Vec<Point<f32>> {
    quad.points().iter().map(|it| Point::new(it.x, it.y)).collect()
}
