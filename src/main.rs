use std::{path::PathBuf, time::Instant};

use anyhow::Context;
use clap::Parser;
use ocr_pipeline::{
    render::Renderer,
    source::{list_images, load_image},
    TextSystemBuilder,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about = "Detect, sort and recognize text in images")]
struct Args {
    /// Image file or directory of images.
    image_dir: PathBuf,

    /// Correct upside-down text lines before recognition.
    #[arg(long)]
    use_angle_cls: bool,

    /// Font used to draw recognized text in the visualization.
    #[arg(long)]
    vis_font_path: Option<PathBuf>,

    #[arg(long, default_value = "models/ch_PP-OCRv4_det_infer/ch_PP-OCRv4_det_infer.onnx")]
    det_model: PathBuf,

    #[arg(long, default_value = "models/ch_ppocr_mobile_v2.0_cls_infer/cls.onnx")]
    cls_model: PathBuf,

    #[arg(long, default_value = "models/ch_PP-OCRv4_rec_infer/ch_PP-OCRv4_rec_infer.onnx")]
    rec_model: PathBuf,

    #[arg(long, default_value = "models/ppocr_keys_v1.txt")]
    rec_keys: PathBuf,

    /// Results scoring below this are neither printed nor drawn.
    #[arg(long, default_value_t = 0.5)]
    drop_score: f32,

    #[arg(long, default_value = "./inference_results")]
    output_dir: PathBuf,

    #[arg(long, default_value_t = 960)]
    max_side_len: u32,

    #[arg(long, default_value_t = 4)]
    threads: usize,
}

/// Level used when `RUST_LOG` is unset or unparsable.
const DEFAULT_LOG_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(env_filter())
        .init();

    let args = Args::parse();

    let images = list_images(&args.image_dir)
        .with_context(|| format!("Failed to list images in {}", args.image_dir.display()))?;
    let system = TextSystemBuilder::new()
        .det_model(&args.det_model)
        .cls_model(&args.cls_model)
        .rec_model(&args.rec_model, &args.rec_keys)
        .use_angle_cls(args.use_angle_cls)
        .max_side_len(args.max_side_len)
        .threads(args.threads)
        .drop_score(args.drop_score)
        .build()
        .context("Failed to build text system")?;

    let font = args
        .vis_font_path
        .as_deref()
        .map(Renderer::load_font)
        .transpose()
        .context("Failed to load visualization font")?;
    let renderer = Renderer::new(&args.output_dir, font, args.drop_score);

    for path in images {
        let loaded = match load_image(&path) {
            Ok(loaded) => loaded,
            Err(err) => {
                log::warn!("error in loading image {}: {err}", path.display());
                continue;
            }
        };
        if loaded.animated {
            log::info!("Using the first frame of {}", path.display());
        }

        let start = Instant::now();
        let result = system
            .recognize(&loaded.image)
            .with_context(|| format!("Recognition failed on {}", path.display()))?;
        log::info!("Predict time of {}: {:?}", path.display(), start.elapsed());

        let Some(result) = result else {
            log::info!("No text found in {}", path.display());
            continue;
        };
        for line in result.filter(args.drop_score) {
            println!("{}, {:.3}", line.text, line.score);
        }

        renderer
            .render(&loaded.image, &result, &path)
            .with_context(|| format!("Failed to render {}", path.display()))?;
    }

    Ok(())
}
