use std::path::PathBuf;

use thiserror::Error;

use crate::Quad;

pub type Result<T, E = OcrError> = std::result::Result<T, E>;

/// Pipeline stage a collaborator failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detection,
    Classification,
    Recognition,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Detection => write!(f, "detection"),
            Stage::Classification => write!(f, "classification"),
            Stage::Recognition => write!(f, "recognition"),
        }
    }
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("onnx runtime")]
    Runtime(#[from] ort::Error),

    #[error("image")]
    Image(#[from] image::ImageError),

    #[error("io error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid font")]
    Font(#[from] ab_glyph::InvalidFont),

    /// Failure reported by a detector, classifier or recognizer implementation.
    #[error("{stage} failed")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("degenerate text box {0:?}")]
    DegenerateBox(Quad),

    #[error("empty source image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("not an image file or directory: {}", .0.display())]
    NotAnImage(PathBuf),
}

impl OcrError {
    pub fn stage(
        stage: Stage,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Stage {
            stage,
            source: source.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
