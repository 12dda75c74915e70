use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use image::{codecs::gif::GifDecoder, AnimationDecoder, DynamicImage};
use tracing::instrument;

use crate::{OcrError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "gif", "rgb"];

/// A decoded input image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: DynamicImage,
    /// The source held more than one frame; only the first was decoded.
    pub animated: bool,
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|it| it.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .and_then(|it| it.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
}

/// Expands `path` into the image files to process.
///
/// A file is returned as is when it carries an image extension. A directory
/// yields its image files, sorted by name.
pub fn list_images(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if path.is_file() && has_image_extension(path) {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(OcrError::NotAnImage(path.to_path_buf()));
    }

    let mut images = std::fs::read_dir(path)
        .map_err(|err| OcrError::io(path, err))?
        .map(|entry| entry.map(|it| it.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| OcrError::io(path, err))?
        .into_iter()
        .filter(|it| it.is_file() && has_image_extension(it))
        .collect::<Vec<_>>();
    images.sort();
    if images.is_empty() {
        return Err(OcrError::NotAnImage(path.to_path_buf()));
    }
    Ok(images)
}

/// Decodes the image at `path`. Animated GIFs yield their first frame.
#[instrument(level = "debug")]
pub fn load_image(path: &Path) -> Result<LoadedImage> {
    if is_gif(path) {
        return load_first_gif_frame(path);
    }
    let image = image::open(path)?;
    Ok(LoadedImage {
        image,
        animated: false,
    })
}

fn load_first_gif_frame(path: &Path) -> Result<LoadedImage> {
    let file = File::open(path).map_err(|err| OcrError::io(path, err))?;
    let decoder = GifDecoder::new(BufReader::new(file))?;
    let mut frames = decoder.into_frames();
    let first = frames
        .next()
        .ok_or_else(|| OcrError::NotAnImage(path.to_path_buf()))??;
    let animated = frames.next().is_some();
    log::debug!("Using first frame of {} (animated: {animated})", path.display());
    Ok(LoadedImage {
        image: DynamicImage::ImageRgba8(first.into_buffer()).to_rgb8().into(),
        animated,
    })
}
