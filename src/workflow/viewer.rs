use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, ImageReader};

use crate::util::{sha256_fields, write_bytes};
use crate::workflow::view::CardRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlaySide {
    Left,
    Right,
}

impl OverlaySide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailRect {
    pub left: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dismissal {
    Background,
    Control,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub card: CardRef,
    pub width: u32,
    pub height: u32,
    pub side: OverlaySide,
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("document has no image data")]
    Missing,
    #[error("image payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image header could not be read: {0}")]
    Image(#[from] image::ImageError),
    #[error("image could not be written: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Output(String),
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl DecodedImage {
    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("img")
    }
}

// Panels are laid out as equal-width columns across the viewport, so a
// thumbnail's horizontal position follows from its panel index.
pub fn thumbnail_for_panel(panel: usize, panel_count: usize, viewport_width: u32) -> ThumbnailRect {
    let columns = panel_count.max(1) as f32;
    let width = viewport_width as f32 / columns;
    ThumbnailRect {
        left: width * panel as f32,
    }
}

pub fn overlay_side(thumbnail: ThumbnailRect, viewport_width: u32) -> OverlaySide {
    if thumbnail.left < viewport_width as f32 / 2.0 {
        OverlaySide::Right
    } else {
        OverlaySide::Left
    }
}

pub fn decode_image(image_data: &str) -> Result<DecodedImage, ViewerError> {
    let payload = image_data.trim();
    let payload = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    if payload.is_empty() {
        return Err(ViewerError::Missing);
    }

    let bytes = STANDARD.decode(payload)?;
    let reader = ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| ViewerError::Output("unrecognised image format".to_string()))?;
    let (width, height) = reader.into_dimensions()?;

    Ok(DecodedImage {
        bytes,
        width,
        height,
        format,
    })
}

pub fn save_image(
    decoded: &DecodedImage,
    stem: &str,
    output_dir: &Path,
) -> Result<PathBuf, ViewerError> {
    let digest = sha256_fields(&[stem]);
    let path = output_dir
        .join("images")
        .join(format!("{}.{}", &digest[..16], decoded.extension()));
    write_bytes(&path, &decoded.bytes).map_err(|err| ViewerError::Output(format!("{err:#}")))?;
    Ok(path)
}

pub fn open_overlay(
    card: CardRef,
    title: &str,
    image_data: &str,
    thumbnail: ThumbnailRect,
    viewport_width: u32,
    output_dir: &Path,
) -> Result<Overlay, ViewerError> {
    let decoded = decode_image(image_data)?;
    let path = save_image(&decoded, &format!("{title}|{image_data}"), output_dir)?;
    Ok(Overlay {
        card,
        width: decoded.width,
        height: decoded.height,
        side: overlay_side(thumbnail, viewport_width),
        path,
    })
}
