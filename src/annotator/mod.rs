//! Annotator - Detection Overlay + Thumbnails
//!
//! ## Responsibilities
//!
//! - Draw bounding boxes and confidence captions for human review
//! - Produce 128x128 aspect-preserving thumbnails
//! - JPEG encoding helper shared with the detector adapter
//!
//! Caption glyphs need a TTF loaded at startup; when the font is missing the
//! annotator still draws boxes and caption strips, just without text.
//! Annotation failures never block persistence of a detection record.

use crate::detector::BoundingBoxDetection;
use crate::error::Result;
use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::io::Cursor;
use std::path::Path;

/// Thumbnail bounding size (both axes)
pub const THUMBNAIL_SIZE: u32 = 128;

const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // rough per-character width estimate
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [200, 0, 0];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// Encode a frame as JPEG bytes
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new(&mut buf).encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf.into_inner())
}

/// Annotator instance
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Create an annotator, loading the caption font from `font_path`.
    ///
    /// A missing or unreadable font degrades to box-only annotation.
    pub fn new(font_path: &Path) -> Self {
        let font = match std::fs::read(font_path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(
                        path = %font_path.display(),
                        error = %e,
                        "Caption font unusable, annotating boxes only"
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %font_path.display(),
                    error = %e,
                    "Caption font not found, annotating boxes only"
                );
                None
            }
        };

        Self { font }
    }

    /// Draw a rectangle and `"<label> <confidence>"` caption per detection,
    /// mutating the frame.
    pub fn annotate(&self, frame: &mut RgbImage, detections: &[BoundingBoxDetection]) {
        for det in detections {
            self.draw_box_with_caption(frame, det);
        }
    }

    fn draw_box_with_caption(&self, image: &mut RgbImage, det: &BoundingBoxDetection) {
        let [x1, y1, x2, y2] = det.pixel_box;
        if x1 >= x2 || y1 >= y2 {
            return;
        }

        // 2px border: outer rect plus an inset one
        let w = x2 - x1 + 1;
        let h = y2 - y1 + 1;
        draw_hollow_rect_mut(
            image,
            Rect::at(x1 as i32, y1 as i32).of_size(w, h),
            Rgb(BOX_COLOR),
        );
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(
                image,
                Rect::at(x1 as i32 + 1, y1 as i32 + 1).of_size(w - 2, h - 2),
                Rgb(BOX_COLOR),
            );
        }

        let caption = format!("{} {:.2}", det.label, det.confidence);

        // Caption strip above the box, clamped to the image
        let text_width = (caption.len() as f32 * LABEL_CHAR_WIDTH) as i32;
        let label_x = x1 as i32;
        let label_y = (y1 as i32 - LABEL_TEXT_HEIGHT).max(0);
        let max_width = (image.width() as i32 - label_x).max(0);
        let label_width = text_width.min(max_width) as u32;

        if label_width == 0 {
            return;
        }

        draw_filled_rect_mut(
            image,
            Rect::at(label_x, label_y).of_size(label_width, LABEL_TEXT_HEIGHT as u32),
            Rgb(BOX_COLOR),
        );

        if let Some(ref font) = self.font {
            draw_text_mut(
                image,
                Rgb(TEXT_COLOR),
                label_x,
                label_y + LABEL_TEXT_VERTICAL_PADDING,
                PxScale::from(LABEL_FONT_SIZE),
                font,
                &caption,
            );
        }
    }

    /// Aspect-preserving 128x128 scale-down of an in-memory frame
    pub fn thumbnail_from_frame(&self, frame: &RgbImage) -> RgbImage {
        DynamicImage::ImageRgb8(frame.clone())
            .thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE)
            .to_rgb8()
    }

    /// Aspect-preserving 128x128 scale-down of an image file.
    ///
    /// Visually equivalent to [`Self::thumbnail_from_frame`]; callers pick a
    /// variant based on what they have at hand.
    pub fn thumbnail_from_file(&self, path: &Path) -> Result<RgbImage> {
        Ok(image::open(path)?
            .thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE)
            .to_rgb8())
    }
}
