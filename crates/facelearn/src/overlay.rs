//! Drawing on frames before they are shown: face boxes with labels, and the
//! text HUD.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use facelearn_core::BoundingBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
const SHADOW: Rgb<u8> = Rgb([0, 0, 0]);

/// Shown instead of a name for unmatched faces.
pub const UNKNOWN_LABEL: &str = "Unknown";

const TEXT_SCALE: f32 = 20.0;
const LINE_HEIGHT: i32 = 24;

/// A face as it should appear on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceTag {
    pub bbox: BoundingBox,
    /// `None` renders as [`UNKNOWN_LABEL`].
    pub label: Option<String>,
}

impl FaceTag {
    pub fn caption(&self) -> &str {
        self.label.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Renderer with an optional font. Without one only boxes are drawn.
pub struct Overlay {
    font: Option<FontVec>,
}

impl Overlay {
    /// Load the TTF at `path`; a missing or invalid font disables text.
    pub fn load(path: &Path) -> Self {
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => {
                tracing::debug!(path = %path.display(), "overlay font loaded");
                Self { font: Some(font) }
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "overlay font unavailable, drawing boxes only");
                Self { font: None }
            }
        }
    }

    pub fn without_font() -> Self {
        Self { font: None }
    }

    pub fn draw_faces(&self, image: &mut RgbImage, faces: &[FaceTag]) {
        for face in faces {
            let color = if face.label.is_some() { GREEN } else { RED };
            self.draw_box(image, &face.bbox, color);
            let y = (face.bbox.y as i32 - LINE_HEIGHT).max(0);
            self.draw_text(image, face.bbox.x as i32, y, face.caption(), color);
        }
    }

    pub fn draw_box(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
        let Some((x, y, w, h)) = bbox.clamped_rect(image.width(), image.height()) else {
            return;
        };
        let rect = Rect::at(x as i32, y as i32).of_size(w, h);
        draw_hollow_rect_mut(image, rect, color);
        // Second outline for a 2px stroke.
        if w > 2 && h > 2 {
            let inner = Rect::at(x as i32 + 1, y as i32 + 1).of_size(w - 2, h - 2);
            draw_hollow_rect_mut(image, inner, color);
        }
    }

    /// Lines stacked from the top-left corner.
    pub fn draw_hud(&self, image: &mut RgbImage, lines: &[(String, Rgb<u8>)]) {
        for (i, (text, color)) in lines.iter().enumerate() {
            self.draw_text(image, 10, 6 + i as i32 * LINE_HEIGHT, text, *color);
        }
    }

    /// Text on a dark strip along the bottom edge.
    pub fn draw_footer(&self, image: &mut RgbImage, text: &str) {
        if image.height() < LINE_HEIGHT as u32 || image.width() == 0 {
            return;
        }
        let y = image.height() as i32 - LINE_HEIGHT;
        draw_filled_rect_mut(image, Rect::at(0, y).of_size(image.width(), LINE_HEIGHT as u32), SHADOW);
        self.draw_text(image, 10, y + 2, text, WHITE);
    }

    fn draw_text(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(TEXT_SCALE);
        draw_text_mut(image, SHADOW, x + 1, y + 1, scale, font, text);
        draw_text_mut(image, color, x, y, scale, font, text);
    }
}
