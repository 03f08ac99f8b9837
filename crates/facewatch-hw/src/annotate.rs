//! Box and label overlays for annotated preview frames.

use crate::frame::{Frame, FrameError};
use ab_glyph::{FontRef, PxScale};
use facewatch_core::{BoundingBox, FaceDecision};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

/// DejaVu Sans Mono, see `assets/DejaVuSansMono.LICENSE`.
static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

/// Gap in pixels between a box and its label.
const LABEL_GAP: i32 = 2;

/// Outline and label styling for face boxes.
#[derive(Debug, Clone, Copy)]
pub struct BoxStyle {
    pub thickness: u32,
    /// Gray level of the outline.
    pub intensity: u8,
    /// Label glyph height in pixels.
    pub text_scale: f32,
    pub text_intensity: u8,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            thickness: 2,
            intensity: 255,
            text_scale: 18.0,
            text_intensity: 255,
        }
    }
}

/// Draws each face's box with its identity label underneath.
#[derive(Debug, Clone)]
pub struct Annotator {
    font: FontRef<'static>,
    style: BoxStyle,
}

impl Annotator {
    pub fn new(style: BoxStyle) -> Result<Self, FrameError> {
        let font = FontRef::try_from_slice(LABEL_FONT).map_err(|e| FrameError::Font(e.to_string()))?;
        Ok(Self { font, style })
    }

    pub fn style(&self) -> BoxStyle {
        self.style
    }

    /// Draw every face onto `frame` in place.
    pub fn annotate(&self, frame: &mut Frame, faces: &[FaceDecision]) -> Result<(), FrameError> {
        if faces.is_empty() {
            return Ok(());
        }
        let mut img = frame.to_image()?;
        for face in faces {
            draw_box(&mut img, &face.bbox, self.style);
            self.draw_label(&mut img, &face.bbox, face.decision.label());
        }
        frame.data = img.into_raw();
        Ok(())
    }

    /// Below the box, or above it when the frame has no room underneath.
    fn draw_label(&self, img: &mut GrayImage, bbox: &BoundingBox, label: &str) {
        let scale = PxScale::from(self.style.text_scale);
        let (_, text_h) = text_size(scale, &self.font, label);
        let text_h = text_h as i32;

        let below = bbox.bottom() as i32 + LABEL_GAP;
        let y = if below + text_h <= img.height() as i32 {
            below
        } else {
            (bbox.top() as i32 - text_h - LABEL_GAP).max(0)
        };
        draw_text_mut(
            img,
            Luma([self.style.text_intensity]),
            bbox.left() as i32,
            y,
            scale,
            &self.font,
            label,
        );
    }
}

/// Rectangular outline for `bbox`, clipped to the image. Thickness grows inward.
pub fn draw_box(img: &mut GrayImage, bbox: &BoundingBox, style: BoxStyle) {
    let left = bbox.left() as i32;
    let top = bbox.top() as i32;
    let right = (bbox.right() as i32).min(img.width() as i32);
    let bottom = (bbox.bottom() as i32).min(img.height() as i32);

    for i in 0..style.thickness.max(1) as i32 {
        let (w, h) = (right - left - 2 * i, bottom - top - 2 * i);
        if w <= 0 || h <= 0 {
            break;
        }
        draw_hollow_rect_mut(
            img,
            Rect::at(left + i, top + i).of_size(w as u32, h as u32),
            Luma([style.intensity]),
        );
    }
}
