use crate::config::DetectorConfig;
use crate::detection::Detection;
use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

const JPEG_QUALITY: u8 = 90;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_PADDING: u32 = 2;

/// Fonts tried, in order, when no `font_path` is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [52, 69, 147],
    [203, 56, 255],
];

fn class_color(class_id: u16) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Draws boxes and `label confidence` captions onto result images.
///
/// Captions need a TrueType font. Without one only the boxes are drawn.
pub struct Annotator {
    thickness: u32,
    hide_labels: bool,
    hide_conf: bool,
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(thickness: u32, hide_labels: bool, hide_conf: bool, font: Option<FontVec>) -> Self {
        Self {
            thickness: thickness.max(1),
            hide_labels,
            hide_conf,
            font,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        let font = if config.hide_labels {
            None
        } else {
            let font = match &config.font_path {
                Some(path) => load_font(path),
                None => load_system_font(),
            };
            if font.is_none() {
                tracing::warn!("No usable font found, result images will carry boxes only");
            }
            font
        };

        Self::new(config.line_thickness, config.hide_labels, config.hide_conf, font)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Caption for `det`, or `None` when labels are hidden.
    pub fn label_text(&self, det: &Detection) -> Option<String> {
        if self.hide_labels {
            None
        } else if self.hide_conf {
            Some(det.label.clone())
        } else {
            Some(format!("{} {:.2}", det.label, det.confidence))
        }
    }

    fn label_scale(&self) -> PxScale {
        PxScale::from((self.thickness * 5).max(12) as f32)
    }

    pub fn draw(&self, image: &mut RgbImage, detections: &[Detection]) {
        draw_detections(image, detections, self.thickness);

        let Some(font) = &self.font else {
            return;
        };
        let scale = self.label_scale();

        for det in detections {
            let Some(text) = self.label_text(det) else {
                continue;
            };
            let (text_w, text_h) = text_size(scale, font, &text);
            let Some(background) = label_rect(det, text_w, text_h, image.dimensions()) else {
                continue;
            };

            draw_filled_rect_mut(image, background, class_color(det.class_id));
            draw_text_mut(
                image,
                LABEL_TEXT_COLOR,
                background.left() + LABEL_PADDING as i32,
                background.top() + LABEL_PADDING as i32,
                scale,
                font,
                &text,
            );
        }
    }

    /// Annotated JPEG bytes for `image`.
    pub fn render(&self, image: &DynamicImage, detections: &[Detection]) -> anyhow::Result<Vec<u8>> {
        let _s = common::span_debug!("render_annotations");

        let mut canvas = image.to_rgb8();
        self.draw(&mut canvas, detections);
        encode_jpeg(&canvas)
    }
}

/// Caption background: above the box when it fits, else just inside its top edge.
fn label_rect(det: &Detection, text_w: u32, text_h: u32, (width, height): (u32, u32)) -> Option<Rect> {
    let w = text_w + 2 * LABEL_PADDING;
    let h = text_h + 2 * LABEL_PADDING;
    if w > width || h > height {
        return None;
    }

    let left = (det.bbox.x.round() as i32).clamp(0, (width - w) as i32);
    let above = det.bbox.y.round() as i32 - h as i32;
    let top = if above >= 0 {
        above
    } else {
        (det.bbox.y.round() as i32).clamp(0, (height - h) as i32)
    };

    Some(Rect::at(left, top).of_size(w, h))
}

fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read font");
            return None;
        }
    };

    match FontVec::try_from_vec(bytes) {
        Ok(font) => {
            tracing::debug!(path = %path.display(), "Label font loaded");
            Some(font)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Invalid font file");
            None
        }
    }
}

/// First readable font from the usual system locations.
pub fn load_system_font() -> Option<FontVec> {
    SYSTEM_FONTS
        .iter()
        .map(PathBuf::from)
        .filter(|path| path.is_file())
        .find_map(|path| load_font(&path))
}

/// Draw one hollow box per detection, `thickness` pixels wide.
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection], thickness: u32) {
    let (width, height) = image.dimensions();

    for det in detections {
        let color = class_color(det.class_id);
        let left = det.bbox.x.round() as i32;
        let top = det.bbox.y.round() as i32;
        let right = (det.bbox.x2().round() as i32).min(width as i32);
        let bottom = (det.bbox.y2().round() as i32).min(height as i32);

        // Concentric rectangles, shrinking inwards
        for inset in 0..thickness.max(1) as i32 {
            let w = right - left - 2 * inset;
            let h = bottom - top - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}

pub fn encode_jpeg(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(image)?;
    Ok(buf)
}
