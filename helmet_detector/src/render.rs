use crate::pipeline::ImageReport;
use helmet_core::{BoundingBox, NormalizedClass};
use image::{codecs::jpeg::JpegEncoder, ImageReader, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut},
    rect::Rect,
};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("Failed to read image: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to encode image: {0}")]
    Encode(image::ImageError),
}

const PERSON_THICKNESS: i32 = 3;
const TAB_HEIGHT: u32 = 10;
const TAB_WIDTH: u32 = 36;

pub fn status_color(status: NormalizedClass) -> Rgb<u8> {
    match status {
        NormalizedClass::Protected => Rgb([0, 200, 0]),
        NormalizedClass::Unprotected => Rgb([220, 0, 0]),
        NormalizedClass::Unknown => Rgb([255, 176, 0]),
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, RenderError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let image = reader.decode().map_err(RenderError::Decode)?;
    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}

fn to_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    let clamped = bbox.clamp_to(width, height);
    let x = clamped.x1.round() as i32;
    let y = clamped.y1.round() as i32;
    let w = (clamped.x2.round() as i32 - x).max(0) as u32;
    let h = (clamped.y2.round() as i32 - y).max(0) as u32;
    if w == 0 || h == 0 {
        return None;
    }
    Some(Rect::at(x, y).of_size(w, h))
}

/// Draws every verdict of `report` on a copy of `image`.
///
/// Person boxes are coloured by status with a filled tab on their top-left
/// corner; head regions get a one-pixel outline in the same colour.
pub fn annotate(image: &RgbImage, report: &ImageReport) -> RgbImage {
    let mut canvas = image.clone();
    let (width, height) = canvas.dimensions();

    for verdict in &report.verdicts {
        let color = status_color(verdict.status);

        let Some(person) = to_rect(&verdict.person_box, width, height) else {
            continue;
        };
        for inset in 0..PERSON_THICKNESS {
            let w = person.width() as i32 - 2 * inset;
            let h = person.height() as i32 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let ring = Rect::at(person.left() + inset, person.top() + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, ring, color);
        }

        let tab = Rect::at(person.left(), person.top())
            .of_size(TAB_WIDTH.min(person.width()), TAB_HEIGHT.min(person.height()));
        draw_filled_rect_mut(&mut canvas, tab, color);

        if let Some(head) = to_rect(&verdict.head_region, width, height) {
            draw_hollow_rect_mut(&mut canvas, head, color);
        }
    }

    canvas
}

pub fn render_jpeg(
    image: &RgbImage,
    report: &ImageReport,
    quality: u8,
) -> Result<Vec<u8>, RenderError> {
    encode_jpeg(&annotate(image, report), quality).map_err(RenderError::Encode)
}
