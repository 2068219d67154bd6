use crate::{error::CoreError, geometry::BoundingBox};
use image::{imageops, RgbImage};

/// Top slice of a person box where a helmet can plausibly sit.
///
/// The slice spans the full person width and `round(height * head_fraction)`
/// rows, never more than the person box itself.
pub fn head_region(person: &BoundingBox, head_fraction: f32) -> BoundingBox {
    let person_height = person.height().max(0.);
    let head_height = (person_height * head_fraction).round().clamp(0., person_height);
    BoundingBox::new(person.x1, person.y1, person.x2, person.y1 + head_height)
}

pub fn ensure_analyzable(width: f32, height: f32, min_pixels: u32) -> Result<(), CoreError> {
    let min = min_pixels as f32;
    if width < min || height < min {
        return Err(CoreError::InsufficientRegion {
            width,
            height,
            min_pixels,
        });
    }
    Ok(())
}

/// Head region of `person`, or `InsufficientRegion` when it is too small to analyse.
pub fn checked_head_region(
    person: &BoundingBox,
    head_fraction: f32,
    min_pixels: u32,
) -> Result<BoundingBox, CoreError> {
    let region = head_region(person, head_fraction);
    ensure_analyzable(region.width(), region.height(), min_pixels)?;
    Ok(region)
}

/// Copies the pixels under `region`, clamped to the image bounds.
///
/// Out-of-bounds regions yield an empty image instead of an error.
pub fn crop(image: &RgbImage, region: &BoundingBox) -> RgbImage {
    let (width, height) = image.dimensions();
    let clamped = region.clamp_to(width, height);

    let x = clamped.x1.round() as u32;
    let y = clamped.y1.round() as u32;
    let x_end = clamped.x2.round() as u32;
    let y_end = clamped.y2.round() as u32;

    if x_end <= x || y_end <= y {
        return RgbImage::new(0, 0);
    }

    imageops::crop_imm(image, x, y, x_end - x, y_end - y).to_image()
}
