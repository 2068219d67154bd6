use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Malformed detection `{label}`: {reason}")]
    InputMalformed { label: String, reason: String },
    #[error("Region of {width}x{height}px is below the {min_pixels}px minimum")]
    InsufficientRegion {
        width: f32,
        height: f32,
        min_pixels: u32,
    },
}
