mod associator;
mod classification;
mod detection;
mod error;
mod head_region;

pub mod config;
pub mod geometry;
pub mod heuristic;

pub use associator::{associate, Associator, PersonVerdict, VerdictSource, VerdictSummary};
pub use classification::{ClassificationPolicy, LabelClass, NormalizedClass};
pub use config::{AssociationConfig, InsufficientRegionPolicy, MatchPolicy};
pub use detection::{retain_valid, Detection};
pub use error::CoreError;
pub use geometry::BoundingBox;
pub use head_region::{checked_head_region, crop, head_region};
