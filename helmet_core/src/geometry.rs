use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left and `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Builds a box from a center point and its extent, the layout hosted
    /// inference APIs report.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self {
            x1: cx - width / 2.,
            y1: cy - height / 2.,
            x2: cx + width / 2.,
            y2: cy + height / 2.,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Ordered corners with finite coordinates.
    pub fn is_well_formed(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 <= self.x2
            && self.y1 <= self.y2
    }

    /// Clips the box to `[0, width] x [0, height]`. A box lying fully outside
    /// collapses to zero area on the nearest edge.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            x1: self.x1.clamp(0., w),
            y1: self.y1.clamp(0., h),
            x2: self.x2.clamp(0., w),
            y2: self.y2.clamp(0., h),
        }
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }
}

pub fn intersection_area(a: &BoundingBox, b: &BoundingBox) -> f32 {
    if a.x2 < b.x1 || b.x2 < a.x1 || a.y2 < b.y1 || b.y2 < a.y1 {
        return 0.;
    }
    (a.x2.min(b.x2) - a.x1.max(b.x1)) * (a.y2.min(b.y2) - a.y1.max(b.y1))
}

/// Fraction of `reference` covered by `candidate`.
///
/// Unlike IoU this is asymmetric: a small helmet box sitting entirely inside a
/// wide head region still scores by how much of the head it covers, and a
/// zero-area reference always scores 0.
pub fn overlap_ratio(candidate: &BoundingBox, reference: &BoundingBox) -> f32 {
    let reference_area = reference.area();
    if reference_area <= 0. {
        return 0.;
    }
    intersection_area(candidate, reference) / reference_area
}

fn union_area(a: &BoundingBox, b: &BoundingBox) -> f32 {
    a.area() + b.area() - intersection_area(a, b)
}

/// Symmetric intersection over union, used for non-maximum suppression.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let union = union_area(a, b);
    if union <= 0. {
        return 0.;
    }
    intersection_area(a, b) / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0., 0., 10., 10.);
        let b = BoundingBox::new(20., 20., 30., 30.);
        assert_eq!(intersection_area(&a, &b), 0.);
        assert_eq!(overlap_ratio(&a, &b), 0.);
    }

    #[test]
    fn test_touching_boxes_have_no_area() {
        let a = BoundingBox::new(0., 0., 10., 10.);
        let b = BoundingBox::new(10., 0., 20., 10.);
        assert_eq!(intersection_area(&a, &b), 0.);
    }

    #[test]
    fn test_overlap_ratio_is_relative_to_reference() {
        let head = BoundingBox::new(0., 0., 100., 50.);
        let helmet = BoundingBox::new(10., 0., 90., 40.);
        let ratio = overlap_ratio(&helmet, &head);
        assert!((ratio - 0.64).abs() < 1e-6);

        // The other way around the helmet is fully covered.
        assert_eq!(overlap_ratio(&head, &helmet), 1.);
    }

    #[test]
    fn test_overlap_ratio_with_degenerate_reference() {
        let flat = BoundingBox::new(5., 5., 5., 20.);
        let candidate = BoundingBox::new(0., 0., 10., 30.);
        assert_eq!(overlap_ratio(&candidate, &flat), 0.);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0., 0., 10., 10.);
        let b = BoundingBox::new(5., 0., 15., 10.);
        assert!((iou(&a, &b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(iou(&a, &a), 1.);
    }

    #[test]
    fn test_well_formed() {
        assert!(BoundingBox::new(0., 0., 0., 0.).is_well_formed());
        assert!(!BoundingBox::new(10., 0., 0., 10.).is_well_formed());
        assert!(!BoundingBox::new(0., f32::NAN, 10., 10.).is_well_formed());
    }

    #[test]
    fn test_from_center_and_clamp() {
        let bbox = BoundingBox::from_center(10., 10., 40., 20.);
        assert_eq!(bbox, BoundingBox::new(-10., 0., 30., 20.));
        assert_eq!(bbox.clamp_to(25, 25), BoundingBox::new(0., 0., 25., 20.));
    }
}
