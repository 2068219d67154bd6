use helmet_core::{
    associate, geometry::overlap_ratio, head_region, Associator, BoundingBox, Detection,
    NormalizedClass, VerdictSource,
};
use image::{Rgb, RgbImage};

fn worker() -> Detection {
    Detection::new("person", 0.92, BoundingBox::new(0., 0., 100., 200.))
}

fn scene() -> RgbImage {
    RgbImage::from_pixel(320, 240, Rgb([70, 110, 160]))
}

#[test]
fn helmet_on_head_is_matched() {
    let helmet = Detection::new("hardhat", 0.81, BoundingBox::new(10., 0., 90., 40.));
    let region = head_region(&worker().bbox, 0.25);
    assert_eq!(region, BoundingBox::new(0., 0., 100., 50.));
    assert!((overlap_ratio(&helmet.bbox, &region) - 0.64).abs() < 1e-6);

    let verdicts = associate(&[worker()], &[helmet], &scene());

    assert_eq!(verdicts.len(), 1);
    let verdict = &verdicts[0];
    assert!(verdict.has_helmet);
    assert_eq!(verdict.status, NormalizedClass::Protected);
    assert_eq!(verdict.helmet_confidence, 0.81);
    assert_eq!(verdict.matched_helmet_label, "hardhat");
    assert_eq!(verdict.person_confidence, 0.92);
    assert_eq!(verdict.source, VerdictSource::Geometric);
}

#[test]
fn helmet_near_feet_is_not_matched() {
    let helmet = Detection::new("hardhat", 0.81, BoundingBox::new(0., 150., 100., 200.));

    let verdicts = associate(&[worker()], &[helmet], &scene());

    let verdict = &verdicts[0];
    assert!(!verdict.has_helmet);
    assert_eq!(verdict.status, NormalizedClass::Unprotected);
    assert_eq!(verdict.helmet_confidence, 0.);
    assert!(verdict.matched_helmet_label.is_empty());
}

#[test]
fn uniform_head_without_helmet_detections_uses_heuristic() {
    let verdicts = associate(&[worker()], &[], &scene());

    let verdict = &verdicts[0];
    assert_eq!(verdict.source, VerdictSource::Heuristic);
    assert!(!verdict.has_helmet);
    assert_eq!(verdict.status, NormalizedClass::Unprotected);
    assert_eq!(verdict.helmet_confidence, 0.);
}

#[test]
fn tiny_head_crop_is_unknown() {
    // Head region is 100x50 but only 12 rows of it lie inside the image.
    let person = Detection::new("person", 0.7, BoundingBox::new(0., 228., 100., 428.));

    let verdicts = associate(&[person], &[], &scene());

    let verdict = &verdicts[0];
    assert_eq!(verdict.status, NormalizedClass::Unknown);
    assert_eq!(verdict.source, VerdictSource::Insufficient);
    assert!(!verdict.has_helmet);
}

#[test]
fn narrow_person_is_unknown() {
    let person = Detection::new("person", 0.7, BoundingBox::new(50., 10., 65., 210.));

    let verdicts = associate(&[person], &[], &scene());

    assert_eq!(verdicts[0].status, NormalizedClass::Unknown);
}

#[test]
fn association_has_no_hidden_state() {
    let associator = Associator::default();
    let persons = vec![
        worker(),
        Detection::new("person", 0.66, BoundingBox::new(150., 20., 230., 220.)),
    ];
    let helmets = vec![
        Detection::new("helmet", 0.5, BoundingBox::new(160., 20., 220., 50.)),
        Detection::new("no-helmet", 0.6, BoundingBox::new(5., 0., 95., 45.)),
    ];

    let first = associator.associate(&persons, &helmets, &scene());
    let second = associator.associate(&persons, &helmets, &scene());

    assert_eq!(first, second);
    assert_eq!(first[0].status, NormalizedClass::Unprotected);
    assert_eq!(first[1].status, NormalizedClass::Protected);
}
