// tests/test_pipeline.rs — End-to-end filter requests through the Engine.
//
// Everything here runs on the CPU reference backend so the suite passes on
// machines without a GPU adapter. Device parity lives in test_gpu_parity.rs.

use std::sync::Arc;
use std::thread;

use gpuconv::io::encode_png;
use gpuconv::ops::overlay::Overlay;
use gpuconv::{Engine, FilterError, FilterKind, FilterOutcome, Raster};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

/// Solid RGB image encoded as PNG, the way an upload arrives.
fn solid_png(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
    let data = (0..w * h).flat_map(|_| rgb).collect();
    let raster = Raster::from_vec(w, h, 3, data).unwrap();
    encode_png(&raster).unwrap()
}

/// Left half black, right half white.
fn step_edge(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, _| {
        if x < w / 2 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
    }))
}

#[test]
fn mean_of_solid_gray_is_unchanged() {
    let engine = Engine::cpu();
    let report = engine.process_upload(&solid_png(64, 64, [128; 3]), "mean", 5).unwrap();
    assert_eq!((report.width(), report.height()), (64, 64));
    assert_eq!(report.image.channels(), 3);
    assert!(report.image.data().iter().all(|&v| v == 128));
}

#[test]
fn gaussian_of_solid_gray_is_unchanged() {
    let engine = Engine::cpu();
    let report = engine.process_upload(&solid_png(64, 64, [128; 3]), "gaussian", 31).unwrap();
    assert_eq!(report.image.channels(), 3);
    assert!(report.image.data().iter().all(|&v| v == 128));
    match &report.outcome {
        FilterOutcome::Gaussian { is_preset, kernel_preview, channel_ms } => {
            assert!(*is_preset);
            assert_eq!(kernel_preview.shape, [31, 31]);
            let mean = channel_ms.iter().sum::<f64>() / 3.0;
            assert!((report.elapsed_ms - mean).abs() < 1e-9);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn sobel_of_solid_gray_is_black() {
    let engine = Engine::cpu();
    let report = engine.process_upload(&solid_png(64, 64, [128; 3]), "sobel", 3).unwrap();
    assert_eq!(report.image.channels(), 1);
    assert!(report.image.data().iter().all(|&v| v == 0));
    match report.outcome {
        FilterOutcome::Sobel { max_magnitude, magnitude_ms, normalize_ms, .. } => {
            assert_eq!(max_magnitude, 1.0);
            assert!((report.elapsed_ms - (magnitude_ms + normalize_ms)).abs() < 1e-9);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn ups_of_solid_gray_stays_gray() {
    let engine = Engine::cpu();
    let report = engine.process_upload(&solid_png(64, 64, [128; 3]), "ups", 3).unwrap();
    assert!(report.image.data().iter().all(|&v| v == 128));
    assert!(matches!(report.outcome, FilterOutcome::Ups { overlay_applied: false }));
}

#[test]
fn ups_composites_configured_overlay() {
    // Opaque red square in the top-left quadrant of the artwork, transparent elsewhere.
    let art = RgbaImage::from_fn(8, 8, |x, y| {
        if x < 4 && y < 4 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 0, 0, 0]) }
    });
    let engine = Engine::cpu().with_overlay(Some(Overlay::new(art, 1.0)));
    let report = engine.process_upload(&solid_png(64, 64, [128; 3]), "ups", 3).unwrap();

    assert!(matches!(report.outcome, FilterOutcome::Ups { overlay_applied: true }));
    assert_eq!(report.image.get(2, 2, 0), 255);
    assert_eq!(report.image.get(2, 2, 1), 0);
    // Beneath the transparent part the highlight output is untouched.
    for c in 0..3 {
        assert_eq!(report.image.get(60, 60, c), 128);
    }
}

#[test]
fn ups_keeps_blue_and_grays_red() {
    let engine = Engine::cpu();
    let blue = engine.process_upload(&solid_png(16, 16, [0, 0, 255]), "ups", 3).unwrap();
    assert_eq!(&blue.image.data()[0..3], &[0, 0, 255]);

    let red = engine.process_upload(&solid_png(16, 16, [255, 0, 0]), "ups", 3).unwrap();
    let px = &red.image.data()[0..3];
    assert_eq!(px[0], px[1]);
    assert_eq!(px[1], px[2]);
}

#[test]
fn sobel_step_edge_is_normalised_to_full_range() {
    let engine = Engine::cpu();
    let report = engine.process_image(&step_edge(32, 32), "sobel", 3).unwrap();
    let max = report.image.data().iter().copied().max().unwrap();
    assert_eq!(max, 255);
    // Far from the edge the gradient is zero.
    assert_eq!(report.image.get(2, 16, 0), 0);
    assert_eq!(report.image.get(29, 16, 0), 0);
}

#[test]
fn emboss_responds_to_edges_only() {
    let engine = Engine::cpu();
    let report = engine.process_image(&step_edge(32, 32), "emboss", 9).unwrap();
    assert_eq!(report.image.get(0, 16, 0), 128);
    assert_eq!(report.image.get(31, 16, 0), 128);
    assert!(report.image.data().iter().any(|&v| v != 128));
}

#[test]
fn filter_names_are_case_insensitive() {
    let engine = Engine::cpu();
    let png = solid_png(16, 16, [40, 50, 60]);
    let report = engine.process_upload(&png, "MEAN", 3).unwrap();
    assert_eq!(report.filter, FilterKind::Mean);
}

#[test]
fn validation_order_is_decode_name_size_image() {
    let engine = Engine::cpu();

    let err = engine.process_upload(b"not an image", "nope", 2).unwrap_err();
    assert!(matches!(err, FilterError::DecodeFailure(_)), "{err}");

    let png = solid_png(8, 8, [1, 2, 3]);
    let err = engine.process_upload(&png, "nope", 2).unwrap_err();
    assert!(err.to_string().contains("filter_type"), "{err}");

    let err = engine.process_upload(&png, "gaussian", 2).unwrap_err();
    assert!(err.to_string().contains("odd"), "{err}");

    let err = engine.process_upload(&png, "gaussian", 9).unwrap_err();
    assert!(err.to_string().contains("too large"), "{err}");
}

#[test]
fn kernel_equal_to_smaller_side_is_accepted() {
    let engine = Engine::cpu();
    let png = solid_png(9, 21, [200, 10, 10]);
    let report = engine.process_upload(&png, "mean", 9).unwrap();
    assert!(report.image.data().chunks_exact(3).all(|p| p == [200, 10, 10]));
}

#[test]
fn odd_sized_images_are_fully_covered() {
    let engine = Engine::cpu();
    let report = engine.process_upload(&solid_png(37, 19, [77; 3]), "mean", 3).unwrap();
    assert_eq!((report.geometry.blocks_x, report.geometry.blocks_y), (3, 2));
    assert!(report.image.data().iter().all(|&v| v == 77));
}

#[test]
fn metadata_reports_geometry_and_details() {
    let engine = Engine::cpu();
    let report = engine.process_upload(&solid_png(40, 24, [9; 3]), "sobel", 9).unwrap();
    let json = serde_json::to_value(report.metadata()).unwrap();
    assert_eq!(json["width"], 40);
    assert_eq!(json["height"], 24);
    assert_eq!(json["filter"], "sobel");
    assert_eq!(json["is_preset"], true);
    assert_eq!(json["backend"], "cpu");
    assert_eq!(json["geometry"]["blocks_x"], 3);
    assert_eq!(json["geometry"]["blocks_y"], 2);
    assert_eq!(json["details"]["type"], "sobel");
    assert_eq!(json["details"]["kx_preview"]["shape"][0], 9);
}

#[test]
fn output_encodes_as_png() {
    let engine = Engine::cpu();
    let report = engine.process_upload(&solid_png(16, 16, [5; 3]), "emboss", 3).unwrap();
    let png = report.encode_png().unwrap();
    let back = image::load_from_memory(&png).unwrap();
    assert_eq!(back.color(), image::ColorType::L8);
    assert_eq!((back.width(), back.height()), (16, 16));
}

#[test]
fn concurrent_requests_share_one_engine() {
    let engine = Arc::new(Engine::cpu());
    let png = Arc::new(solid_png(48, 48, [128; 3]));

    let handles: Vec<_> = ["mean", "gaussian", "sobel", "ups", "emboss", "mean"]
        .into_iter()
        .map(|filter| {
            let engine = Arc::clone(&engine);
            let png = Arc::clone(&png);
            thread::spawn(move || engine.process_upload(&png, filter, 3).map(|r| r.filter))
        })
        .collect();

    for h in handles {
        assert!(h.join().unwrap().is_ok());
    }
}
