use image::{Rgb, RgbImage};
use medi_dataset::{AugmentationPolicyBuilder, Batch, Dims, StandardizeMode};
use medi_ensembler::prelude::*;
use ndarray::{Array2, Axis, Ix2};
use std::path::Path;

/// Square constant-colour PNGs; flips and 90° turns leave them unchanged.
fn write_samples(dir: &Path, reds: &[u8]) -> anyhow::Result<Vec<String>> {
    let mut samples = Vec::new();
    for (i, red) in reds.iter().enumerate() {
        let name = format!("case_{i:02}");
        RgbImage::from_pixel(6, 6, Rgb([*red, 30, 200])).save(dir.join(format!("{name}.png")))?;
        samples.push(name);
    }
    Ok(samples)
}

/// Per-channel spatial mean of every item.
fn channel_means(batch: &Batch) -> anyhow::Result<Array2<f32>> {
    let means = batch
        .images
        .mean_axis(Axis(1))
        .and_then(|m| m.mean_axis(Axis(1)))
        .ok_or_else(|| anyhow::anyhow!("empty batch"))?;
    Ok(means.into_dimensionality::<Ix2>()?)
}

#[test]
fn tta_predictions_follow_sample_order() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let samples = write_samples(tmp.path(), &[0, 51, 102, 153, 204])?;
    let model = BatchPredictor::new(vec![6, 6, 3], channel_means);
    let options = AugmentingOptions::default()
        .with_n_cycles(4)
        .with_batch_size(3)
        .with_resize(Some(vec![6, 6]))
        .with_image_format(Some("png".into()))
        .with_standardize_mode(StandardizeMode::Tf)
        .with_seed(Some(42));

    let preds = predict_augmenting(&model, &samples, tmp.path(), &options)?;
    assert_eq!(preds.dim(), (5, 3));
    for (i, red) in [0u8, 51, 102, 153, 204].iter().enumerate() {
        let expected = f32::from(*red) / 127.5 - 1.0;
        assert!((preds[[i, 0]] - expected).abs() < 1e-5);
        assert!((preds[[i, 2]] - (200.0 / 127.5 - 1.0)).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn worker_count_does_not_change_ensembled_output() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let samples = write_samples(tmp.path(), &[10, 90, 250])?;
    // Brightness and noise make each cycle differ, so ordering bugs would show.
    let policy = AugmentationPolicyBuilder::new(Dims::Image)
        .probability(0.7)
        .brightness(true)
        .noise(true)
        .build();
    let model = BatchPredictor::new(vec![6, 6, 3], channel_means);
    let run = |workers: usize| {
        let options = AugmentingOptions::default()
            .with_n_cycles(5)
            .with_batch_size(4)
            .with_resize(Some(vec![6, 6]))
            .with_image_format(Some("png".into()))
            .with_policy(policy.clone())
            .with_standardize_mode(StandardizeMode::Tf)
            .with_aggregate("softmax")
            .with_seed(Some(7))
            .with_workers(workers);
        predict_augmenting(&model, &samples, tmp.path(), &options)
    };
    let single = run(1)?;
    let pooled = run(4)?;
    assert_eq!(single, pooled);
    for row in single.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn missing_image_aborts_ensembling() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut samples = write_samples(tmp.path(), &[1, 2])?;
    samples.insert(1, "case_missing".into());
    let model = BatchPredictor::new(vec![6, 6, 3], channel_means);
    let options = AugmentingOptions::default()
        .with_n_cycles(2)
        .with_image_format(Some("png".into()))
        .with_workers(2);
    let err = predict_augmenting(&model, &samples, tmp.path(), &options)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert!(matches!(
        err,
        EnsembleError::Dataset(medi_dataset::DatasetError::MissingImage { ref sample, .. })
            if sample == "case_missing"
    ));
    Ok(())
}
