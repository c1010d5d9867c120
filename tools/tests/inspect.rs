use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use medi_dataset::{json_loader, ALLOWED_IMAGE_FORMATS};
use medi_ensembler::AugmentingOptions;
use medi_tools::inspect::{model_input_shape, plan_batches, summarize};

fn write_dataset(root: &Path) -> anyhow::Result<()> {
    let images = root.join("images");
    fs::create_dir_all(&images)?;
    let mut json = serde_json::Map::new();
    for (name, class) in [("m1", "mel"), ("m2", "nevus"), ("m3", "nevus")] {
        RgbImage::from_pixel(5, 7, Rgb([20, 40, 60])).save(images.join(format!("{name}.jpg")))?;
        json.insert(name.into(), class.into());
    }
    fs::write(root.join("isic.json"), serde_json::to_string(&json)?)?;
    Ok(())
}

#[test]
fn summary_lists_class_counts() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_dataset(tmp.path())?;
    let ds = json_loader(
        &tmp.path().join("isic.json"),
        &tmp.path().join("images"),
        ALLOWED_IMAGE_FORMATS,
        true,
        false,
    )?;
    let summary = summarize(&ds);
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.image_format.as_deref(), Some("jpg"));
    assert_eq!(
        summary.classes,
        vec![("mel".to_string(), 1), ("nevus".to_string(), 2)]
    );
    assert!(summary.to_string().contains("nevus: 2"));
    Ok(())
}

#[test]
fn batch_plan_matches_replicated_sequence() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_dataset(tmp.path())?;
    let ds = json_loader(
        &tmp.path().join("isic.json"),
        &tmp.path().join("images"),
        ALLOWED_IMAGE_FORMATS,
        false,
        false,
    )?;
    let options = AugmentingOptions::default()
        .with_n_cycles(3)
        .with_batch_size(4)
        .with_resize(Some(vec![16, 16]))
        .with_image_format(ds.image_format.clone())
        .with_seed(Some(1));
    let input_shape = model_input_shape(&options, None);
    assert_eq!(input_shape, vec![16, 16, 3]);

    let generator = plan_batches(&ds.samples, &tmp.path().join("images"), &options, &input_shape)?;
    assert_eq!(generator.sample_count(), 9);
    assert_eq!(generator.len(), 3);
    let mut rows = 0;
    for batch in generator {
        let batch = batch?;
        assert_eq!(&batch.images.shape()[1..], &[16, 16, 3]);
        rows += batch.len();
    }
    assert_eq!(rows, 9);
    Ok(())
}

#[test]
fn architecture_sets_model_input() {
    let options = AugmentingOptions::default().with_grayscale(true);
    assert_eq!(
        model_input_shape(&options, Some("2D.ResNet50V2")),
        vec![224, 224, 1]
    );
    assert_eq!(model_input_shape(&options, Some("nope")), vec![224, 224, 1]);
}
