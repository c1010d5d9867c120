//! Dataset descriptors stored as JSON: `{ "<sample>": <label> }`.
//!
//! Sparse descriptors map each sample to one class label; one-hot descriptors map
//! each sample to a list of binary values.

use crate::loader::image_path;
use crate::types::{DatasetError, DatasetResult, JsonDataset};
use ndarray::Array2;
use serde_json::Value;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Image extensions accepted when peeking at an image directory.
pub const ALLOWED_IMAGE_FORMATS: &[&str] = &[
    "jpeg", "jpg", "tif", "tiff", "png", "bmp", "gif", "npy", "nii", "gz", "mha", "dcm",
];

/// Parse a JSON descriptor and verify that every referenced image exists.
///
/// The image format is inferred from the first directory entry (in file-name order)
/// with an allowed extension. If the first sample key already ends with that
/// extension, keys are used as file names and the returned format is `None`.
pub fn json_loader(
    path_data: &Path,
    image_dir: &Path,
    allowed_formats: &[&str],
    training: bool,
    ohe: bool,
) -> DatasetResult<JsonDataset> {
    let raw = fs::read(path_data).map_err(|e| DatasetError::Io {
        path: path_data.to_path_buf(),
        source: e,
    })?;
    let value: Value = serde_json::from_slice(&raw).map_err(|e| DatasetError::Json {
        path: path_data.to_path_buf(),
        source: e,
    })?;
    let Value::Object(entries) = value else {
        return Err(DatasetError::data_format(
            path_data,
            "descriptor must be a JSON object keyed by sample",
        ));
    };

    let peeked = peek_image_format(image_dir, allowed_formats)?;
    let image_format = match entries.keys().next() {
        Some(first) if first.ends_with(&format!(".{peeked}")) => None,
        _ => Some(peeked),
    };
    debug!(
        dir = %image_dir.display(),
        format = ?image_format,
        samples = entries.len(),
        "json descriptor parsed"
    );

    for sample in entries.keys() {
        let path = image_path(image_dir, sample, image_format.as_deref());
        if !path.exists() {
            return Err(DatasetError::MissingImage {
                sample: sample.clone(),
                path,
            });
        }
    }

    let samples: Vec<String> = entries.keys().cloned().collect();
    if !training {
        return Ok(JsonDataset {
            samples,
            labels: None,
            class_n: None,
            class_names: None,
            image_format,
        });
    }

    let values: Vec<&Value> = entries.values().collect();
    let (labels, class_names) = if ohe {
        parse_one_hot(path_data, &samples, &values)?
    } else {
        parse_sparse(path_data, &samples, &values)?
    };
    Ok(JsonDataset {
        samples,
        labels: Some(labels),
        class_n: Some(class_names.len()),
        class_names: Some(class_names),
        image_format,
    })
}

/// First entry (by file name) whose extension is allowed, case-insensitively.
///
/// Mixed-format directories are not supported: the whole directory is assumed to
/// share the peeked extension.
fn peek_image_format(image_dir: &Path, allowed_formats: &[&str]) -> DatasetResult<String> {
    let entries = fs::read_dir(image_dir).map_err(|e| DatasetError::Io {
        path: image_dir.to_path_buf(),
        source: e,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
        .into_iter()
        .filter_map(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_string()))
        .find(|ext| {
            allowed_formats
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .ok_or_else(|| DatasetError::UnknownImageFormat {
            dir: image_dir.to_path_buf(),
        })
}

#[derive(Debug, Clone)]
enum SparseLabel {
    Text(String),
    /// Numeric value plus its JSON spelling, used as the class name.
    Number(f64, String),
}

impl SparseLabel {
    fn name(&self) -> String {
        match self {
            SparseLabel::Text(s) => s.clone(),
            SparseLabel::Number(_, text) => text.clone(),
        }
    }

    fn order(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SparseLabel::Text(a), SparseLabel::Text(b)) => a.cmp(b),
            (SparseLabel::Number(a, _), SparseLabel::Number(b, _)) => a.total_cmp(b),
            (SparseLabel::Number(..), SparseLabel::Text(_)) => Ordering::Less,
            (SparseLabel::Text(_), SparseLabel::Number(..)) => Ordering::Greater,
        }
    }
}

fn parse_sparse(
    path: &Path,
    samples: &[String],
    values: &[&Value],
) -> DatasetResult<(Array2<f32>, Vec<String>)> {
    let mut labels = Vec::with_capacity(values.len());
    for (sample, value) in samples.iter().zip(values) {
        let label = match value {
            Value::String(s) => SparseLabel::Text(s.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(v) => SparseLabel::Number(v, n.to_string()),
                None => {
                    return Err(DatasetError::data_format(
                        path,
                        format!("sample \"{sample}\": label {n} is not representable"),
                    ))
                }
            },
            other => {
                return Err(DatasetError::data_format(
                    path,
                    format!("sample \"{sample}\": expected a class label, got {other}"),
                ))
            }
        };
        labels.push(label);
    }
    let texts = labels
        .iter()
        .filter(|l| matches!(l, SparseLabel::Text(_)))
        .count();
    if texts != 0 && texts != labels.len() {
        return Err(DatasetError::data_format(
            path,
            "class labels mix strings and numbers",
        ));
    }

    let mut classes = labels.clone();
    classes.sort_by(SparseLabel::order);
    classes.dedup_by(|a, b| a.order(b) == Ordering::Equal);

    let mut ohe = Array2::<f32>::zeros((labels.len(), classes.len()));
    for (row, label) in labels.iter().enumerate() {
        // `classes` holds every label, so the search always succeeds.
        if let Ok(col) = classes.binary_search_by(|c| c.order(label)) {
            ohe[[row, col]] = 1.0;
        }
    }
    Ok((ohe, classes.iter().map(SparseLabel::name).collect()))
}

fn parse_one_hot(
    path: &Path,
    samples: &[String],
    values: &[&Value],
) -> DatasetResult<(Array2<f32>, Vec<String>)> {
    let mut width: Option<usize> = None;
    let mut flat = Vec::new();
    for (sample, value) in samples.iter().zip(values) {
        let Value::Array(items) = value else {
            return Err(DatasetError::data_format(
                path,
                format!("sample \"{sample}\": expected a one-hot list, got {value}"),
            ));
        };
        match width {
            None => width = Some(items.len()),
            Some(w) if w != items.len() => {
                return Err(DatasetError::data_format(
                    path,
                    format!(
                        "sample \"{sample}\": one-hot list has {} entries, expected {w}",
                        items.len()
                    ),
                ));
            }
            _ => {}
        }
        for item in items {
            match item.as_f64() {
                Some(v) if v == 0.0 || v == 1.0 => flat.push(v as f32),
                _ => {
                    return Err(DatasetError::data_format(
                        path,
                        format!("sample \"{sample}\": one-hot entry {item} is not 0 or 1"),
                    ))
                }
            }
        }
    }
    let width = width.unwrap_or(0);
    let labels = Array2::from_shape_vec((samples.len(), width), flat)
        .map_err(|e| DatasetError::data_format(path, e.to_string()))?;
    Ok((labels, (0..width).map(|i| i.to_string()).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn fixture(json: &str, names: &[&str]) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let images = tmp.path().join("images");
        fs::create_dir_all(&images).unwrap();
        for name in names {
            RgbImage::new(2, 2).save(images.join(name)).unwrap();
        }
        fs::write(tmp.path().join("data.json"), json).unwrap();
        tmp
    }

    fn load(tmp: &tempfile::TempDir, training: bool, ohe: bool) -> DatasetResult<JsonDataset> {
        json_loader(
            &tmp.path().join("data.json"),
            &tmp.path().join("images"),
            ALLOWED_IMAGE_FORMATS,
            training,
            ohe,
        )
    }

    #[test]
    fn sparse_labels_are_one_hot_encoded_in_sorted_class_order() {
        let tmp = fixture(
            r#"{"img1": "cat", "img2": "dog", "img3": "cat"}"#,
            &["img1.png", "img2.png", "img3.png"],
        );
        let ds = load(&tmp, true, false).unwrap();
        assert_eq!(ds.samples, vec!["img1", "img2", "img3"]);
        assert_eq!(ds.class_names.as_deref(), Some(&["cat".to_string(), "dog".to_string()][..]));
        assert_eq!(ds.class_n, Some(2));
        assert_eq!(ds.image_format.as_deref(), Some("png"));
        let labels = ds.labels.unwrap();
        assert_eq!(
            labels,
            ndarray::arr2(&[[1.0f32, 0.0], [0.0, 1.0], [1.0, 0.0]])
        );
    }

    #[test]
    fn numeric_labels_sort_numerically() {
        let tmp = fixture(r#"{"a": 10, "b": 2}"#, &["a.png", "b.png"]);
        let ds = load(&tmp, true, false).unwrap();
        assert_eq!(ds.class_names.unwrap(), vec!["2", "10"]);
        assert_eq!(ds.labels.unwrap(), ndarray::arr2(&[[0.0f32, 1.0], [1.0, 0.0]]));
    }

    #[test]
    fn inference_descriptor_returns_only_samples() {
        let tmp = fixture(r#"{"b": "x", "a": "y"}"#, &["a.png", "b.png"]);
        let ds = load(&tmp, false, false).unwrap();
        assert_eq!(ds.samples, vec!["b", "a"]);
        assert!(ds.labels.is_none());
        assert!(ds.class_names.is_none());
        assert!(ds.class_n.is_none());
    }

    #[test]
    fn keys_with_extension_disable_format_suffix() {
        let tmp = fixture(r#"{"a.png": "x"}"#, &["a.png"]);
        let ds = load(&tmp, false, false).unwrap();
        assert_eq!(ds.image_format, None);
    }

    #[test]
    fn one_hot_lists_must_share_length() {
        let tmp = fixture(r#"{"a": [1, 0], "b": [0, 1, 0]}"#, &["a.png", "b.png"]);
        assert!(matches!(
            load(&tmp, true, true),
            Err(DatasetError::DataFormat { .. })
        ));

        let tmp = fixture(r#"{"a": [1, 0], "b": [0, 1]}"#, &["a.png", "b.png"]);
        let ds = load(&tmp, true, true).unwrap();
        assert_eq!(ds.class_names.unwrap(), vec!["0", "1"]);
    }

    #[test]
    fn missing_image_is_fatal() {
        let tmp = fixture(r#"{"a": "x", "missing": "y"}"#, &["a.png"]);
        match load(&tmp, true, false) {
            Err(DatasetError::MissingImage { sample, .. }) => assert_eq!(sample, "missing"),
            other => panic!("expected MissingImage, got {other:?}"),
        }
    }

    #[test]
    fn unknown_directory_format_is_fatal() {
        let tmp = fixture(r#"{"a": "x"}"#, &[]);
        fs::write(tmp.path().join("images").join("notes.txt"), "x").unwrap();
        assert!(matches!(
            load(&tmp, false, false),
            Err(DatasetError::UnknownImageFormat { .. })
        ));
    }

    #[test]
    fn mixed_label_types_are_rejected() {
        let tmp = fixture(r#"{"a": "x", "b": 1}"#, &["a.png", "b.png"]);
        assert!(matches!(
            load(&tmp, true, false),
            Err(DatasetError::DataFormat { .. })
        ));
    }
}
