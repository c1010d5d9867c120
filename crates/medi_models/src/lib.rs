//! Metadata for the pretrained classification architectures.
//!
//! The networks themselves live in whatever runtime trains them. This crate only
//! records what each architecture expects at its input: the spatial shape the
//! images are resized to and the intensity standardization it was pretrained with.
//! Both feed the batch generator and the test-time augmentation pipeline.

use medi_dataset::StandardizeMode;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchitectureMeta {
    /// Registry key, e.g. `2D.VGG19`.
    pub key: &'static str,
    /// Spatial input shape without the channel axis.
    pub input: Vec<usize>,
    pub standardize: StandardizeMode,
}

impl ArchitectureMeta {
    /// Full per-sample model input shape, channels last.
    pub fn model_input(&self, channels: usize) -> Vec<usize> {
        let mut shape = self.input.clone();
        shape.push(channels);
        shape
    }
}

const ARCHITECTURES: &[(&str, &[usize], StandardizeMode)] = &[
    ("2D.ResNet50V2", &[224, 224], StandardizeMode::Tf),
    ("2D.ResNet101V2", &[224, 224], StandardizeMode::Tf),
    ("2D.ResNet152V2", &[224, 224], StandardizeMode::Tf),
    ("2D.VGG16", &[224, 224], StandardizeMode::Caffe),
    ("2D.VGG19", &[224, 224], StandardizeMode::Caffe),
];

/// Look up an architecture by key. Keys are case-sensitive.
pub fn architecture_meta(key: &str) -> Option<ArchitectureMeta> {
    ARCHITECTURES
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|&(key, input, standardize)| ArchitectureMeta {
            key,
            input: input.to_vec(),
            standardize,
        })
}

pub fn list_architectures() -> Vec<&'static str> {
    ARCHITECTURES.iter().map(|(key, _, _)| *key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vgg_uses_caffe_standardization() {
        let meta = architecture_meta("2D.VGG19").unwrap();
        assert_eq!(meta.input, vec![224, 224]);
        assert_eq!(meta.standardize, StandardizeMode::Caffe);
        assert_eq!(meta.model_input(3), vec![224, 224, 3]);
    }

    #[test]
    fn resnet_v2_uses_tf_standardization() {
        let meta = architecture_meta("2D.ResNet101V2").unwrap();
        assert_eq!(meta.standardize, StandardizeMode::Tf);
        assert_eq!(meta.model_input(1).len(), 3);
    }

    #[test]
    fn unknown_keys_are_absent() {
        assert!(architecture_meta("2D.vgg19").is_none());
        assert!(architecture_meta("3D.DenseNet121").is_none());
        assert_eq!(list_architectures().len(), 5);
    }
}
