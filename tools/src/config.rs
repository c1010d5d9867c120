use std::path::{Path, PathBuf};

use medi_dataset::{StandardizeMode, ALLOWED_IMAGE_FORMATS};
use medi_ensembler::{AugmentingOptions, DEFAULT_N_CYCLES};
use medi_models::architecture_meta;
use serde::Deserialize;
use tracing::warn;

const DEFAULT_CONFIG_NAME: &str = "medi-tools.toml";

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub image_dir: PathBuf,
    pub dataset_json: PathBuf,
    pub allowed_formats: Vec<String>,
    pub augmenting: AugmentingDefaults,
}

/// Scalar defaults for test-time augmentation runs (`[augmenting]` table).
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentingDefaults {
    pub n_cycles: usize,
    pub aggregate: String,
    pub batch_size: usize,
    pub resize: Option<Vec<usize>>,
    pub grayscale: bool,
    pub standardize_mode: StandardizeMode,
    pub seed: Option<u64>,
    pub workers: usize,
    /// Architecture key whose input shape and standardization override `resize`
    /// and `standardize_mode`.
    pub architecture: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        let data_root = PathBuf::from("data");
        Self {
            image_dir: data_root.join("images"),
            dataset_json: data_root.join("dataset.json"),
            allowed_formats: ALLOWED_IMAGE_FORMATS.iter().map(|f| f.to_string()).collect(),
            augmenting: AugmentingDefaults::default(),
        }
    }
}

impl Default for AugmentingDefaults {
    fn default() -> Self {
        let opts = AugmentingOptions::default();
        Self {
            n_cycles: DEFAULT_N_CYCLES,
            aggregate: opts.aggregate.to_string(),
            batch_size: opts.batch_size,
            resize: opts.resize,
            grayscale: opts.grayscale,
            standardize_mode: opts.standardize_mode,
            seed: opts.seed,
            workers: opts.workers,
            architecture: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ToolConfigFile {
    data_root: Option<String>,
    image_dir: Option<String>,
    dataset_json: Option<String>,
    allowed_formats: Option<Vec<String>>,
    augmenting: Option<AugmentingSection>,
}

#[derive(Debug, Deserialize, Default)]
struct AugmentingSection {
    n_cycles: Option<usize>,
    aggregate: Option<String>,
    batch_size: Option<usize>,
    resize: Option<Vec<usize>>,
    grayscale: Option<bool>,
    standardize_mode: Option<String>,
    seed: Option<u64>,
    workers: Option<usize>,
    architecture: Option<String>,
}

impl ToolConfig {
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("MEDI_TOOLS_CONFIG") {
            let cfg = Self::from_path(Path::new(&path)).unwrap_or_default();
            cfg.warn_if_invalid();
            return cfg;
        }
        let cfg = Self::from_path(Path::new(DEFAULT_CONFIG_NAME)).unwrap_or_default();
        cfg.warn_if_invalid();
        cfg
    }

    /// `None` when the file is missing or cannot be parsed.
    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        match toml::from_str::<ToolConfigFile>(&raw) {
            Ok(file) => Some(Self::from_file(file)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "tools config: failed to parse");
                None
            }
        }
    }

    fn from_file(file: ToolConfigFile) -> Self {
        let data_root = file
            .data_root
            .map(|v| expand_path(&v))
            .unwrap_or_else(|| PathBuf::from("data"));
        let image_dir = file
            .image_dir
            .map(|v| expand_path(&v))
            .unwrap_or_else(|| data_root.join("images"));
        let dataset_json = file
            .dataset_json
            .map(|v| expand_path(&v))
            .unwrap_or_else(|| data_root.join("dataset.json"));

        let defaults = AugmentingDefaults::default();
        let section = file.augmenting.unwrap_or_default();
        let standardize_mode = match section.standardize_mode {
            Some(name) => name.parse().unwrap_or_else(|err| {
                warn!(error = %err, "tools config: keeping default standardize_mode");
                defaults.standardize_mode
            }),
            None => defaults.standardize_mode,
        };

        ToolConfig {
            image_dir,
            dataset_json,
            allowed_formats: file
                .allowed_formats
                .filter(|formats| !formats.is_empty())
                .unwrap_or_else(|| ALLOWED_IMAGE_FORMATS.iter().map(|f| f.to_string()).collect()),
            augmenting: AugmentingDefaults {
                n_cycles: section.n_cycles.unwrap_or(defaults.n_cycles),
                aggregate: section
                    .aggregate
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or(defaults.aggregate),
                batch_size: section.batch_size.unwrap_or(defaults.batch_size),
                resize: section.resize.or(defaults.resize),
                grayscale: section.grayscale.unwrap_or(defaults.grayscale),
                standardize_mode,
                seed: section.seed.or(defaults.seed),
                workers: section.workers.unwrap_or(defaults.workers),
                architecture: section.architecture.filter(|a| !a.trim().is_empty()),
            },
        }
    }

    fn warn_if_invalid(&self) {
        for problem in self.validation_warnings() {
            warn!("tools config: {problem}");
        }
    }

    /// Settings that load fine but will misbehave at run time. Empty when the config is usable.
    pub fn validation_warnings(&self) -> Vec<String> {
        let aug = &self.augmenting;
        let mut problems = Vec::new();
        if aug.n_cycles == 0 {
            problems.push("augmenting.n_cycles is 0; predictions will be rejected".to_string());
        }
        if aug.batch_size == 0 {
            problems.push("augmenting.batch_size is 0; generators will be rejected".to_string());
        }
        if aug.workers == 0 {
            problems.push("augmenting.workers is 0; preprocessing runs inline".to_string());
        }
        if let Some(key) = &aug.architecture {
            if architecture_meta(key).is_none() {
                problems.push(format!(
                    "unknown architecture \"{key}\"; using resize/standardize_mode"
                ));
            }
        }
        if !self.image_dir.exists() {
            problems.push(format!(
                "image_dir {} does not exist",
                self.image_dir.display()
            ));
        }
        problems
    }

    pub fn allowed_formats(&self) -> Vec<&str> {
        self.allowed_formats.iter().map(String::as_str).collect()
    }
}

impl AugmentingDefaults {
    /// Options for `predict_augmenting`, with the architecture's input metadata
    /// applied when one is configured.
    pub fn to_options(&self) -> AugmentingOptions {
        let (resize, standardize_mode) = match self.architecture.as_deref().and_then(architecture_meta) {
            Some(meta) => (Some(meta.input), meta.standardize),
            None => (self.resize.clone(), self.standardize_mode),
        };
        AugmentingOptions::default()
            .with_n_cycles(self.n_cycles)
            .with_aggregate(self.aggregate.as_str())
            .with_batch_size(self.batch_size)
            .with_resize(resize)
            .with_grayscale(self.grayscale)
            .with_standardize_mode(standardize_mode)
            .with_seed(self.seed)
            .with_workers(self.workers)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

/// Replace `${VAR}` with its value; unset variables are left as written.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
