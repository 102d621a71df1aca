//! Model artifact discovery: where the three ONNX graphs and the
//! dictionary live on disk, and the fixed version tag `prepareModels`
//! reports back to the embedder.

use crate::config::MODEL_VERSION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
    pub classification: Option<PathBuf>,
    pub dictionary: PathBuf,
}

impl ModelPaths {
    /// Builds the conventional layout under `model_dir`: `det.onnx`,
    /// `rec.onnx`, `cls.onnx` (optional), `ppocrv5_dict.txt`.
    pub fn from_model_dir(model_dir: impl AsRef<Path>) -> Self {
        let dir = model_dir.as_ref();
        let cls = dir.join("cls.onnx");
        ModelPaths {
            detection: dir.join("det.onnx"),
            recognition: dir.join("rec.onnx"),
            classification: if cls.exists() { Some(cls) } else { None },
            dictionary: dir.join("ppocrv5_dict.txt"),
        }
    }

    /// Reads a JSON sidecar describing explicit paths, for embedders whose
    /// model files don't follow the conventional naming.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, crate::error::OcrError> {
        let contents = std::fs::read_to_string(path)?;
        let paths: ModelPaths = serde_json::from_str(&contents)?;
        Ok(paths)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub model_path: String,
    pub has_detection: bool,
    pub has_recognition: bool,
    pub has_classification: bool,
    pub has_dictionary: bool,
}

impl ModelManifest {
    pub fn assemble(model_dir: impl AsRef<Path>, paths: &ModelPaths) -> Self {
        ModelManifest {
            version: MODEL_VERSION.to_string(),
            model_path: model_dir.as_ref().display().to_string(),
            has_detection: paths.detection.exists(),
            has_recognition: paths.recognition.exists(),
            has_classification: paths.classification.as_ref().is_some_and(|p| p.exists()),
            has_dictionary: paths.dictionary.exists(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.has_detection && self.has_recognition && self.has_dictionary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_not_ready_when_required_artifact_missing() {
        let paths = ModelPaths {
            detection: PathBuf::from("/nonexistent/det.onnx"),
            recognition: PathBuf::from("/nonexistent/rec.onnx"),
            classification: None,
            dictionary: PathBuf::from("/nonexistent/dict.txt"),
        };
        let manifest = ModelManifest::assemble("/nonexistent", &paths);
        assert!(!manifest.is_ready());
        assert_eq!(manifest.version, MODEL_VERSION);
    }
}
