#![deny(clippy::all)]

pub mod config;
pub mod error;
pub mod vision;

use error::OcrError;
use napi_derive::napi;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::info;
use vision::{
    DetectionBackend, ModelManifest, ModelPaths, OcrProcessor, OcrResult, OrientationBackend, OrtDetectionBackend,
    OrtOrientationBackend, OrtRecognitionBackend, QuickCheckResult, RecognitionBackend, TextClassifier, TextDetector,
    TextRecognizer,
};

const INTRA_THREADS: usize = 4;

/// Installs a `tracing` subscriber driven by `RUST_LOG`, idempotently.
/// Safe to call from multiple embedders / multiple times.
#[napi]
pub fn init_logging() -> String {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    info!("ocr core logging initialized");
    "ocr core online".to_string()
}

#[napi(object)]
pub struct PrepareModelsResult {
    pub is_ready: bool,
    pub version: String,
    pub model_path: String,
    pub error: Option<String>,
}

#[napi(object)]
#[derive(Clone)]
pub struct WirePoint {
    pub x: f64,
    pub y: f64,
}

#[napi(object)]
#[derive(Clone)]
pub struct WireRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

#[napi(object)]
pub struct WireCharacterBox {
    pub text: String,
    pub confidence: f64,
    pub points: Vec<WirePoint>,
}

#[napi(object)]
pub struct WireRegion {
    pub text: String,
    pub confidence: f64,
    pub points: Vec<WirePoint>,
    pub bounding_box: WireRect,
    pub character_boxes: Vec<WireCharacterBox>,
}

struct CoreState {
    model_dir: String,
    paths: ModelPaths,
    manifest: ModelManifest,
    processor: OcrProcessor,
}

impl CoreState {
    fn load(model_dir: String) -> Result<Self, OcrError> {
        let paths = ModelPaths::from_model_dir(&model_dir);
        let manifest = ModelManifest::assemble(&model_dir, &paths);
        if !manifest.is_ready() {
            return Err(OcrError::config(format!(
                "required model artifacts missing under {model_dir}"
            )));
        }

        let dictionary = vision::Dictionary::load(&paths.dictionary)?;
        let classifier = if paths.classification.is_some() {
            Some(TextClassifier::new())
        } else {
            None
        };

        let processor = OcrProcessor::new(TextDetector::new(), classifier, TextRecognizer::new(dictionary));

        Ok(CoreState { model_dir, paths, manifest, processor })
    }

    fn detection_backend(&self) -> OrtDetectionBackend<'_> {
        OrtDetectionBackend {
            guard: &self.processor.detector.session,
            model_path: self.paths.detection.to_str().unwrap_or_default(),
            intra_threads: INTRA_THREADS,
        }
    }

    fn recognition_backend(&self) -> OrtRecognitionBackend<'_> {
        OrtRecognitionBackend {
            guard: &self.processor.recognizer.session,
            model_path: self.paths.recognition.to_str().unwrap_or_default(),
            intra_threads: INTRA_THREADS,
        }
    }

    fn classification_backend(&self) -> Option<OrtOrientationBackend<'_>> {
        let cls_path = self.paths.classification.as_ref()?;
        Some(OrtOrientationBackend {
            guard: &self.processor.classifier.as_ref()?.session,
            model_path: cls_path.to_str().unwrap_or_default(),
            intra_threads: INTRA_THREADS,
        })
    }
}

/// The single public OCR handle. Models load once, single-flight, on the
/// first `prepare_models` call; subsequent calls (even with a different
/// `model_dir`) reuse what was already loaded.
#[napi]
pub struct OcrCore {
    state: Arc<OnceCell<Arc<CoreState>>>,
}

#[napi]
impl OcrCore {
    #[napi(constructor)]
    pub fn new() -> Self {
        OcrCore { state: Arc::new(OnceCell::new()) }
    }

    /// Blocks concurrent callers on the same single-flight load rather than
    /// letting each race a check-then-act `get`/`set`.
    #[napi]
    pub async fn prepare_models(&self, model_dir: String) -> napi::Result<PrepareModelsResult> {
        let cell = Arc::clone(&self.state);

        let result = tokio::task::spawn_blocking(move || {
            cell.get_or_try_init(|| CoreState::load(model_dir).map(Arc::new)).cloned()
        })
        .await
        .map_err(|e| napi::Error::from_reason(format!("prepare_models task panicked: {e}")))?;

        match result {
            Ok(state) => Ok(PrepareModelsResult {
                is_ready: state.manifest.is_ready(),
                version: state.manifest.version.clone(),
                model_path: state.model_dir.clone(),
                error: None,
            }),
            Err(e) => Ok(PrepareModelsResult {
                is_ready: false,
                version: config::MODEL_VERSION.to_string(),
                model_path: String::new(),
                error: Some(e.to_string()),
            }),
        }
    }

    #[napi]
    pub async fn detect_text(
        &self,
        image_path: String,
        include_all_confidence_scores: Option<bool>,
    ) -> napi::Result<Vec<WireRegion>> {
        let state = self.require_state()?;
        let include_all = include_all_confidence_scores.unwrap_or(false);

        let result = tokio::task::spawn_blocking(move || run_detect_text(&state, &image_path, include_all))
            .await
            .map_err(|e| napi::Error::from_reason(format!("detect_text task panicked: {e}")))?;

        result.map_err(napi::Error::from)
    }

    #[napi]
    pub async fn has_text(&self, image_path: String) -> napi::Result<bool> {
        let state = self.require_state()?;

        let result = tokio::task::spawn_blocking(move || run_has_text(&state, &image_path))
            .await
            .map_err(|e| napi::Error::from_reason(format!("has_text task panicked: {e}")))?;

        result.map(|r: QuickCheckResult| r.has_text).map_err(napi::Error::from)
    }

    fn require_state(&self) -> napi::Result<Arc<CoreState>> {
        self.state
            .get()
            .cloned()
            .ok_or_else(|| napi::Error::from_reason("prepare_models must be called before any OCR request"))
    }
}

impl Default for OcrCore {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_image(image_path: &str) -> Result<(Vec<u8>, u32, u32), OcrError> {
    let img = image::open(image_path)?;
    let rgba = img.to_rgba8();
    let (w, h) = (rgba.width(), rgba.height());
    Ok((rgba.into_raw(), w, h))
}

fn run_detect_text(state: &CoreState, image_path: &str, include_all: bool) -> Result<Vec<WireRegion>, OcrError> {
    let (rgba, w, h) = decode_image(image_path)?;

    let det_backend = state.detection_backend();
    let rec_backend = state.recognition_backend();
    let cls_backend = state.classification_backend();
    let det_backend: &dyn DetectionBackend = &det_backend;
    let rec_backend: &dyn RecognitionBackend = &rec_backend;
    let cls_backend: Option<&dyn OrientationBackend> = cls_backend.as_ref().map(|b| b as &dyn OrientationBackend);

    let result: OcrResult =
        state.processor.process_image(det_backend, cls_backend, rec_backend, &rgba, w, h, include_all)?;

    Ok(to_wire_regions(result))
}

fn run_has_text(state: &CoreState, image_path: &str) -> Result<QuickCheckResult, OcrError> {
    let (rgba, w, h) = decode_image(image_path)?;

    let det_backend = state.detection_backend();
    let rec_backend = state.recognition_backend();
    let cls_backend = state.classification_backend();
    let det_backend: &dyn DetectionBackend = &det_backend;
    let rec_backend: &dyn RecognitionBackend = &rec_backend;
    let cls_backend: Option<&dyn OrientationBackend> = cls_backend.as_ref().map(|b| b as &dyn OrientationBackend);

    state.processor.has_high_confidence_text(det_backend, cls_backend, rec_backend, &rgba, w, h)
}

fn to_wire_regions(result: OcrResult) -> Vec<WireRegion> {
    let OcrResult { boxes, texts, scores, character_boxes } = result;

    boxes
        .into_iter()
        .zip(texts)
        .zip(scores)
        .zip(character_boxes)
        .map(|(((text_box, text), score), char_boxes)| {
            let rect = text_box.bounding_rect();
            let points = text_box
                .points()
                .iter()
                .map(|p| WirePoint { x: p.x, y: p.y })
                .collect();

            WireRegion {
                text,
                confidence: score as f64,
                points,
                bounding_box: WireRect {
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                },
                character_boxes: char_boxes
                    .into_iter()
                    .map(|cb| WireCharacterBox {
                        text: cb.text,
                        confidence: cb.confidence as f64,
                        points: cb.points.iter().map(|p| WirePoint { x: p.x, y: p.y }).collect(),
                    })
                    .collect(),
            }
        })
        .collect()
}
