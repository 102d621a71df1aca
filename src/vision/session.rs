//! Single-flight, process-lifetime ONNX session guard: an
//! `OnceCell<Mutex<Session>>` pair shared by the detector, classifier, and
//! recognizer so each of the three model artifacts gets its own one-shot
//! initializer and its own serialized access lock.

use crate::error::OcrError;
use once_cell::sync::OnceCell;
use ort::session::Session;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

struct SessionState {
    path: String,
    session: Mutex<Session>,
}

pub struct SessionGuard {
    cell: OnceCell<SessionState>,
}

impl SessionGuard {
    pub const fn new() -> Self {
        SessionGuard { cell: OnceCell::new() }
    }

    /// Loads the session from `model_path` the first time this is called;
    /// concurrent callers block on the same load rather than racing it, and
    /// subsequent calls (even with a different path) reuse the already
    /// loaded session, matching the one-shot initializer in spec's
    /// concurrency model.
    pub fn get_or_init(&self, model_path: &str, intra_threads: usize) -> Result<&Mutex<Session>, OcrError> {
        let state = self.cell.get_or_try_init(|| {
            if !Path::new(model_path).exists() {
                return Err(OcrError::config(format!("model not found: {model_path}")));
            }

            let session = Session::builder()
                .map_err(OcrError::from)?
                .with_intra_threads(intra_threads)
                .map_err(OcrError::from)?
                .commit_from_file(model_path)
                .map_err(OcrError::from)?;

            info!(path = model_path, "loaded ONNX session");
            Ok(SessionState {
                path: model_path.to_string(),
                session: Mutex::new(session),
            })
        })?;

        if state.path != model_path {
            tracing::warn!(
                "session already initialized with '{}', ignoring new path '{}'",
                state.path,
                model_path
            );
        }
        Ok(&state.session)
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}
