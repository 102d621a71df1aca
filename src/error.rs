use thiserror::Error;

/// Unified error taxonomy for the OCR core, matching the four failure kinds
/// the pipeline can surface to an embedder: bad setup, bad call arguments,
/// inference-time failure, and non-fatal per-region decode trouble.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("config error: {0}")]
    Config(String),

    #[error("argument error: {0}")]
    Argument(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("decode warning: {0}")]
    Decode(String),
}

impl OcrError {
    pub fn config(msg: impl Into<String>) -> Self {
        OcrError::Config(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        OcrError::Argument(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        OcrError::Inference(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        OcrError::Decode(msg.into())
    }
}

impl From<image::ImageError> for OcrError {
    fn from(err: image::ImageError) -> Self {
        OcrError::Argument(format!("image decode failed: {err}"))
    }
}

impl From<ort::Error> for OcrError {
    fn from(err: ort::Error) -> Self {
        OcrError::Inference(err.to_string())
    }
}

impl From<std::io::Error> for OcrError {
    fn from(err: std::io::Error) -> Self {
        OcrError::Config(format!("io error: {err}"))
    }
}

impl From<serde_json::Error> for OcrError {
    fn from(err: serde_json::Error) -> Self {
        OcrError::Config(format!("invalid model manifest json: {err}"))
    }
}

impl From<OcrError> for napi::Error {
    fn from(err: OcrError) -> Self {
        napi::Error::from_reason(err.to_string())
    }
}
