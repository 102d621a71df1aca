//! Fixed pipeline constants. None of these are request-tunable; they are
//! part of the model contract (the ONNX graphs were trained against these
//! exact geometries and thresholds).

/// Detector preprocessing / post-processing.
pub mod detector {
    pub const LIMIT_SIDE_LEN: u32 = 960;
    pub const THRESH: f32 = 0.30;
    pub const BOX_THRESH: f32 = 0.60;
    pub const UNCLIP_RATIO: f32 = 1.5;
    pub const MIN_SIZE: f32 = 3.0;
    pub const MAX_CANDIDATES: usize = 1000;
    pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    pub const STD: [f32; 3] = [0.229, 0.224, 0.225];
    pub const INPUT_NAME: &str = "x";
    /// Boxes whose minimum-y differs by no more than this are one reading line.
    pub const LINE_GROUPING_PX: f32 = 10.0;
}

/// 180-degree orientation classifier.
pub mod classifier {
    pub const HEIGHT: u32 = 48;
    pub const WIDTH: u32 = 192;
    pub const BATCH_SIZE: usize = 6;
    pub const ROTATE_THRESHOLD: f32 = 0.90;
}

/// Text recognizer.
pub mod recognizer {
    pub const HEIGHT: u32 = 48;
    pub const BATCH_SIZE: usize = 6;
    pub const MIN_SPAN_RATIO: f32 = 1e-3;
    pub const MAX_PACKED_WIDTH: u32 = 10_000;
    /// `320 / 48`, the minimum admissible max-width/height ratio for a batch.
    pub const MIN_MAX_WH_RATIO: f32 = 320.0 / 48.0;
}

/// OcrProcessor pipeline knobs.
pub mod processor {
    pub const MIN_RECOGNITION_SCORE: f32 = 0.80;
    pub const FALLBACK_MIN_RECOGNITION_SCORE: f32 = 0.50;
    pub const ANGLE_ASPECT_RATIO_THRESHOLD: f32 = 0.50;
    pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.65;
    pub const QUICK_CHECK_MAX_CANDIDATES: usize = 3;
    pub const QUICK_CHECK_MIN_DETECTION_SCORE: f32 = 0.90;
    /// crops with height/width at or above this are rotated 90 degrees before recognition.
    pub const CROP_ROTATE_ASPECT_RATIO: f32 = 1.5;
    pub const MAX_CROP_SIDE: u32 = 10_000;
}

pub const MODEL_VERSION: &str = "pp-ocrv5-202410";
