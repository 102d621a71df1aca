//! Orchestrates the full pipeline: detect -> crop+warp -> optional
//! pre-recognition classification -> recognize -> low-confidence retry ->
//! character-box projection -> confidence filtering. Also implements the
//! `has_text` quick-check short-circuit over the same crop/classify/
//! recognize path.

use crate::config::processor as cfg;
use crate::error::OcrError;
use crate::vision::classifier::{OrientationBackend, TextClassifier};
use crate::vision::detector::{DetectionBackend, DetectionCandidate, TextDetector};
use crate::vision::geometry::{self, Point, TextBox};
use crate::vision::recognizer::{CharacterSpan, RecognitionBackend, RecognitionResult, TextRecognizer};
use tracing::{debug, info};

/// A `CharacterSpan` projected back onto the original image as a 4-point
/// quadrilateral, interpolated along the parent region's top and bottom
/// edges.
#[derive(Debug, Clone)]
pub struct CharacterBox {
    pub text: String,
    pub confidence: f32,
    pub points: [Point; 4],
}

/// Parallel-array result set: every index refers to the same recognized
/// region across all four fields.
#[derive(Debug, Clone, Default)]
pub struct OcrResult {
    pub boxes: Vec<TextBox>,
    pub texts: Vec<String>,
    pub scores: Vec<f32>,
    pub character_boxes: Vec<Vec<CharacterBox>>,
}

#[derive(Debug, Clone, Default)]
pub struct QuickCheckResult {
    pub has_text: bool,
    pub detector_hit: bool,
    pub examined: u32,
    pub evaluated: u32,
    pub best_score: f32,
}

struct Crop {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    /// Net count of 180-degree flips applied so far (parity matters, not
    /// the count); used to decide character-span ratio flipping.
    rotated_net: bool,
}

pub struct OcrProcessor {
    pub detector: TextDetector,
    pub classifier: Option<TextClassifier>,
    pub recognizer: TextRecognizer,
}

impl OcrProcessor {
    pub fn new(detector: TextDetector, classifier: Option<TextClassifier>, recognizer: TextRecognizer) -> Self {
        OcrProcessor { detector, classifier, recognizer }
    }

    pub fn process_image(
        &self,
        det_backend: &dyn DetectionBackend,
        cls_backend: Option<&dyn OrientationBackend>,
        rec_backend: &dyn RecognitionBackend,
        rgba: &[u8],
        width: u32,
        height: u32,
        include_all_confidence_scores: bool,
    ) -> Result<OcrResult, OcrError> {
        let candidates = self.detector.detect(det_backend, rgba, width, height)?;
        info!(count = candidates.len(), "detection complete");
        if candidates.is_empty() {
            return Ok(OcrResult::default());
        }

        let mut candidates_with_crops = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match build_crop(rgba, width, height, &candidate.text_box) {
                Ok(crop) => candidates_with_crops.push((candidate, crop)),
                Err(OcrError::Decode(msg)) => {
                    debug!(error = %msg, "crop decode warning, skipping region");
                }
                Err(e) => return Err(e),
            }
        }
        if candidates_with_crops.is_empty() {
            return Ok(OcrResult::default());
        }
        let (candidates, mut crops): (Vec<_>, Vec<_>) = candidates_with_crops.into_iter().unzip();

        let mut pass1_examined = vec![false; crops.len()];

        if let (Some(classifier), Some(cls_backend)) = (&self.classifier, cls_backend) {
            let tall_indices: Vec<usize> = crops
                .iter()
                .enumerate()
                .filter(|(_, c)| (c.width as f32 / c.height as f32) < cfg::ANGLE_ASPECT_RATIO_THRESHOLD)
                .map(|(i, _)| i)
                .collect();

            if !tall_indices.is_empty() {
                let batch: Vec<(Vec<u8>, u32, u32)> = tall_indices
                    .iter()
                    .map(|&i| (crops[i].rgba.clone(), crops[i].width, crops[i].height))
                    .collect();
                let rotate_flags = classifier.classify_batch(cls_backend, &batch)?;
                for (&idx, rotate) in tall_indices.iter().zip(rotate_flags) {
                    pass1_examined[idx] = true;
                    if rotate {
                        flip_180(&mut crops[idx]);
                    }
                }
            }
        }

        let recognition_inputs: Vec<(Vec<u8>, u32, u32)> =
            crops.iter().map(|c| (c.rgba.clone(), c.width, c.height)).collect();
        let mut results = self.recognizer.recognize(rec_backend, &recognition_inputs)?;

        if let (Some(classifier), Some(cls_backend)) = (&self.classifier, cls_backend) {
            let retry_indices: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(i, r)| !pass1_examined[*i] && r.confidence < cfg::LOW_CONFIDENCE_THRESHOLD)
                .map(|(i, _)| i)
                .collect();

            if !retry_indices.is_empty() {
                let batch: Vec<(Vec<u8>, u32, u32)> = retry_indices
                    .iter()
                    .map(|&i| (crops[i].rgba.clone(), crops[i].width, crops[i].height))
                    .collect();
                let rotate_flags = classifier.classify_batch(cls_backend, &batch)?;

                for (&idx, rotate) in retry_indices.iter().zip(rotate_flags) {
                    if !rotate {
                        continue;
                    }
                    flip_180(&mut crops[idx]);
                    let retried = self
                        .recognizer
                        .recognize(rec_backend, &[(crops[idx].rgba.clone(), crops[idx].width, crops[idx].height)])?;
                    if let Some(new_result) = retried.into_iter().next() {
                        if new_result.confidence > results[idx].confidence {
                            results[idx] = new_result;
                        } else {
                            // Retry didn't help; undo the flip so the crop
                            // state still matches the returned result.
                            flip_180(&mut crops[idx]);
                        }
                    }
                }
            }
        }

        let mut ocr = OcrResult::default();
        for (i, candidate) in candidates.into_iter().enumerate() {
            let result = &results[i];
            let threshold = if include_all_confidence_scores {
                cfg::FALLBACK_MIN_RECOGNITION_SCORE
            } else {
                cfg::MIN_RECOGNITION_SCORE
            };
            if result.confidence < threshold {
                continue;
            }

            let char_boxes = project_character_boxes(&candidate.text_box, &result.spans, crops[i].rotated_net);
            ocr.boxes.push(candidate.text_box);
            ocr.texts.push(result.text.clone());
            ocr.scores.push(result.confidence);
            ocr.character_boxes.push(char_boxes);
        }

        Ok(ocr)
    }

    /// Collects up to `quickCheckMaxCandidates` high-score detections and
    /// recognizes them in order until one clears both thresholds.
    pub fn has_high_confidence_text(
        &self,
        det_backend: &dyn DetectionBackend,
        cls_backend: Option<&dyn OrientationBackend>,
        rec_backend: &dyn RecognitionBackend,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<QuickCheckResult, OcrError> {
        let candidates = self.detector.detect_top_k(
            det_backend,
            rgba,
            width,
            height,
            cfg::QUICK_CHECK_MAX_CANDIDATES,
            cfg::QUICK_CHECK_MIN_DETECTION_SCORE,
        )?;

        if candidates.is_empty() {
            return Ok(QuickCheckResult { detector_hit: false, ..Default::default() });
        }

        let mut examined = 0u32;
        let mut evaluated = 0u32;
        let mut best_score = 0.0f32;

        for candidate in &candidates {
            examined += 1;
            let mut crop = build_crop(rgba, width, height, &candidate.text_box)?;

            if let (Some(classifier), Some(cls_backend)) = (&self.classifier, cls_backend) {
                let batch = [(crop.rgba.clone(), crop.width, crop.height)];
                let flags = classifier.classify_batch(cls_backend, &batch)?;
                if flags.first().copied().unwrap_or(false) {
                    flip_180(&mut crop);
                }
            }

            let result = self
                .recognizer
                .recognize(rec_backend, &[(crop.rgba.clone(), crop.width, crop.height)])?
                .into_iter()
                .next()
                .unwrap_or(RecognitionResult { text: String::new(), confidence: 0.0, spans: Vec::new() });

            evaluated += 1;
            best_score = best_score.max(result.confidence);

            if result.confidence >= cfg::MIN_RECOGNITION_SCORE && !result.text.is_empty() {
                return Ok(QuickCheckResult {
                    has_text: true,
                    detector_hit: true,
                    examined,
                    evaluated,
                    best_score,
                });
            }
        }

        Ok(QuickCheckResult {
            has_text: false,
            detector_hit: true,
            examined,
            evaluated,
            best_score,
        })
    }
}

fn build_crop(rgba: &[u8], width: u32, height: u32, text_box: &TextBox) -> Result<Crop, OcrError> {
    let edges = text_box.edge_lengths();
    let (top, right, bottom, left) = (edges[0], edges[1], edges[2], edges[3]);

    let dst_w = (top.max(bottom).round() as u32).clamp(1, cfg::MAX_CROP_SIDE);
    let dst_h = (left.max(right).round() as u32).clamp(1, cfg::MAX_CROP_SIDE);

    let dst_pts = [
        Point::new(0.0, 0.0),
        Point::new(dst_w as f64, 0.0),
        Point::new(dst_w as f64, dst_h as f64),
        Point::new(0.0, dst_h as f64),
    ];

    let warped = geometry::perspective_transform(rgba, width, height, text_box.points(), &dst_pts, dst_w, dst_h)
        .ok_or_else(|| OcrError::decode("degenerate crop homography"))?;

    let mut crop = Crop { rgba: warped, width: dst_w, height: dst_h, rotated_net: false };

    if dst_h as f32 / dst_w as f32 >= cfg::CROP_ROTATE_ASPECT_RATIO {
        rotate_90(&mut crop);
    }

    debug!(width = crop.width, height = crop.height, "built crop");
    Ok(crop)
}

fn rotate_90(crop: &mut Crop) {
    let (w, h) = (crop.width, crop.height);
    let mut out = vec![0u8; crop.rgba.len()];
    for y in 0..h {
        for x in 0..w {
            let src_idx = ((y * w + x) * 4) as usize;
            // Clockwise: (x, y) -> (h - 1 - y, x) in the rotated frame.
            let dst_x = h - 1 - y;
            let dst_y = x;
            let dst_idx = ((dst_y * h + dst_x) * 4) as usize;
            out[dst_idx..dst_idx + 4].copy_from_slice(&crop.rgba[src_idx..src_idx + 4]);
        }
    }
    crop.rgba = out;
    crop.width = h;
    crop.height = w;
}

fn flip_180(crop: &mut Crop) {
    let (w, h) = (crop.width, crop.height);
    let mut out = vec![0u8; crop.rgba.len()];
    for y in 0..h {
        for x in 0..w {
            let src_idx = ((y * w + x) * 4) as usize;
            let dst_x = w - 1 - x;
            let dst_y = h - 1 - y;
            let dst_idx = ((dst_y * w + dst_x) * 4) as usize;
            out[dst_idx..dst_idx + 4].copy_from_slice(&crop.rgba[src_idx..src_idx + 4]);
        }
    }
    crop.rgba = out;
    crop.rotated_net = !crop.rotated_net;
}

/// Projects each character span's `[start_ratio, end_ratio]` onto the
/// parent quad by interpolating along the top edge (for the span's top
/// corners) and the bottom edge (for its bottom corners). When the region
/// was net-rotated 180 degrees, ratios are mirrored (`1 - end, 1 - start`)
/// before interpolation, since the recognized text itself came from the
/// flipped strip.
fn project_character_boxes(text_box: &TextBox, spans: &[CharacterSpan], rotated_net: bool) -> Vec<CharacterBox> {
    let p = text_box.points();
    let (top_left, top_right, bottom_right, bottom_left) = (p[0], p[1], p[2], p[3]);

    let lerp = |a: Point, b: Point, t: f64| Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t);

    let mut boxes = Vec::with_capacity(spans.len());
    for span in spans {
        let (mut start, mut end) = (span.start_ratio as f64, span.end_ratio as f64);
        if rotated_net {
            let (s, e) = (1.0 - end, 1.0 - start);
            start = s;
            end = e;
        }
        if end < start {
            std::mem::swap(&mut start, &mut end);
        }
        if end - start < 1e-4 {
            continue;
        }

        let points = [
            lerp(top_left, top_right, start),
            lerp(top_left, top_right, end),
            lerp(bottom_left, bottom_right, end),
            lerp(bottom_left, bottom_right, start),
        ];

        boxes.push(CharacterBox {
            text: span.text.clone(),
            confidence: span.confidence,
            points,
        });
    }
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::dictionary::Dictionary;

    fn square_box() -> TextBox {
        TextBox::new(&[
            Point::new(0.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(20.0, 20.0),
            Point::new(0.0, 20.0),
        ])
        .unwrap()
    }

    #[test]
    fn character_box_projection_respects_rotation_flag() {
        let text_box = square_box();
        let span = CharacterSpan { text: "a".into(), confidence: 0.9, start_ratio: 0.0, end_ratio: 0.5 };
        let normal = project_character_boxes(&text_box, &[span.clone()], false);
        let rotated = project_character_boxes(&text_box, &[span], true);
        assert_eq!(normal.len(), 1);
        assert_eq!(rotated.len(), 1);
        assert_ne!(normal[0].points[0].x, rotated[0].points[0].x);
    }

    #[test]
    fn degenerate_spans_are_dropped() {
        let text_box = square_box();
        let span = CharacterSpan { text: "a".into(), confidence: 0.9, start_ratio: 0.5, end_ratio: 0.500005 };
        let boxes = project_character_boxes(&text_box, &[span], false);
        assert!(boxes.is_empty());
    }

    struct EmptyDetectionBackend;
    impl DetectionBackend for EmptyDetectionBackend {
        fn run_probability_map(&self, _tensor: &[f32], h: u32, w: u32) -> Result<(Vec<f32>, u32, u32), OcrError> {
            Ok((vec![0.0; (h * w) as usize], h, w))
        }
    }

    struct EmptyRecognitionBackend;
    impl RecognitionBackend for EmptyRecognitionBackend {
        fn run_batch(&self, _tensor: &[f32], n: usize, _packed_width: u32) -> Result<(Vec<f32>, usize, usize), OcrError> {
            Ok((vec![0.0; n * 2 * 4], 2, 4))
        }
    }

    #[test]
    fn process_image_returns_empty_for_blank_image() {
        let processor = OcrProcessor::new(TextDetector::new(), None, TextRecognizer::new(Dictionary::from_lines(["a"].into_iter())));
        let det = EmptyDetectionBackend;
        let rec = EmptyRecognitionBackend;
        let rgba = vec![0u8; 32 * 32 * 4];
        let result = processor.process_image(&det, None, &rec, &rgba, 32, 32, false).unwrap();
        assert!(result.boxes.is_empty());
    }

    #[test]
    fn quick_check_reports_no_detector_hit_on_blank_image() {
        let processor = OcrProcessor::new(TextDetector::new(), None, TextRecognizer::new(Dictionary::from_lines(["a"].into_iter())));
        let det = EmptyDetectionBackend;
        let rec = EmptyRecognitionBackend;
        let rgba = vec![0u8; 32 * 32 * 4];
        let result = processor.has_high_confidence_text(&det, None, &rec, &rgba, 32, 32).unwrap();
        assert!(!result.has_text);
        assert!(!result.detector_hit);
    }
}
