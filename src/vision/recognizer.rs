//! SVTR_LCNet + CTC text recognizer: aspect-sorted batching to a shared
//! dynamic width, one inference call per batch, greedy CTC decode with
//! per-character confidence and span-ratio tracking.

use crate::config::recognizer as cfg;
use crate::error::OcrError;
use crate::vision::dictionary::Dictionary;
use crate::vision::session::SessionGuard;
use crate::vision::tensor::{self, ChannelOrder};
use ort::value::Tensor;

/// One decoded character: its text, mean confidence over the CTC run it
/// collapsed from, and its fractional position along the recognition
/// strip's width.
#[derive(Debug, Clone)]
pub struct CharacterSpan {
    pub text: String,
    pub confidence: f32,
    pub start_ratio: f32,
    pub end_ratio: f32,
}

#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: f32,
    pub spans: Vec<CharacterSpan>,
}

pub trait RecognitionBackend: Sync {
    /// `tensor` is `[n, 3, 48, packed_width]`. Returns, per item, the
    /// `[T, V]` logits flattened row-major plus `T` and `V`.
    fn run_batch(
        &self,
        tensor: &[f32],
        n: usize,
        packed_width: u32,
    ) -> Result<(Vec<f32>, usize, usize), OcrError>;
}

pub struct OrtRecognitionBackend<'a> {
    pub guard: &'a SessionGuard,
    pub model_path: &'a str,
    pub intra_threads: usize,
}

impl<'a> RecognitionBackend for OrtRecognitionBackend<'a> {
    fn run_batch(&self, tensor_data: &[f32], n: usize, packed_width: u32) -> Result<(Vec<f32>, usize, usize), OcrError> {
        let mutex = self.guard.get_or_init(self.model_path, self.intra_threads)?;
        let mut session = mutex
            .lock()
            .map_err(|e| OcrError::inference(format!("recognizer session lock poisoned: {e}")))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| OcrError::config("recognizer model declares no inputs"))?;

        let tensor = Tensor::from_array((
            (n, 3usize, cfg::HEIGHT as usize, packed_width as usize),
            tensor_data.to_vec(),
        ))
        .map_err(OcrError::from)?;
        let outputs = session.run(ort::inputs![input_name => tensor]).map_err(OcrError::from)?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(OcrError::from)?;
        if shape.len() != 3 {
            return Err(OcrError::decode("recognizer output is not [N, T, V]"));
        }
        let t = shape[1] as usize;
        let v = shape[2] as usize;
        Ok((data.to_vec(), t, v))
    }
}

pub struct TextRecognizer {
    pub session: SessionGuard,
    pub dictionary: Dictionary,
}

impl TextRecognizer {
    pub const fn new(dictionary: Dictionary) -> Self {
        TextRecognizer {
            session: SessionGuard::new(),
            dictionary,
        }
    }

    /// Recognizes `images` (each `(rgba, width, height)`), preserving
    /// caller order in the returned vector regardless of the internal
    /// aspect-sorted batching.
    pub fn recognize(
        &self,
        backend: &dyn RecognitionBackend,
        images: &[(Vec<u8>, u32, u32)],
    ) -> Result<Vec<RecognitionResult>, OcrError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let mut order: Vec<usize> = (0..images.len()).collect();
        order.sort_by(|&a, &b| {
            let ratio_a = images[a].1 as f32 / images[a].2 as f32;
            let ratio_b = images[b].1 as f32 / images[b].2 as f32;
            ratio_a.partial_cmp(&ratio_b).unwrap_or(std::cmp::Ordering::Equal)
        });

        let batches: Vec<&[usize]> = order.chunks(cfg::BATCH_SIZE).collect();
        let mut results: Vec<Option<RecognitionResult>> = vec![None; images.len()];

        // More than one batch worth of work runs each batch across a
        // rayon thread pool; the recognizer session itself still
        // serializes access through its own SessionGuard mutex, so only
        // the CPU-side pre/post-processing actually overlaps.
        if batches.len() > 1 && images.len() > 4 {
            use rayon::prelude::*;
            let per_batch: Vec<Result<Vec<(usize, RecognitionResult)>, OcrError>> = batches
                .par_iter()
                .map(|batch_indices| self.recognize_batch(backend, images, batch_indices))
                .collect();
            for batch_result in per_batch {
                for (idx, result) in batch_result? {
                    results[idx] = Some(result);
                }
            }
        } else {
            for batch_indices in &batches {
                for (idx, result) in self.recognize_batch(backend, images, batch_indices)? {
                    results[idx] = Some(result);
                }
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every index is visited exactly once")).collect())
    }

    fn recognize_batch(
        &self,
        backend: &dyn RecognitionBackend,
        images: &[(Vec<u8>, u32, u32)],
        batch_indices: &[usize],
    ) -> Result<Vec<(usize, RecognitionResult)>, OcrError> {
        let ratios: Vec<f32> = batch_indices
            .iter()
            .map(|&i| images[i].1 as f32 / images[i].2 as f32)
            .collect();
        let max_wh_ratio = ratios.iter().cloned().fold(cfg::MIN_MAX_WH_RATIO, f32::max);
        let packed_width = ((cfg::HEIGHT as f32 * max_wh_ratio).ceil() as u32).clamp(1, cfg::MAX_PACKED_WIDTH);

        let mut tensor = vec![0f32; batch_indices.len() * 3 * (cfg::HEIGHT as usize) * (packed_width as usize)];
        let plane_stride = 3 * (cfg::HEIGHT as usize) * (packed_width as usize);
        let mut content_widths = Vec::with_capacity(batch_indices.len());

        for (slot, &idx) in batch_indices.iter().enumerate() {
            let (rgba, w, h) = &images[idx];
            let ratio = *w as f32 / *h as f32;
            let content_w = ((cfg::HEIGHT as f32 * ratio).ceil() as u32).clamp(1, packed_width);

            let img = image::RgbaImage::from_raw(*w, *h, rgba.clone()).expect("rgba buffer matches dimensions");
            let resized = image::imageops::resize(&img, content_w, cfg::HEIGHT, image::imageops::FilterType::Triangle);

            tensor::pack_chw_normalized(
                resized.as_raw(),
                content_w,
                cfg::HEIGHT,
                [0.5, 0.5, 0.5],
                [0.5, 0.5, 0.5],
                ChannelOrder::Bgr,
                &mut tensor,
                cfg::HEIGHT,
                packed_width,
                slot * plane_stride,
            );
            content_widths.push(content_w);
        }

        let (logits, t, v) = match backend.run_batch(&tensor, batch_indices.len(), packed_width) {
            Ok(v) => v,
            Err(OcrError::Decode(msg)) => {
                tracing::warn!(error = %msg, "recognizer output decode warning, treating batch as empty");
                return Ok(batch_indices
                    .iter()
                    .map(|&idx| {
                        (
                            idx,
                            RecognitionResult { text: String::new(), confidence: 0.0, spans: Vec::new() },
                        )
                    })
                    .collect());
            }
            Err(e) => return Err(e),
        };

        let mut out = Vec::with_capacity(batch_indices.len());
        for (slot, &idx) in batch_indices.iter().enumerate() {
            let item_logits = &logits[slot * t * v..(slot + 1) * t * v];
            let scale = (packed_width as f32 / content_widths[slot] as f32).max(1.0);
            let result = ctc_greedy_decode(item_logits, t, v, scale, &self.dictionary);
            out.push((idx, result));
        }
        Ok(out)
    }
}

/// Decodes one item's `[T, V]` logits: argmax per timestep, blank/run
/// collapse, per-character confidence and span ratios scaled back to the
/// content (non-padded) region of the recognition strip.
fn ctc_greedy_decode(logits: &[f32], t: usize, v: usize, scale: f32, dictionary: &Dictionary) -> RecognitionResult {
    struct Run {
        class: usize,
        start_t: usize,
        end_t: usize,
        probs: Vec<f32>,
    }

    let mut runs: Vec<Run> = Vec::new();
    let mut prev_class = 0usize;

    for step in 0..t {
        let row = &logits[step * v..(step + 1) * v];
        let (argmax, max_val) = row
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (c, &val)| if val > acc.1 { (c, val) } else { acc });

        if argmax == 0 {
            prev_class = 0;
            continue;
        }

        if argmax == prev_class {
            if let Some(last) = runs.last_mut() {
                last.end_t = step;
                last.probs.push(max_val);
            }
        } else {
            runs.push(Run {
                class: argmax,
                start_t: step,
                end_t: step,
                probs: vec![max_val],
            });
        }
        prev_class = argmax;
    }

    let mut spans = Vec::with_capacity(runs.len());
    let mut text = String::new();
    let min_span = (cfg::MIN_SPAN_RATIO).max((1.0 / t as f32) * scale);

    for run in &runs {
        let Some(token) = dictionary.token(run.class) else {
            continue;
        };

        let mut start = (run.start_t as f32 / t as f32) * scale;
        let mut end = (run.end_t as f32 / t as f32) * scale;
        start = start.clamp(0.0, 1.0);
        end = end.clamp(0.0, 1.0);
        if end < start {
            end = start;
        }
        if end - start < min_span {
            start = (end - min_span).max(0.0);
            end = (start + min_span).min(1.0);
        }

        let confidence = run.probs.iter().sum::<f32>() / run.probs.len() as f32;
        text.push_str(token);
        spans.push(CharacterSpan {
            text: token.to_string(),
            confidence,
            start_ratio: start,
            end_ratio: end,
        });
    }

    let confidence = if spans.is_empty() {
        0.0
    } else {
        spans.iter().map(|s| s.confidence).sum::<f32>() / spans.len() as f32
    };

    RecognitionResult { text, confidence, spans }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> Dictionary {
        Dictionary::from_lines(["A", "B", "C"].into_iter())
    }

    /// Builds `[T, V]` logits where each row is a one-hot spike at `class`.
    fn one_hot_logits(classes: &[usize], v: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; classes.len() * v];
        for (t, &c) in classes.iter().enumerate() {
            out[t * v + c] = 10.0;
        }
        out
    }

    #[test]
    fn ctc_collapse_merges_runs_and_skips_blank() {
        let classes = [0usize, 1, 1, 1, 0, 2, 0];
        let logits = one_hot_logits(&classes, 4);
        let result = ctc_greedy_decode(&logits, classes.len(), 4, 1.0, &dict());
        assert_eq!(result.text, "AB");
        assert_eq!(result.spans.len(), 2);
    }

    #[test]
    fn ctc_spans_are_monotonic_and_respect_min_width() {
        let classes = [1usize, 1, 0, 2, 2, 0, 3];
        let logits = one_hot_logits(&classes, 4);
        let result = ctc_greedy_decode(&logits, classes.len(), 4, 1.0, &dict());
        let mut last_start = -1.0f32;
        for span in &result.spans {
            assert!(span.start_ratio >= last_start);
            assert!(span.end_ratio - span.start_ratio >= 1e-3 - 1e-6);
            last_start = span.start_ratio;
        }
    }

    #[test]
    fn empty_decode_has_zero_confidence() {
        let classes = [0usize, 0, 0];
        let logits = one_hot_logits(&classes, 4);
        let result = ctc_greedy_decode(&logits, classes.len(), 4, 1.0, &dict());
        assert_eq!(result.text, "");
        assert_eq!(result.confidence, 0.0);
    }

    struct FakeBackend {
        t: usize,
        v: usize,
        logits_by_width: std::collections::HashMap<u32, Vec<f32>>,
    }

    impl RecognitionBackend for FakeBackend {
        fn run_batch(&self, _tensor: &[f32], n: usize, packed_width: u32) -> Result<(Vec<f32>, usize, usize), OcrError> {
            let single = self.logits_by_width.get(&packed_width).cloned().unwrap_or_else(|| vec![0.0; self.t * self.v]);
            let mut all = Vec::with_capacity(single.len() * n);
            for _ in 0..n {
                all.extend_from_slice(&single);
            }
            Ok((all, self.t, self.v))
        }
    }

    #[test]
    fn recognize_preserves_caller_order_regardless_of_aspect_sort() {
        let recognizer = TextRecognizer::new(dict());
        let classes = [1usize, 2];
        let mut by_width = std::collections::HashMap::new();
        // Both images collapse into the same single batch width here.
        by_width.insert(48, one_hot_logits(&classes, 4));
        by_width.insert(64, one_hot_logits(&classes, 4));
        by_width.insert(96, one_hot_logits(&classes, 4));
        let backend = FakeBackend { t: 2, v: 4, logits_by_width: by_width };

        let wide = (vec![0u8; 100 * 48 * 4], 100, 48);
        let narrow = (vec![0u8; 20 * 48 * 4], 20, 48);
        let images = vec![wide, narrow];

        let results = recognizer.recognize(&backend, &images).unwrap();
        assert_eq!(results.len(), 2);
    }
}
