//! 180-degree orientation classifier. Crops are resized to a fixed 48x192
//! box (aspect-preserving, zero-padded) and batched; a crop is judged
//! rotated when `p180` both exceeds `p0` and clears the rotation threshold.

use crate::config::classifier as cfg;
use crate::error::OcrError;
use crate::vision::session::SessionGuard;
use crate::vision::tensor::{self, ChannelOrder};
use ort::value::Tensor;

pub trait OrientationBackend {
    /// `tensor` is `[n, 3, 48, 192]` planar CHW. Returns `n` pairs of
    /// `(p0, p180)` probabilities.
    fn run_batch(&self, tensor: &[f32], n: usize) -> Result<Vec<(f32, f32)>, OcrError>;
}

pub struct OrtOrientationBackend<'a> {
    pub guard: &'a SessionGuard,
    pub model_path: &'a str,
    pub intra_threads: usize,
}

impl<'a> OrientationBackend for OrtOrientationBackend<'a> {
    fn run_batch(&self, tensor_data: &[f32], n: usize) -> Result<Vec<(f32, f32)>, OcrError> {
        let mutex = self.guard.get_or_init(self.model_path, self.intra_threads)?;
        let mut session = mutex
            .lock()
            .map_err(|e| OcrError::inference(format!("classifier session lock poisoned: {e}")))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| OcrError::config("classifier model declares no inputs"))?;

        let tensor = Tensor::from_array((
            (n, 3usize, cfg::HEIGHT as usize, cfg::WIDTH as usize),
            tensor_data.to_vec(),
        ))
        .map_err(OcrError::from)?;
        let outputs = session.run(ort::inputs![input_name => tensor]).map_err(OcrError::from)?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(OcrError::from)?;
        if shape.len() != 2 || shape[1] != 2 {
            return Err(OcrError::decode("classifier output is not [N, 2]"));
        }

        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let p0 = data[i * 2];
            let p180 = data[i * 2 + 1];
            out.push((p0, p180));
        }
        Ok(out)
    }
}

pub struct TextClassifier {
    pub session: SessionGuard,
}

impl TextClassifier {
    pub const fn new() -> Self {
        TextClassifier {
            session: SessionGuard::new(),
        }
    }

    /// Resizes `rgba` to height 48, preserving aspect ratio, clamps width to
    /// 192, and zero-pads the remainder.
    fn prepare_crop(rgba: &[u8], w: u32, h: u32) -> Vec<u8> {
        let ratio = cfg::HEIGHT as f32 / h as f32;
        let scaled_w = ((w as f32 * ratio).round() as u32).clamp(1, cfg::WIDTH);

        let img = image::RgbaImage::from_raw(w, h, rgba.to_vec()).expect("rgba buffer matches dimensions");
        let resized = image::imageops::resize(&img, scaled_w, cfg::HEIGHT, image::imageops::FilterType::Triangle);

        let mut padded = image::RgbaImage::new(cfg::WIDTH, cfg::HEIGHT);
        image::imageops::replace(&mut padded, &resized, 0, 0);
        padded.into_raw()
    }

    /// Runs classification for a batch of crops (each `(rgba, w, h)`),
    /// returning whether each crop should be rotated 180 degrees.
    pub fn classify_batch(
        &self,
        backend: &dyn OrientationBackend,
        crops: &[(Vec<u8>, u32, u32)],
    ) -> Result<Vec<bool>, OcrError> {
        let mut rotate_flags = Vec::with_capacity(crops.len());

        for chunk in crops.chunks(cfg::BATCH_SIZE) {
            let mut tensor = vec![0f32; chunk.len() * 3 * (cfg::HEIGHT as usize) * (cfg::WIDTH as usize)];
            let plane_stride = 3 * (cfg::HEIGHT as usize) * (cfg::WIDTH as usize);

            for (i, (rgba, w, h)) in chunk.iter().enumerate() {
                let prepared = Self::prepare_crop(rgba, *w, *h);
                tensor::pack_chw_normalized(
                    &prepared,
                    cfg::WIDTH,
                    cfg::HEIGHT,
                    [0.5, 0.5, 0.5],
                    [0.5, 0.5, 0.5],
                    ChannelOrder::Bgr,
                    &mut tensor,
                    cfg::HEIGHT,
                    cfg::WIDTH,
                    i * plane_stride,
                );
            }

            let probs = match backend.run_batch(&tensor, chunk.len()) {
                Ok(v) => v,
                Err(OcrError::Decode(msg)) => {
                    tracing::warn!(error = %msg, "classifier output decode warning, skipping rotation for batch");
                    rotate_flags.extend(std::iter::repeat(false).take(chunk.len()));
                    continue;
                }
                Err(e) => return Err(e),
            };
            for (p0, p180) in probs {
                rotate_flags.push(p180 > p0 && p180 > cfg::ROTATE_THRESHOLD);
            }
        }

        Ok(rotate_flags)
    }
}

impl Default for TextClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBackend {
        results: Vec<(f32, f32)>,
    }

    impl OrientationBackend for FakeBackend {
        fn run_batch(&self, _tensor: &[f32], n: usize) -> Result<Vec<(f32, f32)>, OcrError> {
            Ok(self.results.iter().take(n).cloned().collect())
        }
    }

    #[test]
    fn rotates_only_above_threshold() {
        let classifier = TextClassifier::new();
        let backend = FakeBackend {
            results: vec![(0.1, 0.95), (0.6, 0.4), (0.05, 0.91)],
        };
        let crops = vec![
            (vec![0u8; 10 * 10 * 4], 10, 10),
            (vec![0u8; 10 * 10 * 4], 10, 10),
            (vec![0u8; 10 * 10 * 4], 10, 10),
        ];
        let flags = classifier.classify_batch(&backend, &crops).unwrap();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn prepare_crop_clamps_width_to_192() {
        let rgba = vec![0u8; 400 * 48 * 4];
        let out = TextClassifier::prepare_crop(&rgba, 400, 48);
        assert_eq!(out.len(), (cfg::WIDTH * cfg::HEIGHT * 4) as usize);
    }
}
