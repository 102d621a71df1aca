//! DB-style text detector: aspect-preserving resize to a side-length cap,
//! one forward pass producing a probability map, then post-processing that
//! walks connected components through convex hull -> minimum-area
//! rectangle -> score -> unclip -> minimum-area rectangle again.

use crate::config::detector as cfg;
use crate::error::OcrError;
use crate::vision::geometry::{self, Point, TextBox};
use crate::vision::session::SessionGuard;
use crate::vision::tensor::{self, ChannelOrder};
use ort::value::Tensor;
use tracing::{debug, info};

/// A detected region with its detector confidence, prior to recognition.
#[derive(Debug, Clone)]
pub struct DetectionCandidate {
    pub text_box: TextBox,
    pub score: f32,
}

/// Abstraction over "run the detection graph and hand back a probability
/// map", so `TextDetector` is testable without a real ONNX session.
pub trait DetectionBackend {
    /// `tensor` is `[1, 3, h, w]` planar CHW. Returns the flattened
    /// probability map plus its `(height, width)`.
    fn run_probability_map(&self, tensor: &[f32], h: u32, w: u32) -> Result<(Vec<f32>, u32, u32), OcrError>;
}

pub struct OrtDetectionBackend<'a> {
    pub guard: &'a SessionGuard,
    pub model_path: &'a str,
    pub intra_threads: usize,
}

impl<'a> DetectionBackend for OrtDetectionBackend<'a> {
    fn run_probability_map(&self, tensor_data: &[f32], h: u32, w: u32) -> Result<(Vec<f32>, u32, u32), OcrError> {
        let mutex = self.guard.get_or_init(self.model_path, self.intra_threads)?;
        let mut session = mutex
            .lock()
            .map_err(|e| OcrError::inference(format!("detector session lock poisoned: {e}")))?;

        let tensor = Tensor::from_array(((1usize, 3usize, h as usize, w as usize), tensor_data.to_vec()))
            .map_err(OcrError::from)?;
        let outputs = session
            .run(ort::inputs![cfg::INPUT_NAME => tensor])
            .map_err(OcrError::from)?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(OcrError::from)?;
        if shape.len() != 4 {
            return Err(OcrError::decode("detector output has unexpected rank"));
        }
        let out_h = shape[2] as u32;
        let out_w = shape[3] as u32;
        Ok((data.to_vec(), out_h, out_w))
    }
}

pub struct TextDetector {
    pub session: SessionGuard,
}

impl TextDetector {
    pub const fn new() -> Self {
        TextDetector {
            session: SessionGuard::new(),
        }
    }

    /// Scales so the longer side is at most `limit_side_len`, then rounds
    /// each dimension down to the nearest multiple of 32 (floor at 32).
    pub fn resize_dims(width: u32, height: u32) -> (u32, u32) {
        let longer = width.max(height) as f32;
        let scale = (cfg::LIMIT_SIDE_LEN as f32 / longer).min(1.0);
        let scaled_w = (width as f32 * scale).max(1.0);
        let scaled_h = (height as f32 * scale).max(1.0);

        let round_down_32 = |v: f32| -> u32 { ((v as u32) / 32 * 32).max(32) };
        (round_down_32(scaled_w), round_down_32(scaled_h))
    }

    /// Runs detection and streams each accepted `(TextBox, score)` through
    /// `sink`. Returning `true` from `sink` halts further emission, which is
    /// how both "collect all" and "collect top K" share this routine
    /// without re-running the model.
    pub fn detect_with_sink(
        &self,
        backend: &dyn DetectionBackend,
        rgba: &[u8],
        orig_w: u32,
        orig_h: u32,
        mut sink: impl FnMut(TextBox, f32) -> bool,
    ) -> Result<(), OcrError> {
        let (resized_w, resized_h) = Self::resize_dims(orig_w, orig_h);
        let resized = resize_rgba(rgba, orig_w, orig_h, resized_w, resized_h);

        let tensor = tensor::pack_single(&resized, resized_w, resized_h, cfg::MEAN, cfg::STD, ChannelOrder::Bgr);
        let (prob_map, map_h, map_w) = match backend.run_probability_map(&tensor, resized_h, resized_w) {
            Ok(v) => v,
            Err(OcrError::Decode(msg)) => {
                tracing::warn!(error = %msg, "detector output decode warning, treating as no detections");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let scale_w = orig_w as f32 / map_w as f32;
        let scale_h = orig_h as f32 / map_h as f32;

        let binary = threshold_map(&prob_map, cfg::THRESH);
        let components = connected_components(&binary, map_w as usize, map_h as usize);

        let mut ranked = components;
        ranked.sort_by_key(|c| std::cmp::Reverse(c.len()));
        ranked.truncate(cfg::MAX_CANDIDATES);

        info!(components = ranked.len(), "detector post-process candidates");

        for pixels in ranked {
            if pixels.len() < 4 {
                continue;
            }
            let pts: Vec<Point> = pixels
                .iter()
                .map(|&(x, y)| Point::new(x as f64 + 0.5, y as f64 + 0.5))
                .collect();

            let hull = geometry::convex_hull(&pts);
            if hull.len() < 3 {
                continue;
            }
            let min_rect = geometry::minimum_area_rectangle(&hull, true);
            if min_rect.len() != 4 {
                continue;
            }

            let score = score_rectangle(&min_rect, &prob_map, map_w as usize, map_h as usize);
            if score < cfg::BOX_THRESH {
                continue;
            }

            let expanded = geometry::unclip_box(&min_rect, cfg::UNCLIP_RATIO as f64);
            if expanded.len() < 3 {
                continue;
            }
            let final_rect = geometry::minimum_area_rectangle(&expanded, false);
            if final_rect.len() != 4 {
                continue;
            }

            let short_side = shortest_side(&final_rect);
            if short_side < cfg::MIN_SIZE as f64 {
                continue;
            }

            let clipped: Vec<Point> = final_rect
                .iter()
                .map(|p| {
                    Point::new(
                        (p.x.clamp(0.0, map_w as f64) * scale_w as f64),
                        (p.y.clamp(0.0, map_h as f64) * scale_h as f64),
                    )
                })
                .collect();

            let Some(text_box) = TextBox::new(&clipped) else {
                continue;
            };

            if sink(text_box, score) {
                break;
            }
        }

        Ok(())
    }

    /// Collects every accepted detection in reading order (lines grouped by
    /// `y`-proximity, sorted top-to-bottom then left-to-right within a line).
    pub fn detect(
        &self,
        backend: &dyn DetectionBackend,
        rgba: &[u8],
        orig_w: u32,
        orig_h: u32,
    ) -> Result<Vec<DetectionCandidate>, OcrError> {
        let mut found = Vec::new();
        self.detect_with_sink(backend, rgba, orig_w, orig_h, |text_box, score| {
            found.push(DetectionCandidate { text_box, score });
            false
        })?;
        sort_reading_order(&mut found);
        Ok(found)
    }

    /// Collects up to `max` candidates whose score is at least `min_score`,
    /// stopping the moment enough have been found.
    pub fn detect_top_k(
        &self,
        backend: &dyn DetectionBackend,
        rgba: &[u8],
        orig_w: u32,
        orig_h: u32,
        max: usize,
        min_score: f32,
    ) -> Result<Vec<DetectionCandidate>, OcrError> {
        let mut found = Vec::with_capacity(max);
        self.detect_with_sink(backend, rgba, orig_w, orig_h, |text_box, score| {
            if score >= min_score {
                found.push(DetectionCandidate { text_box, score });
            }
            found.len() >= max
        })?;
        Ok(found)
    }
}

impl Default for TextDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn resize_rgba(rgba: &[u8], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_raw(src_w, src_h, rgba.to_vec())
        .expect("rgba buffer must match declared dimensions");
    let resized = image::imageops::resize(&img, dst_w, dst_h, image::imageops::FilterType::Triangle);
    resized.into_raw()
}

fn threshold_map(prob_map: &[f32], thresh: f32) -> Vec<bool> {
    prob_map.iter().map(|&v| v > thresh).collect()
}

/// 8-connected components over the binary map via iterative DFS, returning
/// each component's member pixel coordinates.
fn connected_components(binary: &[bool], w: usize, h: usize) -> Vec<Vec<(usize, usize)>> {
    let mut visited = vec![false; w * h];
    let mut out = Vec::new();

    for y0 in 0..h {
        for x0 in 0..w {
            let idx0 = y0 * w + x0;
            if !binary[idx0] || visited[idx0] {
                continue;
            }

            let mut stack = vec![(x0, y0)];
            let mut component = Vec::new();
            visited[idx0] = true;

            while let Some((x, y)) = stack.pop() {
                component.push((x, y));
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = x as i32 + dx;
                        let ny = y as i32 + dy;
                        if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                            continue;
                        }
                        let (nx, ny) = (nx as usize, ny as usize);
                        let nidx = ny * w + nx;
                        if binary[nidx] && !visited[nidx] {
                            visited[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            out.push(component);
        }
    }

    out
}

fn score_rectangle(rect: &[Point], prob_map: &[f32], w: usize, h: usize) -> f32 {
    if rect.len() != 4 {
        return 0.0;
    }
    let quad: [Point; 4] = [rect[0], rect[1], rect[2], rect[3]];

    let min_x = rect.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).floor().max(0.0) as usize;
    let max_x = rect
        .iter()
        .map(|p| p.x)
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .min(w as f64 - 1.0)
        .max(0.0) as usize;
    let min_y = rect.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).floor().max(0.0) as usize;
    let max_y = rect
        .iter()
        .map(|p| p.y)
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .min(h as f64 - 1.0)
        .max(0.0) as usize;

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for y in min_y..=max_y.max(min_y) {
        for x in min_x..=max_x.max(min_x) {
            if geometry::is_point_inside_quad(x as f64 + 0.5, y as f64 + 0.5, &quad) {
                sum += prob_map[y * w + x] as f64;
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

fn shortest_side(rect: &[Point]) -> f64 {
    if rect.len() != 4 {
        return 0.0;
    }
    let d = |a: Point, b: Point| ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
    d(rect[0], rect[1]).min(d(rect[1], rect[2]))
}

fn min_y(c: &DetectionCandidate) -> f64 {
    c.text_box.points().iter().map(|p| p.y).fold(f64::INFINITY, f64::min)
}

fn min_x(c: &DetectionCandidate) -> f64 {
    c.text_box.points().iter().map(|p| p.x).fold(f64::INFINITY, f64::min)
}

/// Groups candidates into text lines and orders each line left to right.
///
/// Lines are built as transitive clusters rather than a pairwise `sort_by`
/// comparator: sort by top edge, then walk in that order merging a box into
/// the current cluster while its top edge is within `LINE_GROUPING_PX` of
/// the cluster's running (last-seen) top edge. A chain of boxes each close
/// to its neighbor lands in one cluster even if the first and last are far
/// apart, which a pairwise comparator cannot express consistently.
fn sort_reading_order(candidates: &mut [DetectionCandidate]) {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&i, &j| min_y(&candidates[i]).partial_cmp(&min_y(&candidates[j])).unwrap_or(std::cmp::Ordering::Equal));

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut running_y = f64::NEG_INFINITY;
    for idx in order {
        let y = min_y(&candidates[idx]);
        match clusters.last_mut() {
            Some(cluster) if (y - running_y).abs() <= cfg::LINE_GROUPING_PX as f64 => {
                cluster.push(idx);
            }
            _ => clusters.push(vec![idx]),
        }
        running_y = y;
    }

    for cluster in &mut clusters {
        cluster.sort_by(|&i, &j| min_x(&candidates[i]).partial_cmp(&min_x(&candidates[j])).unwrap_or(std::cmp::Ordering::Equal));
    }

    let reordered: Vec<DetectionCandidate> = clusters.into_iter().flatten().map(|i| candidates[i].clone()).collect();
    candidates.clone_from_slice(&reordered);
    debug!(count = candidates.len(), "sorted detections into reading order");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBackend {
        map: Vec<f32>,
        h: u32,
        w: u32,
    }

    impl DetectionBackend for FakeBackend {
        fn run_probability_map(&self, _tensor: &[f32], _h: u32, _w: u32) -> Result<(Vec<f32>, u32, u32), OcrError> {
            Ok((self.map.clone(), self.h, self.w))
        }
    }

    #[test]
    fn resize_dims_caps_longer_side_and_rounds_to_32() {
        let (w, h) = TextDetector::resize_dims(2000, 1000);
        assert!(w <= cfg::LIMIT_SIDE_LEN);
        assert_eq!(w % 32, 0);
        assert_eq!(h % 32, 0);
    }

    #[test]
    fn resize_dims_never_upsamples() {
        let (w, h) = TextDetector::resize_dims(64, 64);
        assert_eq!(w, 64);
        assert_eq!(h, 64);
    }

    #[test]
    fn detect_returns_empty_for_blank_probability_map() {
        let detector = TextDetector::new();
        let backend = FakeBackend {
            map: vec![0.0; 32 * 32],
            h: 32,
            w: 32,
        };
        let rgba = vec![0u8; (32 * 32 * 4) as usize];
        let found = detector.detect(&backend, &rgba, 32, 32).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn reading_order_groups_lines_by_y_then_sorts_by_x() {
        let make = |x: f64, y: f64| DetectionCandidate {
            text_box: TextBox::new(&[
                Point::new(x, y),
                Point::new(x + 5.0, y),
                Point::new(x + 5.0, y + 5.0),
                Point::new(x, y + 5.0),
            ])
            .unwrap(),
            score: 0.9,
        };
        let mut candidates = vec![make(20.0, 0.0), make(10.0, 4.0), make(15.0, 40.0)];
        sort_reading_order(&mut candidates);

        let xs: Vec<f64> = candidates
            .iter()
            .map(|c| c.text_box.points().iter().map(|p| p.x).fold(f64::INFINITY, f64::min))
            .collect();
        assert_eq!(xs, vec![10.0, 20.0, 15.0]);
    }

    #[test]
    fn reading_order_clusters_transitively_across_a_chain() {
        // Each box is within LINE_GROUPING_PX (10px) of its immediate
        // neighbor's top edge (0 -> 8 -> 16), but the first and last are
        // 16px apart, well past the threshold. They must still land in one
        // cluster and be ordered by x, not split into separate lines.
        let make = |x: f64, y: f64| DetectionCandidate {
            text_box: TextBox::new(&[
                Point::new(x, y),
                Point::new(x + 5.0, y),
                Point::new(x + 5.0, y + 5.0),
                Point::new(x, y + 5.0),
            ])
            .unwrap(),
            score: 0.9,
        };
        let mut candidates = vec![make(30.0, 0.0), make(10.0, 8.0), make(20.0, 16.0)];
        sort_reading_order(&mut candidates);

        let xs: Vec<f64> = candidates
            .iter()
            .map(|c| c.text_box.points().iter().map(|p| p.x).fold(f64::INFINITY, f64::min))
            .collect();
        assert_eq!(xs, vec![10.0, 20.0, 30.0]);
    }
}
