//! Converts decoded RGBA pixel buffers into planar CHW float32 tensors with
//! mean/std normalization, writing directly into a caller-provided buffer so
//! batches can be packed contiguously without per-image allocations.

#[derive(Debug, Clone, Copy)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Writes one image's normalized CHW planes into `dst` at pixel offset
/// `dst_offset` within a `[C, H, dst_w]` tensor (`dst_w` may exceed `width`
/// when packing a padded batch slot; only the first `width` columns of each
/// row are written).
#[allow(clippy::too_many_arguments)]
pub fn pack_chw_normalized(
    rgba: &[u8],
    width: u32,
    height: u32,
    mean: [f32; 3],
    std: [f32; 3],
    order: ChannelOrder,
    dst: &mut [f32],
    dst_h: u32,
    dst_w: u32,
    dst_offset: usize,
) {
    let plane_size = (dst_h as usize) * (dst_w as usize);
    let channel_for = |c: usize| -> usize {
        match order {
            ChannelOrder::Rgb => c,
            ChannelOrder::Bgr => 2 - c,
        }
    };

    for y in 0..height.min(dst_h) {
        for x in 0..width.min(dst_w) {
            let px_idx = ((y * width + x) * 4) as usize;
            let r = rgba[px_idx] as f32 / 255.0;
            let g = rgba[px_idx + 1] as f32 / 255.0;
            let b = rgba[px_idx + 2] as f32 / 255.0;
            let rgb = [r, g, b];

            for out_c in 0..3 {
                let src_c = channel_for(out_c);
                let v = (rgb[src_c] - mean[src_c]) / std[src_c];
                let plane_offset = dst_offset + out_c * plane_size + (y as usize) * (dst_w as usize) + x as usize;
                dst[plane_offset] = v;
            }
        }
    }
}

/// Convenience for a single, unbatched image: allocates and returns a
/// `[3, height, width]` tensor.
pub fn pack_single(
    rgba: &[u8],
    width: u32,
    height: u32,
    mean: [f32; 3],
    std: [f32; 3],
    order: ChannelOrder,
) -> Vec<f32> {
    let mut buf = vec![0f32; 3 * (width as usize) * (height as usize)];
    pack_chw_normalized(rgba, width, height, mean, std, order, &mut buf, height, width, 0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_single_normalizes_and_orders_channels() {
        // A single white pixel.
        let rgba = [255u8, 255, 255, 255];
        let mean = [0.5, 0.5, 0.5];
        let std = [0.5, 0.5, 0.5];
        let tensor = pack_single(&rgba, 1, 1, mean, std, ChannelOrder::Bgr);
        assert_eq!(tensor.len(), 3);
        for v in tensor {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn pack_chw_normalized_leaves_padding_untouched() {
        let rgba = [0u8, 0, 0, 255];
        let mut dst = vec![-1f32; 3 * 2 * 2];
        pack_chw_normalized(
            &rgba,
            1,
            1,
            [0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
            ChannelOrder::Rgb,
            &mut dst,
            2,
            2,
            0,
        );
        // (0,0) in each plane was written (value 0.0); (0,1),(1,0),(1,1) still -1.
        assert_eq!(dst[0], 0.0);
        assert_eq!(dst[1], -1.0);
    }
}
