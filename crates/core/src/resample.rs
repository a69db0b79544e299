//! Bicubic resampling of channel-last 2D grids.
//!
//! Cubic convolution with the Keys kernel (`A = -0.75`), half-pixel centres
//! (the "align corners = false" convention) and border replication. The
//! kernel is separable: rows are resampled along the width first, then the
//! intermediate grid along the height.

/// Kernel coefficient shared with the common deep-learning frameworks.
pub const CUBIC_A: f32 = -0.75;

/// Four-tap filter for one output coordinate along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Taps {
    index: [usize; 4],
    weight: [f32; 4],
}

/// `|x| <= 1` branch of the kernel.
fn cubic_near(x: f32) -> f32 {
    ((CUBIC_A + 2.0) * x - (CUBIC_A + 3.0)) * x * x + 1.0
}

/// `1 < |x| < 2` branch of the kernel.
fn cubic_far(x: f32) -> f32 {
    ((CUBIC_A * x - 5.0 * CUBIC_A) * x + 8.0 * CUBIC_A) * x - 4.0 * CUBIC_A
}

fn cubic_weights(t: f32) -> [f32; 4] {
    [
        cubic_far(t + 1.0),
        cubic_near(t),
        cubic_near(1.0 - t),
        cubic_far(2.0 - t),
    ]
}

fn axis_taps(in_len: usize, out_len: usize) -> Vec<Taps> {
    let scale = in_len as f32 / out_len as f32;
    let last = in_len as isize - 1;
    (0..out_len)
        .map(|dst| {
            let src = (dst as f32 + 0.5) * scale - 0.5;
            let base = src.floor();
            let t = src - base;
            let base = base as isize;
            Taps {
                index: std::array::from_fn(|k| (base - 1 + k as isize).clamp(0, last) as usize),
                weight: cubic_weights(t),
            }
        })
        .collect()
}

/// Resample a `[in_h, in_w, channels]` row-major grid to `[out_h, out_w, channels]`.
///
/// Callers guarantee `src.len() == in_h * in_w * channels` and non-zero sizes.
pub fn resize_bicubic(
    src: &[f32],
    (in_h, in_w): (usize, usize),
    channels: usize,
    (out_h, out_w): (usize, usize),
) -> Vec<f32> {
    debug_assert_eq!(src.len(), in_h * in_w * channels);
    if (in_h, in_w) == (out_h, out_w) {
        return src.to_vec();
    }

    // Width pass: [in_h, out_w, channels]
    let x_taps = axis_taps(in_w, out_w);
    let mut rows = vec![0f32; in_h * out_w * channels];
    for y in 0..in_h {
        let src_row = &src[y * in_w * channels..(y + 1) * in_w * channels];
        let dst_row = &mut rows[y * out_w * channels..(y + 1) * out_w * channels];
        for (x, taps) in x_taps.iter().enumerate() {
            let dst = &mut dst_row[x * channels..(x + 1) * channels];
            for (&ix, &w) in taps.index.iter().zip(taps.weight.iter()) {
                let px = &src_row[ix * channels..(ix + 1) * channels];
                for (d, s) in dst.iter_mut().zip(px) {
                    *d += w * s;
                }
            }
        }
    }

    // Height pass: [out_h, out_w, channels]
    let y_taps = axis_taps(in_h, out_h);
    let row_len = out_w * channels;
    let mut out = vec![0f32; out_h * row_len];
    for (y, taps) in y_taps.iter().enumerate() {
        let dst = &mut out[y * row_len..(y + 1) * row_len];
        for (&iy, &w) in taps.index.iter().zip(taps.weight.iter()) {
            let src_row = &rows[iy * row_len..(iy + 1) * row_len];
            for (d, s) in dst.iter_mut().zip(src_row) {
                *d += w * s;
            }
        }
    }
    out
}
