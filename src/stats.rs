//! Numeric helpers shared by the extractors.

use crate::raster::{GrayImage, ImageAccess};

/// Added inside the logarithm so empty histogram buckets contribute nothing.
const ENTROPY_EPSILON: f64 = 1e-10;

/// 8-bit local ordinal code of every interior pixel, row-major.
///
/// Bit `k` is set when neighbour `k` is strictly brighter than the centre,
/// with neighbours numbered clockwise from the top-left. Border pixels have
/// no full neighbourhood and produce no code, so images narrower or shorter
/// than 3 pixels yield an empty vector.
pub fn local_ordinal_codes(gray: &GrayImage) -> Vec<u8> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    if w < 3 || h < 3 {
        return Vec::new();
    }

    const OFFSETS: [(isize, isize); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    let mut codes = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = gray.at(x, y);
            let code = OFFSETS.iter().enumerate().fold(0u8, |code, (bit, (dx, dy))| {
                let nx = (x as isize + dx) as usize;
                let ny = (y as isize + dy) as usize;
                if gray.at(nx, ny) > center {
                    code | (1 << bit)
                } else {
                    code
                }
            });
            codes.push(code);
        }
    }
    codes
}

/// Relative frequency of each code value; all zeros when `codes` is empty.
pub fn code_histogram(codes: &[u8]) -> [f64; 256] {
    let mut hist = [0.0; 256];
    if codes.is_empty() {
        return hist;
    }
    for &c in codes {
        hist[c as usize] += 1.0;
    }
    let total = codes.len() as f64;
    for bucket in hist.iter_mut() {
        *bucket /= total;
    }
    hist
}

/// Shannon entropy in bits of a normalized histogram.
pub fn shannon_entropy(hist: &[f64]) -> f64 {
    -hist
        .iter()
        .map(|&p| p * (p + ENTROPY_EPSILON).log2())
        .sum::<f64>()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance; 0 for an empty slice.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Pearson correlation coefficient, or `None` when it is undefined
/// (length mismatch, empty input, or a constant series).
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x - ma, y - mb);
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }
    if va <= 0.0 || vb <= 0.0 {
        return None;
    }
    Some((cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0))
}

/// Clamp into `[0, 1]`, mapping NaN to `fallback`.
pub fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_code_bit_order() {
        // Only the top-left and left neighbours are brighter than the centre.
        let gray = GrayImage::new(vec![9, 0, 0, 9, 5, 0, 0, 0, 0], 3, 3);
        let codes = local_ordinal_codes(&gray);

        assert_eq!(codes, vec![0b1000_0001]);
    }

    #[test]
    fn equal_neighbours_do_not_set_bits() {
        let gray = GrayImage::from_fn(5, 4, |_, _| 77);
        let codes = local_ordinal_codes(&gray);

        assert_eq!(codes.len(), 3 * 2);
        assert!(codes.iter().all(|&c| c == 0));
    }

    #[test]
    fn tiny_images_have_no_codes() {
        assert!(local_ordinal_codes(&GrayImage::from_fn(2, 2, |_, _| 1)).is_empty());
        assert!(local_ordinal_codes(&GrayImage::from_fn(1, 1, |_, _| 1)).is_empty());
    }

    #[test]
    fn entropy_bounds() {
        assert_eq!(shannon_entropy(&code_histogram(&[])), 0.0);

        let single = shannon_entropy(&code_histogram(&[3, 3, 3]));
        assert!(single.abs() < 1e-9);

        let all: Vec<u8> = (0..=255).collect();
        let uniform = shannon_entropy(&code_histogram(&all));
        assert!((uniform - 8.0).abs() < 1e-6);
    }

    #[test]
    fn variance_and_mean() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&v), 5.0);
        assert_eq!(variance(&v), 4.0);
        assert_eq!(variance(&[]), 0.0);
    }

    #[test]
    fn pearson_cases() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let up = [2.0, 4.0, 6.0, 8.0];
        let down = [8.0, 6.0, 4.0, 2.0];

        assert!((pearson(&a, &up).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &down).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[1.0; 4]), None);
        assert_eq!(pearson(&a, &up[..3]), None);
    }

    #[test]
    fn clamp_handles_nan() {
        assert_eq!(clamp_unit(f64::NAN, 0.5), 0.5);
        assert_eq!(clamp_unit(-0.2, 0.5), 0.0);
        assert_eq!(clamp_unit(3.0, 0.5), 1.0);
    }
}
