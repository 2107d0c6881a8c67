//! Float image planes and the neighbourhood operators the extractors use.
//!
//! All convolutions mirror the border without repeating the edge pixel
//! (`gfedcb|abcdefgh|gfedcba`), except the Canny gradient which replicates
//! the edge.

use std::collections::VecDeque;

use crate::raster::Raster;

/// A single-channel image of `f64` samples, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl Plane {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Plane {
        Plane::new(self.width, self.height, self.data.iter().map(|&v| f(v)).collect())
    }

    /// Combine two planes of equal size sample by sample.
    pub fn zip_map<F: Fn(f64, f64) -> f64>(&self, other: &Plane, f: F) -> Plane {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        Plane::new(
            self.width,
            self.height,
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        )
    }

    pub fn sub(&self, other: &Plane) -> Plane {
        self.zip_map(other, |a, b| a - b)
    }

    pub fn abs_diff(&self, other: &Plane) -> Plane {
        self.zip_map(other, |a, b| (a - b).abs())
    }

    /// Round to nearest and saturate to `0..=255`, as storing into an 8-bit buffer would.
    pub fn quantize_u8(&self) -> Plane {
        self.map(|v| v.round().clamp(0.0, 255.0))
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }
}

/// Reflect an out-of-range index back into `0..n` without repeating the edge sample.
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as usize
}

fn replicate(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

/// Correlate rows with `kx` then columns with `ky`; both kernels have odd length.
fn separable(plane: &Plane, kx: &[f64], ky: &[f64], border: fn(isize, usize) -> usize) -> Plane {
    let (w, h) = (plane.width, plane.height);
    let rx = (kx.len() / 2) as isize;
    let ry = (ky.len() / 2) as isize;

    let mut rows = vec![0.0; w * h];
    for y in 0..h {
        let row = &plane.data[y * w..(y + 1) * w];
        for x in 0..w {
            rows[y * w + x] = kx
                .iter()
                .enumerate()
                .map(|(k, &c)| c * row[border(x as isize + k as isize - rx, w)])
                .sum();
        }
    }

    let mut out = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            out[y * w + x] = ky
                .iter()
                .enumerate()
                .map(|(k, &c)| c * rows[border(y as isize + k as isize - ry, h) * w + x])
                .sum();
        }
    }
    Plane::new(w, h, out)
}

/// Normalized box filter of size `ksize x ksize`.
pub fn box_blur(plane: &Plane, ksize: usize) -> Plane {
    let k = vec![1.0 / ksize as f64; ksize];
    separable(plane, &k, &k, reflect101)
}

/// 1-D Gaussian kernel with sigma derived from the size.
///
/// Sizes up to 7 use the fixed binomial-style tables; larger sizes use
/// `sigma = 0.3 * ((ksize - 1) / 2 - 1) + 0.8`.
pub fn gaussian_kernel(ksize: usize) -> Vec<f64> {
    match ksize {
        1 => vec![1.0],
        3 => vec![0.25, 0.5, 0.25],
        5 => vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        7 => vec![0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125],
        _ => {
            let sigma = 0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8;
            let center = (ksize / 2) as f64;
            let raw: Vec<f64> = (0..ksize)
                .map(|i| {
                    let d = i as f64 - center;
                    (-(d * d) / (2.0 * sigma * sigma)).exp()
                })
                .collect();
            let total: f64 = raw.iter().sum();
            raw.into_iter().map(|v| v / total).collect()
        }
    }
}

pub fn gaussian_blur(plane: &Plane, ksize: usize) -> Plane {
    let k = gaussian_kernel(ksize);
    separable(plane, &k, &k, reflect101)
}

/// Second-derivative operator with the 4-neighbour aperture.
pub fn laplacian(plane: &Plane) -> Plane {
    let (w, h) = (plane.width, plane.height);
    let mut out = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let at = |dx: isize, dy: isize| {
                plane.get(
                    reflect101(x as isize + dx, w),
                    reflect101(y as isize + dy, h),
                )
            };
            out.push(at(0, -1) + at(0, 1) + at(-1, 0) + at(1, 0) - 4.0 * at(0, 0));
        }
    }
    Plane::new(w, h, out)
}

/// Mixed first derivative `d2/dxdy` with a 3x3 Sobel aperture.
pub fn sobel_xy(plane: &Plane) -> Plane {
    let d = [-1.0, 0.0, 1.0];
    separable(plane, &d, &d, reflect101)
}

fn sobel_dx(plane: &Plane) -> Plane {
    separable(plane, &[-1.0, 0.0, 1.0], &[1.0, 2.0, 1.0], replicate)
}

fn sobel_dy(plane: &Plane) -> Plane {
    separable(plane, &[1.0, 2.0, 1.0], &[-1.0, 0.0, 1.0], replicate)
}

/// OpenCV-style 8-bit hue (`0..180`) of every pixel; 0 for gray pixels.
pub fn hue_plane(raster: &Raster) -> Plane {
    let (w, h) = (raster.width(), raster.height());
    let mut out = Vec::with_capacity(raster.pixel_count());
    for y in 0..h {
        for x in 0..w {
            let [r, g, b] = raster.rgb_at(x, y).map(|c| c as f64);
            let v = r.max(g).max(b);
            let diff = v - r.min(g).min(b);
            let hue = if diff == 0.0 {
                0.0
            } else if v == r {
                60.0 * (g - b) / diff
            } else if v == g {
                120.0 + 60.0 * (b - r) / diff
            } else {
                240.0 + 60.0 * (r - g) / diff
            };
            let hue = if hue < 0.0 { hue + 360.0 } else { hue };
            out.push((hue * 0.5).round() % 180.0);
        }
    }
    Plane::new(w as usize, h as usize, out)
}

/// Canny edge map with hysteresis thresholds on the L1 gradient magnitude.
///
/// For color rasters each pixel takes the gradient of whichever channel has
/// the strongest response.
pub fn canny(raster: &Raster, low: f64, high: f64) -> Vec<bool> {
    let (w, h) = (raster.width() as usize, raster.height() as usize);
    let mut dx = vec![0.0; w * h];
    let mut dy = vec![0.0; w * h];
    let mut mag = vec![-1.0f64; w * h];

    for channel in raster.channel_planes() {
        let cx = sobel_dx(&channel);
        let cy = sobel_dy(&channel);
        for i in 0..w * h {
            let m = cx.data[i].abs() + cy.data[i].abs();
            if m > mag[i] {
                mag[i] = m;
                dx[i] = cx.data[i];
                dy[i] = cy.data[i];
            }
        }
    }

    let mag_at = |x: isize, y: isize| -> f64 {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0.0
        } else {
            mag[y as usize * w + x as usize]
        }
    };

    let tan22 = (22.5f64).to_radians().tan();
    let tan67 = (67.5f64).to_radians().tan();

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    let mut queue = VecDeque::new();
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let m = mag[i];
            if m <= low {
                continue;
            }
            let (ax, ay) = (dx[i].abs(), dy[i].abs());
            let (xi, yi) = (x as isize, y as isize);
            let is_max = if ay <= ax * tan22 {
                m > mag_at(xi - 1, yi) && m >= mag_at(xi + 1, yi)
            } else if ay > ax * tan67 {
                m > mag_at(xi, yi - 1) && m >= mag_at(xi, yi + 1)
            } else if (dx[i] < 0.0) != (dy[i] < 0.0) {
                m > mag_at(xi - 1, yi + 1) && m >= mag_at(xi + 1, yi - 1)
            } else {
                m > mag_at(xi - 1, yi - 1) && m >= mag_at(xi + 1, yi + 1)
            };
            if !is_max {
                continue;
            }
            if m > high {
                class[i] = 2;
                queue.push_back(i);
            } else {
                class[i] = 1;
            }
        }
    }

    while let Some(i) = queue.pop_front() {
        let (x, y) = ((i % w) as isize, (i / w) as isize);
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if class[j] == 1 {
                    class[j] = 2;
                    queue.push_back(j);
                }
            }
        }
    }

    class.into_iter().map(|c| c == 2).collect()
}
