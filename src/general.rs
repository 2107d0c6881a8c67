//! General-profile extractors: texture, technical artifacts, fine detail and metadata.
//!
//! Every score lies in `[0, 1]` and higher means more human-like.

use serde::Serialize;

use crate::filter::{box_blur, canny, gaussian_blur, hue_plane, laplacian, sobel_xy};
use crate::raster::Raster;
use crate::score::{FeatureScore, FeatureScoreSet};
use crate::stats::{clamp_unit, code_histogram, local_ordinal_codes, mean, pearson, shannon_entropy, variance};

pub const TEXTURE_ANALYSIS: &str = "texture_analysis";
pub const TECHNICAL_ARTIFACTS: &str = "technical_artifacts";
pub const FINE_DETAILS: &str = "fine_details";
pub const METADATA: &str = "metadata";

const EDGE_LOW_THRESHOLD: f64 = 100.0;
const EDGE_HIGH_THRESHOLD: f64 = 200.0;

/// Output sizes common to image generators.
const GENERATOR_RESOLUTIONS: [(u64, u64); 4] = [(512, 512), (1024, 1024), (512, 768), (768, 512)];

/// More EXIF tags than this reads as camera metadata.
const EXIF_RICH_TAG_COUNT: usize = 5;

const METADATA_CAMERA: f64 = 0.8;
const METADATA_GENERATOR: f64 = 0.3;
const METADATA_NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextureScores {
    /// Spread of the box-blur residual.
    pub variance: f64,
    /// Normalized entropy of the local ordinal code histogram.
    pub pattern: f64,
}

impl TextureScores {
    pub fn combined(&self) -> f64 {
        0.6 * self.variance + 0.4 * self.pattern
    }
}

pub fn texture_scores(raster: &Raster) -> TextureScores {
    let gray = raster.to_gray();

    let entropy = shannon_entropy(&code_histogram(&local_ordinal_codes(&gray)));
    let pattern = clamp_unit(entropy / 8.0, 0.0);

    let plane = gray.to_plane();
    let blurred = box_blur(&plane, 5).quantize_u8();
    let residual = plane.abs_diff(&blurred);
    let variance_score = clamp_unit(variance(residual.data()) / 100.0, 0.0);

    TextureScores {
        variance: variance_score,
        pattern,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArtifactScores {
    pub edge: f64,
    pub color: f64,
    pub noise: f64,
}

impl ArtifactScores {
    pub fn combined(&self) -> f64 {
        0.4 * self.edge + 0.3 * self.color + 0.3 * self.noise
    }
}

pub fn artifact_scores(raster: &Raster) -> ArtifactScores {
    let edges = canny(raster, EDGE_LOW_THRESHOLD, EDGE_HIGH_THRESHOLD);
    let density = edges.iter().filter(|&&e| e).count() as f64 / raster.pixel_count() as f64;
    let edge = clamp_unit(density * 5.0, 0.0);

    let gradient = sobel_xy(&hue_plane(raster)).map(f64::abs);
    let color = clamp_unit(mean(gradient.data()) / 30.0, 0.0);

    let gray = raster.to_gray().to_plane();
    let residual = gray.sub(&gaussian_blur(&gray, 5));
    let noise = clamp_unit(variance(residual.data()) / 50.0, 0.0);

    ArtifactScores { edge, color, noise }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetailScores {
    pub high_frequency: f64,
    /// Agreement of fine and medium detail layers; 0 when either layer is flat.
    pub consistency: f64,
}

impl DetailScores {
    pub fn combined(&self) -> f64 {
        0.5 * self.high_frequency + 0.5 * self.consistency
    }
}

pub fn detail_scores(raster: &Raster) -> DetailScores {
    let gray = raster.to_gray().to_plane();

    let high_frequency = clamp_unit(variance(laplacian(&gray).data()) / 1000.0, 0.0);

    let blur3 = gaussian_blur(&gray, 3).quantize_u8();
    let blur5 = gaussian_blur(&gray, 5).quantize_u8();
    let fine = gray.sub(&blur3);
    let medium = blur3.sub(&blur5);
    let consistency = match pearson(fine.data(), medium.data()) {
        Some(r) => clamp_unit((r + 1.0) / 2.0, 0.0),
        None => 0.0,
    };

    DetailScores {
        high_frequency,
        consistency,
    }
}

/// First match wins: rich EXIF, then generator resolution or aspect ratio, else neutral.
pub fn metadata_score(width: u32, height: u32, exif_tags: Option<usize>) -> f64 {
    if exif_tags.is_some_and(|n| n > EXIF_RICH_TAG_COUNT) {
        return METADATA_CAMERA;
    }
    let (w, h) = (width as u64, height as u64);
    let generator_like = GENERATOR_RESOLUTIONS
        .iter()
        .any(|&(gw, gh)| (w == gw && h == gh) || w * gh == h * gw);
    if generator_like {
        METADATA_GENERATOR
    } else {
        METADATA_NEUTRAL
    }
}

/// Run all four general-profile extractors.
pub fn extract_general(raster: &Raster) -> FeatureScoreSet {
    let texture = texture_scores(raster);
    let artifacts = artifact_scores(raster);
    let details = detail_scores(raster);
    let metadata = metadata_score(raster.width(), raster.height(), raster.exif_tag_count());

    tracing::debug!(
        variance = texture.variance,
        pattern = texture.pattern,
        edge = artifacts.edge,
        color = artifacts.color,
        noise = artifacts.noise,
        high_frequency = details.high_frequency,
        consistency = details.consistency,
        metadata,
        "general feature components"
    );

    let mut set = FeatureScoreSet::new();
    set.insert(TEXTURE_ANALYSIS, FeatureScore::unit(texture.combined(), 0.5));
    set.insert(TECHNICAL_ARTIFACTS, FeatureScore::unit(artifacts.combined(), 0.5));
    set.insert(FINE_DETAILS, FeatureScore::unit(details.combined(), 0.5));
    set.insert(METADATA, FeatureScore::unit(metadata, METADATA_NEUTRAL));
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(width: u32, height: u32, seed: u64) -> Raster {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..width * height * 3).map(|_| rng.gen::<u8>()).collect();
        Raster::new(width, height, crate::raster::Channels::Rgb, data).unwrap()
    }

    fn flat(width: u32, height: u32) -> Raster {
        Raster::rgb_from_fn(width, height, |_, _| [128, 128, 128]).unwrap()
    }

    #[test]
    fn solid_color_texture_is_degenerate_but_defined() {
        let scores = texture_scores(&flat(32, 32));
        assert_eq!(scores.variance, 0.0);
        assert!(scores.pattern.abs() < 1e-9);
        assert!(scores.combined().abs() < 1e-9);
    }

    #[test]
    fn flat_detail_layers_fall_back_to_zero_consistency() {
        let details = detail_scores(&flat(16, 16));
        assert_eq!(details.consistency, 0.0);
        assert_eq!(details.high_frequency, 0.0);
    }

    #[test]
    fn tiny_images_do_not_panic() {
        for (w, h) in [(1, 1), (2, 2), (1, 5), (3, 1)] {
            let raster = Raster::rgb_from_fn(w, h, |x, y| [(x * 40) as u8, (y * 70) as u8, 9]).unwrap();
            let set = extract_general(&raster);
            assert_eq!(set.len(), 4);
            for (name, score) in set.iter() {
                assert!((0.0..=1.0).contains(&score.value), "{name} = {}", score.value);
            }
        }
    }

    #[test]
    fn hue_gradient_color_transitions() {
        // Pure-red-to-yellow ramp whose 8-bit hue is exactly 2 * x * y.
        let raster = Raster::rgb_from_fn(4, 4, |x, y| [255, (17 * x * y) as u8, 0]).unwrap();
        assert_eq!(hue_plane(&raster).get(3, 3), 18.0);

        // Mixed derivative is 8 on the four interior pixels and 0 on the border.
        let scores = artifact_scores(&raster);
        assert!((scores.color - 2.0 / 30.0).abs() < 1e-12, "color = {}", scores.color);
    }

    #[test]
    fn detail_consistency_is_rescaled_correlation() {
        let raster = noise(32, 32, 21);
        let gray = raster.to_gray().to_plane();
        let blur3 = gaussian_blur(&gray, 3).quantize_u8();
        let blur5 = gaussian_blur(&gray, 5).quantize_u8();
        let r = pearson(gray.sub(&blur3).data(), blur3.sub(&blur5).data()).unwrap();

        let details = detail_scores(&raster);
        assert!((details.consistency - (r + 1.0) / 2.0).abs() < 1e-12);
        assert!(details.consistency > 0.0 && details.consistency < 1.0);
        assert_ne!(details.consistency, 0.5);
    }

    #[test]
    fn noise_scores_above_flat() {
        let noisy = noise(100, 100, 7);
        let plain = flat(100, 100);

        assert!(texture_scores(&noisy).variance > texture_scores(&plain).variance);
        assert!(artifact_scores(&noisy).noise > artifact_scores(&plain).noise);

        let noisy_set = extract_general(&noisy);
        for (_, score) in noisy_set.iter() {
            assert!((0.0..=1.0).contains(&score.value));
        }
    }

    #[test]
    fn metadata_policy() {
        assert_eq!(metadata_score(512, 512, None), 0.3);
        assert_eq!(metadata_score(768, 512, Some(2)), 0.3);
        assert_eq!(metadata_score(1000, 1500, None), 0.3);
        assert_eq!(metadata_score(640, 480, None), 0.5);
        assert_eq!(metadata_score(512, 512, Some(6)), 0.8);
        assert_eq!(metadata_score(640, 480, Some(5)), 0.5);
    }

    #[test]
    fn gray_and_rgb_agree_for_neutral_pixels() {
        let rgb = Raster::rgb_from_fn(20, 20, |x, y| {
            let v = ((x * 13 + y * 7) % 256) as u8;
            [v, v, v]
        })
        .unwrap();
        let gray = Raster::gray_from_fn(20, 20, |x, y| ((x * 13 + y * 7) % 256) as u8).unwrap();

        assert_eq!(texture_scores(&rgb), texture_scores(&gray));
        assert_eq!(detail_scores(&rgb), detail_scores(&gray));
    }
}
