//! Face-profile extractors. Scores are non-negative and higher is more suspicious.

use std::ops::Range;

use crate::filter::gaussian_blur;
use crate::landmarks::FaceLandmarks;
use crate::raster::Raster;
use crate::score::{FeatureScore, FeatureScoreSet};
use crate::types::Point;

pub const SYMMETRY: &str = "symmetry";
pub const EYE_ALIGNMENT: &str = "eye_alignment";
pub const FACE_TEXTURE_ARTIFACTS: &str = "texture_artifacts";

/// Returned by the landmark extractors when no face was detected.
pub const NO_FACE_SCORE: f64 = 1.0;

const ARTIFACT_BLUR_SIZE: usize = 15;

/// Outer-lip points paired index-for-index between the two sides, as
/// offsets into the mouth group (landmarks 48..51 and 54..57).
const LEFT_MOUTH: Range<usize> = 0..3;
const RIGHT_MOUTH: Range<usize> = 6..9;

fn side(eye: &[Point], nose_tip: Point, mouth: &[Point]) -> Vec<Point> {
    eye.iter()
        .copied()
        .chain(std::iter::once(nose_tip))
        .chain(mouth.iter().copied())
        .collect()
}

/// Mean absolute coordinate difference between the left and right landmark
/// sets of the first face, divided by the image width.
///
/// The sides are compared as-is, without reflecting either one.
pub fn symmetry_score(faces: &[FaceLandmarks], image_width: u32) -> f64 {
    let Some(face) = faces.first() else {
        return NO_FACE_SCORE;
    };
    let left = side(face.left_eye(), face.nose_tip(), &face.mouth()[LEFT_MOUTH]);
    let right = side(face.right_eye(), face.nose_tip(), &face.mouth()[RIGHT_MOUTH]);

    let total: f64 = left
        .iter()
        .zip(&right)
        .map(|(l, r)| {
            let d = (*l - *r).abs();
            d.x as f64 + d.y as f64
        })
        .sum();
    let mean = total / (2 * left.len()) as f64;
    mean / image_width.max(1) as f64
}

/// Vertical over horizontal offset between the eye centroids of the first face.
pub fn eye_alignment_score(faces: &[FaceLandmarks]) -> f64 {
    let Some(face) = faces.first() else {
        return NO_FACE_SCORE;
    };
    let left = Point::centroid(face.left_eye());
    let right = Point::centroid(face.right_eye());

    let horizontal = (left.x - right.x).abs() as f64;
    let vertical = (left.y - right.y).abs() as f64;
    vertical / horizontal.max(1.0)
}

/// Mean per-sample difference between each channel and its 15x15 Gaussian
/// blur, as a fraction of full scale.
pub fn texture_artifact_score(raster: &Raster) -> f64 {
    let total: f64 = raster
        .channel_planes()
        .iter()
        .map(|plane| {
            let blurred = gaussian_blur(plane, ARTIFACT_BLUR_SIZE).quantize_u8();
            plane.abs_diff(&blurred).sum()
        })
        .sum();
    total / (raster.pixel_count() as f64 * 255.0)
}

/// Run all three face-profile extractors over landmarks detected once for this raster.
pub fn extract_face(raster: &Raster, faces: &[FaceLandmarks]) -> FeatureScoreSet {
    if faces.is_empty() {
        tracing::warn!("no face detected; landmark scores fall back to {NO_FACE_SCORE}");
    }
    let symmetry = symmetry_score(faces, raster.width());
    let eyes = eye_alignment_score(faces);
    let texture = texture_artifact_score(raster);
    tracing::debug!(symmetry, eye_alignment = eyes, texture, "face feature scores");

    let mut set = FeatureScoreSet::new();
    set.insert(SYMMETRY, FeatureScore::non_negative(symmetry, NO_FACE_SCORE));
    set.insert(EYE_ALIGNMENT, FeatureScore::non_negative(eyes, NO_FACE_SCORE));
    set.insert(FACE_TEXTURE_ARTIFACTS, FeatureScore::non_negative(texture, 0.0));
    set
}
