//! Ensemble-of-regression-trees shape predictor (Kazemi & Sullivan, 2014).
//!
//! Shapes stay in the unit square of the face rectangle throughout the
//! cascade and are mapped into image pixels only at the end. Each stage
//! samples a fixed set of pixels, each one anchored on a landmark of the
//! current estimate and offset by a delta that follows the estimate's
//! rotation and scale relative to the mean shape.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::ImageAccess;
use crate::types::{BoundingBox, Point, Shape};

/// Pixel-difference test at an internal tree node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split {
    /// Index into the stage's sampled pixels.
    pub idx1: u32,
    pub idx2: u32,
    pub threshold: f32,
}

/// A complete binary tree stored breadth-first: node `i` has children
/// `2i + 1` (taken when the test passes) and `2i + 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    splits: Vec<Split>,
    leaves: Vec<Shape>,
}

impl RegressionTree {
    pub fn new(splits: Vec<Split>, leaves: Vec<Shape>) -> Result<Self> {
        if leaves.len() != splits.len() + 1 {
            return Err(Error::InvalidModel(format!(
                "tree with {} splits needs {} leaves, got {}",
                splits.len(),
                splits.len() + 1,
                leaves.len()
            )));
        }
        Ok(Self { splits, leaves })
    }

    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    pub fn leaves(&self) -> &[Shape] {
        &self.leaves
    }

    /// Walk from the root using the sampled pixel values and return the leaf delta.
    pub fn predict(&self, pixels: &[f32]) -> &Shape {
        let mut i = 0;
        while i < self.splits.len() {
            let split = &self.splits[i];
            let diff = pixels[split.idx1 as usize] - pixels[split.idx2 as usize];
            i = if diff > split.threshold { 2 * i + 1 } else { 2 * i + 2 };
        }
        &self.leaves[i - self.splits.len()]
    }
}

/// One refinement step: a forest plus the pixels its trees test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeStage {
    pub forest: Vec<RegressionTree>,
    /// Landmark each sampled pixel is attached to.
    pub anchors: Vec<u32>,
    /// Offset of each sampled pixel from its anchor, in mean-shape coordinates.
    pub deltas: Vec<Point>,
}

impl CascadeStage {
    fn validate(&self, stage: usize, num_landmarks: usize) -> Result<()> {
        if self.anchors.len() != self.deltas.len() {
            return Err(Error::InvalidModel(format!(
                "stage {stage}: {} anchors but {} deltas",
                self.anchors.len(),
                self.deltas.len()
            )));
        }
        if let Some(a) = self.anchors.iter().find(|&&a| a as usize >= num_landmarks) {
            return Err(Error::InvalidModel(format!(
                "stage {stage}: anchor {a} out of range for {num_landmarks} landmarks"
            )));
        }
        let num_pixels = self.deltas.len();
        for tree in &self.forest {
            if let Some(split) = tree
                .splits
                .iter()
                .find(|s| s.idx1 as usize >= num_pixels || s.idx2 as usize >= num_pixels)
            {
                return Err(Error::InvalidModel(format!(
                    "stage {stage}: split references pixel {} of {num_pixels}",
                    split.idx1.max(split.idx2)
                )));
            }
            if tree.leaves.iter().any(|l| l.num_landmarks() != num_landmarks) {
                return Err(Error::InvalidModel(format!(
                    "stage {stage}: leaf size differs from {num_landmarks} landmarks"
                )));
            }
        }
        Ok(())
    }

    fn sample_pixels<I: ImageAccess>(
        &self,
        image: &I,
        rect: &BoundingBox,
        current: &Shape,
        tform: &SimilarityTransform2D,
        out: &mut Vec<f32>,
    ) {
        out.clear();
        out.extend(self.anchors.iter().zip(&self.deltas).map(|(&anchor, &delta)| {
            let p = rect.denormalize_point(tform.apply(delta) + current[anchor as usize]);
            image.get_pixel(round_half_up(p.x), round_half_up(p.y)) as f32
        }));
    }
}

fn round_half_up(v: f32) -> i32 {
    (v + 0.5).floor() as i32
}

/// Rotation and uniform scale, `[[a, -b], [b, a]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform2D {
    pub a: f32,
    pub b: f32,
}

impl SimilarityTransform2D {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0 };

    pub fn apply(&self, p: Point) -> Point {
        Point::new(self.a * p.x - self.b * p.y, self.b * p.x + self.a * p.y)
    }
}

/// Least-squares rotation and scale taking `from` onto `to` once both are centred.
pub fn find_similarity_transform(from: &Shape, to: &Shape) -> SimilarityTransform2D {
    let from_mean = Point::centroid(&from.points);
    let to_mean = Point::centroid(&to.points);

    let (mut num_a, mut num_b, mut denom) = (0.0f32, 0.0f32, 0.0f32);
    for (f, t) in from.points.iter().zip(to.points.iter()) {
        let f = *f - from_mean;
        let t = *t - to_mean;
        num_a += f.dot(t);
        num_b += f.x * t.y - f.y * t.x;
        denom += f.dot(f);
    }

    if denom <= f32::EPSILON {
        return SimilarityTransform2D::IDENTITY;
    }
    SimilarityTransform2D {
        a: num_a / denom,
        b: num_b / denom,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapePredictor {
    /// Initial estimate in unit-square coordinates.
    mean_shape: Shape,
    cascade: Vec<CascadeStage>,
}

impl ShapePredictor {
    pub fn new(mean_shape: Shape, cascade: Vec<CascadeStage>) -> Result<Self> {
        let predictor = Self { mean_shape, cascade };
        predictor.validate()?;
        Ok(predictor)
    }

    fn validate(&self) -> Result<()> {
        let n = self.mean_shape.num_landmarks();
        if n == 0 {
            return Err(Error::InvalidModel("mean shape has no landmarks".into()));
        }
        for (i, stage) in self.cascade.iter().enumerate() {
            stage.validate(i, n)?;
        }
        Ok(())
    }

    /// Load a predictor previously written with [`ShapePredictor::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let predictor: Self = bincode::deserialize(&bytes)?;
        predictor.validate()?;
        Ok(predictor)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&bincode::serialize(self)?)?;
        writer.flush()?;
        Ok(())
    }

    pub fn num_landmarks(&self) -> usize {
        self.mean_shape.num_landmarks()
    }

    pub fn num_cascade_stages(&self) -> usize {
        self.cascade.len()
    }

    pub fn mean_shape(&self) -> &Shape {
        &self.mean_shape
    }

    /// Landmarks for the face in `rect`, in image pixel coordinates.
    pub fn predict<I: ImageAccess>(&self, image: &I, rect: &BoundingBox) -> Shape {
        let mut current = self.mean_shape.clone();
        let mut pixels = Vec::new();

        for stage in &self.cascade {
            let tform = find_similarity_transform(&self.mean_shape, &current);
            stage.sample_pixels(image, rect, &current, &tform, &mut pixels);
            for tree in &stage.forest {
                current.add_delta(tree.predict(&pixels));
            }
        }

        current.denormalized(rect)
    }
}

/// iBUG 68-point layout in unit-square coordinates.
#[cfg(test)]
#[rustfmt::skip]
const MEAN_68: [(f32, f32); 68] = [
    // jaw
    (0.10, 0.35), (0.11, 0.45), (0.12, 0.55), (0.14, 0.65), (0.18, 0.73), (0.24, 0.80),
    (0.32, 0.85), (0.41, 0.88), (0.50, 0.89), (0.59, 0.88), (0.68, 0.85), (0.76, 0.80),
    (0.82, 0.73), (0.86, 0.65), (0.88, 0.55), (0.89, 0.45), (0.90, 0.35),
    // brows
    (0.20, 0.26), (0.25, 0.22), (0.32, 0.21), (0.38, 0.23), (0.43, 0.27),
    (0.57, 0.27), (0.62, 0.23), (0.68, 0.21), (0.75, 0.22), (0.80, 0.26),
    // nose
    (0.50, 0.32), (0.50, 0.40), (0.50, 0.48), (0.50, 0.55),
    (0.40, 0.58), (0.45, 0.60), (0.50, 0.62), (0.55, 0.60), (0.60, 0.58),
    // eyes
    (0.24, 0.32), (0.28, 0.29), (0.34, 0.29), (0.38, 0.33), (0.34, 0.35), (0.28, 0.35),
    (0.62, 0.33), (0.66, 0.29), (0.72, 0.29), (0.76, 0.32), (0.72, 0.35), (0.66, 0.35),
    // outer lip
    (0.32, 0.72), (0.38, 0.68), (0.44, 0.66), (0.50, 0.67), (0.56, 0.66), (0.62, 0.68),
    (0.68, 0.72), (0.62, 0.78), (0.56, 0.80), (0.50, 0.81), (0.44, 0.80), (0.38, 0.78),
    // inner lip
    (0.36, 0.72), (0.44, 0.70), (0.50, 0.70), (0.56, 0.70),
    (0.64, 0.72), (0.56, 0.74), (0.50, 0.75), (0.44, 0.74),
];

/// Approximate mean face for the 68-point scheme.
#[cfg(test)]
pub(crate) fn default_68_point_mean_shape() -> Shape {
    Shape::new(MEAN_68.iter().map(|&(x, y)| Point::new(x, y)).collect())
}
