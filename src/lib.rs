//! # synthscan
//!
//! Heuristic detection of AI-generated images.
//!
//! Two profiles share one pipeline: independent feature extractors turn a
//! decoded [`Raster`] into named scores, a weighted sum combines them, and a
//! threshold turns the composite into a [`Verdict`] with a confidence.
//!
//! - **General**: texture, technical artifacts, fine detail and metadata.
//!   Scores lie in `[0, 1]`, higher is more human-like, and a composite
//!   below 0.5 is classified as AI-generated.
//! - **Face**: facial symmetry, eye alignment and blur-residual texture
//!   computed from 68 landmarks. Higher is more suspicious, and a composite
//!   above 0.05 is classified as AI-generated.
//!
//! Face landmarks come from a [`LandmarkProvider`]. The bundled
//! [`DlibLandmarkProvider`] pairs the SeetaFace detector (via `rustface`)
//! with a pure Rust ensemble-of-regression-trees predictor that reads dlib's
//! `shape_predictor_68_face_landmarks.dat`.
//!
//! ## Quick Start
//!
//! ```rust
//! use synthscan::{Analyzer, DetectorConfig, Profile, Raster};
//!
//! let analyzer = Analyzer::new(DetectorConfig::default()).unwrap();
//! let raster = Raster::rgb_from_fn(64, 64, |x, y| [(x * 4) as u8, (y * 4) as u8, 128]).unwrap();
//!
//! let result = analyzer.analyze_raster(&raster, Profile::General).unwrap();
//! println!("{} ({:.2})", result.label(), result.confidence);
//! for (name, score) in result.scores.iter() {
//!     println!("  {name}: {:.2}", score.value);
//! }
//! ```

pub mod analyzer;
pub mod assets;
pub mod config;
pub mod dlib;
mod error;
pub mod face;
pub mod filter;
pub mod general;
pub mod landmarks;
pub mod loader;
pub mod logging;
pub mod predictor;
pub mod raster;
pub mod score;
pub mod stats;
mod types;

pub use analyzer::{Analyzer, BatchEntry, BatchReport, BatchSummary};
pub use config::{ConfidenceRule, DetectorConfig, LandmarkConfig, LogConfig, Polarity, ProfileConfig};
pub use error::{Error, Result};
pub use landmarks::{
    DlibLandmarkProvider, FaceLandmarks, LandmarkProvider, StaticLandmarks, TimedLandmarkProvider,
};
pub use predictor::ShapePredictor;
pub use raster::{Channels, GrayImage, ImageAccess, Raster};
pub use score::{
    ClassificationResult, Classifier, FeatureScore, FeatureScoreSet, Profile, ScoreAggregator,
    ScoreRange, Verdict,
};
pub use types::{BoundingBox, Point, Shape};
