//! Detector configuration. Built once, validated, then handed to the analyzer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::face::{EYE_ALIGNMENT, FACE_TEXTURE_ARTIFACTS, SYMMETRY};
use crate::general::{FINE_DETAILS, METADATA, TECHNICAL_ARTIFACTS, TEXTURE_ANALYSIS};
use crate::score::Profile;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Which side of the threshold counts as AI-generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// `composite < threshold` means AI-generated.
    LowerIsAi,
    /// `composite > threshold` means AI-generated.
    HigherIsAi,
}

/// How the reported confidence is derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceRule {
    /// `|threshold - composite| * 2`, clamped to `[0, 1]`.
    DistanceFromThreshold,
    /// The composite itself, clamped to `[0, 1]`.
    Likelihood,
}

/// Weights, threshold and decision direction of one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Feature name to non-negative weight; must sum to 1.0.
    pub weights: BTreeMap<String, f64>,
    pub threshold: f64,
    pub polarity: Polarity,
    pub confidence: ConfidenceRule,
    /// Per-feature levels above which a note is reported. Never changes the verdict.
    #[serde(default)]
    pub advisories: BTreeMap<String, f64>,
}

fn table(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

impl ProfileConfig {
    pub fn general() -> Self {
        Self {
            weights: table(&[
                (TEXTURE_ANALYSIS, 0.35),
                (TECHNICAL_ARTIFACTS, 0.35),
                (FINE_DETAILS, 0.2),
                (METADATA, 0.1),
            ]),
            threshold: 0.5,
            polarity: Polarity::LowerIsAi,
            confidence: ConfidenceRule::DistanceFromThreshold,
            advisories: BTreeMap::new(),
        }
    }

    pub fn face() -> Self {
        Self {
            weights: table(&[
                (SYMMETRY, 0.2),
                (EYE_ALIGNMENT, 0.2),
                (FACE_TEXTURE_ARTIFACTS, 0.6),
            ]),
            threshold: 0.05,
            polarity: Polarity::HigherIsAi,
            confidence: ConfidenceRule::Likelihood,
            advisories: table(&[
                (SYMMETRY, 0.1),
                (EYE_ALIGNMENT, 0.2),
                (FACE_TEXTURE_ARTIFACTS, 0.1),
            ]),
        }
    }

    fn validate(&self, name: &str, known: &[&str]) -> Result<()> {
        if self.weights.is_empty() {
            return Err(Error::InvalidConfig(format!("{name}: weight table is empty")));
        }
        for (feature, weight) in &self.weights {
            if !known.contains(&feature.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "{name}: unknown feature '{feature}'"
                )));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name}: weight for '{feature}' must be non-negative, got {weight}"
                )));
            }
        }
        let total: f64 = self.weights.values().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::InvalidConfig(format!(
                "{name}: weights sum to {total}, expected 1.0"
            )));
        }
        if !self.threshold.is_finite() {
            return Err(Error::InvalidConfig(format!("{name}: threshold is not finite")));
        }
        Ok(())
    }
}

/// Where the face-profile model assets live and how inference is bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkConfig {
    /// SeetaFace frontal face detector model.
    pub detector_model: PathBuf,
    /// dlib 68-point shape predictor (`.dat` or `.dat.bz2`).
    pub landmark_model: PathBuf,
    /// Fetched (bzip2-compressed) when the landmark model is absent locally.
    pub download_url: Option<String>,
    pub min_face_size: u32,
    pub timeout_secs: u64,
}

impl LandmarkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            detector_model: PathBuf::from("seeta_fd_frontal_v1.0.bin"),
            landmark_model: PathBuf::from("shape_predictor_68_face_landmarks.dat"),
            download_url: Some(
                "http://dlib.net/files/shape_predictor_68_face_landmarks.dat.bz2".to_string(),
            ),
            min_face_size: 20,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub general: ProfileConfig,
    pub face: ProfileConfig,
    pub landmarks: LandmarkConfig,
    pub log: LogConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            general: ProfileConfig::general(),
            face: ProfileConfig::face(),
            landmarks: LandmarkConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Load from a JSON file. A missing file yields the defaults; a file that
    /// exists but does not parse or validate is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!(path = %path.display(), "loaded detector config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.general.validate(
            "general",
            &[TEXTURE_ANALYSIS, TECHNICAL_ARTIFACTS, FINE_DETAILS, METADATA],
        )?;
        self.face
            .validate("face", &[SYMMETRY, EYE_ALIGNMENT, FACE_TEXTURE_ARTIFACTS])?;
        Ok(())
    }

    pub fn profile(&self, profile: Profile) -> &ProfileConfig {
        match profile {
            Profile::General => &self.general,
            Profile::Face => &self.face,
        }
    }
}
