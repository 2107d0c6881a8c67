//! Per-image pipeline: extract, aggregate, classify. Also directory batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::face::extract_face;
use crate::general::extract_general;
use crate::landmarks::LandmarkProvider;
use crate::loader::{list_images, load_raster};
use crate::raster::Raster;
use crate::score::{ClassificationResult, Profile, ProfileScorer};

pub struct Analyzer {
    config: DetectorConfig,
    general: ProfileScorer,
    face: ProfileScorer,
    landmarks: Option<Arc<dyn LandmarkProvider>>,
}

impl Analyzer {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            general: ProfileScorer::new(Profile::General, &config.general),
            face: ProfileScorer::new(Profile::Face, &config.face),
            config,
            landmarks: None,
        })
    }

    /// Attach the landmark provider the face profile needs.
    pub fn with_landmarks<P: LandmarkProvider + 'static>(mut self, provider: P) -> Self {
        self.landmarks = Some(Arc::new(provider));
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn has_landmarks(&self) -> bool {
        self.landmarks.is_some()
    }

    fn landmark_provider(&self) -> Result<&dyn LandmarkProvider> {
        self.landmarks
            .as_deref()
            .ok_or_else(|| Error::ModelAssetUnavailable {
                path: self.config.landmarks.landmark_model.clone(),
                reason: "no landmark provider configured".into(),
            })
    }

    pub fn analyze_raster(&self, raster: &Raster, profile: Profile) -> Result<ClassificationResult> {
        let result = match profile {
            Profile::General => self.general.score(extract_general(raster))?,
            Profile::Face => {
                let faces = self.landmark_provider()?.detect_faces(raster)?;
                self.face.score(extract_face(raster, &faces))?
            }
        };
        tracing::info!(
            ?profile,
            composite = result.composite,
            confidence = result.confidence,
            verdict = ?result.verdict,
            "classified image"
        );
        Ok(result)
    }

    pub fn analyze(&self, path: &Path, profile: Profile) -> Result<ClassificationResult> {
        let raster = load_raster(path)?;
        tracing::debug!(
            path = %path.display(),
            width = raster.width(),
            height = raster.height(),
            "decoded image"
        );
        self.analyze_raster(&raster, profile)
    }

    /// Analyze every image in `dir`. A failing image is recorded and skipped;
    /// only an unreadable directory or a missing face model fails the batch.
    pub fn analyze_dir(&self, dir: &Path, profile: Profile) -> Result<BatchReport> {
        if profile == Profile::Face {
            self.landmark_provider()?;
        }
        let paths = list_images(dir)?;
        tracing::info!(dir = %dir.display(), images = paths.len(), "starting batch");

        let entries = paths
            .into_iter()
            .map(|path| {
                let outcome = self.analyze(&path, profile);
                if let Err(e) = &outcome {
                    tracing::warn!(path = %path.display(), error = %e, "skipping image");
                }
                BatchEntry { path, outcome }
            })
            .collect();
        Ok(BatchReport { profile, entries })
    }
}

#[derive(Debug)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub outcome: Result<ClassificationResult>,
}

/// Outcomes of a directory run, in file-name order.
#[derive(Debug)]
pub struct BatchReport {
    pub profile: Profile,
    pub entries: Vec<BatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub ai_generated: usize,
    pub human_generated: usize,
    /// Mean confidence over analyzed images; 0 when none were analyzed.
    pub mean_confidence: f64,
}

impl BatchReport {
    pub fn successes(&self) -> impl Iterator<Item = (&Path, &ClassificationResult)> {
        self.entries
            .iter()
            .filter_map(|e| e.outcome.as_ref().ok().map(|r| (e.path.as_path(), r)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &Error)> {
        self.entries
            .iter()
            .filter_map(|e| e.outcome.as_ref().err().map(|err| (e.path.as_path(), err)))
    }

    pub fn summary(&self) -> BatchSummary {
        let results: Vec<_> = self.successes().map(|(_, r)| r).collect();
        let ai_generated = results.iter().filter(|r| r.verdict.is_ai()).count();
        let mean_confidence = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64
        };
        BatchSummary {
            total: self.entries.len(),
            analyzed: results.len(),
            failed: self.entries.len() - results.len(),
            ai_generated,
            human_generated: results.len() - ai_generated,
            mean_confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::StaticLandmarks;
    use crate::score::Verdict;

    fn flat() -> Raster {
        Raster::rgb_from_fn(64, 48, |_, _| [90, 90, 90]).unwrap()
    }

    #[test]
    fn general_profile_on_flat_image() {
        let analyzer = Analyzer::new(DetectorConfig::default()).unwrap();
        let result = analyzer.analyze_raster(&flat(), Profile::General).unwrap();

        assert_eq!(result.scores.len(), 4);
        assert_eq!(result.verdict, Verdict::AiGenerated);
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_eq!(result.label(), "AI-Generated");
    }

    #[test]
    fn face_profile_needs_a_provider() {
        let analyzer = Analyzer::new(DetectorConfig::default()).unwrap();
        let err = analyzer.analyze_raster(&flat(), Profile::Face).unwrap_err();
        assert!(matches!(err, Error::ModelAssetUnavailable { .. }));

        let dir = tempfile::tempdir().unwrap();
        assert!(analyzer.analyze_dir(dir.path(), Profile::Face).is_err());
    }

    #[test]
    fn face_profile_without_faces() {
        let analyzer = Analyzer::new(DetectorConfig::default())
            .unwrap()
            .with_landmarks(StaticLandmarks::none());
        let result = analyzer.analyze_raster(&flat(), Profile::Face).unwrap();

        assert_eq!(result.scores.value("symmetry"), Some(1.0));
        assert_eq!(result.scores.value("eye_alignment"), Some(1.0));
        assert!((result.composite - 0.4).abs() < 1e-12);
        assert_eq!(result.verdict, Verdict::AiGenerated);
        assert_eq!(result.confidence, 0.4);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = DetectorConfig::default();
        config.face.threshold = f64::NAN;
        assert!(matches!(Analyzer::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn summary_counts() {
        let analyzer = Analyzer::new(DetectorConfig::default()).unwrap();
        let ok = analyzer.analyze_raster(&flat(), Profile::General).unwrap();
        let report = BatchReport {
            profile: Profile::General,
            entries: vec![
                BatchEntry {
                    path: "a.png".into(),
                    outcome: Ok(ok.clone()),
                },
                BatchEntry {
                    path: "b.png".into(),
                    outcome: Err(Error::InvalidRaster("broken".into())),
                },
            ],
        };

        let summary = report.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.analyzed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ai_generated, 1);
        assert_eq!(summary.mean_confidence, ok.confidence);
        assert_eq!(report.failures().next().unwrap().0, Path::new("b.png"));
    }
}
