//! Feature scores, weighted aggregation and thresholding.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::{ConfidenceRule, Polarity, ProfileConfig};
use crate::error::{Error, Result};
use crate::stats::clamp_unit;

/// A named set of extractors plus the weights and threshold applied to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Texture, technical artifacts, fine detail and metadata.
    General,
    /// Facial symmetry, eye alignment and blur-residual texture.
    Face,
}

/// Declared valid range of a feature score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreRange {
    Unit,
    /// Unbounded above; clipped to `[0, 1]` when aggregated.
    NonNegative,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureScore {
    pub value: f64,
    pub range: ScoreRange,
}

impl FeatureScore {
    /// A `[0, 1]` score; NaN becomes `fallback`.
    pub fn unit(value: f64, fallback: f64) -> Self {
        Self {
            value: clamp_unit(value, fallback),
            range: ScoreRange::Unit,
        }
    }

    /// A non-negative score; NaN becomes `fallback`.
    pub fn non_negative(value: f64, fallback: f64) -> Self {
        let value = if value.is_nan() { fallback } else { value.max(0.0) };
        Self {
            value,
            range: ScoreRange::NonNegative,
        }
    }

    /// The value as it enters the weighted sum.
    pub fn clipped(&self) -> f64 {
        match self.range {
            ScoreRange::Unit => self.value,
            ScoreRange::NonNegative => self.value.min(1.0),
        }
    }
}

/// Feature name to score, in insertion order for reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureScoreSet {
    entries: Vec<(String, FeatureScore)>,
}

impl FeatureScoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a score, replacing any earlier score of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, score: FeatureScore) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((name, score)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureScore> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(|s| s.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureScore)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for FeatureScoreSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, score) in &self.entries {
            map.serialize_entry(name, &score.value)?;
        }
        map.end()
    }
}

/// Linear combination of named scores with a fixed weight table.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    weights: BTreeMap<String, f64>,
}

impl ScoreAggregator {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }

    /// Weighted sum over the weight table. Every weighted feature must be present.
    pub fn aggregate(&self, scores: &FeatureScoreSet) -> Result<f64> {
        self.weights.iter().try_fold(0.0, |acc, (name, weight)| {
            let score = scores
                .get(name)
                .ok_or_else(|| Error::InvalidConfig(format!("no score for weighted feature '{name}'")))?;
            Ok(acc + weight * score.clipped())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    AiGenerated,
    HumanGenerated,
}

impl Verdict {
    pub fn is_ai(self) -> bool {
        self == Verdict::AiGenerated
    }

    /// Human-readable label in the wording of each profile.
    pub fn label(self, profile: Profile) -> &'static str {
        match (profile, self) {
            (Profile::General, Verdict::AiGenerated) => "AI-Generated",
            (Profile::General, Verdict::HumanGenerated) => "Human-Generated",
            (Profile::Face, Verdict::AiGenerated) => "AI-generated face detected!",
            (Profile::Face, Verdict::HumanGenerated) => "This appears to be a real human face.",
        }
    }
}

/// Thresholds a composite score into a verdict and a confidence.
#[derive(Debug, Clone)]
pub struct Classifier {
    threshold: f64,
    polarity: Polarity,
    confidence: ConfidenceRule,
}

impl Classifier {
    pub fn new(threshold: f64, polarity: Polarity, confidence: ConfidenceRule) -> Self {
        Self {
            threshold,
            polarity,
            confidence,
        }
    }

    pub fn classify(&self, composite: f64) -> (Verdict, f64) {
        let is_ai = match self.polarity {
            Polarity::LowerIsAi => composite < self.threshold,
            Polarity::HigherIsAi => composite > self.threshold,
        };
        let confidence = match self.confidence {
            ConfidenceRule::DistanceFromThreshold => (self.threshold - composite).abs() * 2.0,
            ConfidenceRule::Likelihood => composite,
        };
        let verdict = if is_ai {
            Verdict::AiGenerated
        } else {
            Verdict::HumanGenerated
        };
        (verdict, clamp_unit(confidence, 0.0))
    }
}

/// Outcome of analyzing one image with one profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub profile: Profile,
    pub composite: f64,
    pub verdict: Verdict,
    pub confidence: f64,
    pub scores: FeatureScoreSet,
    /// Features whose score exceeded their advisory level.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<String>,
}

impl ClassificationResult {
    pub fn label(&self) -> &'static str {
        self.verdict.label(self.profile)
    }
}

/// Aggregator, classifier and advisory levels for one profile.
#[derive(Debug, Clone)]
pub struct ProfileScorer {
    profile: Profile,
    aggregator: ScoreAggregator,
    classifier: Classifier,
    advisories: BTreeMap<String, f64>,
}

impl ProfileScorer {
    pub fn new(profile: Profile, config: &ProfileConfig) -> Self {
        Self {
            profile,
            aggregator: ScoreAggregator::new(config.weights.clone()),
            classifier: Classifier::new(config.threshold, config.polarity, config.confidence),
            advisories: config.advisories.clone(),
        }
    }

    pub fn score(&self, scores: FeatureScoreSet) -> Result<ClassificationResult> {
        let composite = self.aggregator.aggregate(&scores)?;
        let (verdict, confidence) = self.classifier.classify(composite);

        let advisories = self
            .advisories
            .iter()
            .filter(|(name, level)| scores.value(name).is_some_and(|v| v > **level))
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        for name in &advisories {
            tracing::info!(feature = %name, "score exceeds the human reference level");
        }

        Ok(ClassificationResult {
            profile: self.profile,
            composite,
            verdict,
            confidence,
            scores,
            advisories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn general_scorer() -> ProfileScorer {
        ProfileScorer::new(Profile::General, &ProfileConfig::general())
    }

    fn general_scores(texture: f64, artifacts: f64, detail: f64, metadata: f64) -> FeatureScoreSet {
        let mut set = FeatureScoreSet::new();
        set.insert("texture_analysis", FeatureScore::unit(texture, 0.5));
        set.insert("technical_artifacts", FeatureScore::unit(artifacts, 0.5));
        set.insert("fine_details", FeatureScore::unit(detail, 0.5));
        set.insert("metadata", FeatureScore::unit(metadata, 0.5));
        set
    }

    #[test]
    fn general_weighting() {
        let result = general_scorer().score(general_scores(1.0, 0.0, 0.5, 0.3)).unwrap();
        let expected = 0.35 + 0.2 * 0.5 + 0.1 * 0.3;
        assert!((result.composite - expected).abs() < 1e-12);
        assert_eq!(result.verdict, Verdict::AiGenerated);
        assert!((result.confidence - (0.5 - expected) * 2.0).abs() < 1e-12);
    }

    #[test]
    fn exact_threshold_is_human_with_zero_confidence() {
        let classifier = Classifier::new(0.5, Polarity::LowerIsAi, ConfidenceRule::DistanceFromThreshold);
        let (verdict, confidence) = classifier.classify(0.5);
        assert_eq!(verdict, Verdict::HumanGenerated);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn confidence_stays_in_unit_range() {
        let classifier = Classifier::new(0.5, Polarity::LowerIsAi, ConfidenceRule::DistanceFromThreshold);
        for i in 0..=100 {
            let (_, c) = classifier.classify(i as f64 / 100.0);
            assert!((0.0..=1.0).contains(&c));
        }
        assert_eq!(classifier.classify(0.0), (Verdict::AiGenerated, 1.0));
        assert_eq!(classifier.classify(1.0), (Verdict::HumanGenerated, 1.0));
    }

    #[test]
    fn face_polarity_is_strictly_greater() {
        let classifier = Classifier::new(0.05, Polarity::HigherIsAi, ConfidenceRule::Likelihood);
        assert_eq!(classifier.classify(0.05).0, Verdict::HumanGenerated);
        assert_eq!(classifier.classify(0.0501).0, Verdict::AiGenerated);
        assert_eq!(classifier.classify(2.5).1, 1.0);
    }

    #[test]
    fn non_negative_scores_are_clipped_when_aggregated() {
        let scorer = ProfileScorer::new(Profile::Face, &ProfileConfig::face());
        let mut set = FeatureScoreSet::new();
        set.insert("symmetry", FeatureScore::non_negative(1.0, 1.0));
        set.insert("eye_alignment", FeatureScore::non_negative(7.0, 1.0));
        set.insert("texture_artifacts", FeatureScore::non_negative(0.02, 0.0));

        let result = scorer.score(set).unwrap();
        assert!((result.composite - (0.2 + 0.2 + 0.6 * 0.02)).abs() < 1e-12);
        assert_eq!(result.scores.value("eye_alignment"), Some(7.0));
        assert_eq!(result.verdict, Verdict::AiGenerated);
        assert_eq!(result.advisories, vec!["eye_alignment".to_string(), "symmetry".to_string()]);
        assert_eq!(result.label(), "AI-generated face detected!");
    }

    #[test]
    fn missing_weighted_feature_is_an_error() {
        let mut set = general_scores(0.5, 0.5, 0.5, 0.5);
        set = FeatureScoreSet {
            entries: set.entries.into_iter().filter(|(n, _)| n != "metadata").collect(),
        };
        assert!(general_scorer().score(set).is_err());
    }

    #[test]
    fn score_set_keeps_insertion_order_and_replaces() {
        let mut set = FeatureScoreSet::new();
        set.insert("b", FeatureScore::unit(0.1, 0.5));
        set.insert("a", FeatureScore::unit(0.2, 0.5));
        set.insert("b", FeatureScore::unit(f64::NAN, 0.5));

        let names: Vec<_> = set.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(set.value("b"), Some(0.5));

        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"b":0.5,"a":0.2}"#);
    }
}
