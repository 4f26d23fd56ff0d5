use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Size class of a document, measured in tokens. Drives sampling counts here
/// and strategy selection in the enrichment stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
    VeryLarge,
}

impl SizeCategory {
    pub fn from_token_count(tokens: usize) -> Self {
        if tokens < 3_000 {
            Self::Small
        } else if tokens < 20_000 {
            Self::Medium
        } else if tokens < 60_000 {
            Self::Large
        } else {
            Self::VeryLarge
        }
    }

    fn sample_points(self) -> usize {
        match self {
            Self::Small => 0,
            Self::Medium => 3,
            Self::Large | Self::VeryLarge => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Direct,
    Sampling,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageReport {
    pub primary: String,
    pub confidence: f32,
    pub is_multilingual: bool,
    pub all_languages: Vec<String>,
    pub distribution: HashMap<String, f32>,
    pub detection_method: DetectionMethod,
}

impl LanguageReport {
    fn failed() -> Self {
        Self {
            primary: "unknown".to_string(),
            confidence: 0.0,
            is_multilingual: false,
            all_languages: vec!["unknown".to_string()],
            distribution: HashMap::from([("unknown".to_string(), 1.0)]),
            detection_method: DetectionMethod::Failed,
        }
    }
}

/// Sample width in characters for the sampling strategy.
const SAMPLE_CHARS: usize = 1000;

/// Detects the document language. Small documents are analyzed whole; larger
/// ones through evenly spaced samples whose per-sample results are
/// aggregated by count.
pub fn detect(text: &str, size: SizeCategory) -> LanguageReport {
    if text.trim().is_empty() {
        return LanguageReport::failed();
    }

    let report = match size {
        SizeCategory::Small => detect_direct(text),
        _ => detect_sampling(text, size.sample_points()),
    };

    info!(
        primary = %report.primary,
        confidence = report.confidence,
        multilingual = report.is_multilingual,
        method = ?report.detection_method,
        "language detected"
    );

    report
}

fn detect_direct(text: &str) -> LanguageReport {
    let cleaned = strip_neutral_tokens(text);
    let Some(info) = whatlang::detect(&cleaned) else {
        return LanguageReport::failed();
    };

    let primary = info.lang().code().to_string();
    #[allow(clippy::cast_possible_truncation)]
    let confidence = info.confidence() as f32;
    // The residual probability mass is what any second language could hold.
    let is_multilingual = (1.0 - confidence) > 0.20;

    LanguageReport {
        distribution: HashMap::from([(primary.clone(), round3(confidence))]),
        all_languages: vec![primary.clone()],
        primary,
        confidence: round3(confidence),
        is_multilingual,
        detection_method: DetectionMethod::Direct,
    }
}

fn detect_sampling(text: &str, sample_points: usize) -> LanguageReport {
    let chars: Vec<char> = text.chars().collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut detected_samples = 0usize;

    for position in sample_positions(chars.len(), sample_points) {
        let start = position.saturating_sub(SAMPLE_CHARS / 2);
        let end = (position + SAMPLE_CHARS / 2).min(chars.len());
        let sample: String = chars[start..end].iter().collect();
        let cleaned = strip_neutral_tokens(&sample);
        if cleaned.trim().is_empty() {
            continue;
        }

        if let Some(info) = whatlang::detect(&cleaned) {
            *counts.entry(info.lang().code().to_string()).or_insert(0) += 1;
            detected_samples += 1;
        }
    }

    if detected_samples == 0 {
        return LanguageReport::failed();
    }

    #[allow(clippy::cast_precision_loss)]
    let distribution: HashMap<String, f32> = counts
        .iter()
        .map(|(lang, count)| (lang.clone(), round3(*count as f32 / detected_samples as f32)))
        .collect();

    let (primary, _) = counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(lang, count)| (lang.clone(), *count))
        .unwrap_or_else(|| ("unknown".to_string(), 0));

    let confidence = distribution.get(&primary).copied().unwrap_or(0.0);
    let all_languages: Vec<String> = distribution.keys().cloned().collect();
    let is_multilingual = all_languages.len() >= 2;

    debug!(
        samples = detected_samples,
        languages = all_languages.len(),
        "sampling language detection aggregated"
    );

    LanguageReport {
        primary,
        confidence,
        is_multilingual,
        all_languages,
        distribution,
        detection_method: DetectionMethod::Sampling,
    }
}

/// Evenly spaced sample midpoints: `len / (n + 1) * i` for i in 1..=n.
fn sample_positions(text_len: usize, samples: usize) -> Vec<usize> {
    if samples <= 1 {
        return vec![text_len / 2];
    }
    let step = text_len / (samples + 1);
    (1..=samples).map(|i| step * i).collect()
}

/// Drops purely numeric or punctuation tokens; they carry no language
/// signal and skew short samples.
fn strip_neutral_tokens(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| word.chars().filter(|c| c.is_alphabetic()).count() >= 2)
        .collect::<Vec<_>>()
        .join(" ")
}

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}
