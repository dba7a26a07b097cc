use interfaces::defs::{ClassificationUpdate, ContentStatus, IntentType};

use crate::types::ClassifierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Requesting,
    Offering,
    Irrelevant,
}

impl Intent {
    /// Offers are never replied to, so they persist as irrelevant.
    pub fn persisted(&self) -> IntentType {
        match self {
            Intent::Requesting => IntentType::RequestingService,
            Intent::Offering | Intent::Irrelevant => IntentType::Irrelevant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub intent: IntentResult,
    pub relevance: f64,
    pub intent_score: f64,
    pub status: ContentStatus,
    pub draft_eligible: bool,
}

impl Classification {
    pub fn update(&self) -> ClassificationUpdate {
        ClassificationUpdate {
            intent_type: self.intent.intent.persisted(),
            intent_score: self.intent_score,
            status: self.status,
        }
    }
}

pub struct RelevanceClassifier {
    config: ClassifierConfig,
}

impl RelevanceClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let config = ClassifierConfig {
            requesting_phrases: lowercase_all(config.requesting_phrases),
            offering_phrases: lowercase_all(config.offering_phrases),
            high_signal_terms: lowercase_all(config.high_signal_terms),
            ..config
        };
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Any offering phrase vetoes. Otherwise requesting phrases and a question
    /// mark each count as one match.
    pub fn detect_intent(&self, title: &str, body: &str) -> IntentResult {
        let text = combined_text(title, body);

        if self.config.offering_phrases.iter().any(|p| text.contains(p.as_str())) {
            return IntentResult {
                intent: Intent::Offering,
                confidence: 1.0,
            };
        }

        let mut matches = self
            .config
            .requesting_phrases
            .iter()
            .filter(|p| text.contains(p.as_str()))
            .count();
        if text.contains('?') {
            matches += 1;
        }

        if matches > 0 {
            let saturation = self.config.saturation_matches.max(1.0);
            return IntentResult {
                intent: Intent::Requesting,
                confidence: (matches as f64 / saturation).min(1.0),
            };
        }

        IntentResult {
            intent: Intent::Irrelevant,
            confidence: self.config.fallback_confidence,
        }
    }

    /// Fraction of variants found in the lower-cased title and body.
    pub fn relevance_score(&self, variants: &[String], title: &str, body: &str) -> f64 {
        let variants: Vec<String> = variants
            .iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        if variants.is_empty() {
            return 0.0;
        }

        let text = combined_text(title, body);
        let found = variants.iter().filter(|v| text.contains(v.as_str())).count();
        (found as f64 / variants.len() as f64).min(1.0)
    }

    pub fn has_high_signal(&self, channel: &str, title: &str) -> bool {
        let channel = channel.to_lowercase();
        let title = title.to_lowercase();
        self.config
            .high_signal_terms
            .iter()
            .any(|t| channel.contains(t.as_str()) || title.contains(t.as_str()))
    }

    pub fn classify(&self, variants: &[String], channel: &str, title: &str, body: &str) -> Classification {
        let intent = self.detect_intent(title, body);
        let relevance = self.relevance_score(variants, title, body);
        let requesting = intent.intent == Intent::Requesting;

        Classification {
            intent,
            relevance,
            intent_score: intent.confidence * relevance,
            status: if requesting {
                ContentStatus::Verified
            } else {
                ContentStatus::Rejected
            },
            draft_eligible: requesting
                && (relevance > self.config.relevance_threshold || self.has_high_signal(channel, title)),
        }
    }
}

impl Default for RelevanceClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

fn combined_text(title: &str, body: &str) -> String {
    format!("{} {}", title, body).to_lowercase()
}

fn lowercase_all(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.to_lowercase()).collect()
}
