//! Context classifier: link domains and hashtags that hint at a topic.

use super::{SignalSource, sort_and_flag};
use crate::model::{CategoryResult, SignalMethod};
use async_trait::async_trait;

pub const PRIMARY_THRESHOLD: f64 = 0.5;
const BASE_CONFIDENCE: f64 = 0.3;
const POINT_WEIGHT: f64 = 0.2;
const MAX_CONFIDENCE: f64 = 0.9;

const INDICATORS: &[(&str, &[&str])] = &[
    (
        "Technology",
        &[
            "github.com", "stackoverflow.com", "dev.to", "medium.com/@tech",
            "#programming", "#coding", "#javascript", "#python", "#react",
        ],
    ),
    (
        "News",
        &["cnn.com", "bbc.com", "reuters.com", "nytimes.com", "#breaking", "#news", "#update"],
    ),
    (
        "Education",
        &[
            "coursera.org", "udemy.com", "khan", "education",
            "#learning", "#tutorial", "#education",
        ],
    ),
    (
        "Business",
        &["linkedin.com", "forbes.com", "bloomberg.com", "#business", "#startup", "#entrepreneur"],
    ),
];

/// Hashtag indicators weigh twice as much as domains and words.
fn indicator_points(indicator: &str) -> u32 {
    if indicator.starts_with('#') { 2 } else { 1 }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContextClassifier;

impl ContextClassifier {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn classify(&self, text: &str) -> Vec<CategoryResult> {
        let lowered = text.to_lowercase();
        let mut results: Vec<CategoryResult> = INDICATORS
            .iter()
            .filter_map(|(category, indicators)| {
                let score: u32 = indicators
                    .iter()
                    .filter(|indicator| lowered.contains(*indicator))
                    .map(|indicator| indicator_points(indicator))
                    .sum();
                (score > 0).then(|| {
                    let confidence =
                        POINT_WEIGHT.mul_add(f64::from(score), BASE_CONFIDENCE).min(MAX_CONFIDENCE);
                    CategoryResult::signal(*category, confidence, SignalMethod::Context)
                        .with_detail("context_matches", score)
                })
            })
            .collect();

        sort_and_flag(&mut results, PRIMARY_THRESHOLD);
        results
    }
}

#[async_trait]
impl SignalSource for ContextClassifier {
    fn method(&self) -> SignalMethod {
        SignalMethod::Context
    }

    async fn signals(&self, text: &str) -> Vec<CategoryResult> {
        self.classify(text)
    }
}
