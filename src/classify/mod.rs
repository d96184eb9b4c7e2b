//! Category signal sources and the ranker that merges them.
//!
//! Each classifier turns tweet text into zero or more [`CategoryResult`]
//! signals tagged with the [`SignalMethod`] that produced them:
//!
//! - [`keywords`] - curated keyword/phrase lists per category
//! - [`context`] - domain and hashtag indicators
//! - [`sentiment`] - optional model-backed zero-shot label
//! - [`ranker`] - weighted merge into at most five ranked categories

pub mod context;
pub mod keywords;
pub mod ranker;
pub mod sentiment;

pub use context::ContextClassifier;
pub use keywords::KeywordClassifier;
pub use ranker::rank;
pub use sentiment::{HttpModelBackend, ModelBackend, SentimentAdapter};

use crate::model::{CategoryResult, SignalMethod};
use async_trait::async_trait;

/// A classifier that produces category signals for one piece of text.
///
/// Implementations never fail: an unavailable or broken backend yields an
/// empty list.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn method(&self) -> SignalMethod;

    async fn signals(&self, text: &str) -> Vec<CategoryResult>;
}

/// Sort descending by confidence and flag the top entry when it clears `threshold`.
pub(crate) fn sort_and_flag(results: &mut [CategoryResult], threshold: f64) {
    results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if let Some(top) = results.first_mut() {
        top.is_primary = top.confidence > threshold;
    }
}
