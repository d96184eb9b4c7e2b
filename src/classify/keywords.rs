//! Keyword classifier.
//!
//! Every category owns a list of lower-cased keywords and phrases. Matching
//! is plain substring containment over the lower-cased text, so `"ai"` also
//! hits inside `"email"`. Each distinct keyword counts once per text.

use super::{SignalSource, sort_and_flag};
use crate::model::{CategoryResult, SignalMethod};
use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{info, warn};

/// Above this confidence the top keyword result is flagged primary.
pub const PRIMARY_THRESHOLD: f64 = 0.6;

/// Floor for any category with at least one hit.
pub const MIN_CONFIDENCE: f64 = 0.3;

const TECHNOLOGY: &[&str] = &[
    "javascript", "python", "react", "node", "programming", "developer", "coding", "software",
    "ai", "machine learning", "artificial intelligence", "tech", "startup", "app", "web",
    "database", "api", "framework", "library", "github", "code", "development", "frontend",
    "backend", "fullstack", "devops", "cloud", "aws", "docker", "kubernetes",
];

const NEWS: &[&str] = &[
    "breaking", "news", "update", "report", "announces", "confirmed", "official", "press",
    "government", "politics", "economy", "market", "election", "policy", "crisis", "event",
    "happened", "breaking news", "urgent", "alert", "announced", "statement",
];

const EDUCATION: &[&str] = &[
    "learn", "learning", "education", "tutorial", "guide", "how to", "tips", "course",
    "training", "skill", "knowledge", "study", "research", "academic", "university",
    "school", "teaching", "lesson", "workshop", "certification", "degree",
];

const INSPIRATION: &[&str] = &[
    "motivation", "inspiration", "quote", "wisdom", "success", "mindset", "growth",
    "achievement", "goal", "dream", "believe", "inspire", "motivated", "positive",
    "life lesson", "advice", "encourage", "perseverance", "determination",
];

const ENTERTAINMENT: &[&str] = &[
    "movie", "film", "music", "game", "gaming", "entertainment", "fun", "funny",
    "meme", "video", "show", "series", "netflix", "spotify", "youtube", "streaming",
    "celebrity", "actor", "singer", "artist", "comedy",
];

const SPORTS: &[&str] = &[
    "football", "soccer", "basketball", "tennis", "sports", "game", "match", "player",
    "team", "score", "goal", "win", "championship", "league", "tournament", "athlete",
    "fitness", "workout", "training", "exercise", "gym",
];

const BUSINESS: &[&str] = &[
    "business", "entrepreneur", "startup", "company", "investment", "finance", "money",
    "market", "stock", "revenue", "profit", "strategy", "marketing", "sales", "customer",
    "product", "service", "brand", "growth", "innovation", "leadership", "management",
];

/// Built-in table in ranking tie-break order.
pub const DEFAULT_TABLE: &[(&str, &[&str])] = &[
    ("Technology", TECHNOLOGY),
    ("News", NEWS),
    ("Education", EDUCATION),
    ("Inspiration", INSPIRATION),
    ("Entertainment", ENTERTAINMENT),
    ("Sports", SPORTS),
    ("Business", BUSINESS),
];

struct KeywordTable {
    categories: Vec<(String, Vec<String>)>,
    /// Unique keywords; `owners[i]` lists the categories pattern `i` belongs to.
    matcher: Option<AhoCorasick>,
    owners: Vec<Vec<usize>>,
}

impl KeywordTable {
    fn build(categories: Vec<(String, Vec<String>)>) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut patterns: Vec<String> = Vec::new();
        let mut owners: Vec<Vec<usize>> = Vec::new();

        for (cat_idx, (_, keywords)) in categories.iter().enumerate() {
            for keyword in keywords.iter().filter(|k| !k.is_empty()) {
                let slot = *index.entry(keyword.as_str()).or_insert_with(|| {
                    patterns.push(keyword.clone());
                    owners.push(Vec::new());
                    patterns.len() - 1
                });
                owners[slot].push(cat_idx);
            }
        }

        let matcher = match AhoCorasick::new(&patterns) {
            Ok(ac) => Some(ac),
            Err(e) => {
                warn!(error = %e, "Failed to build keyword matcher");
                None
            }
        };

        Self {
            categories,
            matcher,
            owners,
        }
    }

    /// Per-category hit counts in table order.
    fn count_matches(&self, text: &str) -> Vec<usize> {
        let mut counts = vec![0; self.categories.len()];
        let Some(matcher) = &self.matcher else {
            return counts;
        };

        let mut seen = vec![false; self.owners.len()];
        for hit in matcher.find_overlapping_iter(text) {
            let pattern = hit.pattern().as_usize();
            if !seen[pattern] {
                seen[pattern] = true;
                for &cat_idx in &self.owners[pattern] {
                    counts[cat_idx] += 1;
                }
            }
        }
        counts
    }
}

/// Scores text against curated per-category keyword lists.
pub struct KeywordClassifier {
    table: RwLock<KeywordTable>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::with_table(DEFAULT_TABLE)
    }
}

impl KeywordClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(table: &[(&str, &[&str])]) -> Self {
        let categories = table
            .iter()
            .map(|(name, keywords)| {
                (
                    (*name).to_string(),
                    keywords.iter().map(|k| k.to_lowercase()).collect(),
                )
            })
            .collect();
        Self {
            table: RwLock::new(KeywordTable::build(categories)),
        }
    }

    /// Category names in table order.
    #[must_use]
    pub fn category_names(&self) -> Vec<String> {
        self.table
            .read()
            .categories
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Extend a category (creating it when unknown) with more keywords.
    pub fn add_keywords<S: AsRef<str>>(&self, category: &str, keywords: &[S]) {
        let mut table = self.table.write();
        let mut categories = std::mem::take(&mut table.categories);
        let added: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let count = added.len();

        if let Some((_, existing)) = categories.iter_mut().find(|(name, _)| name == category) {
            existing.extend(added);
        } else {
            categories.push((category.to_string(), added));
        }
        *table = KeywordTable::build(categories);
        info!(category, count, "Added custom keywords");
    }

    /// Score `text`. Empty or keyword-free text yields no results.
    #[must_use]
    pub fn classify(&self, text: &str) -> Vec<CategoryResult> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let lowered = text.to_lowercase();
        let table = self.table.read();
        let counts = table.count_matches(&lowered);
        let total: usize = counts.iter().sum();

        let mut results: Vec<CategoryResult> = table
            .categories
            .iter()
            .zip(&counts)
            .filter(|(_, matches)| **matches > 0)
            .map(|((name, keywords), &matches)| {
                #[allow(clippy::cast_precision_loss)]
                let ratio = matches as f64 / total.max(1) as f64;
                CategoryResult::signal(
                    name.clone(),
                    ratio.max(MIN_CONFIDENCE).min(1.0),
                    SignalMethod::Keywords,
                )
                .with_detail("matches", matches)
                .with_detail("total_keywords", keywords.len())
            })
            .collect();

        sort_and_flag(&mut results, PRIMARY_THRESHOLD);
        results
    }
}

#[async_trait]
impl SignalSource for KeywordClassifier {
    fn method(&self) -> SignalMethod {
        SignalMethod::Keywords
    }

    async fn signals(&self, text: &str) -> Vec<CategoryResult> {
        self.classify(text)
    }
}
