//! Weighted merge of classifier signals.
//!
//! Signals are grouped by category name in encounter order. The first signal
//! of a group seeds the combined score with `confidence * weight`; every later
//! one halves the distance: `combined = (combined + confidence * weight) / 2`.
//! The result depends on input order, which callers keep fixed as
//! keywords, context, ai.

use crate::model::CategoryResult;
use std::collections::HashMap;

/// Most categories kept per tweet.
pub const MAX_CATEGORIES: usize = 5;

/// The top entry is primary only above this combined confidence.
pub const PRIMARY_THRESHOLD: f64 = 0.4;

fn signal_weight(signal: &CategoryResult) -> f64 {
    signal.methods.first().map_or(1.0, |m| m.weight())
}

/// Merge raw signals into a ranked, capped list. Empty in, empty out.
#[must_use]
pub fn rank(signals: &[CategoryResult]) -> Vec<CategoryResult> {
    let mut merged: Vec<CategoryResult> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();

    for signal in signals {
        let weighted = signal.confidence * signal_weight(signal);
        if let Some(&slot) = slots.get(signal.category.as_str()) {
            let entry = &mut merged[slot];
            entry.confidence = (entry.confidence + weighted) / 2.0;
            for method in &signal.methods {
                if !entry.methods.contains(method) {
                    entry.methods.push(*method);
                }
            }
            entry
                .details
                .extend(signal.details.iter().map(|(k, v)| (k.clone(), v.clone())));
        } else {
            slots.insert(signal.category.as_str(), merged.len());
            merged.push(CategoryResult {
                category: signal.category.clone(),
                confidence: weighted,
                is_primary: false,
                methods: signal.methods.clone(),
                details: signal.details.clone(),
            });
        }
    }

    for entry in &mut merged {
        entry.confidence = entry.confidence.clamp(0.0, 1.0);
    }
    merged.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    merged.truncate(MAX_CATEGORIES);
    if let Some(top) = merged.first_mut() {
        top.is_primary = top.confidence > PRIMARY_THRESHOLD;
    }
    merged
}
