/// Suggestion engine
///
/// Proposes what to run next from what was just run. Two sources feed it:
/// past fixes for the exact command that just failed, and mined sequence
/// patterns that start with the latest semantic types of the session.

use crate::core::{SemanticType, REDACTED};
use crate::db::{Command, Database};
use crate::error::Result;
use crate::intelligence::pattern_miner::{Pattern, PatternKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// Past fixes rank above habits
const PAST_FIX_WEIGHT: f64 = 0.95;
const SEQUENCE_3_WEIGHT: f64 = 0.8;
const SEQUENCE_2_WEIGHT: f64 = 0.6;

// Solved windows consulted for one failing command
const SOLUTION_LOOKBACK: i64 = 200;

// Stored sequence patterns consulted per kind
const PATTERN_LOOKBACK: usize = 500;

/// Where a suggestion came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    PastFix,
    Sequence,
}

/// Suggestion with reasoning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub command: String,
    pub reason: String,
    /// In (0, 1], higher is better
    pub confidence: f64,
    pub source: SuggestionSource,
}

/// Suggestion engine
pub struct SuggestionEngine {
    db: Arc<Database>,
}

impl SuggestionEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Suggest follow-ups to the latest command
    ///
    /// # Arguments
    /// * `session_id` - Session to look at (None for the newest command anywhere)
    /// * `limit` - Maximum suggestions to return
    ///
    /// # Returns
    /// * `Ok(Vec<Suggestion>)` - Most confident first, one entry per command
    pub async fn suggest(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<Suggestion>> {
        let Some(latest) = self.db.get_recent_commands(session_id, 1).await?.pop() else {
            return Ok(Vec::new());
        };

        // The previous command must come from the same session
        let recent = self
            .db
            .get_recent_commands(Some(latest.session_id.as_str()), 2)
            .await?;
        let previous = recent.get(1);

        let mut suggestions = self.from_past_fixes(&latest).await?;
        suggestions.extend(self.from_sequences(previous, &latest).await?);

        let suggestions = rank(suggestions, limit);
        tracing::debug!(
            session_id = %latest.session_id,
            count = suggestions.len(),
            "suggestions generated"
        );

        Ok(suggestions)
    }

    /// What followed this exact failure before, by how often it did
    async fn from_past_fixes(&self, latest: &Command) -> Result<Vec<Suggestion>> {
        let failed = matches!(latest.exit_code, Some(code) if code != 0);
        if !failed || latest.sensitive {
            return Ok(Vec::new());
        }

        let solved = self
            .db
            .solutions_for_problem(&latest.text, SOLUTION_LOOKBACK)
            .await?;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for row in &solved {
            match row.solution_text.as_deref() {
                Some(text) if text != REDACTED => *counts.entry(text).or_default() += 1,
                _ => {}
            }
        }

        let total: usize = counts.values().sum();
        Ok(counts
            .into_iter()
            .map(|(text, count)| Suggestion {
                command: text.to_string(),
                reason: format!("fixed '{}' {} of {} times", latest.text, count, total),
                confidence: count as f64 / total as f64 * PAST_FIX_WEIGHT,
                source: SuggestionSource::PastFix,
            })
            .collect())
    }

    /// Next semantic type per mined sequences, filled with the newest command of that type
    async fn from_sequences(&self, previous: Option<&Command>, latest: &Command) -> Result<Vec<Suggestion>> {
        let mut predicted: Vec<(SemanticType, f64, String)> = Vec::new();

        if let Some(previous) = previous {
            let prefix = [previous.semantic_type, latest.semantic_type];
            let triples = self.db.get_patterns(Some(PatternKind::Sequence3), PATTERN_LOOKBACK).await?;
            for (next, share) in continuations(&triples, &prefix) {
                predicted.push((
                    next,
                    share * SEQUENCE_3_WEIGHT,
                    format!("usually follows {} then {}", prefix[0], prefix[1]),
                ));
            }
        }

        let pairs = self.db.get_patterns(Some(PatternKind::Sequence2), PATTERN_LOOKBACK).await?;
        for (next, share) in continuations(&pairs, &[latest.semantic_type]) {
            predicted.push((
                next,
                share * SEQUENCE_2_WEIGHT,
                format!("usually follows {}", latest.semantic_type),
            ));
        }

        let mut suggestions = Vec::with_capacity(predicted.len());
        for (next, confidence, reason) in predicted {
            // Nothing of that type on record means nothing concrete to offer
            if let Some(example) = self.db.latest_of_type(next).await? {
                suggestions.push(Suggestion {
                    command: example.text,
                    reason: format!("{} ({})", reason, next),
                    confidence,
                    source: SuggestionSource::Sequence,
                });
            }
        }

        Ok(suggestions)
    }
}

/// Types that complete `prefix`, with their share of the prefix's occurrences
fn continuations(patterns: &[Pattern], prefix: &[SemanticType]) -> Vec<(SemanticType, f64)> {
    let matching: Vec<(SemanticType, i64)> = patterns
        .iter()
        .filter_map(|p| match p.sequence()?.split_last() {
            Some((next, head)) if head == prefix => Some((*next, p.frequency)),
            _ => None,
        })
        .collect();

    let total: i64 = matching.iter().map(|(_, f)| f).sum();
    if total <= 0 {
        return Vec::new();
    }

    matching
        .into_iter()
        .map(|(next, frequency)| (next, frequency as f64 / total as f64))
        .collect()
}

/// Keep the best entry per command, most confident first
fn rank(suggestions: Vec<Suggestion>, limit: usize) -> Vec<Suggestion> {
    let mut best: HashMap<String, Suggestion> = HashMap::new();
    for suggestion in suggestions {
        match best.get(&suggestion.command) {
            Some(kept) if kept.confidence >= suggestion.confidence => {}
            _ => {
                best.insert(suggestion.command.clone(), suggestion);
            }
        }
    }

    let mut ranked: Vec<Suggestion> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.command.cmp(&b.command))
    });
    ranked.truncate(limit);
    ranked
}
