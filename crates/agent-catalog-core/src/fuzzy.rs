//! Approximate string matching for agent lookups.
//!
//! [`FuzzyMatcher::score`] tries, in order: exact match, substring
//! containment, token-level partial containment, and finally normalized
//! Levenshtein similarity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CatalogError, Result};
use crate::record::AgentRecord;

/// Default minimum similarity for a candidate to count as a match.
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// Memoized distances kept before the memo is dropped wholesale.
const MEMO_LIMIT: usize = 1000;

/// Levenshtein similarity at or below this is reported as 0.
const EDIT_SIMILARITY_FLOOR: f64 = 0.1;

const MAX_WEIGHT: f64 = 0.7;
const MEAN_WEIGHT: f64 = 0.3;

/// Record fields that multi-field search can score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreField {
    Name,
    Description,
    FileIdentifier,
    Body,
}

impl ScoreField {
    pub const ALL: [ScoreField; 4] = [
        ScoreField::Name,
        ScoreField::Description,
        ScoreField::FileIdentifier,
        ScoreField::Body,
    ];

    fn value(self, record: &AgentRecord) -> &str {
        match self {
            Self::Name => &record.name,
            Self::Description => &record.description,
            Self::FileIdentifier => &record.file_identifier,
            Self::Body => &record.body,
        }
    }
}

/// Parameters for [`FuzzyMatcher::multi_field_search`].
#[derive(Debug, Clone)]
pub struct MultiFieldOptions {
    pub fields: Vec<ScoreField>,
    /// Maximum number of results; 0 means unlimited.
    pub limit: usize,
    /// Overrides the matcher's threshold for this call.
    pub threshold: Option<f64>,
}

impl Default for MultiFieldOptions {
    fn default() -> Self {
        Self {
            fields: ScoreField::ALL.to_vec(),
            limit: 0,
            threshold: None,
        }
    }
}

/// A record together with the score that selected it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: AgentRecord,
    pub score: f64,
}

/// String similarity scorer with an adjustable match threshold.
#[derive(Debug)]
pub struct FuzzyMatcher {
    threshold: AtomicU64,
    memo: Mutex<HashMap<String, usize>>,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: AtomicU64::new(threshold.to_bits()),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold.load(Ordering::Relaxed))
    }

    /// Change the matching floor for subsequent calls.
    pub fn set_threshold(&self, threshold: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CatalogError::InvalidThreshold(threshold));
        }
        self.threshold.store(threshold.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Similarity of `target` to `query`, case-insensitive.
    ///
    /// A blank query scores 0 against every target, including a blank one,
    /// so an empty search matches nothing rather than every empty field.
    ///
    /// The substring branch returns `len(query) / len(target) * 2` without
    /// clamping, so a short query inside a target less than twice its length
    /// scores above 1.0.
    pub fn score(&self, query: &str, target: &str) -> f64 {
        let a = query.trim().to_lowercase();
        let b = target.trim().to_lowercase();

        if a.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }

        let a_len = a.chars().count();
        let b_len = b.chars().count();

        if b.contains(a.as_str()) {
            return (a_len as f64 / b_len as f64) * 2.0;
        }

        if let Some(token_score) = token_score(&a, &b) {
            return token_score;
        }

        let distance = self.levenshtein(&a, &b);
        let longest = a_len.max(b_len);
        let similarity = (1.0 - distance as f64 / longest as f64).max(0.0);
        if similarity > EDIT_SIMILARITY_FLOOR {
            similarity
        } else {
            0.0
        }
    }

    /// Best-scoring record by file identifier, if it reaches the threshold.
    ///
    /// Ties go to the record that appears first in `records`.
    pub fn find_best(&self, query: &str, records: &[AgentRecord]) -> Option<ScoredRecord> {
        let threshold = self.threshold();
        let mut best: Option<(&AgentRecord, f64)> = None;

        for record in records {
            let score = self.score(query, &record.file_identifier);
            if score < threshold {
                continue;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((record, score));
            }
        }

        best.map(|(record, score)| ScoredRecord {
            record: record.clone(),
            score,
        })
    }

    /// Rank records by a blend of their best field score and the mean of
    /// their non-zero field scores.
    pub fn multi_field_search(
        &self,
        query: &str,
        records: &[AgentRecord],
        opts: &MultiFieldOptions,
    ) -> Vec<ScoredRecord> {
        let threshold = opts.threshold.unwrap_or_else(|| self.threshold());

        let mut results: Vec<ScoredRecord> = records
            .iter()
            .filter_map(|record| {
                let combined = self.combined_score(query, record, &opts.fields);
                (combined > 0.0 && combined >= threshold).then(|| ScoredRecord {
                    record: record.clone(),
                    score: combined,
                })
            })
            .collect();

        results.sort_by(|x, y| y.score.total_cmp(&x.score));
        if opts.limit > 0 {
            results.truncate(opts.limit);
        }

        trace!(query = %query, matched = results.len(), threshold, "multi-field search");
        results
    }

    fn combined_score(&self, query: &str, record: &AgentRecord, fields: &[ScoreField]) -> f64 {
        let mut max = 0.0_f64;
        let mut sum = 0.0;
        let mut non_zero = 0usize;

        for field in fields {
            let score = self.score(query, field.value(record));
            if score > 0.0 {
                max = max.max(score);
                sum += score;
                non_zero += 1;
            }
        }

        let mean = if non_zero > 0 {
            sum / non_zero as f64
        } else {
            0.0
        };
        MAX_WEIGHT * max + MEAN_WEIGHT * mean
    }

    fn levenshtein(&self, a: &str, b: &str) -> usize {
        let key = format!("{a}\u{0}{b}");
        {
            let memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(&distance) = memo.get(&key) {
                return distance;
            }
        }

        let distance = levenshtein_distance(a, b);

        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if memo.len() >= MEMO_LIMIT {
            memo.clear();
        }
        memo.insert(key, distance);
        distance
    }

    #[cfg(test)]
    fn memo_len(&self) -> usize {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn tokenize(s: &str) -> Vec<&str> {
    s.split(|c: char| c.is_whitespace() || c == '-')
        .filter(|t| !t.is_empty())
        .collect()
}

/// Average best partial-containment ratio per query token, or `None` when no
/// query token overlaps any target token.
fn token_score(a: &str, b: &str) -> Option<f64> {
    let a_tokens = tokenize(a);
    let b_tokens = tokenize(b);
    if a_tokens.is_empty() {
        return None;
    }

    let mut total = 0.0;
    let mut any_match = false;

    for at in &a_tokens {
        let best = b_tokens
            .iter()
            .filter(|bt| bt.contains(at) || at.contains(*bt))
            .map(|bt| {
                let (la, lb) = (at.chars().count(), bt.chars().count());
                la.min(lb) as f64 / la.max(lb) as f64
            })
            .fold(0.0_f64, f64::max);
        if best > 0.0 {
            any_match = true;
            total += best;
        }
    }

    any_match.then(|| total / a_tokens.len() as f64)
}

/// Edit distance between two strings, two-row dynamic programming.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, ac) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, bc) in b_chars.iter().enumerate() {
            let cost = usize::from(ac != bc);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn record(name: &str, file_identifier: &str) -> AgentRecord {
        AgentRecord::new(name, file_identifier)
    }

    #[test]
    fn test_exact_match_scores_one() {
        let m = FuzzyMatcher::default();
        assert_eq!(m.score("test", "test"), 1.0);
        assert_eq!(m.score("  Test ", "TEST"), 1.0);
    }

    #[test]
    fn test_blank_query_scores_zero_even_against_blank_target() {
        let m = FuzzyMatcher::default();
        assert_eq!(m.score("", ""), 0.0);
        assert_eq!(m.score("  ", " "), 0.0);
        assert_eq!(m.score("", "go-expert.md"), 0.0);
    }

    #[test]
    fn test_substring_is_length_ratio_times_two() {
        let m = FuzzyMatcher::default();
        let s = m.score("data", "data-processor.md");
        assert!(s > 0.0 && s < 1.0);
        assert!(approx(s, 4.0 / 17.0 * 2.0));
    }

    #[test]
    fn test_substring_score_is_not_clamped() {
        let m = FuzzyMatcher::default();
        // 6 chars inside 7: 6/7 * 2
        let s = m.score("go-exp", "go-expx");
        assert!(s > 1.0);
    }

    #[test]
    fn test_token_partial_containment() {
        let m = FuzzyMatcher::default();
        // "go" in "golang" = 2/6, "reviewer" exact = 1.0, averaged over 2 tokens.
        let s = m.score("go reviewer", "golang code-reviewer");
        assert!(approx(s, (2.0 / 6.0 + 1.0) / 2.0));
    }

    #[test]
    fn test_unmatched_tokens_count_in_denominator() {
        let m = FuzzyMatcher::default();
        let s = m.score("rust wizard", "rust-expert");
        assert!(approx(s, 0.5));
    }

    #[test]
    fn test_levenshtein_fallback() {
        let m = FuzzyMatcher::default();
        let s = m.score("kitten", "sitting");
        assert!(approx(s, 1.0 - 3.0 / 7.0));
    }

    #[test]
    fn test_levenshtein_floor() {
        let m = FuzzyMatcher::default();
        assert_eq!(m.score("abc", "xyzuvw"), 0.0);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let m = FuzzyMatcher::default();
        assert_eq!(m.score("", ""), 0.0);
        assert_eq!(m.score("   ", "anything"), 0.0);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("flaw", "lawn"), 2);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_memo_is_bounded() {
        let m = FuzzyMatcher::default();
        for i in 0..(MEMO_LIMIT + 50) {
            m.score(&format!("q{i}"), "zzzzzz");
        }
        assert!(m.memo_len() <= MEMO_LIMIT);
        assert!(m.memo_len() > 0);
    }

    #[test]
    fn test_find_best_prefers_highest_score() {
        let m = FuzzyMatcher::default();
        let records = vec![
            record("python-pro", "python-pro.md"),
            record("go-expert", "go-expert.md"),
            record("go-helper", "go-helper.md"),
        ];
        let best = m.find_best("go-exp", &records).unwrap();
        assert_eq!(best.record.name, "go-expert");
    }

    #[test]
    fn test_find_best_tie_goes_to_first() {
        let m = FuzzyMatcher::default();
        let records = vec![record("first", "alpha-one.md"), record("second", "alpha-two.md")];
        let best = m.find_best("alpha", &records).unwrap();
        assert_eq!(best.record.name, "first");
    }

    #[test]
    fn test_find_best_respects_threshold() {
        let m = FuzzyMatcher::new(0.9);
        let records = vec![record("data-processor", "data-processor.md")];
        assert!(m.find_best("data", &records).is_none());
        m.set_threshold(0.4).unwrap();
        assert!(m.find_best("data", &records).is_some());
    }

    #[test]
    fn test_set_threshold_rejects_out_of_range() {
        let m = FuzzyMatcher::default();
        assert!(m.set_threshold(1.5).is_err());
        assert!(m.set_threshold(-0.1).is_err());
        assert!(m.set_threshold(f64::NAN).is_err());
        assert_eq!(m.threshold(), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_multi_field_search_ranks_and_limits() {
        let m = FuzzyMatcher::default();
        let records = vec![
            record("zz", "zz.md").with_description("qq"),
            record("code-reviewer", "code-reviewer.md").with_description("reviews code"),
            record("reviewer", "reviewer.md"),
        ];
        let results = m.multi_field_search("reviewer", &records, &MultiFieldOptions::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.name, "reviewer");
        assert!(results[0].score >= results[1].score);

        let limited = m.multi_field_search(
            "reviewer",
            &records,
            &MultiFieldOptions {
                limit: 1,
                ..MultiFieldOptions::default()
            },
        );
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_multi_field_combined_score() {
        let m = FuzzyMatcher::new(0.0);
        let r = record("tester", "tester.md");
        let results = m.multi_field_search(
            "tester",
            &[r],
            &MultiFieldOptions {
                fields: vec![ScoreField::Name, ScoreField::Description],
                ..MultiFieldOptions::default()
            },
        );
        // Name scores 1.0; empty description scores 0 and is excluded from the mean.
        assert_eq!(results.len(), 1);
        assert!(approx(results[0].score, 1.0));
    }

    #[test]
    fn test_multi_field_threshold_override() {
        let m = FuzzyMatcher::default();
        let records = vec![record("data-processor", "data-processor.md")];
        let strict = MultiFieldOptions {
            threshold: Some(0.99),
            ..MultiFieldOptions::default()
        };
        assert!(m.multi_field_search("data", &records, &strict).is_empty());
        assert_eq!(
            m.multi_field_search("data", &records, &MultiFieldOptions::default())
                .len(),
            1
        );
    }
}
