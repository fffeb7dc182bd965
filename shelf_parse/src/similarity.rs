use sublime_fuzzy::FuzzySearch;

use crate::{SHORT_TITLE_LEN, clean_title};

/// Minimum similarity for a candidate to be considered at all.
pub const BASE_THRESHOLD: f64 = 0.4;

/// Extra similarity required when the query title is short, since short
/// titles match far too many unrelated entries otherwise.
pub const SHORT_TITLE_BONUS: f64 = 0.2;

/// Anything scoring above this is accepted immediately without ranking.
pub const EXACT_MATCH_SCORE: f64 = 0.9;

/// Queries at or below this many characters only match by containment.
const FUZZY_MIN_QUERY_LEN: usize = 2;

/// Normalized string similarity 0.0..1.0
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

pub fn is_exact_match(score: f64) -> bool {
    score > EXACT_MATCH_SCORE
}

pub fn eligibility_threshold(query_title: &str) -> f64 {
    if query_title.chars().count() <= SHORT_TITLE_LEN {
        BASE_THRESHOLD + SHORT_TITLE_BONUS
    } else {
        BASE_THRESHOLD
    }
}

/// Whether `text` loosely contains `query`, comparing cleaned forms.
///
/// Very short queries only match as a plain substring. Longer ones must
/// appear as an in-order subsequence and some window of `text` with the same
/// number of words must be similar enough to the query.
pub fn contains_fuzzy(text: &str, query: &str) -> bool {
    let query = clean_title(query);
    let text = clean_title(text);
    if query.is_empty() || text.contains(&query) {
        return true;
    }
    if query.chars().count() <= FUZZY_MIN_QUERY_LEN {
        return false;
    }

    if FuzzySearch::new(&query, &text)
        .case_insensitive()
        .best_match()
        .is_none_or(|m| m.score() <= 0)
    {
        return false;
    }

    best_window_similarity(&text, &query) >= BASE_THRESHOLD
}

fn best_window_similarity(text: &str, query: &str) -> f64 {
    let words: Vec<&str> = text.split(' ').collect();
    let width = query.split(' ').count().min(words.len()).max(1);
    words
        .windows(width)
        .map(|window| similarity(&window.join(" "), query))
        .fold(0.0, f64::max)
}
