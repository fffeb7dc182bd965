mod query;
mod similarity;

use anyhow::Result;
use htmlentity::entity::{self, ICodedDataTrait as _};
use once_cell::sync::Lazy;
use regex::Regex;

pub use query::{MAX_LONG_TITLE_QUERIES, plan_queries};
pub use similarity::{
    BASE_THRESHOLD, EXACT_MATCH_SCORE, SHORT_TITLE_BONUS, contains_fuzzy, eligibility_threshold,
    is_exact_match, similarity,
};

/// Titles at or below this many characters are treated as "suspiciously short"
/// by the cleaning fallbacks and by the eligibility threshold.
pub const SHORT_TITLE_LEN: usize = 5;

const BRACKET_PAIRS: [(char, char); 4] = [('(', ')'), ('[', ']'), ('<', '>'), ('{', '}')];

static CHAPTER_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:- (?:часть|глава|chapter|ch\.)\s*\d*)").unwrap());

static NON_LATIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\- ]").unwrap());

static NON_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}0-9\- ]").unwrap());

static CONSECUTIVE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").unwrap());

static DASH_SPLITTERS: Lazy<Regex> = Lazy::new(|| Regex::new(r" (?:- )+").unwrap());

pub fn clean_value(value: &str) -> Result<String> {
    entity::decode(value.as_bytes()).to_string()
}

/// Reduce a free-text title to the canonical form used for searching and
/// scoring.
///
/// Bracketed annotations are removed with a depth-counting scan. When the
/// forward scan leaves almost nothing the title is scanned again from the end,
/// which recovers titles such as `Ao (Haru Ride` where a bracket is never
/// closed. Characters outside
/// `[a-z0-9- ]` are dropped, unless doing so would leave a near-empty key, in
/// which case letters of any script are kept.
pub fn clean_title(title: &str) -> String {
    let decoded = clean_value(title).unwrap_or_else(|_| title.to_string());
    let lower = decoded.to_lowercase();

    let mut cleaned = strip_brackets(&lower, true);
    if char_len(cleaned.trim()) <= SHORT_TITLE_LEN {
        cleaned = strip_brackets(&lower, false);
    }

    let cleaned = CHAPTER_REFERENCE.replace_all(&cleaned, " ");
    let latin = strip_chapter_references(&NON_LATIN.replace_all(&cleaned, " "));
    if char_len(&latin) <= SHORT_TITLE_LEN {
        strip_chapter_references(&NON_LETTER.replace_all(&cleaned, " "))
    } else {
        latin
    }
}

fn strip_brackets(text: &str, forward: bool) -> String {
    let mut depth = [0i32; BRACKET_PAIRS.len()];
    let mut result = String::with_capacity(text.len());

    let chars: Box<dyn Iterator<Item = char>> = if forward {
        Box::new(text.chars())
    } else {
        Box::new(text.chars().rev())
    };

    for c in chars {
        let opening = BRACKET_PAIRS
            .iter()
            .position(|&(open, close)| if forward { open == c } else { close == c });
        if let Some(i) = opening {
            depth[i] += 1;
            continue;
        }
        let closing = BRACKET_PAIRS
            .iter()
            .position(|&(open, close)| if forward { close == c } else { open == c });
        if let Some(i) = closing {
            depth[i] -= 1;
            continue;
        }
        if depth.iter().all(|d| *d <= 0) {
            result.push(c);
        }
    }

    if forward {
        result
    } else {
        result.chars().rev().collect()
    }
}

fn collapse(value: &str) -> String {
    let value = CONSECUTIVE_SPACES.replace_all(value, " ");
    let value = DASH_SPLITTERS.replace_all(&value, " ");
    value.trim().to_string()
}

/// Stripping characters can turn a separator such as `-&nbsp;` into `- `, so
/// chapter references are removed again once the text is collapsed.
fn strip_chapter_references(value: &str) -> String {
    let value = collapse(value);
    collapse(&CHAPTER_REFERENCE.replace_all(&value, " "))
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}
