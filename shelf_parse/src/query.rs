use itertools::Itertools;

/// Titles with more tokens than this only get the three broadest queries.
const MANY_TOKENS: usize = 5;

/// Number of queries kept for long titles.
pub const MAX_LONG_TITLE_QUERIES: usize = 3;

/// Derive the ordered list of search queries for a cleaned title.
///
/// The full title is always tried first, followed by the longest tokens and,
/// for short titles, the leading tokens in their original order.
pub fn plan_queries(cleaned_title: &str) -> Vec<String> {
    let tokens: Vec<&str> = cleaned_title.split(' ').filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        return vec![];
    }

    let mut by_length = tokens.clone();
    by_length.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

    let mut queries = vec![
        tokens.join(" "),
        by_length.iter().take(2).join(" "),
        by_length[0].to_string(),
    ];
    if tokens.len() <= MANY_TOKENS {
        queries.push(tokens.iter().take(2).join(" "));
        queries.push(tokens[0].to_string());
    }

    queries.into_iter().unique().collect()
}
