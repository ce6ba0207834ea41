//! Fuzzy search over registered component class names.

use std::collections::BTreeSet;

use serde::Serialize;

use super::RegistryError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchReport {
    pub query: String,
    pub limit: usize,
    pub count: usize,
    pub matches: Vec<String>,
}

/// Match `query` against `names`.
///
/// A trailing `*` selects prefix mode. The rest of the query is lowercased
/// and split on non-alphanumeric characters; a name matches when every token
/// is contained in it, except single-token prefix queries, which must match
/// the start of the name. Results are deduplicated, sorted and truncated to
/// `limit`.
pub fn search<'a>(
    names: impl IntoIterator<Item = &'a str>,
    query: &str,
    limit: usize,
) -> Result<SearchReport, RegistryError> {
    let raw = query.trim();
    if raw.is_empty() {
        return Err(RegistryError::EmptyQuery);
    }

    let prefix_mode = raw.ends_with('*');
    let q = if prefix_mode { &raw[..raw.len() - 1] } else { raw };
    let q = q.trim().to_lowercase();

    let tokens: Vec<&str> = q
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(RegistryError::NoSearchToken);
    }

    let matches_name = |name: &str| {
        let n = name.to_lowercase();
        if prefix_mode && tokens.len() == 1 {
            n.starts_with(tokens[0])
        } else {
            tokens.iter().all(|t| n.contains(t))
        }
    };

    let deduped: BTreeSet<&str> = names.into_iter().collect();
    let matches: Vec<String> = deduped
        .into_iter()
        .filter(|n| matches_name(n))
        .take(limit)
        .map(str::to_string)
        .collect();

    Ok(SearchReport {
        query: raw.to_string(),
        limit,
        count: matches.len(),
        matches,
    })
}
