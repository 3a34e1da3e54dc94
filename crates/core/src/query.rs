use crate::config::SearchSettings;
use crate::error::SearchError;
use crate::models::{FileType, SearchHit, SearchQuery, SearchRequest};
use serde_json::{json, Value};
use std::cmp::Ordering;

pub const HIGHLIGHT_PRE_TAG: &str = "<mark>";
pub const HIGHLIGHT_POST_TAG: &str = "</mark>";

const SEARCH_FIELDS: [&str; 3] = ["content^2", "file_name.text^1.5", "csv_columns^1.2"];

/// Turns raw caller input into a query with every effective value filled in.
pub fn validate(request: &SearchRequest, settings: &SearchSettings) -> Result<SearchQuery, SearchError> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(SearchError::InvalidQuery("query text is empty".to_string()));
    }
    let length = text.chars().count();
    if length > settings.max_query_length {
        return Err(SearchError::InvalidQuery(format!(
            "query is {length} characters, at most {} allowed",
            settings.max_query_length
        )));
    }

    let limit = match request.limit {
        None => settings.default_limit,
        Some(0) => return Err(SearchError::InvalidQuery("limit must be at least 1".to_string())),
        Some(limit) if limit > settings.max_limit && settings.clamp_limit => settings.max_limit,
        Some(limit) if limit > settings.max_limit => {
            return Err(SearchError::InvalidQuery(format!(
                "limit {limit} exceeds maximum {}",
                settings.max_limit
            )))
        }
        Some(limit) => limit,
    };

    let min_score = request.min_score.unwrap_or(settings.default_min_score);
    if !min_score.is_finite() || min_score < 0.0 {
        return Err(SearchError::InvalidQuery(format!(
            "min_score must be a non-negative number, got {min_score}"
        )));
    }

    let file_type = request
        .file_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.parse::<FileType>().map_err(SearchError::InvalidQuery))
        .transpose()?;

    Ok(SearchQuery {
        text: text.to_string(),
        file_type,
        limit,
        min_score,
    })
}

/// Search-engine request body for a validated query.
pub fn build_request(query: &SearchQuery, settings: &SearchSettings) -> Value {
    let mut filters = Vec::new();
    if let Some(file_type) = query.file_type {
        filters.push(json!({"term": {"file_type": file_type.as_str()}}));
    }

    json!({
        "query": {
            "bool": {
                "must": [{
                    "multi_match": {
                        "query": query.text,
                        "fields": SEARCH_FIELDS,
                        "type": "best_fields",
                        "fuzziness": "AUTO"
                    }
                }],
                "filter": filters
            }
        },
        "min_score": query.min_score,
        "size": query.limit,
        "track_total_hits": true,
        "highlight": {
            "pre_tags": [HIGHLIGHT_PRE_TAG],
            "post_tags": [HIGHLIGHT_POST_TAG],
            "fields": {
                "content": {
                    "fragment_size": settings.highlight_fragment_size,
                    "number_of_fragments": settings.highlight_fragments,
                    "max_analyzed_offset": settings.max_analyzed_offset
                }
            }
        },
        "sort": [
            {"_score": {"order": "desc"}},
            {"indexed_at": {"order": "desc", "unmapped_type": "date"}}
        ]
    })
}

/// Applies the threshold, ordering, highlight bounds and limit regardless of
/// what the engine already did.
pub fn finalize_hits(hits: Vec<SearchHit>, query: &SearchQuery, settings: &SearchSettings) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = hits
        .into_iter()
        .filter(|hit| hit.score >= query.min_score)
        .collect();

    hits.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| newest_first(left, right))
    });
    hits.truncate(query.limit);

    for hit in &mut hits {
        hit.highlights.truncate(settings.highlight_fragments);
        for fragment in &mut hit.highlights {
            truncate_fragment(fragment, settings.highlight_fragment_size);
        }
    }
    hits
}

fn newest_first(left: &SearchHit, right: &SearchHit) -> Ordering {
    // Hits without a timestamp sort after those with one.
    match (left.indexed_at, right.indexed_at) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Keeps at most `max_chars` characters of fragment text. Highlight tags are
/// not counted, never split, and an open `<mark>` is closed after the cut.
fn truncate_fragment(text: &mut String, max_chars: usize) {
    let mut visible = 0usize;
    let mut open = false;
    let mut cut = None;
    let mut rest = text.as_str();

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix(HIGHLIGHT_PRE_TAG) {
            open = true;
            rest = after;
            continue;
        }
        if let Some(after) = rest.strip_prefix(HIGHLIGHT_POST_TAG) {
            open = false;
            rest = after;
            continue;
        }
        if visible == max_chars {
            cut = Some(text.len() - rest.len());
            break;
        }
        let mut chars = rest.chars();
        chars.next();
        rest = chars.as_str();
        visible += 1;
    }

    let Some(offset) = cut else {
        return;
    };
    text.truncate(offset);
    if open {
        match text.strip_suffix(HIGHLIGHT_PRE_TAG).map(str::len) {
            Some(bare) => text.truncate(bare),
            None => text.push_str(HIGHLIGHT_POST_TAG),
        }
    }
}
