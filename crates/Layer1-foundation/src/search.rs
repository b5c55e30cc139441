//! Search query and the scoring shared by every tier

use crate::entry::{EntryFacets, TierKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of hits returned when the query sets no limit
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

const TEXT_SCORE: u32 = 10;
const AGENT_SCORE: u32 = 20;
const DATE_SCORE: u32 = 15;
const TAG_SCORE: u32 = 5;

/// Inclusive time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Search criteria; every criterion is optional and additive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub agent_id: Option<String>,
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.date_range = Some(DateRange::new(start, end));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
    }
}

/// One ranked result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub key: String,
    pub score: u32,
    pub tier: TierKind,
}

/// Score a single entry; 0 means it does not match
pub fn score(query: &SearchQuery, key: &str, facets: &EntryFacets) -> u32 {
    let mut total = 0;

    if let Some(text) = query.text.as_deref().filter(|t| !t.is_empty()) {
        let needle = text.to_lowercase();
        let in_key = key.to_lowercase().contains(&needle);
        let in_title = facets
            .title
            .as_deref()
            .is_some_and(|title| title.to_lowercase().contains(&needle));
        if in_key || in_title {
            total += TEXT_SCORE;
        }
    }

    if let (Some(wanted), Some(agent)) = (query.agent_id.as_deref(), facets.agent_id.as_deref()) {
        if wanted == agent {
            total += AGENT_SCORE;
        }
    }

    if let (Some(range), Some(at)) = (query.date_range, facets.timestamp) {
        if range.contains(at) {
            total += DATE_SCORE;
        }
    }

    for tag in &query.tags {
        if facets.tags.iter().any(|t| t == tag) {
            total += TAG_SCORE;
        }
    }

    total
}

/// Sort by score descending (key ascending on ties) and truncate
pub fn rank(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.retain(|hit| hit.score > 0);
    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
    hits.truncate(limit);
    hits
}
