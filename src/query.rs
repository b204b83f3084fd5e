//! Search query representation.

use serde::{Deserialize, Serialize};

use crate::EngineCategory;

/// Safe search level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SafeSearch {
    /// No filtering.
    #[default]
    Off = 0,
    /// Moderate filtering.
    Moderate = 1,
    /// Strict filtering.
    Strict = 2,
}

/// Time range filter for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

/// A search query with all parameters.
///
/// Created once per user request and read-only thereafter; builder methods
/// consume `self` so a constructed query cannot be mutated in place. One
/// query targets exactly one category; a multi-category page issues one
/// query per category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The search terms.
    pub query: String,
    /// Target category.
    pub category: EngineCategory,
    /// Language/locale (e.g., "en-US").
    pub locale: Option<String>,
    /// Safe search level.
    pub safesearch: SafeSearch,
    /// Page number (1-indexed).
    pub page: u32,
    /// Time range filter.
    pub time_range: Option<TimeRange>,
    /// Specific engines to use (by shortcut).
    pub engines: Vec<String>,
}

impl SearchQuery {
    /// Creates a new search query with the given terms.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            category: EngineCategory::General,
            locale: None,
            safesearch: SafeSearch::Off,
            page: 1,
            time_range: None,
            engines: Vec::new(),
        }
    }

    /// Sets the category to search.
    pub fn with_category(mut self, category: EngineCategory) -> Self {
        self.category = category;
        self
    }

    /// Sets the language/locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Sets the safe search level.
    pub fn with_safesearch(mut self, level: SafeSearch) -> Self {
        self.safesearch = level;
        self
    }

    /// Sets the page number (clamped to at least 1).
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// Sets the time range filter.
    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Sets specific engines to use.
    pub fn with_engines(mut self, engines: Vec<String>) -> Self {
        self.engines = engines;
        self
    }
}
