//! Search result types: raw per-engine entries and merged, deduplicated results.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use url::Url;

/// Presentation template declared by an engine for its hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Template {
    /// Standard web hit.
    #[default]
    Default,
    /// Image result.
    Image,
    /// Video result.
    Video,
    /// Scientific paper.
    Paper,
    /// Key/value record.
    KeyValue,
}

/// Ranking priority for a merged result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Structured payload attached to a hit, varying by template kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    /// Image metadata.
    Image {
        src: String,
        thumbnail: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    },
    /// Video metadata.
    Video {
        thumbnail: Option<String>,
        length_seconds: Option<u32>,
    },
    /// Paper metadata.
    Paper {
        authors: Vec<String>,
        published_date: Option<String>,
        doi: Option<String>,
    },
    /// Free-form key/value record.
    Record(BTreeMap<String, String>),
}

/// A plain hit produced by an engine adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitResult {
    /// Result URL.
    pub url: String,
    /// Result title.
    pub title: String,
    /// Result description/snippet.
    pub content: String,
    /// Presentation template.
    pub template: Template,
    /// Structured payload, if the template carries one.
    pub payload: Option<Payload>,
}

impl HitResult {
    /// Creates a new hit.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            template: Template::Default,
            payload: None,
        }
    }

    /// Sets the template kind.
    pub fn with_template(mut self, template: Template) -> Self {
        self.template = template;
        self
    }

    /// Attaches a structured payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// An information box produced by an engine, merged by its identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Infobox {
    /// Explicit identifier used for merging across engines.
    pub id: String,
    /// Infobox title.
    pub title: String,
    /// Infobox body text.
    pub content: Option<String>,
    /// Attribute label/value pairs.
    pub attributes: BTreeMap<String, String>,
    /// Related URLs.
    pub urls: Vec<String>,
    /// Engine that produced it.
    pub engine: String,
}

/// A direct answer produced by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// The answer text.
    pub answer: String,
    /// Optional source URL.
    pub url: Option<String>,
    /// Engine that produced it.
    pub engine: String,
}

/// One raw entry emitted by an engine adapter.
///
/// A tagged union over result kinds; the aggregation engine routes each
/// variant through its own merge rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultEntry {
    /// A ranked hit participating in deduplication and scoring.
    Hit(HitResult),
    /// A direct answer.
    Answer(Answer),
    /// A query suggestion.
    Suggestion(String),
    /// A spelling correction.
    Correction(String),
    /// An information box.
    Infobox(Infobox),
    /// Total result count reported by the backend.
    NumberOfResults(u64),
}

/// Normalizes a URL for deduplication: scheme and fragment dropped, host
/// lowercased with any `www.` prefix stripped, trailing slash removed.
/// Path and query keep their case, so distinct case-sensitive resources
/// stay distinct.
pub fn normalize_url(raw: &str) -> String {
    let parsed = Url::parse(raw).or_else(|_| Url::parse(&format!("http://{raw}")));
    let parsed = match parsed {
        Ok(url) if url.has_host() => url,
        _ => return raw.trim_end_matches('/').to_string(),
    };

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let mut normalized = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if let Some(port) = parsed.port() {
        normalized.push(':');
        normalized.push_str(&port.to_string());
    }
    normalized.push_str(parsed.path().trim_end_matches('/'));
    if let Some(query) = parsed.query() {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

/// Computes the deduplication fingerprint of a URL.
pub fn fingerprint(url: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize_url(url).hash(&mut hasher);
    hasher.finish()
}

/// A deduplicated result: all occurrences of the same underlying hit
/// across engines, with merged fields and the positions each engine
/// reported it at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResult {
    /// Deduplication key.
    pub fingerprint: u64,
    /// Current best URL (scheme upgraded to https when any duplicate offers it).
    pub url: String,
    /// Current best title (longest wins).
    pub title: String,
    /// Current best content (longest wins).
    pub content: String,
    /// Engines that returned this result.
    pub engines: BTreeSet<String>,
    /// 1-based ranks contributed by each occurrence.
    pub positions: Vec<u32>,
    /// Score computed at container close.
    pub score: f64,
    /// Ranking priority.
    pub priority: Priority,
    /// Category of the engine that first produced it.
    pub category: crate::EngineCategory,
    /// Presentation template.
    pub template: Template,
    /// Structured payload, filled from the first occurrence that has one.
    pub payload: Option<Payload>,
}

impl MergedResult {
    /// Creates a merged result from its first occurrence.
    pub fn from_hit(
        hit: HitResult,
        engine: impl Into<String>,
        category: crate::EngineCategory,
        position: u32,
    ) -> Self {
        let mut engines = BTreeSet::new();
        engines.insert(engine.into());
        Self {
            fingerprint: fingerprint(&hit.url),
            url: hit.url,
            title: hit.title,
            content: hit.content,
            engines,
            positions: vec![position],
            score: 0.0,
            priority: Priority::Normal,
            category,
            template: hit.template,
            payload: hit.payload,
        }
    }

    /// Merges a duplicate occurrence into this result.
    ///
    /// Field tie-breaks are fixed so the merge is commutative and
    /// associative with respect to the final state: the longer content
    /// wins, the longer title wins, missing fields are filled from the
    /// duplicate, engine sets are unioned, the scheme is upgraded to
    /// https when the duplicate offers it, and the new rank is appended.
    pub fn merge(&mut self, other: HitResult, engine: impl Into<String>, position: u32) {
        self.engines.insert(engine.into());
        self.positions.push(position);

        if other.title.len() > self.title.len() {
            self.title = other.title;
        }
        if other.content.len() > self.content.len() {
            self.content = other.content;
        }
        if self.payload.is_none() && other.payload.is_some() {
            self.payload = other.payload;
        }
        if other.url.starts_with("https://") && !self.url.starts_with("https://") {
            self.url = other.url;
        }
    }

    /// Whether this result carries an image (drives the grouping key).
    pub fn has_image(&self) -> bool {
        match &self.payload {
            Some(Payload::Image { .. }) => true,
            Some(Payload::Video { thumbnail, .. }) => thumbnail.is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineCategory;

    #[test]
    fn test_template_default() {
        assert_eq!(Template::default(), Template::Default);
    }

    #[test]
    fn test_priority_default() {
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_hit_result_new() {
        let hit = HitResult::new("https://example.com", "Title", "Content");
        assert_eq!(hit.url, "https://example.com");
        assert_eq!(hit.title, "Title");
        assert_eq!(hit.content, "Content");
        assert_eq!(hit.template, Template::Default);
        assert!(hit.payload.is_none());
    }

    #[test]
    fn test_hit_result_with_payload() {
        let hit = HitResult::new("u", "t", "c")
            .with_template(Template::Image)
            .with_payload(Payload::Image {
                src: "https://example.com/full.jpg".into(),
                thumbnail: Some("https://example.com/t.jpg".into()),
                width: Some(800),
                height: Some(600),
            });
        assert_eq!(hit.template, Template::Image);
        assert!(matches!(hit.payload, Some(Payload::Image { .. })));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://Example.COM/Path/"), "example.com/Path");
        assert_eq!(normalize_url("http://example.com/path"), "example.com/path");
        assert_eq!(normalize_url("https://www.example.com/"), "example.com");
        assert_eq!(normalize_url("example.com"), "example.com");
        assert_eq!(normalize_url("https://x.com:8080/a"), "x.com:8080/a");
    }

    #[test]
    fn test_normalize_url_keeps_path_case_and_query() {
        // Only the host is case-insensitive; paths address distinct resources.
        assert_ne!(fingerprint("https://x.com/AbC"), fingerprint("https://x.com/abc"));
        assert_eq!(normalize_url("https://x.com/a?q=Cats"), "x.com/a?q=Cats");
        assert_ne!(
            fingerprint("https://x.com/a?q=1"),
            fingerprint("https://x.com/a?q=2")
        );
        // Fragments never differentiate results.
        assert_eq!(
            fingerprint("https://x.com/a#top"),
            fingerprint("https://x.com/a")
        );
    }

    #[test]
    fn test_fingerprint_scheme_insensitive() {
        assert_eq!(
            fingerprint("http://x.com/a"),
            fingerprint("https://x.com/a")
        );
        assert_eq!(
            fingerprint("https://www.x.com/a/"),
            fingerprint("http://x.com/a")
        );
        assert_ne!(fingerprint("https://x.com/a"), fingerprint("https://x.com/b"));
    }

    #[test]
    fn test_merged_result_from_hit() {
        let hit = HitResult::new("https://example.com", "Title", "Content");
        let merged = MergedResult::from_hit(hit, "ddg", EngineCategory::General, 3);
        assert_eq!(merged.positions, vec![3]);
        assert!(merged.engines.contains("ddg"));
        assert_eq!(merged.score, 0.0);
        assert_eq!(merged.priority, Priority::Normal);
    }

    #[test]
    fn test_merge_longer_fields_win() {
        let first = HitResult::new("https://e.com/1", "Cats", "short");
        let mut merged = MergedResult::from_hit(first, "a", EngineCategory::General, 1);

        let second = HitResult::new("http://e.com/1", "Cats - Wikipedia", "a longer snippet");
        merged.merge(second, "b", 1);

        assert_eq!(merged.title, "Cats - Wikipedia");
        assert_eq!(merged.content, "a longer snippet");
        assert_eq!(merged.positions, vec![1, 1]);
        assert_eq!(merged.engines.len(), 2);
    }

    #[test]
    fn test_merge_shorter_fields_kept() {
        let first = HitResult::new("https://e.com/1", "A long original title", "long content!");
        let mut merged = MergedResult::from_hit(first, "a", EngineCategory::General, 1);
        merged.merge(HitResult::new("https://e.com/1", "Short", "tiny"), "b", 2);
        assert_eq!(merged.title, "A long original title");
        assert_eq!(merged.content, "long content!");
    }

    #[test]
    fn test_merge_scheme_upgrade() {
        let first = HitResult::new("http://x.com/a", "T", "C");
        let mut merged = MergedResult::from_hit(first, "a", EngineCategory::General, 1);
        merged.merge(HitResult::new("https://x.com/a", "T", "C"), "b", 2);
        assert_eq!(merged.url, "https://x.com/a");
    }

    #[test]
    fn test_merge_no_scheme_downgrade() {
        let first = HitResult::new("https://x.com/a", "T", "C");
        let mut merged = MergedResult::from_hit(first, "a", EngineCategory::General, 1);
        merged.merge(HitResult::new("http://x.com/a", "T", "C"), "b", 2);
        assert_eq!(merged.url, "https://x.com/a");
    }

    #[test]
    fn test_merge_fills_missing_payload() {
        let first = HitResult::new("https://x.com/a", "T", "C");
        let mut merged = MergedResult::from_hit(first, "a", EngineCategory::Images, 1);
        let second = HitResult::new("https://x.com/a", "T", "C").with_payload(Payload::Image {
            src: "https://x.com/a.jpg".into(),
            thumbnail: None,
            width: None,
            height: None,
        });
        merged.merge(second, "b", 1);
        assert!(merged.payload.is_some());
        assert!(merged.has_image());
    }

    #[test]
    fn test_merge_commutative() {
        let a = HitResult::new("http://e.com/1", "Cats", "short");
        let b = HitResult::new("https://e.com/1", "Cats - Wikipedia", "a longer snippet");

        let mut ab = MergedResult::from_hit(a.clone(), "a", EngineCategory::General, 1);
        ab.merge(b.clone(), "b", 1);

        let mut ba = MergedResult::from_hit(b, "b", EngineCategory::General, 1);
        ba.merge(a, "a", 1);

        assert_eq!(ab.url, ba.url);
        assert_eq!(ab.title, ba.title);
        assert_eq!(ab.content, ba.content);
        assert_eq!(ab.engines, ba.engines);
        // Position multisets match regardless of arrival order.
        let (mut p1, mut p2) = (ab.positions.clone(), ba.positions.clone());
        p1.sort_unstable();
        p2.sort_unstable();
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_has_image() {
        let hit = HitResult::new("u", "t", "c");
        let plain = MergedResult::from_hit(hit, "a", EngineCategory::General, 1);
        assert!(!plain.has_image());
    }

    #[test]
    fn test_result_entry_serialization() {
        let entry = ResultEntry::Suggestion("rust async".into());
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("suggestion"));
    }
}
