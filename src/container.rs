//! Thread-safe result container: merges per-engine entries, computes
//! scores at close, and produces the ordered, grouped view on demand.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GroupingConfig;
use crate::engine::EngineCategory;
use crate::result::{
    fingerprint, Answer, Infobox, MergedResult, Priority, ResultEntry, Template,
};
use crate::{Result, SearchError};

/// Timing record for one engine's contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTiming {
    /// Engine name.
    pub engine: String,
    /// Wall-clock time for the whole engine call.
    pub total: Duration,
    /// Time spent on outbound network I/O.
    pub network: Duration,
}

/// Record of an engine that produced no results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresponsiveEngine {
    /// Engine name.
    pub engine: String,
    /// Error classification label.
    pub reason: String,
    /// Whether the engine was skipped because its breaker was open.
    pub suspended: bool,
}

#[derive(Default)]
struct ContainerInner {
    merged: HashMap<u64, MergedResult>,
    answers: Vec<Answer>,
    suggestions: BTreeSet<String>,
    corrections: BTreeSet<String>,
    infoboxes: Vec<Infobox>,
    number_of_results: Vec<u64>,
    raw_counts: HashMap<String, usize>,
    timings: Vec<EngineTiming>,
    unresponsive: Vec<UnresponsiveEngine>,
    closed: bool,
    ordered: Option<Vec<MergedResult>>,
}

/// The aggregate for one query.
///
/// Lifecycle: *Open* (accepts merges under the lock) -> *Closed* (scores
/// computed once, further merges dropped) -> *Ordered* (grouped view
/// computed and cached). `close()` is the single barrier between
/// accepting merges and reading.
pub struct ResultContainer {
    inner: Mutex<ContainerInner>,
    weights: HashMap<String, f64>,
    grouping: GroupingConfig,
}

impl ResultContainer {
    /// Creates an open container with default grouping.
    pub fn new(weights: HashMap<String, f64>) -> Self {
        Self::with_grouping(weights, GroupingConfig::default())
    }

    /// Creates an open container with explicit grouping constants.
    pub fn with_grouping(weights: HashMap<String, f64>, grouping: GroupingConfig) -> Self {
        Self {
            inner: Mutex::new(ContainerInner::default()),
            weights,
            grouping,
        }
    }

    /// Merges one engine's batch of raw entries.
    ///
    /// Hit ranks are 1-based positions within the batch. Batches arriving
    /// after `close()` are dropped, not merged.
    pub fn extend(&self, engine: &str, category: EngineCategory, entries: Vec<ResultEntry>) {
        let mut inner = self.inner.lock().expect("container lock");
        if inner.closed {
            debug!(engine = %engine, "Container closed, dropping late results");
            return;
        }

        *inner.raw_counts.entry(engine.to_string()).or_insert(0) += entries.len();

        let mut rank = 0u32;
        for entry in entries {
            match entry {
                ResultEntry::Hit(hit) => {
                    rank += 1;
                    let key = fingerprint(&hit.url);
                    match inner.merged.get_mut(&key) {
                        Some(existing) => existing.merge(hit, engine, rank),
                        None => {
                            inner
                                .merged
                                .insert(key, MergedResult::from_hit(hit, engine, category, rank));
                        }
                    }
                }
                ResultEntry::Answer(answer) => {
                    if !inner.answers.iter().any(|a| a.answer == answer.answer) {
                        inner.answers.push(answer);
                    }
                }
                ResultEntry::Suggestion(s) => {
                    inner.suggestions.insert(s);
                }
                ResultEntry::Correction(c) => {
                    inner.corrections.insert(c);
                }
                ResultEntry::Infobox(infobox) => Self::merge_infobox(&mut inner, infobox),
                ResultEntry::NumberOfResults(n) => inner.number_of_results.push(n),
            }
        }
    }

    /// Infoboxes merge by explicit identifier: the longer content wins and
    /// missing attributes/urls are filled from the duplicate.
    fn merge_infobox(inner: &mut ContainerInner, incoming: Infobox) {
        match inner.infoboxes.iter_mut().find(|b| b.id == incoming.id) {
            Some(existing) => {
                let existing_len = existing.content.as_deref().map(str::len).unwrap_or(0);
                let incoming_len = incoming.content.as_deref().map(str::len).unwrap_or(0);
                if incoming_len > existing_len {
                    existing.content = incoming.content;
                    existing.title = incoming.title;
                }
                for (k, v) in incoming.attributes {
                    existing.attributes.entry(k).or_insert(v);
                }
                for url in incoming.urls {
                    if !existing.urls.contains(&url) {
                        existing.urls.push(url);
                    }
                }
            }
            None => inner.infoboxes.push(incoming),
        }
    }

    /// Records an engine's timing.
    pub fn add_timing(&self, timing: EngineTiming) {
        self.inner
            .lock()
            .expect("container lock")
            .timings
            .push(timing);
    }

    /// Records an engine that produced no results.
    pub fn add_unresponsive(&self, engine: &str, reason: &str, suspended: bool) {
        self.inner
            .lock()
            .expect("container lock")
            .unresponsive
            .push(UnresponsiveEngine {
                engine: engine.to_string(),
                reason: reason.to_string(),
                suspended,
            });
    }

    /// Closes the container, computing each result's score exactly once.
    ///
    /// Idempotent: a second call is a logged no-op and changes nothing.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("container lock");
        if inner.closed {
            warn!("close() called on an already closed container");
            return;
        }
        inner.closed = true;

        let weights = &self.weights;
        for result in inner.merged.values_mut() {
            result.score = Self::score(result, weights);
        }
    }

    /// Whether `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("container lock").closed
    }

    fn score(result: &MergedResult, weights: &HashMap<String, f64>) -> f64 {
        let mut weight = 1.0;
        for engine in &result.engines {
            weight *= weights.get(engine).copied().unwrap_or(1.0);
        }
        weight *= result.positions.len() as f64;

        let mut score = 0.0;
        for &position in &result.positions {
            match result.priority {
                Priority::Low => {}
                Priority::High => score += weight,
                Priority::Normal => score += weight / f64::from(position),
            }
        }
        score
    }

    /// The ordered, grouped view. Computed once after close and cached.
    ///
    /// Fails if the container is still open: ordering before the close
    /// barrier would race with in-flight merges.
    pub fn ordered_results(&self) -> Result<Vec<MergedResult>> {
        let mut inner = self.inner.lock().expect("container lock");
        if !inner.closed {
            return Err(SearchError::Other(
                "container must be closed before reading ordered results".into(),
            ));
        }
        if let Some(ordered) = &inner.ordered {
            return Ok(ordered.clone());
        }

        let mut sorted: Vec<MergedResult> = inner.merged.values().cloned().collect();
        sorted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let grouped = self.group_pass(sorted);
        inner.ordered = Some(grouped.clone());
        Ok(grouped)
    }

    /// Single stabilizing pass keeping small clusters of same-category/
    /// template items contiguous without materially breaking score order.
    fn group_pass(&self, sorted: Vec<MergedResult>) -> Vec<MergedResult> {
        type GroupKey = (EngineCategory, Template, bool);
        let mut output: Vec<MergedResult> = Vec::with_capacity(sorted.len());
        let mut groups: HashMap<GroupKey, (usize, usize)> = HashMap::new();

        for item in sorted {
            let key: GroupKey = (item.category, item.template, item.has_image());
            match groups.get(&key).copied() {
                Some((index, remaining))
                    if remaining > 0
                        && output.len().abs_diff(index) < self.grouping.max_distance =>
                {
                    output.insert(index, item);
                    for (slot_index, _) in groups.values_mut() {
                        if *slot_index >= index {
                            *slot_index += 1;
                        }
                    }
                    if let Some((_, remaining)) = groups.get_mut(&key) {
                        *remaining -= 1;
                    }
                }
                _ => {
                    output.push(item);
                    groups.insert(key, (output.len(), self.grouping.max_group_size));
                }
            }
        }
        output
    }

    /// Direct answers.
    pub fn answers(&self) -> Vec<Answer> {
        self.inner.lock().expect("container lock").answers.clone()
    }

    /// Query suggestions.
    pub fn suggestions(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("container lock")
            .suggestions
            .iter()
            .cloned()
            .collect()
    }

    /// Spelling corrections.
    pub fn corrections(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("container lock")
            .corrections
            .iter()
            .cloned()
            .collect()
    }

    /// Merged infoboxes.
    pub fn infoboxes(&self) -> Vec<Infobox> {
        self.inner.lock().expect("container lock").infoboxes.clone()
    }

    /// Per-engine timings.
    pub fn timings(&self) -> Vec<EngineTiming> {
        self.inner.lock().expect("container lock").timings.clone()
    }

    /// Engines that produced no results, with their reasons.
    pub fn unresponsive(&self) -> Vec<UnresponsiveEngine> {
        self.inner
            .lock()
            .expect("container lock")
            .unresponsive
            .clone()
    }

    /// Mean of the backends' reported total result counts, if any.
    pub fn number_of_results(&self) -> Option<u64> {
        let inner = self.inner.lock().expect("container lock");
        if inner.number_of_results.is_empty() {
            return None;
        }
        let sum: u64 = inner.number_of_results.iter().sum();
        Some(sum / inner.number_of_results.len() as u64)
    }

    /// Number of distinct merged results.
    pub fn result_count(&self) -> usize {
        self.inner.lock().expect("container lock").merged.len()
    }

    /// Raw entries contributed by one engine.
    pub fn raw_count(&self, engine: &str) -> usize {
        self.inner
            .lock()
            .expect("container lock")
            .raw_counts
            .get(engine)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::HitResult;
    use std::collections::BTreeMap;

    fn container() -> ResultContainer {
        ResultContainer::new(HashMap::new())
    }

    fn hit(url: &str, title: &str, content: &str) -> ResultEntry {
        ResultEntry::Hit(HitResult::new(url, title, content))
    }

    #[test]
    fn test_single_hit_at_rank_three_scores_one_third() {
        let c = container();
        c.extend(
            "a",
            EngineCategory::General,
            vec![
                hit("https://one.com", "1", "c"),
                hit("https://two.com", "2", "c"),
                hit("https://three.com", "3", "c"),
            ],
        );
        c.close();
        let results = c.ordered_results().unwrap();
        let third = results
            .iter()
            .find(|r| r.url == "https://three.com")
            .unwrap();
        // weight = 1.0 * 1 position, score = 1.0 / 3
        assert!((third.score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_engines_ranks_two_and_five_score() {
        let c = container();
        let mut batch_a = vec![hit("https://filler1.com", "f", "c")];
        batch_a.push(hit("https://shared.com/x", "Shared", "c"));
        c.extend("a", EngineCategory::General, batch_a);

        let mut batch_b: Vec<ResultEntry> = (1..5)
            .map(|i| hit(&format!("https://filler-b{i}.com"), "f", "c"))
            .collect();
        batch_b.push(hit("https://shared.com/x", "Shared", "c"));
        c.extend("b", EngineCategory::General, batch_b);

        c.close();
        let results = c.ordered_results().unwrap();
        let shared = results
            .iter()
            .find(|r| r.url == "https://shared.com/x")
            .unwrap();
        assert_eq!(shared.positions.len(), 2);
        // weight = 1.0 * 1.0 * 2 = 2.0, score = 2/2 + 2/5 = 1.4
        assert!((shared.score - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_end_to_end_cats_scenario() {
        let c = container();
        c.extend(
            "A",
            EngineCategory::General,
            vec![hit("https://e.com/1", "Cats", "about cats")],
        );
        c.extend(
            "B",
            EngineCategory::General,
            vec![hit("http://e.com/1", "Cats - Wikipedia", "about cats")],
        );
        c.close();

        let results = c.ordered_results().unwrap();
        assert_eq!(results.len(), 1);
        let merged = &results[0];
        assert_eq!(merged.url, "https://e.com/1");
        assert_eq!(merged.title, "Cats - Wikipedia");
        assert_eq!(merged.engines.len(), 2);
        assert_eq!(merged.positions, vec![1, 1]);
        // weight = 1*1*2 = 2, score = 2/1 + 2/1 = 4
        assert!((merged.score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_commutative_across_batch_order() {
        let batch_a = vec![
            hit("https://e.com/1", "Cats", "short"),
            hit("https://other.com", "Other", "x"),
        ];
        let batch_b = vec![hit("http://e.com/1", "Cats - Wikipedia", "a longer snippet")];

        let forward = container();
        forward.extend("a", EngineCategory::General, batch_a.clone());
        forward.extend("b", EngineCategory::General, batch_b.clone());
        forward.close();

        let reverse = container();
        reverse.extend("b", EngineCategory::General, batch_b);
        reverse.extend("a", EngineCategory::General, batch_a);
        reverse.close();

        let mut f = forward.ordered_results().unwrap();
        let mut r = reverse.ordered_results().unwrap();
        f.sort_by_key(|m| m.fingerprint);
        r.sort_by_key(|m| m.fingerprint);

        assert_eq!(f.len(), r.len());
        for (a, b) in f.iter().zip(r.iter()) {
            assert_eq!(a.fingerprint, b.fingerprint);
            assert_eq!(a.url, b.url);
            assert_eq!(a.title, b.title);
            assert_eq!(a.content, b.content);
            assert_eq!(a.engines, b.engines);
            assert!((a.score - b.score).abs() < 1e-9);
        }
    }

    #[test]
    fn test_close_idempotent() {
        let c = container();
        c.extend(
            "a",
            EngineCategory::General,
            vec![hit("https://e.com", "T", "C")],
        );
        c.close();
        let first = c.ordered_results().unwrap();
        c.close();
        let second = c.ordered_results().unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].score, second[0].score);
        assert_eq!(first[0].url, second[0].url);
    }

    #[test]
    fn test_late_merges_dropped_after_close() {
        let c = container();
        c.extend(
            "a",
            EngineCategory::General,
            vec![hit("https://e.com", "T", "C")],
        );
        c.close();
        c.extend(
            "b",
            EngineCategory::General,
            vec![hit("https://late.com", "Late", "C")],
        );
        assert_eq!(c.result_count(), 1);
        assert_eq!(c.raw_count("b"), 0);
    }

    #[test]
    fn test_ordered_results_requires_close() {
        let c = container();
        c.extend(
            "a",
            EngineCategory::General,
            vec![hit("https://e.com", "T", "C")],
        );
        assert!(c.ordered_results().is_err());
        c.close();
        assert!(c.ordered_results().is_ok());
    }

    #[test]
    fn test_engine_weight_multiplies() {
        let mut weights = HashMap::new();
        weights.insert("heavy".to_string(), 2.0);
        let c = ResultContainer::new(weights);
        c.extend(
            "heavy",
            EngineCategory::General,
            vec![hit("https://e.com", "T", "C")],
        );
        c.close();
        let results = c.ordered_results().unwrap();
        // weight = 2.0 * 1, rank 1 -> score 2.0
        assert!((results[0].score - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_suggestions_and_corrections_are_sets() {
        let c = container();
        c.extend(
            "a",
            EngineCategory::General,
            vec![
                ResultEntry::Suggestion("rust".into()),
                ResultEntry::Suggestion("rust".into()),
                ResultEntry::Correction("rest".into()),
            ],
        );
        c.extend(
            "b",
            EngineCategory::General,
            vec![ResultEntry::Suggestion("rust".into())],
        );
        assert_eq!(c.suggestions(), vec!["rust".to_string()]);
        assert_eq!(c.corrections(), vec!["rest".to_string()]);
    }

    #[test]
    fn test_answers_deduplicated_by_text() {
        let c = container();
        let answer = Answer {
            answer: "42".into(),
            url: None,
            engine: "a".into(),
        };
        c.extend(
            "a",
            EngineCategory::General,
            vec![ResultEntry::Answer(answer.clone())],
        );
        c.extend(
            "b",
            EngineCategory::General,
            vec![ResultEntry::Answer(Answer {
                engine: "b".into(),
                ..answer
            })],
        );
        assert_eq!(c.answers().len(), 1);
    }

    #[test]
    fn test_infobox_merge_by_id() {
        let c = container();
        let short = Infobox {
            id: "Q42".into(),
            title: "Short".into(),
            content: Some("brief".into()),
            attributes: BTreeMap::from([("born".to_string(), "1952".to_string())]),
            urls: vec!["https://a.com".into()],
            engine: "a".into(),
        };
        let long = Infobox {
            id: "Q42".into(),
            title: "Long".into(),
            content: Some("a much longer description".into()),
            attributes: BTreeMap::from([("died".to_string(), "2001".to_string())]),
            urls: vec!["https://b.com".into()],
            engine: "b".into(),
        };
        c.extend("a", EngineCategory::General, vec![ResultEntry::Infobox(short)]);
        c.extend("b", EngineCategory::General, vec![ResultEntry::Infobox(long)]);

        let boxes = c.infoboxes();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].title, "Long");
        assert_eq!(boxes[0].attributes.len(), 2);
        assert_eq!(boxes[0].urls.len(), 2);
    }

    #[test]
    fn test_number_of_results_averaged() {
        let c = container();
        c.extend(
            "a",
            EngineCategory::General,
            vec![ResultEntry::NumberOfResults(100)],
        );
        c.extend(
            "b",
            EngineCategory::General,
            vec![ResultEntry::NumberOfResults(300)],
        );
        assert_eq!(c.number_of_results(), Some(200));

        let empty = container();
        assert_eq!(empty.number_of_results(), None);
    }

    #[test]
    fn test_raw_counts_per_engine() {
        let c = container();
        c.extend(
            "a",
            EngineCategory::General,
            vec![
                hit("https://1.com", "1", "c"),
                ResultEntry::Suggestion("s".into()),
            ],
        );
        assert_eq!(c.raw_count("a"), 2);
        assert_eq!(c.raw_count("missing"), 0);
    }

    #[test]
    fn test_unresponsive_and_timings_recorded() {
        let c = container();
        c.add_unresponsive("slow", "timeout", false);
        c.add_unresponsive("banned", "captcha", true);
        c.add_timing(EngineTiming {
            engine: "fast".into(),
            total: Duration::from_millis(120),
            network: Duration::from_millis(100),
        });

        let unresponsive = c.unresponsive();
        assert_eq!(unresponsive.len(), 2);
        assert!(unresponsive.iter().any(|u| u.suspended));
        assert_eq!(c.timings().len(), 1);
    }

    #[test]
    fn test_grouping_splices_same_category_items() {
        // Three image hits interleaved with general hits: the grouping
        // pass keeps the image cluster contiguous.
        let weights = HashMap::new();
        let c = ResultContainer::new(weights);

        let mk = |url: &str, category: EngineCategory, template: Template| {
            let mut m = MergedResult::from_hit(
                HitResult::new(url, "t", "c").with_template(template),
                "e",
                category,
                1,
            );
            m.template = template;
            m
        };

        let sorted = vec![
            mk("https://g1.com", EngineCategory::General, Template::Default),
            mk("https://i1.com", EngineCategory::Images, Template::Image),
            mk("https://g2.com", EngineCategory::General, Template::Default),
            mk("https://i2.com", EngineCategory::Images, Template::Image),
            mk("https://i3.com", EngineCategory::Images, Template::Image),
        ];

        let grouped = c.group_pass(sorted);
        let urls: Vec<&str> = grouped.iter().map(|m| m.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://g1.com",
                "https://g2.com",
                "https://i1.com",
                "https://i2.com",
                "https://i3.com",
            ]
        );
    }

    #[test]
    fn test_grouping_capacity_exhausts() {
        let c = ResultContainer::with_grouping(
            HashMap::new(),
            GroupingConfig {
                max_group_size: 1,
                max_distance: 20,
            },
        );

        let mk = |url: &str| {
            MergedResult::from_hit(
                HitResult::new(url, "t", "c").with_template(Template::Image),
                "e",
                EngineCategory::Images,
                1,
            )
        };
        let other = MergedResult::from_hit(
            HitResult::new("https://g.com", "t", "c"),
            "e",
            EngineCategory::General,
            1,
        );

        let sorted = vec![
            mk("https://i1.com"),
            other,
            mk("https://i2.com"),
            mk("https://i3.com"),
        ];
        let grouped = c.group_pass(sorted);
        let urls: Vec<&str> = grouped.iter().map(|m| m.url.as_str()).collect();
        // Capacity 1: only i2 is spliced next to i1; i3 appends at the end
        // and opens a fresh group.
        assert_eq!(
            urls,
            vec![
                "https://i1.com",
                "https://i2.com",
                "https://g.com",
                "https://i3.com",
            ]
        );
    }
}
