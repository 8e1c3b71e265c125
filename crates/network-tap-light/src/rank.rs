//! Heuristic ranking of recorded calls.
//!
//! Pure computation over the supplied trace: no network, no model. Given the
//! same `(calls, page, task, k)` the output is identical, ties keep trace
//! order.

use std::collections::HashSet;

use soulbrowser_core_types::{Candidate, Initiator, PageContext, RecordedCall};
use url::Url;

use crate::config::RankerConfig;

const TRACKER_HOST_MARKERS: &[&str] = &[
    "google-analytics",
    "googletagmanager",
    "doubleclick",
    "facebook.net",
    "segment.io",
    "segment.com",
    "hotjar",
    "mixpanel",
    "amplitude",
    "sentry.io",
    "newrelic",
    "nr-data",
    "datadoghq",
    "bugsnag",
    "clarity.ms",
    "scorecardresearch",
    "adservice",
];

const TRACKER_PATH_WORDS: &[&str] = &[
    "collect",
    "beacon",
    "pixel",
    "track",
    "tracking",
    "telemetry",
    "analytics",
    "metrics",
    "log",
    "logs",
    "logging",
    "ping",
    "rum",
    "gtag",
    "gtm",
    "impression",
    "heartbeat",
];

const DATA_PATH_WORDS: &[&str] = &[
    "api", "graphql", "gql", "search", "query", "data", "ajax", "rest", "json", "feed",
    "results", "suggest",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "what", "show", "find", "get", "list",
    "all", "into", "about", "please", "are", "was", "were", "which", "when", "where", "how",
    "can", "you", "your", "give", "tell", "then", "than", "there", "their", "have", "has",
];

#[derive(Clone, Debug, Default)]
pub struct CallRanker {
    config: RankerConfig,
}

impl CallRanker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    /// Scores every http(s) call and returns the best `k`, highest first.
    pub fn rank(
        &self,
        calls: &[RecordedCall],
        page: &PageContext,
        task: &str,
        k: usize,
    ) -> Vec<Candidate> {
        if k == 0 {
            return Vec::new();
        }
        let tokens = task_tokens(task);
        let page_site = page
            .url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok())
            .and_then(|url| url.host_str().map(site_of));

        let mut candidates: Vec<Candidate> = calls
            .iter()
            .enumerate()
            .filter_map(|(idx, call)| {
                let url = Url::parse(&call.url).ok()?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return None;
                }
                Some(self.score_call(idx, call, &url, page_site.as_deref(), &tokens))
            })
            .collect();

        // Stable sort: equal scores keep trace order.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(k);
        candidates
    }

    fn score_call(
        &self,
        trace_index: usize,
        call: &RecordedCall,
        url: &Url,
        page_site: Option<&str>,
        tokens: &[String],
    ) -> Candidate {
        let weights = &self.config.weights;
        let mut score = 0.0;
        let mut reasons = Vec::new();

        let content_type = call
            .content_type
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let ct = content_type_signal(&content_type);
        if ct > 0.0 {
            score += weights.content_type * ct;
            reasons.push(format!("content-type {content_type}"));
        }

        if call.is_success() {
            score += weights.status;
            reasons.push(format!("status {}", call.status));
        } else {
            score -= weights.status;
            reasons.push(format!("non-2xx status {}", call.status));
        }

        let size = call.size_hint();
        let size_signal = size_signal(size, self.config.size_saturation_bytes);
        if size_signal > 0.0 {
            score += weights.size * size_signal;
            reasons.push(format!("{size} bytes"));
        }

        let initiator = initiator_signal(call.initiator);
        if initiator > 0.0 {
            score += weights.initiator * initiator;
            reasons.push(format!("initiator {:?}", call.initiator).to_ascii_lowercase());
        }

        if url.query().map(|q| !q.is_empty()).unwrap_or(false) {
            score += weights.query_bonus;
            reasons.push("has query parameters".to_string());
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let words = path_words(url.path());
        if words
            .iter()
            .any(|w| DATA_PATH_WORDS.contains(&w.as_str()) || is_version_segment(w))
        {
            score += weights.path_hint;
            reasons.push("data-like path".to_string());
        }

        if let Some(site) = page_site {
            if site_of(&host) == site {
                score += weights.same_site_bonus;
                reasons.push("same site as page".to_string());
            }
        }

        if !tokens.is_empty() {
            let hits = task_hits(tokens, call, &self.config);
            let overlap = overlap_signal(hits.len());
            if overlap > 0.0 {
                score += weights.task_overlap * overlap;
                reasons.push(format!("task tokens: {}", hits.join(", ")));
            }
        }

        // Applied last so no positive signal can mask it.
        if is_tracker(&host, &words) {
            score += weights.tracker_penalty;
            reasons.push("tracker/telemetry pattern".to_string());
        }

        Candidate {
            call: call.clone(),
            trace_index,
            score,
            reasons,
        }
    }
}

/// Ranks with default weights.
pub fn rank(
    calls: &[RecordedCall],
    page: &PageContext,
    task: &str,
    k: usize,
) -> Vec<Candidate> {
    CallRanker::default().rank(calls, page, task, k)
}

fn content_type_signal(content_type: &str) -> f64 {
    if content_type.contains("json") || content_type.contains("graphql") {
        1.0
    } else if content_type.contains("xml") && !content_type.contains("html") {
        0.6
    } else if content_type.contains("html") {
        0.35
    } else {
        0.0
    }
}

fn size_signal(bytes: u64, saturation: u64) -> f64 {
    if bytes == 0 {
        return 0.0;
    }
    let saturation = saturation.max(2) as f64;
    ((bytes as f64 + 1.0).ln() / (saturation + 1.0).ln()).min(1.0)
}

fn initiator_signal(initiator: Initiator) -> f64 {
    match initiator {
        Initiator::Fetch => 1.0,
        Initiator::Script => 0.5,
        Initiator::Other => 0.25,
        Initiator::Markup => 0.0,
    }
}

fn overlap_signal(hits: usize) -> f64 {
    match hits {
        0 => 0.0,
        1 => 0.4,
        2 => 0.7,
        _ => 1.0,
    }
}

fn path_words(path: &str) -> Vec<String> {
    path.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

fn is_version_segment(word: &str) -> bool {
    word.len() >= 2
        && word.starts_with('v')
        && word[1..].chars().all(|c| c.is_ascii_digit())
}

fn is_tracker(host: &str, path_words: &[String]) -> bool {
    TRACKER_HOST_MARKERS.iter().any(|m| host.contains(m))
        || path_words
            .iter()
            .any(|w| TRACKER_PATH_WORDS.contains(&w.as_str()))
}

/// Last two labels of a host; good enough to tell first-party calls apart.
fn site_of(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    labels[labels.len() - 2..].join(".")
}

/// Lowercased, de-duplicated content words of a task description.
pub fn task_tokens(task: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    task.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

fn task_hits(tokens: &[String], call: &RecordedCall, config: &RankerConfig) -> Vec<String> {
    let url = call.url.to_lowercase();
    let snippet: String = call
        .response_body
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(config.snippet_chars)
        .collect::<String>()
        .to_lowercase();
    tokens
        .iter()
        .filter(|token| url.contains(token.as_str()) || snippet.contains(token.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_call() -> RecordedCall {
        RecordedCall::new("https://shop.example.com/api/v2/search?q=red+shoes", "GET", 200)
            .with_content_type("application/json; charset=utf-8")
            .with_initiator(Initiator::Fetch)
            .with_body(r#"{"results":[{"name":"Red running shoes","price":59}]}"#)
    }

    fn tracker_call() -> RecordedCall {
        RecordedCall::new("https://shop.example.com/telemetry/collect", "POST", 200)
            .with_content_type("text/plain")
            .with_initiator(Initiator::Fetch)
            .with_body("ok")
    }

    #[test]
    fn data_call_outranks_tracker() {
        let page = PageContext::from_url("https://shop.example.com/");
        let ranked = rank(
            &[tracker_call(), data_call()],
            &page,
            "find red shoes prices",
            5,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].trace_index, 1);
        assert!(ranked[0].score > ranked[1].score);
        assert!(ranked[1]
            .reasons
            .iter()
            .any(|r| r.contains("tracker")));
    }

    #[test]
    fn ranking_is_deterministic_and_stable_on_ties() {
        let page = PageContext::default();
        let calls = vec![data_call(), data_call(), tracker_call(), data_call()];
        let first = rank(&calls, &page, "red shoes", 3);
        for _ in 0..10 {
            assert_eq!(rank(&calls, &page, "red shoes", 3), first);
        }
        let order: Vec<usize> = first.iter().map(|c| c.trace_index).collect();
        assert_eq!(order, vec![0, 1, 3]);
    }

    #[test]
    fn k_bounds_output_and_non_http_calls_are_skipped() {
        let calls = vec![
            RecordedCall::new("data:application/json,{}", "GET", 200),
            data_call(),
        ];
        let ranked = rank(&calls, &PageContext::default(), "", 5);
        assert_eq!(ranked.len(), 1);
        assert!(rank(&calls, &PageContext::default(), "", 0).is_empty());
    }

    #[test]
    fn task_overlap_is_a_saturating_step() {
        assert_eq!(overlap_signal(0), 0.0);
        assert_eq!(overlap_signal(1), 0.4);
        assert_eq!(overlap_signal(2), 0.7);
        assert_eq!(overlap_signal(3), 1.0);
        assert_eq!(overlap_signal(9), 1.0);
    }

    #[test]
    fn task_tokens_drop_stopwords_and_duplicates() {
        assert_eq!(
            task_tokens("Find the weather in Paris, the WEATHER tomorrow"),
            vec!["weather", "paris", "tomorrow"]
        );
    }

    #[test]
    fn size_signal_saturates() {
        assert_eq!(size_signal(0, 65_536), 0.0);
        assert!(size_signal(100, 65_536) < size_signal(10_000, 65_536));
        assert_eq!(size_signal(10_000_000, 65_536), 1.0);
    }
}
