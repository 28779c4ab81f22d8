//! Fan-out of one query to the eligible release sources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::shared::Shared;

use super::dedup::deduplicate_releases;
use super::rate_limiter::{RateDecision, RateLimitStatus, RateLimiter};
use super::{RateLimitedSource, RawRelease, RoutingMode, SearchOutcome, SearchQuery, SourceSearch};

/// Routes searches to release sources.
///
/// Eligibility, rate budgets and timeouts are read from the current
/// configuration on every call. The source set itself can be swapped with
/// [`SearchRouter::replace_sources`] when the configuration adds sources.
pub struct SearchRouter {
    sources: Shared<Vec<Arc<dyn SourceSearch>>>,
    limiter: RateLimiter,
    config: Shared<Config>,
}

impl SearchRouter {
    pub fn new(sources: Vec<Arc<dyn SourceSearch>>, config: Shared<Config>) -> Self {
        Self {
            sources: Shared::new(sources),
            limiter: RateLimiter::new(),
            config,
        }
    }

    /// Names of all registered sources.
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .current()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Swap in a rebuilt source set. Searches already running finish
    /// against the old set; rate windows are kept per source name.
    pub fn replace_sources(&self, sources: Vec<Arc<dyn SourceSearch>>) {
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        info!(sources = ?names, "Release sources replaced");
        self.sources.replace(Arc::new(sources));
    }

    /// Rate limit usage for a source under its configured budget.
    pub fn rate_status(&self, source: &str) -> RateLimitStatus {
        let config = self.config.current();
        let budget = config.searcher.rate_budget(source);
        self.limiter.status(source, &budget)
    }

    /// Query every eligible source in parallel and merge the results.
    ///
    /// Never fails: rate-limited sources are skipped, and sources that error
    /// or exceed their timeout are logged and left out of the merge.
    pub async fn search(&self, query: &SearchQuery, mode: RoutingMode) -> SearchOutcome {
        let start = Instant::now();
        let config = self.config.current();
        let searcher = &config.searcher;
        let sources = self.sources.current();

        let mut rate_limited = Vec::new();
        let mut to_query: Vec<(&Arc<dyn SourceSearch>, Duration)> = Vec::new();

        for source in sources.iter() {
            let name = source.name();
            if !source.kind().serves(mode) || !searcher.is_enabled(name) {
                continue;
            }

            match self.limiter.allow(name, &searcher.rate_budget(name)) {
                RateDecision::Permit => to_query.push((source, searcher.timeout_for(name))),
                RateDecision::Deny { retry_after } => {
                    debug!(
                        source = name,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Source over budget, skipping"
                    );
                    metrics::SOURCE_QUERIES
                        .with_label_values(&[name, "rate_limited"])
                        .inc();
                    rate_limited.push(RateLimitedSource {
                        source: name.to_string(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    });
                }
            }
        }

        debug!(
            query = %query.text,
            mode = mode.as_str(),
            sources = to_query.len(),
            "Starting routed search"
        );

        let search_futures = to_query.iter().map(|(source, timeout)| {
            let timeout = *timeout;
            async move {
                let result = tokio::time::timeout(timeout, source.search(query)).await;
                (source.name().to_string(), timeout, result)
            }
        });
        let results = join_all(search_futures).await;

        let mut sources_queried = Vec::with_capacity(results.len());
        let mut source_errors: HashMap<String, String> = HashMap::new();
        let mut all_raw: Vec<RawRelease> = Vec::new();

        for (name, timeout, result) in results {
            sources_queried.push(name.clone());
            match result {
                Ok(Ok(mut releases)) => {
                    metrics::SOURCE_QUERIES.with_label_values(&[name.as_str(), "ok"]).inc();
                    debug!(
                        source = %name,
                        results = releases.len(),
                        "Source search complete"
                    );
                    all_raw.append(&mut releases);
                }
                Ok(Err(e)) => {
                    metrics::SOURCE_QUERIES.with_label_values(&[name.as_str(), "error"]).inc();
                    warn!(source = %name, error = %e, "Source search failed");
                    source_errors.insert(name, e.to_string());
                }
                Err(_) => {
                    metrics::SOURCE_QUERIES
                        .with_label_values(&[name.as_str(), "timeout"])
                        .inc();
                    warn!(
                        source = %name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Source search timed out"
                    );
                    source_errors.insert(
                        name,
                        format!("timed out after {}ms", timeout.as_millis()),
                    );
                }
            }
        }

        let candidates = deduplicate_releases(all_raw);
        let elapsed = start.elapsed();

        metrics::SEARCHES_TOTAL
            .with_label_values(&[mode.as_str()])
            .inc();
        metrics::SEARCH_DURATION
            .with_label_values(&[mode.as_str()])
            .observe(elapsed.as_secs_f64());
        metrics::SEARCH_CANDIDATES
            .with_label_values(&[])
            .observe(candidates.len() as f64);

        info!(
            query = %query.text,
            mode = mode.as_str(),
            candidates = candidates.len(),
            failed_sources = source_errors.len(),
            rate_limited = rate_limited.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Search complete"
        );

        SearchOutcome {
            query: query.clone(),
            mode,
            candidates,
            sources_queried,
            source_errors,
            rate_limited,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::MediaKind;
    use crate::searcher::SourceKind;
    use crate::testing::{fixtures, MockSource};

    fn config_with(sources: &[(&str, SourceKind)], max_requests: u32, timeout_ms: u64) -> Shared<Config> {
        let mut config = Config::default();
        config.searcher.default_timeout_ms = timeout_ms;
        for (name, kind) in sources {
            let mut source = fixtures::source_config(name, *kind);
            source.rate_limit.max_requests = max_requests;
            config.searcher.sources.push(source);
        }
        Shared::new(config)
    }

    fn query() -> SearchQuery {
        SearchQuery::text("Some Movie 2021", MediaKind::Movie)
    }

    #[tokio::test]
    async fn test_mode_selects_source_kind() {
        let agg = Arc::new(MockSource::new("agg", SourceKind::Aggregator));
        let direct = Arc::new(MockSource::new("direct", SourceKind::Direct));
        agg.add_release(fixtures::raw_release("Some.Movie.2021.1080p.WEB-DL", "agg", 1_000));
        direct.add_release(fixtures::raw_release("Some.Movie.2021.720p.HDTV", "direct", 500));

        let router = SearchRouter::new(
            vec![agg.clone(), direct.clone()],
            config_with(&[("agg", SourceKind::Aggregator), ("direct", SourceKind::Direct)], 10, 1_000),
        );

        let outcome = router.search(&query(), RoutingMode::Aggregator).await;
        assert_eq!(outcome.sources_queried, vec!["agg"]);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(direct.search_count(), 0);

        let outcome = router.search(&query(), RoutingMode::Direct).await;
        assert_eq!(outcome.sources_queried, vec!["direct"]);
        assert_eq!(agg.search_count(), 1);
    }

    #[tokio::test]
    async fn test_same_release_from_two_sources_is_one_candidate() {
        let a = Arc::new(MockSource::new("a", SourceKind::Direct));
        let b = Arc::new(MockSource::new("b", SourceKind::Direct));
        a.add_release(fixtures::raw_release("Some.Movie.2021.1080p.WEB-DL.x264-GRP", "a", 4_000_000_000));
        b.add_release(fixtures::raw_release("Some Movie 2021 1080p WEB-DL x264-GRP", "b", 4_001_000_000));

        let router = SearchRouter::new(
            vec![a, b],
            config_with(&[("a", SourceKind::Direct), ("b", SourceKind::Direct)], 10, 1_000),
        );
        let outcome = router.search(&query(), RoutingMode::Direct).await;

        assert_eq!(outcome.candidates.len(), 1);
        let candidate = &outcome.candidates[0];
        let mut seen = vec![candidate.source.clone()];
        seen.extend(candidate.also_seen_on.iter().cloned());
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failing_and_slow_sources_are_excluded() {
        let ok = Arc::new(MockSource::new("ok", SourceKind::Direct));
        let broken = Arc::new(MockSource::new("broken", SourceKind::Direct));
        let slow = Arc::new(MockSource::new("slow", SourceKind::Direct));
        ok.add_release(fixtures::raw_release("Some.Movie.2021.1080p.WEB-DL", "ok", 1_000));
        broken.set_error("connection refused");
        slow.add_release(fixtures::raw_release("Some.Movie.2021.2160p.WEB-DL", "slow", 1_000));
        slow.set_delay(Duration::from_secs(5));

        let router = SearchRouter::new(
            vec![ok, broken, slow],
            config_with(
                &[("ok", SourceKind::Direct), ("broken", SourceKind::Direct), ("slow", SourceKind::Direct)],
                10,
                100,
            ),
        );

        let started = Instant::now();
        let outcome = router.search(&query(), RoutingMode::Direct).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].source, "ok");
        assert!(outcome.source_errors.contains_key("broken"));
        assert!(outcome.source_errors["slow"].contains("timed out"));
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_empty_not_error() {
        let broken = Arc::new(MockSource::new("broken", SourceKind::Direct));
        broken.set_error("boom");

        let router = SearchRouter::new(
            vec![broken],
            config_with(&[("broken", SourceKind::Direct)], 10, 1_000),
        );
        let outcome = router.search(&query(), RoutingMode::Direct).await;
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.source_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_over_budget_source_is_skipped() {
        let source = Arc::new(MockSource::new("limited", SourceKind::Direct));
        let router = SearchRouter::new(
            vec![source.clone()],
            config_with(&[("limited", SourceKind::Direct)], 2, 1_000),
        );

        router.search(&query(), RoutingMode::Direct).await;
        router.search(&query(), RoutingMode::Direct).await;
        let third = router.search(&query(), RoutingMode::Direct).await;

        assert_eq!(source.search_count(), 2);
        assert!(third.sources_queried.is_empty());
        assert_eq!(third.rate_limited.len(), 1);
        assert_eq!(third.rate_limited[0].source, "limited");
        assert_eq!(router.rate_status("limited").remaining, 0);
    }

    #[tokio::test]
    async fn test_disabled_source_and_config_reload() {
        let source = Arc::new(MockSource::new("s", SourceKind::Direct));
        let config = config_with(&[("s", SourceKind::Direct)], 10, 1_000);
        let router = SearchRouter::new(vec![source.clone()], config.clone());

        let mut updated = (*config.current()).clone();
        updated.searcher.sources[0].enabled = false;
        config.replace(Arc::new(updated));

        let outcome = router.search(&query(), RoutingMode::Direct).await;
        assert!(outcome.sources_queried.is_empty());
        assert_eq!(source.search_count(), 0);
    }

    #[tokio::test]
    async fn test_replaced_sources_serve_next_search() {
        let old = Arc::new(MockSource::new("old", SourceKind::Direct));
        let added = Arc::new(MockSource::new("added", SourceKind::Direct));
        let config = config_with(
            &[("old", SourceKind::Direct), ("added", SourceKind::Direct)],
            10,
            1_000,
        );
        let router = SearchRouter::new(vec![old.clone()], config);
        assert_eq!(router.source_names(), vec!["old"]);

        router.replace_sources(vec![old.clone(), added.clone()]);

        let outcome = router.search(&query(), RoutingMode::Direct).await;
        assert_eq!(outcome.sources_queried.len(), 2);
        assert_eq!(added.search_count(), 1);
        assert_eq!(router.source_names(), vec!["old", "added"]);
    }
}
