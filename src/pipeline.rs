//! Pipeline controller (C7).
//!
//! A single event-loop function drives the fixed stage sequence: each stage
//! mutates a `Project` through the `ProjectStore` trait and checkpoints
//! after the stage (and after each meaningful sub-batch, never
//! mid-probe-batch).
//! C4/C5 are reached through `ProbeBackend`/`HeadlessBackend` traits so the
//! controller itself never touches the network directly, matching the
//! "external collaborator" boundary for HTTP/headless-browser capability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::correspondence;
use crate::error::{AuditError, Result};
use crate::headless::HeadlessConfig;
use crate::input_readers::{self, SitemapFetcher};
use crate::normalize::path_of;
use crate::probe::{self, ProbeConfig, ProgressCallback};
use crate::store::{InputFileReader, Notifier, ProjectStore};
use crate::types::{
    AnalyticsEntry, AuditResults, MobileStageResult, MobileTestResult, PerfMetrics, PerfStageResult, PipelineEvent,
    Progress, ProjectStatus, RedirectMap, SeoStageResult, StageTag, UrlPair,
};

/// One field per pipeline tunable, with `Default`
/// matching the documented defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub probe: ProbeConfig,
    pub headless: HeadlessConfig,
    /// Old/new status-check budget per stage. The source hardcodes 100
    /// with no configurability; here it is a field.
    pub status_check_budget: usize,
    /// Cap on matched+redirected pairs sent through SEO validation.
    pub seo_validation_cap: usize,
    /// Inter-SEO-fetch sleep, ms.
    pub seo_inter_fetch_delay_ms: u64,
    /// Performance-audit sample size.
    pub performance_budget: usize,
    /// Mobile-audit sample size.
    pub mobile_budget: usize,
    /// Root directory screenshots are written under
    /// (`<root>/<project_id>/<side>/`).
    pub screenshot_root: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            probe: ProbeConfig::default(),
            headless: HeadlessConfig::default(),
            status_check_budget: 100,
            seo_validation_cap: 20,
            seo_inter_fetch_delay_ms: 500,
            performance_budget: 10,
            mobile_budget: 5,
            screenshot_root: "screenshots".to_string(),
        }
    }
}

/// C4 reached as a collaborator, so the controller never touches the
/// network directly.
#[async_trait]
pub trait ProbeBackend: Send + Sync {
    async fn probe_batch(&self, urls: Vec<String>, config: &ProbeConfig, on_progress: Option<ProgressCallback>) -> Vec<crate::types::ProbeResult>;

    async fn fetch_content(&self, url: &str) -> Option<crate::types::PageContent>;
}

/// C5 reached as a collaborator. Session lifecycle (create/reuse/delete)
/// is the implementation's concern, not the controller's.
#[async_trait]
pub trait HeadlessBackend: Send + Sync {
    async fn performance_for(&self, url: &str) -> Option<PerfMetrics>;
    async fn mobile_for(&self, url: &str, screenshot_dir_ref: &str) -> MobileTestResult;
}

/// Runs every stage of the migration audit pipeline for `project_id`
///. On any stage error, marks the project `failed` and
/// stops; per-URL failures inside a stage never abort the run.
#[instrument(skip(store, file_reader, probe_backend, headless_backend, notifier, sitemap_fetcher, config))]
pub async fn run_pipeline(
    store: &dyn ProjectStore,
    file_reader: &dyn InputFileReader,
    probe_backend: &dyn ProbeBackend,
    headless_backend: &dyn HeadlessBackend,
    notifier: &dyn Notifier,
    sitemap_fetcher: &dyn SitemapFetcher,
    project_id: &str,
    config: &PipelineConfig,
) -> Result<()> {
    let mut project = store.load(project_id).await?;
    project.status = ProjectStatus::Processing;

    match run_stages(&mut project, store, file_reader, probe_backend, headless_backend, notifier, sitemap_fetcher, config).await {
        Ok(()) => {
            project.status = ProjectStatus::Completed;
            project.progress = Progress {
                stage: StageTag::Completed,
                percentage: 100,
                started_at: project.progress.started_at,
                completed_at: Some(Utc::now()),
                error: None,
            };
            store.save(&project).await?;
            notifier.notify(project_id, PipelineEvent::PipelineCompleted).await;
            Ok(())
        }
        Err(err) => {
            warn!(project_id, error = %err, "pipeline stage failed");
            project.status = ProjectStatus::Failed;
            project.progress.stage = StageTag::Failed;
            project.progress.error = Some(err.to_string());
            store.save(&project).await?;
            notifier.notify(project_id, PipelineEvent::PipelineFailed { reason: err.to_string() }).await;
            Err(err)
        }
    }
}

async fn run_stages(
    project: &mut crate::types::Project,
    store: &dyn ProjectStore,
    file_reader: &dyn InputFileReader,
    probe_backend: &dyn ProbeBackend,
    headless_backend: &dyn HeadlessBackend,
    notifier: &dyn Notifier,
    sitemap_fetcher: &dyn SitemapFetcher,
    config: &PipelineConfig,
) -> Result<()> {
    // Each stage records the percentage of the last stage that actually
    // completed before entering; a failure anywhere in the stage (including
    // its checkpoint) restores that percentage before propagating, so
    // `progress.percentage` never reports a stage that didn't finish.
    macro_rules! guard {
        ($prev:expr, $e:expr) => {
            match $e {
                Ok(v) => v,
                Err(err) => {
                    project.progress.percentage = $prev;
                    return Err(err);
                }
            }
        };
    }

    // parsing_sitemaps — 10%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::ParsingSitemaps, notifier).await;
    let mut old_urls = guard!(prev, read_sitemap_urls(project.inputs.old_sitemap.as_deref(), file_reader, sitemap_fetcher).await);
    let new_urls = guard!(prev, read_sitemap_urls(project.inputs.new_sitemap.as_deref(), file_reader, sitemap_fetcher).await);
    guard!(prev, checkpoint(project, store).await);

    // parsing_analytics — 25%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::ParsingAnalytics, notifier).await;
    let analytics = guard!(prev, read_analytics(project.inputs.analytics_export.as_deref(), file_reader).await);
    union_analytics_urls(&mut old_urls, &analytics);
    guard!(prev, checkpoint(project, store).await);

    // parsing_redirects — 35%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::ParsingRedirects, notifier).await;
    let redirect_map = guard!(prev, read_redirects(project.inputs.redirect_map.as_deref(), file_reader).await);
    guard!(prev, checkpoint(project, store).await);

    // comparing_urls — 50%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::ComparingUrls, notifier).await;
    let report = correspondence::resolve(&old_urls, &new_urls, &redirect_map);
    project.results.correspondence = Some(report.clone());
    guard!(prev, checkpoint(project, store).await);

    // checking_old_urls — 60%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::CheckingOldUrls, notifier).await;
    let old_sample: Vec<String> = old_urls.iter().take(config.status_check_budget).cloned().collect();
    let old_results = probe_backend.probe_batch(old_sample, &config.probe, None).await;
    let old_status = probe::categorize(&old_results);
    project.results.old_status = Some(old_status.clone());
    guard!(prev, checkpoint(project, store).await);

    // checking_new_urls — 75%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::CheckingNewUrls, notifier).await;
    let new_sample: Vec<String> = new_urls.iter().take(config.status_check_budget).cloned().collect();
    let new_results = probe_backend.probe_batch(new_sample, &config.probe, None).await;
    let new_status = probe::categorize(&new_results);
    project.results.new_status = Some(new_status);
    guard!(prev, checkpoint(project, store).await);

    // validating_seo — 85%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::ValidatingSeo, notifier).await;
    let seo_pairs = select_seo_pairs(&report, config.seo_validation_cap);
    let seo_result = run_seo_validation(&seo_pairs, probe_backend, config).await;
    project.results.seo = Some(seo_result);
    guard!(prev, checkpoint(project, store).await);

    // finalizing — 90%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::Finalizing, notifier).await;
    project.results.broken_links = Some(probe::broken_links(&old_status));
    let all_probed: Vec<_> = old_results.into_iter().chain(new_results).collect();
    project.results.redirect_analysis = Some(probe::analyze_redirects(&all_probed));
    guard!(prev, checkpoint(project, store).await);

    // testing_performance — 92%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::TestingPerformance, notifier).await;
    let all_pairs = all_url_pairs(&report);
    let perf_selection = select_urls(&all_pairs, &analytics, config.performance_budget);
    let perf_result = run_performance_stage(&perf_selection, headless_backend).await;
    project.results.performance = Some(perf_result);
    guard!(prev, checkpoint(project, store).await);

    // testing_mobile — 96%
    let prev = project.progress.percentage;
    enter_stage(project, StageTag::TestingMobile, notifier).await;
    let mobile_n = config.mobile_budget.min(perf_selection.len());
    let mobile_selection = &perf_selection[..mobile_n];
    let mobile_result = run_mobile_stage(mobile_selection, headless_backend, project_id_screenshot_dir(project, config).as_str()).await;
    project.results.mobile = Some(mobile_result);
    guard!(prev, checkpoint(project, store).await);

    Ok(())
}

async fn enter_stage(project: &mut crate::types::Project, stage: StageTag, notifier: &dyn Notifier) {
    let percentage = stage.percentage();
    project.progress.stage = stage;
    project.progress.percentage = percentage;
    if project.progress.started_at.is_none() {
        project.progress.started_at = Some(Utc::now());
    }
    notifier.notify(&project.id, PipelineEvent::StageStarted { stage }).await;
    notifier.notify(&project.id, PipelineEvent::StageProgress { stage, percentage }).await;
    info!(stage = ?stage, percentage, "entered stage");
}

async fn checkpoint(project: &crate::types::Project, store: &dyn ProjectStore) -> Result<()> {
    store.save(project).await
}

fn project_id_screenshot_dir(project: &crate::types::Project, config: &PipelineConfig) -> String {
    format!("{}/{}", config.screenshot_root.trim_end_matches('/'), project.id)
}

async fn read_sitemap_urls(handle: Option<&str>, file_reader: &dyn InputFileReader, fetcher: &dyn SitemapFetcher) -> Result<Vec<String>> {
    let Some(handle) = handle else { return Ok(Vec::new()) };
    let body = file_reader.read_to_string(handle).await?;
    let entries = input_readers::parse_sitemap(handle, &body, fetcher).await?;
    Ok(entries.into_iter().map(|e| e.url).collect())
}

async fn read_analytics(handle: Option<&str>, file_reader: &dyn InputFileReader) -> Result<Vec<AnalyticsEntry>> {
    let Some(handle) = handle else { return Ok(Vec::new()) };
    let body = file_reader.read_to_string(handle).await?;
    input_readers::parse_analytics_csv(&body)
}

async fn read_redirects(handle: Option<&str>, file_reader: &dyn InputFileReader) -> Result<RedirectMap> {
    let Some(handle) = handle else { return Ok(RedirectMap::new()) };
    let body = file_reader.read_to_string(handle).await?;
    input_readers::parse_redirect_csv(&body)
}

fn union_analytics_urls(old_urls: &mut Vec<String>, analytics: &[AnalyticsEntry]) {
    let mut seen: std::collections::HashSet<String> = old_urls.iter().cloned().collect();
    for entry in analytics {
        if seen.insert(entry.url.clone()) {
            old_urls.push(entry.url.clone());
        }
    }
}

/// Pairs from both `matched` and `redirected`, capped at `cap` total with
/// iteration-order truncation.
fn select_seo_pairs(report: &crate::types::CorrespondenceReport, cap: usize) -> Vec<UrlPair> {
    report
        .matched
        .iter()
        .map(|m| UrlPair { old_url: m.old_url.clone(), new_url: m.new_url.clone() })
        .chain(report.redirected.iter().map(|m| UrlPair { old_url: m.old_url.clone(), new_url: m.new_url.clone() }))
        .take(cap)
        .collect()
}

fn all_url_pairs(report: &crate::types::CorrespondenceReport) -> Vec<UrlPair> {
    report
        .matched
        .iter()
        .chain(report.redirected.iter())
        .map(|m| UrlPair { old_url: m.old_url.clone(), new_url: m.new_url.clone() })
        .collect()
}

async fn run_seo_validation(pairs: &[UrlPair], probe_backend: &dyn ProbeBackend, config: &PipelineConfig) -> SeoStageResult {
    let mut comparisons = Vec::new();
    for (i, pair) in pairs.iter().enumerate() {
        let old_content = probe_backend.fetch_content(&pair.old_url).await.unwrap_or_default();
        let new_content = probe_backend.fetch_content(&pair.new_url).await.unwrap_or_default();
        comparisons.push(crate::comparison::compare_seo(&old_content, &new_content, &pair.new_url));

        if i + 1 < pairs.len() {
            tokio::time::sleep(std::time::Duration::from_millis(config.seo_inter_fetch_delay_ms)).await;
        }
    }
    let summary = crate::comparison::summarize_seo(&comparisons);
    SeoStageResult { pairs: comparisons, summary }
}

async fn run_performance_stage(pairs: &[UrlPair], headless_backend: &dyn HeadlessBackend) -> PerfStageResult {
    let mut comparisons = Vec::new();
    for pair in pairs {
        let (Some(old), Some(new)) =
            (headless_backend.performance_for(&pair.old_url).await, headless_backend.performance_for(&pair.new_url).await)
        else {
            continue;
        };
        comparisons.push(crate::comparison::compare_performance(&pair.new_url, &old, &new));
    }
    let summary = crate::comparison::summarize_performance(&comparisons);
    PerfStageResult { pairs: comparisons, summary }
}

async fn run_mobile_stage(pairs: &[UrlPair], headless_backend: &dyn HeadlessBackend, screenshot_dir_ref: &str) -> MobileStageResult {
    let mut old_results = Vec::new();
    let mut new_results = Vec::new();
    let mut comparisons = Vec::new();

    for pair in pairs {
        let old = headless_backend.mobile_for(&pair.old_url, &format!("{screenshot_dir_ref}/old")).await;
        let new = headless_backend.mobile_for(&pair.new_url, &format!("{screenshot_dir_ref}/new")).await;
        comparisons.push(crate::comparison::compare_mobile(&pair.new_url, &old, &new));
        old_results.push(old);
        new_results.push(new);
    }

    MobileStageResult { old_results, new_results, comparisons }
}

/// URL-selection heuristic for performance/mobile sampling:
/// 1. any pair whose old or new path is `/`,
/// 2. then pairs whose old URL appears in analytics, sorted by
///    `clicks + impressions` descending, de-duplicated,
/// 3. then remaining pairs in iteration order,
/// 4. truncated to `budget`.
pub fn select_urls(pairs: &[UrlPair], analytics: &[AnalyticsEntry], budget: usize) -> Vec<UrlPair> {
    if budget == 0 {
        return Vec::new();
    }

    let mut selected: Vec<UrlPair> = Vec::new();
    let mut taken: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();

    let mut take = |pair: &UrlPair, selected: &mut Vec<UrlPair>, taken: &mut std::collections::HashSet<(String, String)>| {
        let key = (pair.old_url.clone(), pair.new_url.clone());
        if taken.insert(key) {
            selected.push(pair.clone());
        }
    };

    for pair in pairs {
        let old_is_root = path_of_or_raw(&pair.old_url) == "/";
        let new_is_root = path_of_or_raw(&pair.new_url) == "/";
        if old_is_root || new_is_root {
            take(pair, &mut selected, &mut taken);
        }
    }

    let traffic: HashMap<&str, u64> = analytics.iter().map(|e| (e.url.as_str(), e.clicks + e.impressions)).collect();
    let mut traffic_pairs: Vec<&UrlPair> = pairs.iter().filter(|p| traffic.contains_key(p.old_url.as_str())).collect();
    traffic_pairs.sort_by(|a, b| {
        let ta = traffic.get(a.old_url.as_str()).copied().unwrap_or(0);
        let tb = traffic.get(b.old_url.as_str()).copied().unwrap_or(0);
        tb.cmp(&ta)
    });
    for pair in traffic_pairs {
        take(pair, &mut selected, &mut taken);
    }

    for pair in pairs {
        take(pair, &mut selected, &mut taken);
    }

    selected.truncate(budget);
    selected
}

fn path_of_or_raw(url: &str) -> String {
    crate::normalize::normalize_url(url).map(|n| path_of(&n)).unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(old: &str, new: &str) -> UrlPair {
        UrlPair { old_url: old.to_string(), new_url: new.to_string() }
    }

    // B3
    #[test]
    fn boundary_b3_zero_budget_yields_empty() {
        let pairs = vec![pair("https://old.site/a", "https://new.site/a")];
        let selected = select_urls(&pairs, &[], 0);
        assert!(selected.is_empty());
    }

    #[test]
    fn boundary_b3_budget_larger_than_available_yields_all() {
        let pairs = vec![pair("https://old.site/a", "https://new.site/a"), pair("https://old.site/b", "https://new.site/b")];
        let selected = select_urls(&pairs, &[], 100);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn selection_prioritizes_root_then_traffic() {
        let pairs = vec![
            pair("https://old.site/low", "https://new.site/low"),
            pair("https://old.site/", "https://new.site/"),
            pair("https://old.site/high", "https://new.site/high"),
        ];
        let analytics = vec![
            AnalyticsEntry { url: "https://old.site/low".into(), clicks: 1, impressions: 1, ctr: 0.0, position: 0.0 },
            AnalyticsEntry { url: "https://old.site/high".into(), clicks: 100, impressions: 100, ctr: 0.0, position: 0.0 },
        ];
        let selected = select_urls(&pairs, &analytics, 2);
        assert_eq!(selected[0].old_url, "https://old.site/");
        assert_eq!(selected[1].old_url, "https://old.site/high");
    }

    #[test]
    fn select_seo_pairs_caps_and_privileges_matched_then_redirected() {
        let mut report = crate::types::CorrespondenceReport::default();
        for i in 0..25 {
            report.matched.push(crate::types::MatchedPair {
                old_url: format!("https://old.site/{i}"),
                new_url: format!("https://new.site/{i}"),
                match_type: crate::types::MatchType::Direct,
            });
        }
        let pairs = select_seo_pairs(&report, 20);
        assert_eq!(pairs.len(), 20);
    }
}
