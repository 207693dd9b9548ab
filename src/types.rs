//! Core data model.
//!
//! Value records unless noted `stateful`. [`Project`] is the sole stateful,
//! owned aggregate; everything else (correspondence, probe, comparison
//! records) is embedded by value.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project under audit. The controller exclusively mutates `status`,
/// `progress`, and `results`; every other field is fixed at creation.
///
/// Invariant: `status == ProjectStatus::Completed` iff
/// `progress.stage == StageTag::Completed && progress.percentage == 100`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub old_base_url: String,
    pub new_base_url: String,
    pub inputs: ProjectInputs,
    pub status: ProjectStatus,
    pub progress: Progress,
    pub results: AuditResults,
}

impl Project {
    pub fn new(id: impl Into<String>, old_base_url: impl Into<String>, new_base_url: impl Into<String>) -> Self {
        Project {
            id: id.into(),
            old_base_url: old_base_url.into(),
            new_base_url: new_base_url.into(),
            inputs: ProjectInputs::default(),
            status: ProjectStatus::Pending,
            progress: Progress::not_started(),
            results: AuditResults::default(),
        }
    }

    /// Checks the status/progress consistency invariant: completed status
    /// iff stage is `Completed` and percentage is 100.
    pub fn is_consistent(&self) -> bool {
        (self.status == ProjectStatus::Completed)
            == (self.progress.stage == StageTag::Completed && self.progress.percentage == 100)
    }
}

/// Optional input file handles. A handle is an opaque string the
/// `InputFileReader` collaborator resolves (a path, a blob id, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectInputs {
    pub old_sitemap: Option<String>,
    pub new_sitemap: Option<String>,
    pub analytics_export: Option<String>,
    pub redirect_map: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub stage: StageTag,
    pub percentage: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Progress {
    pub fn not_started() -> Self {
        Progress {
            stage: StageTag::Pending,
            percentage: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// One stage tag per row of the stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageTag {
    Pending,
    ParsingSitemaps,
    ParsingAnalytics,
    ParsingRedirects,
    ComparingUrls,
    CheckingOldUrls,
    CheckingNewUrls,
    ValidatingSeo,
    Finalizing,
    TestingPerformance,
    TestingMobile,
    Completed,
    Failed,
}

impl StageTag {
    /// The percentage this stage tag stamps into `Progress` on entry.
    pub fn percentage(self) -> u8 {
        match self {
            StageTag::Pending => 0,
            StageTag::ParsingSitemaps => 10,
            StageTag::ParsingAnalytics => 25,
            StageTag::ParsingRedirects => 35,
            StageTag::ComparingUrls => 50,
            StageTag::CheckingOldUrls => 60,
            StageTag::CheckingNewUrls => 75,
            StageTag::ValidatingSeo => 85,
            StageTag::Finalizing => 90,
            StageTag::TestingPerformance => 92,
            StageTag::TestingMobile => 96,
            StageTag::Completed => 100,
            StageTag::Failed => 0,
        }
    }
}

// ---------------------------------------------------------------------
// C1 input records
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsEntry {
    pub url: String,
    pub clicks: u64,
    pub impressions: u64,
    pub ctr: f64,
    pub position: f64,
}

/// Old-URL string (pre-normalization) -> new-URL string.
pub type RedirectMap = HashMap<String, String>;

// ---------------------------------------------------------------------
// C3 correspondence
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedPair {
    pub old_url: String,
    pub new_url: String,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Direct,
    Mapped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingEntry {
    pub old_url: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOnlyEntry {
    pub new_url: String,
    #[serde(rename = "type")]
    pub kind: NewOnlyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewOnlyKind {
    NewContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrespondenceSummary {
    pub matched: usize,
    pub redirected: usize,
    pub missing: usize,
    pub new_only: usize,
    /// Formatted to 2 decimals, e.g. `"66.67"`.
    pub match_rate: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrespondenceReport {
    pub matched: Vec<MatchedPair>,
    pub redirected: Vec<MatchedPair>,
    pub missing: Vec<MissingEntry>,
    pub new_only: Vec<NewOnlyEntry>,
    pub summary: CorrespondenceSummary,
    pub pattern_changes: Vec<PatternRename>,
}

/// A candidate path-prefix rename inferred by pattern-change detection
///. Stored but not consumed downstream — see DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRename {
    pub old_pattern: String,
    pub new_pattern: String,
    pub old_count: usize,
    pub new_count: usize,
    pub confidence: f64,
}

// ---------------------------------------------------------------------
// C4 probe results
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectHop {
    pub url: String,
    pub status_code: u16,
    pub index: usize,
}

/// `status_code == 0` signals a transport failure (`error` populated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub url: String,
    pub status_code: u16,
    pub status_text: String,
    pub response_time_ms: u128,
    pub final_url: String,
    pub is_redirect: bool,
    pub redirect_chain: Vec<RedirectHop>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub server: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn is_transport_failure(&self) -> bool {
        self.status_code == 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headings {
    pub h1_count: usize,
    pub h2_count: usize,
    pub h3_count: usize,
    pub h1_text: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub canonical_url: Option<String>,
    pub og_tags: HashMap<String, String>,
    pub headings: Headings,
    pub structured_data: bool,
    pub internal_link_count: usize,
    pub external_link_count: usize,
}

/// Partition of a probe batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeCategorization {
    pub ok: Vec<ProbeResult>,
    pub redirects: Vec<ProbeResult>,
    pub client_errors: Vec<ProbeResult>,
    pub server_errors: Vec<ProbeResult>,
    pub network_errors: Vec<ProbeResult>,
    pub average_response_time_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedirectAnalysis {
    pub by_code: HashMap<u16, usize>,
    pub chain_lengths: Vec<usize>,
    pub long_chains: Vec<String>,
}

// ---------------------------------------------------------------------
// C5 headless audit results
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerfMetrics {
    pub performance_score: u8,
    pub lcp: f64,
    pub cls: f64,
    pub inp: f64,
    pub fcp: f64,
    pub ttfb: f64,
    pub tti: f64,
    pub tbt: f64,
    pub speed_index: f64,
    pub total_bytes: u64,
    pub request_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VitalAssessment {
    Good,
    NeedsImprovement,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Viewport {
    Mobile,
    Tablet,
    Desktop,
}

impl Viewport {
    pub const ALL: [Viewport; 3] = [Viewport::Mobile, Viewport::Tablet, Viewport::Desktop];

    /// `(width, height)` in CSS pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Viewport::Mobile => (375, 667),
            Viewport::Tablet => (768, 1024),
            Viewport::Desktop => (1920, 1080),
        }
    }

    pub fn is_touch(self) -> bool {
        matches!(self, Viewport::Mobile | Viewport::Tablet)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewportResult {
    pub viewport: Viewport,
    pub screenshot_ref: Option<String>,
    pub issues: Vec<String>,
    pub has_overflow: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileTestResult {
    pub url: String,
    pub viewports: Vec<ViewportResult>,
    pub overall_issues: Vec<String>,
    pub responsive: bool,
}

// ---------------------------------------------------------------------
// C6 comparison results
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Minor,
    Moderate,
    Major,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldComparison {
    pub matched: bool,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeoComparison {
    pub new_url: String,
    pub title: FieldComparison,
    pub description: FieldComparison,
    pub h1: FieldComparison,
    pub canonical: FieldComparison,
    pub match_score: u8,
    pub severity: Severity,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeoComparisonSummary {
    pub pairs_compared: usize,
    pub perfect_matches: usize,
    pub average_score: f64,
    pub by_severity: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImprovementLabel {
    SignificantImprovement,
    ModerateImprovement,
    MinimalChange,
    ModerateRegression,
    SignificantRegression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDelta {
    pub old_value: f64,
    pub new_value: f64,
    pub improvement_pct: f64,
    pub label: ImprovementLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfComparison {
    pub url_key: String,
    pub old_score: u8,
    pub new_score: u8,
    pub score_delta: i16,
    pub improved: bool,
    pub metrics: HashMap<String, MetricDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerfBucket {
    Improved,
    Regressed,
    Unchanged,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerfComparisonSummary {
    pub improved: usize,
    pub regressed: usize,
    pub unchanged: usize,
    pub average_score_delta: f64,
    pub per_vital_improved_pct: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobileBucket {
    Improved,
    Regressed,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileComparison {
    pub url_key: String,
    pub old_issue_count: usize,
    pub new_issue_count: usize,
    pub bucket: MobileBucket,
    pub common_issues: Vec<String>,
}

// ---------------------------------------------------------------------
// Aggregate results / stage outcomes
// ---------------------------------------------------------------------

/// Typed stand-in for the source's schema-less per-stage field
///; one optional slot per stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditResults {
    pub correspondence: Option<CorrespondenceReport>,
    pub old_status: Option<ProbeCategorization>,
    pub new_status: Option<ProbeCategorization>,
    pub seo: Option<SeoStageResult>,
    pub broken_links: Option<Vec<ProbeResult>>,
    pub redirect_analysis: Option<RedirectAnalysis>,
    pub performance: Option<PerfStageResult>,
    pub mobile: Option<MobileStageResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeoStageResult {
    pub pairs: Vec<SeoComparison>,
    pub summary: SeoComparisonSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfStageResult {
    pub pairs: Vec<PerfComparison>,
    pub summary: PerfComparisonSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileStageResult {
    pub old_results: Vec<MobileTestResult>,
    pub new_results: Vec<MobileTestResult>,
    pub comparisons: Vec<MobileComparison>,
}

/// One URL pair selected by the sampling heuristic, threaded from C3
/// output into C4/C5/C6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlPair {
    pub old_url: String,
    pub new_url: String,
}

/// Progress callback payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
    pub current_url: String,
}

/// Event emitted to the `Notifier` collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted { stage: StageTag },
    StageProgress { stage: StageTag, percentage: u8 },
    StageCompleted { stage: StageTag },
    PipelineCompleted,
    PipelineFailed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_consistency_holds_when_freshly_created() {
        let project = Project::new("p1", "https://old.example.com", "https://new.example.com");
        assert!(project.is_consistent());
    }

    #[test]
    fn project_consistency_flags_mismatched_completed_status() {
        let mut project = Project::new("p1", "https://old.example.com", "https://new.example.com");
        project.status = ProjectStatus::Completed;
        assert!(!project.is_consistent());
    }

    #[test]
    fn stage_percentages_match_the_stage_graph_table() {
        assert_eq!(StageTag::ParsingSitemaps.percentage(), 10);
        assert_eq!(StageTag::ValidatingSeo.percentage(), 85);
        assert_eq!(StageTag::Completed.percentage(), 100);
    }

    // P5
    #[test]
    fn invariant_p5_stage_sequence_percentage_is_monotonic_and_completed_is_100() {
        const ORDER: [StageTag; 11] = [
            StageTag::ParsingSitemaps,
            StageTag::ParsingAnalytics,
            StageTag::ParsingRedirects,
            StageTag::ComparingUrls,
            StageTag::CheckingOldUrls,
            StageTag::CheckingNewUrls,
            StageTag::ValidatingSeo,
            StageTag::Finalizing,
            StageTag::TestingPerformance,
            StageTag::TestingMobile,
            StageTag::Completed,
        ];
        let mut previous = 0;
        for stage in ORDER {
            let percentage = stage.percentage();
            assert!(percentage > previous, "{stage:?} ({percentage}) did not advance past {previous}");
            previous = percentage;
        }
        assert_eq!(previous, 100);

        for stage in ORDER {
            assert_eq!(stage.percentage() == 100, stage == StageTag::Completed);
        }
    }
}
