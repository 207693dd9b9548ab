//! Comparison engine (C6).
//!
//! Pure functions over the data model. Title/description similarity
//! reuses the Levenshtein-based `similarity()` from the correspondence
//! resolver.

use std::collections::{HashMap, HashSet};

use crate::correspondence::similarity;
use crate::types::{
    FieldComparison, ImprovementLabel, MetricDelta, MobileBucket, MobileComparison, MobileTestResult, PageContent,
    PerfComparison, PerfComparisonSummary, PerfMetrics, SeoComparison, SeoComparisonSummary, Severity,
};

const MATCH_THRESHOLD: f64 = 0.8;
const SIGNIFICANT_CHANGE_THRESHOLD: f64 = 0.5;

/// Metrics where a lower value is better; sign is inverted when computing
/// improvement percentage.
const LOWER_IS_BETTER: [&str; 8] = ["lcp", "cls", "inp", "fcp", "ttfb", "tti", "tbt", "speed_index"];

/// Compares `old_page` and `new_page` metadata, producing field-level
/// matches, a weighted 0-100 score, and a severity bucket.
pub fn compare_seo(old_page: &PageContent, new_page: &PageContent, new_url: &str) -> SeoComparison {
    let mut issues = Vec::new();

    let title = compare_text_field(old_page.title.as_deref(), new_page.title.as_deref(), "title", 20, &mut issues);
    let description =
        compare_text_field(old_page.description.as_deref(), new_page.description.as_deref(), "description", 30, &mut issues);

    let h1_old = old_page.headings.h1_text.first().map(String::as_str);
    let h1_new = new_page.headings.h1_text.first().map(String::as_str);
    if old_page.headings.h1_count == 0 {
        issues.push("Missing H1 tag (old)".to_string());
    } else if old_page.headings.h1_count > 1 {
        issues.push(format!("Multiple H1 tags found ({})", old_page.headings.h1_count));
    }
    if new_page.headings.h1_count == 0 {
        issues.push("Missing H1 tag (new)".to_string());
    } else if new_page.headings.h1_count > 1 {
        issues.push(format!("Multiple H1 tags found ({})", new_page.headings.h1_count));
    }
    // The "missing" and "multiple" H1 issues above already cover an absent
    // H1; suppress compare_text_field's generic missing-field issue so it
    // isn't duplicated.
    let h1 = compare_text_field_allow_absent(h1_old, h1_new, "H1", usize::MAX, &mut issues);

    let canonical = compare_canonical(old_page.canonical_url.as_deref(), new_page.canonical_url.as_deref(), &mut issues);

    let title_points = title.similarity * 30.0;
    let description_points = description.similarity * 25.0;
    let h1_points = match (old_page.headings.h1_count > 0, new_page.headings.h1_count > 0) {
        (true, true) => h1.similarity * 25.0,
        (false, false) => 0.0,
        _ => 12.5,
    };
    let canonical_points = if canonical.matched { 20.0 } else { 0.0 };

    let match_score = (title_points + description_points + h1_points + canonical_points).round().clamp(0.0, 100.0) as u8;
    let severity = severity_for(match_score);

    SeoComparison { new_url: new_url.to_string(), title, description, h1, canonical, match_score, severity, issues }
}

fn compare_text_field(
    old: Option<&str>,
    new: Option<&str>,
    label: &str,
    length_delta_threshold: usize,
    issues: &mut Vec<String>,
) -> FieldComparison {
    compare_text_field_inner(old, new, label, length_delta_threshold, issues, true)
}

/// Like `compare_text_field`, but does not push the generic "missing
/// {label}" issue when one side is absent — for fields that already have
/// their own dedicated presence issue (H1's "Missing H1 tag"/"Multiple H1
/// tags found").
fn compare_text_field_allow_absent(
    old: Option<&str>,
    new: Option<&str>,
    label: &str,
    length_delta_threshold: usize,
    issues: &mut Vec<String>,
) -> FieldComparison {
    compare_text_field_inner(old, new, label, length_delta_threshold, issues, false)
}

fn compare_text_field_inner(
    old: Option<&str>,
    new: Option<&str>,
    label: &str,
    length_delta_threshold: usize,
    issues: &mut Vec<String>,
    push_missing_issue: bool,
) -> FieldComparison {
    let (old, new) = match (old, new) {
        (Some(o), Some(n)) if !o.is_empty() && !n.is_empty() => (o, n),
        _ => {
            if push_missing_issue {
                issues.push(format!("Old/New page missing {}", label.to_lowercase()));
            }
            return FieldComparison { matched: false, similarity: 0.0 };
        }
    };

    if length_delta_threshold != usize::MAX {
        let delta = old.chars().count().abs_diff(new.chars().count());
        if delta > length_delta_threshold {
            issues.push(format!("{label} length differs significantly"));
        }
    }

    let sim = similarity(&old.to_ascii_lowercase(), &new.to_ascii_lowercase());
    if sim < SIGNIFICANT_CHANGE_THRESHOLD {
        issues.push(format!("{label} significantly changed"));
    } else if sim < MATCH_THRESHOLD {
        issues.push(format!("{label} partially changed"));
    }

    FieldComparison { matched: sim >= MATCH_THRESHOLD, similarity: sim }
}

fn compare_canonical(old: Option<&str>, new: Option<&str>, issues: &mut Vec<String>) -> FieldComparison {
    let (Some(old), Some(new)) = (old, new) else {
        issues.push("missing canonical".to_string());
        return FieldComparison { matched: false, similarity: 0.0 };
    };
    let old_trimmed = old.trim_end_matches('/');
    let new_trimmed = new.trim_end_matches('/');
    let matched = old_trimmed == new_trimmed;
    FieldComparison { matched, similarity: if matched { 1.0 } else { 0.0 } }
}

fn severity_for(score: u8) -> Severity {
    if score >= 90 {
        Severity::None
    } else if score >= 75 {
        Severity::Minor
    } else if score >= 50 {
        Severity::Moderate
    } else {
        Severity::Major
    }
}

/// Summarizes a batch of SEO comparisons: perfect matches (score >= 95),
/// average score, counts by severity.
pub fn summarize_seo(pairs: &[SeoComparison]) -> SeoComparisonSummary {
    let pairs_compared = pairs.len();
    let perfect_matches = pairs.iter().filter(|p| p.match_score >= 95).count();
    let average_score = if pairs.is_empty() { 0.0 } else { pairs.iter().map(|p| p.match_score as f64).sum::<f64>() / pairs.len() as f64 };

    let mut by_severity = HashMap::new();
    for pair in pairs {
        let key = match pair.severity {
            Severity::None => "none",
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Major => "major",
        };
        *by_severity.entry(key.to_string()).or_insert(0) += 1;
    }

    SeoComparisonSummary { pairs_compared, perfect_matches, average_score, by_severity }
}

/// Compares old/new performance metrics for one URL pair, computing
/// per-metric deltas with direction-aware improvement percentage.
pub fn compare_performance(url_key: &str, old: &PerfMetrics, new: &PerfMetrics) -> PerfComparison {
    let mut metrics = HashMap::new();
    metrics.insert("lcp".to_string(), metric_delta("lcp", old.lcp, new.lcp));
    metrics.insert("cls".to_string(), metric_delta("cls", old.cls, new.cls));
    metrics.insert("inp".to_string(), metric_delta("inp", old.inp, new.inp));
    metrics.insert("fcp".to_string(), metric_delta("fcp", old.fcp, new.fcp));
    metrics.insert("ttfb".to_string(), metric_delta("ttfb", old.ttfb, new.ttfb));
    metrics.insert("tti".to_string(), metric_delta("tti", old.tti, new.tti));
    metrics.insert("tbt".to_string(), metric_delta("tbt", old.tbt, new.tbt));
    metrics.insert("speed_index".to_string(), metric_delta("speed_index", old.speed_index, new.speed_index));

    let score_delta = new.performance_score as i16 - old.performance_score as i16;

    PerfComparison {
        url_key: url_key.to_string(),
        old_score: old.performance_score,
        new_score: new.performance_score,
        score_delta,
        improved: score_delta > 0,
        metrics,
    }
}

fn metric_delta(metric: &str, old_value: f64, new_value: f64) -> MetricDelta {
    let improvement_pct = if old_value == 0.0 {
        0.0
    } else if LOWER_IS_BETTER.contains(&metric) {
        -((new_value - old_value) / old_value) * 100.0
    } else {
        ((new_value - old_value) / old_value) * 100.0
    };

    let label = if improvement_pct >= 10.0 {
        ImprovementLabel::SignificantImprovement
    } else if improvement_pct >= 5.0 {
        ImprovementLabel::ModerateImprovement
    } else if improvement_pct > -5.0 {
        ImprovementLabel::MinimalChange
    } else if improvement_pct > -10.0 {
        ImprovementLabel::ModerateRegression
    } else {
        ImprovementLabel::SignificantRegression
    };

    MetricDelta { old_value, new_value, improvement_pct, label }
}

/// Summarizes a batch of performance comparisons: bucketed by score
/// delta, per-vital improved percentages.
pub fn summarize_performance(pairs: &[PerfComparison]) -> PerfComparisonSummary {
    let mut improved = 0;
    let mut regressed = 0;
    let mut unchanged = 0;
    let mut total_delta = 0i64;

    let mut per_vital_improved: HashMap<String, usize> = HashMap::new();

    for pair in pairs {
        total_delta += pair.score_delta as i64;
        if pair.score_delta > 5 {
            improved += 1;
        } else if pair.score_delta < -5 {
            regressed += 1;
        } else {
            unchanged += 1;
        }

        for (metric, delta) in &pair.metrics {
            if matches!(delta.label, ImprovementLabel::SignificantImprovement | ImprovementLabel::ModerateImprovement) {
                *per_vital_improved.entry(metric.clone()).or_insert(0) += 1;
            }
        }
    }

    let count = pairs.len().max(1) as f64;
    let per_vital_improved_pct =
        per_vital_improved.into_iter().map(|(metric, n)| (metric, n as f64 / count * 100.0)).collect();

    PerfComparisonSummary {
        improved,
        regressed,
        unchanged,
        average_score_delta: if pairs.is_empty() { 0.0 } else { total_delta as f64 / pairs.len() as f64 },
        per_vital_improved_pct,
    }
}

/// Compares old/new mobile test results for a URL pair by issue count,
/// with the common-issue intersection.
pub fn compare_mobile(url_key: &str, old: &MobileTestResult, new: &MobileTestResult) -> MobileComparison {
    let old_count = old.overall_issues.len();
    let new_count = new.overall_issues.len();

    let bucket = if new_count < old_count {
        MobileBucket::Improved
    } else if new_count > old_count {
        MobileBucket::Regressed
    } else {
        MobileBucket::Unchanged
    };

    let old_set: HashSet<&String> = old.overall_issues.iter().collect();
    let common_issues = new.overall_issues.iter().filter(|i| old_set.contains(i)).cloned().collect();

    MobileComparison { url_key: url_key.to_string(), old_issue_count: old_count, new_issue_count: new_count, bucket, common_issues }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Headings;

    fn page(title: &str, description: &str, h1: &str, canonical: &str) -> PageContent {
        PageContent {
            title: Some(title.to_string()),
            description: Some(description.to_string()),
            canonical_url: Some(canonical.to_string()),
            og_tags: Default::default(),
            headings: Headings { h1_count: 1, h2_count: 0, h3_count: 0, h1_text: vec![h1.to_string()] },
            structured_data: false,
            internal_link_count: 0,
            external_link_count: 0,
        }
    }

    // S3
    #[test]
    fn scenario_s3_title_changed_minor_severity() {
        let old = page("About Us", "desc", "h1", "https://new.site/a");
        let new = page("About Our Company", "desc", "h1", "https://new.site/a");
        let cmp = compare_seo(&old, &new, "https://new.site/a");
        assert!(cmp.title.similarity > 0.4 && cmp.title.similarity < 0.55);
        assert!(!cmp.title.matched);
        assert!(cmp.issues.iter().any(|i| i.contains("significantly changed")));
        assert_eq!(cmp.severity, Severity::Minor);
    }

    #[test]
    fn missing_fields_produce_zero_similarity_and_issue() {
        let old = PageContent::default();
        let new = page("Title", "Description", "H1", "https://new.site/a");
        let cmp = compare_seo(&old, &new, "https://new.site/a");
        assert_eq!(cmp.title.similarity, 0.0);
        assert!(cmp.issues.iter().any(|i| i.contains("missing title")));
    }

    #[test]
    fn missing_h1_does_not_duplicate_the_generic_missing_field_issue() {
        let old = PageContent::default();
        let new = page("Title", "Description", "H1", "https://new.site/a");
        let cmp = compare_seo(&old, &new, "https://new.site/a");
        assert_eq!(cmp.issues.iter().filter(|i| i.contains("H1") || i.contains("h1")).count(), 1);
        assert!(cmp.issues.iter().any(|i| i == "Missing H1 tag (old)"));
        assert!(!cmp.issues.iter().any(|i| i == "Old/New page missing h1"));
    }

    #[test]
    fn canonical_match_ignores_trailing_slash() {
        let old = page("t", "d", "h", "https://new.site/a/");
        let new = page("t", "d", "h", "https://new.site/a");
        let cmp = compare_seo(&old, &new, "https://new.site/a");
        assert!(cmp.canonical.matched);
    }

    // S4
    #[test]
    fn scenario_s4_performance_deltas() {
        let old = PerfMetrics { performance_score: 60, lcp: 3200.0, cls: 0.20, inp: 300.0, ..Default::default() };
        let new = PerfMetrics { performance_score: 75, lcp: 2400.0, cls: 0.05, inp: 150.0, ..Default::default() };
        let cmp = compare_performance("/a", &old, &new);
        assert_eq!(cmp.score_delta, 15);
        assert!(cmp.improved);
        let lcp = &cmp.metrics["lcp"];
        assert!((lcp.improvement_pct - 25.0).abs() < 0.01);
        assert_eq!(lcp.label, ImprovementLabel::SignificantImprovement);
        let cls = &cmp.metrics["cls"];
        assert!((cls.improvement_pct - 75.0).abs() < 0.01);
        let inp = &cmp.metrics["inp"];
        assert!((inp.improvement_pct - 50.0).abs() < 0.01);
    }

    // P6
    #[test]
    fn invariant_p6_match_score_is_bounded_and_severity_is_consistent() {
        let cases = [
            page("About Us", "desc", "h1", "https://new.site/a"),
            PageContent::default(),
            page("About Us", "desc", "h1", "https://new.site/a"),
        ];
        for (old, new) in [(&cases[0], &cases[1]), (&cases[1], &cases[0]), (&cases[0], &cases[2])] {
            let cmp = compare_seo(old, new, "https://new.site/a");
            assert!(cmp.match_score <= 100);
            let expected = severity_for(cmp.match_score);
            assert_eq!(cmp.severity, expected);
        }
    }

    // P7
    #[test]
    fn invariant_p7_improvement_sign_matches_lower_is_better_direction() {
        // lcp: lower is better. New value lower than old ⇒ improvement_pct > 0.
        let improving = metric_delta("lcp", 3000.0, 2000.0);
        assert!(improving.improvement_pct > 0.0);
        let regressing = metric_delta("lcp", 2000.0, 3000.0);
        assert!(regressing.improvement_pct < 0.0);

        // cls: also lower-is-better.
        let improving_cls = metric_delta("cls", 0.2, 0.1);
        assert!(improving_cls.improvement_pct > 0.0);
    }

    #[test]
    fn mobile_comparison_buckets_by_issue_count() {
        let old = MobileTestResult {
            url: "/a".into(),
            viewports: vec![],
            overall_issues: vec!["horizontal scrollbar detected".to_string(), "tiny fonts".to_string()],
            responsive: false,
        };
        let new = MobileTestResult {
            url: "/a".into(),
            viewports: vec![],
            overall_issues: vec!["horizontal scrollbar detected".to_string()],
            responsive: false,
        };
        let cmp = compare_mobile("/a", &old, &new);
        assert_eq!(cmp.bucket, MobileBucket::Improved);
        assert_eq!(cmp.common_issues, vec!["horizontal scrollbar detected".to_string()]);
    }
}
