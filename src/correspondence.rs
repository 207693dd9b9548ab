//! Correspondence resolver (C3).
//!
//! Classifies every old URL as `matched`, `redirected`, or `missing` (with an
//! optional suggestion), and every new URL not accounted for as `newOnly`.
//! Also infers path-prefix pattern renames. The edit-distance similarity
//! function is hand-rolled classic DP, the same shape of tight numeric loop
//! used by the scoring functions elsewhere in this crate.

use std::collections::{HashMap, HashSet};

use crate::normalize::{normalize_url, path_of};
use crate::types::{
    CorrespondenceReport, CorrespondenceSummary, MatchType, MatchedPair, MissingEntry, NewOnlyEntry, NewOnlyKind,
    PatternRename, RedirectMap,
};

/// Levenshtein-based similarity: `(|longer| - edit(longer,shorter)) / |longer|`.
/// Empty inputs (both) yield 1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let dist = edit_distance(a, b) as f64;
    let longer = a.chars().count().max(b.chars().count()) as f64;
    if longer == 0.0 {
        return 1.0;
    }
    (longer - dist) / longer
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());

    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];

    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// Resolves correspondence between an old and new URL set.
///
/// Equality lookups compare by *path*, not the full normalized URL: old and
/// new sides are expected to sit on different hosts in a migration, so
/// matching on the full normalized string (host included) would never match
/// anything — see the literal S1/S2 scenarios in DESIGN.md.
pub fn resolve(old_urls: &[String], new_urls: &[String], redirect_map: &RedirectMap) -> CorrespondenceReport {
    let new_path_set: HashSet<String> = new_urls.iter().filter_map(|u| normalize_url(u)).map(|n| path_of(&n)).collect();
    let old_path_set: HashSet<String> = old_urls.iter().filter_map(|u| normalize_url(u)).map(|n| path_of(&n)).collect();

    let mut matched = Vec::new();
    let mut redirected = Vec::new();
    let mut missing = Vec::new();

    // Every redirect-map target counts toward `new_only` exclusion, not just
    // the ones whose source is also present in `old_urls` — an operator can
    // map a URL that never made it into the old sitemap.
    let redirect_target_paths: HashSet<String> =
        redirect_map.values().filter_map(|target| normalize_url(target)).map(|n| path_of(&n)).collect();

    for old in old_urls {
        let Some(n) = normalize_url(old) else {
            missing.push(MissingEntry { old_url: old.clone(), suggestion: None });
            continue;
        };
        let old_path = path_of(&n);

        // A configured redirect takes priority over a coincidental direct
        // match on the old path (R2): the operator mapped this URL on
        // purpose, so that's the correspondence that's reported.
        if let Some(target) = redirect_map.get(old) {
            if let Some(target_norm) = normalize_url(target) {
                let target_path = path_of(&target_norm);
                if new_path_set.contains(&target_path) {
                    redirected.push(MatchedPair {
                        old_url: old.clone(),
                        new_url: target.clone(),
                        match_type: MatchType::Mapped,
                    });
                    continue;
                }
            }
        }

        if new_path_set.contains(&old_path) {
            matched.push(MatchedPair { old_url: old.clone(), new_url: old.clone(), match_type: MatchType::Direct });
            continue;
        }

        let suggestion = suggest(old, new_urls);
        missing.push(MissingEntry { old_url: old.clone(), suggestion });
    }

    let mut new_only = Vec::new();
    for new in new_urls {
        let Some(m) = normalize_url(new) else { continue };
        let new_path = path_of(&m);
        if old_path_set.contains(&new_path) {
            continue;
        }
        if redirect_target_paths.contains(&new_path) {
            continue;
        }
        new_only.push(NewOnlyEntry { new_url: new.clone(), kind: NewOnlyKind::NewContent });
    }

    let matched_count = matched.len();
    let redirected_count = redirected.len();
    let missing_count = missing.len();
    let match_rate = if old_urls.is_empty() {
        0.0
    } else {
        (matched_count + redirected_count) as f64 / old_urls.len() as f64 * 100.0
    };

    let summary = CorrespondenceSummary {
        matched: matched_count,
        redirected: redirected_count,
        missing: missing_count,
        new_only: new_only.len(),
        match_rate: format!("{:.2}", match_rate),
    };

    let pattern_changes = detect_pattern_changes(old_urls, new_urls);

    CorrespondenceReport { matched, redirected, missing, new_only, summary, pattern_changes }
}

/// Among `new_urls`, returns the one whose path has the highest
/// path-only similarity to `old`'s path, provided similarity > 0.5.
fn suggest(old: &str, new_urls: &[String]) -> Option<String> {
    let old_normalized = normalize_url(old)?;
    let old_path = path_of(&old_normalized);

    let mut best: Option<(String, f64)> = None;
    for new in new_urls {
        let Some(new_normalized) = normalize_url(new) else { continue };
        let new_path = path_of(&new_normalized);
        let sim = similarity(&old_path, &new_path);
        if best.as_ref().map(|(_, s)| sim > *s).unwrap_or(true) {
            best = Some((new.clone(), sim));
        }
    }

    best.filter(|(_, s)| *s > 0.5).map(|(url, _)| url)
}

/// The first non-empty path segment, as `/segment`, is a URL's pattern.
fn path_pattern(url: &str) -> Option<String> {
    let normalized = normalize_url(url)?;
    let path = path_of(&normalized);
    let first_segment = path.split('/').find(|s| !s.is_empty())?;
    Some(format!("/{}", first_segment))
}

fn pattern_frequencies(urls: &[String]) -> HashMap<String, usize> {
    let mut freq = HashMap::new();
    for url in urls {
        if let Some(pattern) = path_pattern(url) {
            *freq.entry(pattern).or_insert(0) += 1;
        }
    }
    freq
}

/// Infers path-prefix pattern renames. The result is
/// reported but not consumed by any downstream stage (see DESIGN.md).
fn detect_pattern_changes(old_urls: &[String], new_urls: &[String]) -> Vec<PatternRename> {
    let old_freq = pattern_frequencies(old_urls);
    let new_freq = pattern_frequencies(new_urls);

    let mut renames = Vec::new();
    for (old_pattern, old_count) in &old_freq {
        let mut best: Option<(String, usize, f64)> = None;
        for (new_pattern, new_count) in &new_freq {
            if new_pattern == old_pattern {
                continue;
            }
            let sim = similarity(old_pattern, new_pattern);
            if best.as_ref().map(|(_, _, s)| sim > *s).unwrap_or(true) {
                best = Some((new_pattern.clone(), *new_count, sim));
            }
        }
        if let Some((new_pattern, new_count, confidence)) = best {
            if confidence > 0.6 {
                renames.push(PatternRename {
                    old_pattern: old_pattern.clone(),
                    new_pattern,
                    old_count: *old_count,
                    new_count,
                    confidence,
                });
            }
        }
    }
    renames
}
