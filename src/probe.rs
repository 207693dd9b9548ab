//! Probe executor (C4).
//!
//! Bounded fan-out over a `tokio::task::JoinSet`: a work queue drained up
//! to a concurrency cap, one task per URL, harvested in completion order,
//! refilled as each task finishes. No crawl discovery here — this
//! component only ever probes a URL set someone else (C1/C3) already
//! produced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use scraper::{Html, Selector};
use tokio::task::JoinSet;

use crate::types::{Headings, PageContent, ProbeCategorization, ProbeProgress, ProbeResult, RedirectAnalysis, RedirectHop};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; MigrationAuditBot/1.0; +https://example.invalid/bot)";

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub concurrency: usize,
    pub delay_ms: u64,
    pub timeout_ms: u64,
    pub follow_redirects: bool,
    pub max_redirect_hops: usize,
    pub retry_attempts: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            concurrency: 5,
            delay_ms: 150,
            timeout_ms: 10_000,
            follow_redirects: true,
            max_redirect_hops: 10,
            retry_attempts: 3,
        }
    }
}

/// Called exactly once per completed URL, serialized (no two calls
/// overlap) by the executor.
pub type ProgressCallback = Arc<dyn Fn(ProbeProgress) + Send + Sync>;

/// Probes a set of URLs with bounded concurrency, retry, and progress
/// reporting. Results are returned in completion order.
pub async fn probe_batch(urls: Vec<String>, config: &ProbeConfig, on_progress: Option<ProgressCallback>) -> Vec<ProbeResult> {
    let total = urls.len();
    let client = match build_client(config) {
        Ok(c) => c,
        Err(_) => {
            return urls
                .into_iter()
                .map(|url| transport_failure(url, "failed to construct HTTP client".to_string()))
                .collect();
        }
    };

    let mut queue = urls.into_iter();
    let mut join_set: JoinSet<ProbeResult> = JoinSet::new();
    let mut results = Vec::with_capacity(total);
    let mut completed = 0usize;
    let delay = Duration::from_millis(config.delay_ms);

    for _ in 0..config.concurrency {
        if let Some(url) = queue.next() {
            spawn_probe(&mut join_set, client.clone(), url, config.clone());
            tokio::time::sleep(delay).await;
        } else {
            break;
        }
    }

    while let Some(joined) = join_set.join_next().await {
        let result = match joined {
            Ok(r) => r,
            Err(_) => continue,
        };
        completed += 1;
        results.push(result);

        if let Some(cb) = &on_progress {
            let current_url = results.last().map(|r: &ProbeResult| r.url.clone()).unwrap_or_default();
            cb(ProbeProgress {
                completed,
                total,
                percentage: if total == 0 { 100 } else { (completed * 100 / total) as u8 },
                current_url,
            });
        }

        if let Some(url) = queue.next() {
            spawn_probe(&mut join_set, client.clone(), url, config.clone());
            tokio::time::sleep(delay).await;
        }
    }

    results
}

fn spawn_probe(join_set: &mut JoinSet<ProbeResult>, client: reqwest::Client, url: String, config: ProbeConfig) {
    join_set.spawn(async move { probe_one(&client, url, &config).await });
}

fn build_client(config: &ProbeConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_millis(config.timeout_ms))
        .user_agent(USER_AGENT)
        .build()
}

/// Probes a single URL, following redirects manually (so the chain can be
/// captured) and applying the retry policy: retry only on transport
/// failure or 5xx, linear backoff `delay_ms * attempt_number`, no retry on
/// 4xx.
async fn probe_one(client: &reqwest::Client, url: String, config: &ProbeConfig) -> ProbeResult {
    let retries = config.retry_attempts.max(1);

    let mut last = None;
    for attempt in 1..=retries {
        let result = fetch_with_chain(client, &url, config).await;
        let retryable = result.is_transport_failure() || (500..600).contains(&result.status_code);
        let is_last_attempt = attempt == retries;
        if !retryable || is_last_attempt {
            last = Some(result);
            break;
        }
        last = Some(result);
        tokio::time::sleep(Duration::from_millis(config.delay_ms * attempt as u64)).await;
    }

    last.unwrap_or_else(|| transport_failure(url, "no attempts made".to_string()))
}

async fn fetch_with_chain(client: &reqwest::Client, url: &str, config: &ProbeConfig) -> ProbeResult {
    let start = Instant::now();
    let mut current = url.to_string();
    let mut chain = Vec::new();

    for hop in 0..=config.max_redirect_hops {
        let response = match client.get(&current).send().await {
            Ok(r) => r,
            Err(err) => return transport_failure_timed(url.to_string(), err.to_string(), start.elapsed()),
        };

        let status = response.status().as_u16();
        let is_redirect = (300..400).contains(&status);

        if is_redirect && config.follow_redirects && hop < config.max_redirect_hops {
            chain.push(RedirectHop { url: current.clone(), status_code: status, index: hop });
            let Some(location) = response.headers().get("location").and_then(|v| v.to_str().ok()) else {
                return finalize(url.to_string(), current, status, response, chain, start.elapsed());
            };
            current = match url::Url::parse(&current).and_then(|base| base.join(location)) {
                Ok(joined) => joined.to_string(),
                Err(_) => location.to_string(),
            };
            continue;
        }

        return finalize(url.to_string(), current.clone(), status, response, chain, start.elapsed());
    }

    transport_failure_timed(url.to_string(), "too many redirect hops".to_string(), start.elapsed())
}

fn finalize(
    requested_url: String,
    final_url: String,
    status: u16,
    response: reqwest::Response,
    chain: Vec<RedirectHop>,
    elapsed: Duration,
) -> ProbeResult {
    let content_type = response.headers().get("content-type").and_then(|v| v.to_str().ok()).map(String::from);
    let content_length = response.content_length();
    let server = response.headers().get("server").and_then(|v| v.to_str().ok()).map(String::from);

    ProbeResult {
        url: requested_url,
        status_code: status,
        status_text: status_text(status),
        response_time_ms: elapsed.as_millis(),
        final_url,
        is_redirect: !chain.is_empty() || (300..400).contains(&status),
        redirect_chain: chain,
        content_type,
        content_length,
        server,
        timestamp: Utc::now(),
        error: None,
    }
}

fn transport_failure(url: String, reason: String) -> ProbeResult {
    transport_failure_timed(url, reason, Duration::from_millis(0))
}

fn transport_failure_timed(url: String, reason: String, elapsed: Duration) -> ProbeResult {
    ProbeResult {
        url,
        status_code: 0,
        status_text: "transport failure".to_string(),
        response_time_ms: elapsed.as_millis(),
        final_url: String::new(),
        is_redirect: false,
        redirect_chain: Vec::new(),
        content_type: None,
        content_length: None,
        server: None,
        timestamp: Utc::now(),
        error: Some(reason),
    }
}

fn status_text(status: u16) -> String {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
    .to_string()
}

/// Partitions a probe batch into status buckets.
pub fn categorize(results: &[ProbeResult]) -> ProbeCategorization {
    let mut cat = ProbeCategorization::default();
    let mut total_time = 0u128;

    for r in results {
        total_time += r.response_time_ms;
        match r.status_code {
            0 => cat.network_errors.push(r.clone()),
            200 => cat.ok.push(r.clone()),
            300..=399 => cat.redirects.push(r.clone()),
            400..=499 => cat.client_errors.push(r.clone()),
            500..=599 => cat.server_errors.push(r.clone()),
            _ => cat.ok.push(r.clone()),
        }
    }

    cat.average_response_time_ms = if results.is_empty() { 0.0 } else { total_time as f64 / results.len() as f64 };
    cat
}

/// Broken-link extraction: the client-error partition.
pub fn broken_links(cat: &ProbeCategorization) -> Vec<ProbeResult> {
    cat.client_errors.clone()
}

/// Redirect analysis: counts by code, chain lengths, chains longer than 2
/// flagged as `long_chains`. The by-code tally counts each hop's own status
/// (301/302/307/308, ...), not the terminal status the chain resolves to —
/// with `follow_redirects` on, the terminal status is 200 for nearly every
/// redirected URL, which would make the tally meaningless.
pub fn analyze_redirects(results: &[ProbeResult]) -> RedirectAnalysis {
    let mut by_code: HashMap<u16, usize> = HashMap::new();
    let mut chain_lengths = Vec::new();
    let mut long_chains = Vec::new();

    for r in results {
        if !r.redirect_chain.is_empty() {
            for hop in &r.redirect_chain {
                *by_code.entry(hop.status_code).or_insert(0) += 1;
            }
            let len = r.redirect_chain.len();
            chain_lengths.push(len);
            if len > 2 {
                long_chains.push(r.url.clone());
            }
        } else if r.is_redirect {
            // redirects not followed: the final result itself is the hop.
            *by_code.entry(r.status_code).or_insert(0) += 1;
            chain_lengths.push(1);
        }
    }

    RedirectAnalysis { by_code, chain_lengths, long_chains }
}

/// Static-mode content fetch: parses already-downloaded HTML bytes with no
/// script execution, the superset operation over a plain status check.
pub fn extract_page_content(html: &str, page_url: &str) -> PageContent {
    let doc = Html::parse_document(html);

    let title = first_text(&doc, "title").filter(|s| !s.is_empty());
    let description = meta_content(&doc, "meta[name=\"description\"]")
        .or_else(|| meta_content(&doc, "meta[property=\"og:description\"]"))
        .filter(|s| !s.is_empty());
    let canonical_url = canonical(&doc, page_url).filter(|s| !s.is_empty());

    let mut og_tags = HashMap::new();
    if let Ok(selector) = Selector::parse("meta[property^=\"og:\"]") {
        for el in doc.select(&selector) {
            if let (Some(prop), Some(content)) = (el.value().attr("property"), el.value().attr("content")) {
                og_tags.insert(prop.to_string(), content.to_string());
            }
        }
    }

    let h1_count = count(&doc, "h1");
    let h2_count = count(&doc, "h2");
    let h3_count = count(&doc, "h3");
    let h1_text = all_text(&doc, "h1");

    let structured_data = count(&doc, "script[type=\"application/ld+json\"]") > 0;

    let (internal_link_count, external_link_count) = link_breakdown(&doc, page_url);

    PageContent {
        title,
        description,
        canonical_url,
        og_tags,
        headings: Headings { h1_count, h2_count, h3_count, h1_text },
        structured_data,
        internal_link_count,
        external_link_count,
    }
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next().map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
}

fn all_text(doc: &Html, selector: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse(selector) else { return Vec::new() };
    doc.select(&sel).map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string()).collect()
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next().and_then(|el| el.value().attr("content")).map(|s| s.trim().to_string())
}

fn canonical(doc: &Html, page_url: &str) -> Option<String> {
    let sel = Selector::parse("link[rel=\"canonical\"]").ok()?;
    let href = doc.select(&sel).next().and_then(|el| el.value().attr("href"))?;
    resolve_href(page_url, href).or_else(|| Some(href.to_string()))
}

fn count(doc: &Html, selector: &str) -> usize {
    Selector::parse(selector).map(|sel| doc.select(&sel).count()).unwrap_or(0)
}

fn link_breakdown(doc: &Html, page_url: &str) -> (usize, usize) {
    let Ok(sel) = Selector::parse("a[href]") else { return (0, 0) };
    let host = url::Url::parse(page_url).ok().and_then(|u| u.host_str().map(String::from));

    let mut internal = 0;
    let mut external = 0;
    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href") else { continue };
        let Some(resolved) = resolve_href(page_url, href) else { continue };
        let link_host = url::Url::parse(&resolved).ok().and_then(|u| u.host_str().map(String::from));
        if link_host == host {
            internal += 1;
        } else {
            external += 1;
        }
    }
    (internal, external)
}

fn resolve_href(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("javascript:") || href.starts_with("tel:") {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let base = url::Url::parse(page_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_partitions_by_status_bucket() {
        let results = vec![
            probe_fixture("https://a", 200),
            probe_fixture("https://b", 404),
            probe_fixture("https://c", 503),
            probe_fixture("https://d", 301),
            probe_fixture("https://e", 0),
        ];
        let cat = categorize(&results);
        assert_eq!(cat.ok.len(), 1);
        assert_eq!(cat.client_errors.len(), 1);
        assert_eq!(cat.server_errors.len(), 1);
        assert_eq!(cat.redirects.len(), 1);
        assert_eq!(cat.network_errors.len(), 1);
    }

    #[test]
    fn broken_links_is_the_client_error_partition() {
        let results = vec![probe_fixture("https://a", 404), probe_fixture("https://b", 200)];
        let cat = categorize(&results);
        let broken = broken_links(&cat);
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].url, "https://a");
    }

    #[test]
    fn analyze_redirects_tallies_by_hop_code_not_terminal_status() {
        let followed = ProbeResult {
            redirect_chain: vec![RedirectHop { url: "https://a/old".to_string(), status_code: 301, index: 0 }],
            ..probe_fixture("https://a/old", 200)
        };
        let unfollowed = probe_fixture("https://b/old", 302);

        let analysis = analyze_redirects(&[followed, unfollowed]);
        assert_eq!(analysis.by_code.get(&301), Some(&1));
        assert_eq!(analysis.by_code.get(&302), Some(&1));
        assert_eq!(analysis.by_code.get(&200), None);
    }

    #[test]
    fn extract_page_content_reads_title_and_canonical() {
        let html = r#"<html><head><title>Hi</title><link rel="canonical" href="https://example.com/a"></head>
        <body><h1>Heading</h1></body></html>"#;
        let content = extract_page_content(html, "https://example.com/a");
        assert_eq!(content.title.as_deref(), Some("Hi"));
        assert_eq!(content.canonical_url.as_deref(), Some("https://example.com/a"));
        assert_eq!(content.headings.h1_count, 1);
    }

    // P4
    #[tokio::test]
    async fn invariant_p4_result_count_matches_input_count_for_empty_batch() {
        let results = probe_batch(vec![], &ProbeConfig::default(), None).await;
        assert_eq!(results.len(), 0);
    }

    fn probe_fixture(url: &str, status: u16) -> ProbeResult {
        ProbeResult {
            url: url.to_string(),
            status_code: status,
            status_text: String::new(),
            response_time_ms: 10,
            final_url: url.to_string(),
            is_redirect: (300..400).contains(&status),
            redirect_chain: Vec::new(),
            content_type: None,
            content_length: None,
            server: None,
            timestamp: Utc::now(),
            error: None,
        }
    }
}
