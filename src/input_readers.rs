//! Input readers (C1).
//!
//! Parses XML sitemaps (recursively), analytics CSV, and redirect-map CSV
//! into normalized records. Sitemap recursion uses `quick-xml`; both CSV
//! parsers build a tolerant lowercase header→index map rather than
//! depending on a fixed column order.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{AuditError, Result};
use crate::types::{AnalyticsEntry, RedirectMap, SitemapEntry};

const MAX_SITEMAP_DEPTH: u32 = 4;

/// Fetches a sitemap document by URL. The caller (an HTTP collaborator)
/// supplies the body; this module never performs I/O itself.
#[async_trait]
pub trait SitemapFetcher: Send + Sync {
    /// Returns the raw XML body for `url`, or `None` if it cannot be
    /// fetched (treated as a per-entry failure: logged and skipped).
    async fn fetch(&self, url: &str) -> Option<String>;
}

/// Parses a sitemap document (urlset or sitemapindex), recursing through
/// index children via `fetcher`. Loop protection: a shared `visited` set of
/// sitemap URLs and a depth cap of 4. Recursion is boxed since `async fn`s
/// cannot recurse directly.
pub async fn parse_sitemap(root_url: &str, body: &str, fetcher: &dyn SitemapFetcher) -> Result<Vec<SitemapEntry>> {
    let mut visited = HashSet::new();
    parse_sitemap_inner(root_url.to_string(), body.to_string(), fetcher, &mut visited, 0).await
}

fn parse_sitemap_inner<'a>(
    url: String,
    body: String,
    fetcher: &'a dyn SitemapFetcher,
    visited: &'a mut HashSet<String>,
    depth: u32,
) -> Pin<Box<dyn Future<Output = Result<Vec<SitemapEntry>>> + Send + 'a>> {
    Box::pin(async move {
        if !visited.insert(url.clone()) {
            return Ok(Vec::new());
        }
        if depth > MAX_SITEMAP_DEPTH {
            return Ok(Vec::new());
        }

        let doc = parse_xml_document(&body).map_err(|reason| AuditError::InputFormat { source_name: url.clone(), reason })?;

        match doc {
            SitemapDoc::UrlSet(entries) => Ok(entries),
            SitemapDoc::Index(child_urls) => {
                let mut all = Vec::new();
                for child_url in child_urls {
                    let Some(child_body) = fetcher.fetch(&child_url).await else { continue };
                    if let Ok(entries) = parse_sitemap_inner(child_url, child_body, fetcher, visited, depth + 1).await {
                        all.extend(entries);
                    }
                }
                let mut seen = HashSet::new();
                all.retain(|e| seen.insert(e.url.clone()));
                Ok(all)
            }
        }
    })
}

enum SitemapDoc {
    UrlSet(Vec<SitemapEntry>),
    Index(Vec<String>),
}

fn parse_xml_document(body: &str) -> std::result::Result<SitemapDoc, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut root_is_index: Option<bool> = None;
    let mut urlset_entries = Vec::new();
    let mut index_urls = Vec::new();

    let mut current_tag: Vec<String> = Vec::new();
    let mut entry = SitemapEntry::default();
    let mut index_loc: Option<String> = None;
    let mut text_buf = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if root_is_index.is_none() {
                    match name.as_str() {
                        "urlset" => root_is_index = Some(false),
                        "sitemapindex" => root_is_index = Some(true),
                        _ => {}
                    }
                }
                current_tag.push(name);
                text_buf.clear();
            }
            Ok(Event::Text(t)) => {
                text_buf.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "loc" => {
                        if let Some(parent) = current_tag.iter().rev().nth(1) {
                            match parent.as_str() {
                                "url" => entry.url = text_buf.trim().to_string(),
                                "sitemap" => index_loc = Some(text_buf.trim().to_string()),
                                _ => {}
                            }
                        }
                    }
                    "lastmod" => {
                        if current_tag.iter().rev().nth(1).map(String::as_str) == Some("url") {
                            entry.lastmod = Some(text_buf.trim().to_string());
                        }
                    }
                    "changefreq" => {
                        if current_tag.iter().rev().nth(1).map(String::as_str) == Some("url") {
                            entry.changefreq = Some(text_buf.trim().to_string());
                        }
                    }
                    "priority" => {
                        if current_tag.iter().rev().nth(1).map(String::as_str) == Some("url") {
                            entry.priority = text_buf.trim().parse().ok();
                        }
                    }
                    "url" => {
                        if !entry.url.is_empty() {
                            urlset_entries.push(std::mem::take(&mut entry));
                        } else {
                            entry = SitemapEntry::default();
                        }
                    }
                    "sitemap" => {
                        if let Some(loc) = index_loc.take() {
                            index_urls.push(loc);
                        }
                    }
                    _ => {}
                }
                current_tag.pop();
                text_buf.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    match root_is_index {
        Some(true) => Ok(SitemapDoc::Index(index_urls)),
        Some(false) => Ok(SitemapDoc::UrlSet(urlset_entries)),
        None => Err("neither <urlset> nor <sitemapindex> root element present".to_string()),
    }
}

fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

/// Builds a lowercase header→index map so column order in the source
/// CSV doesn't matter.
fn header_index(headers: &csv::StringRecord) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        index.insert(header.trim().to_ascii_lowercase(), idx);
    }
    index
}

fn lookup<'a>(record: &'a csv::StringRecord, index: &HashMap<String, usize>, names: &[&str]) -> Option<&'a str> {
    for name in names {
        if let Some(idx) = index.get(&name.to_ascii_lowercase()) {
            if let Some(value) = record.get(*idx) {
                if !value.trim().is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Parses an analytics CSV export. First occurrence of a URL wins; missing
/// numeric fields default to 0.
pub fn parse_analytics_csv(body: &str) -> Result<Vec<AnalyticsEntry>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| AuditError::InputFormat { source_name: "analytics".into(), reason: e.to_string() })?
        .clone();
    let index = header_index(&headers);

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AuditError::InputFormat { source_name: "analytics".into(), reason: e.to_string() })?;
        let Some(url) = lookup(&record, &index, &["url", "page"]) else { continue };
        let url = url.trim().to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        let clicks = lookup(&record, &index, &["clicks"]).and_then(|v| v.parse().ok()).unwrap_or(0);
        let impressions = lookup(&record, &index, &["impressions"]).and_then(|v| v.parse().ok()).unwrap_or(0);
        let ctr = lookup(&record, &index, &["ctr"]).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let position = lookup(&record, &index, &["position", "avg. position"]).and_then(|v| v.parse().ok()).unwrap_or(0.0);

        entries.push(AnalyticsEntry { url, clicks, impressions, ctr, position });
    }
    Ok(entries)
}

/// Parses a redirect-map CSV. On duplicate source, last write wins.
pub fn parse_redirect_csv(body: &str) -> Result<RedirectMap> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| AuditError::InputFormat { source_name: "redirects".into(), reason: e.to_string() })?
        .clone();
    let index = header_index(&headers);

    let mut map = RedirectMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| AuditError::InputFormat { source_name: "redirects".into(), reason: e.to_string() })?;
        let Some(from) = lookup(&record, &index, &["oldurl", "old url", "old_url", "from"]) else { continue };
        let Some(to) = lookup(&record, &index, &["newurl", "new url", "new_url", "to"]) else { continue };
        map.insert(from.trim().to_string(), to.trim().to_string());
    }
    Ok(map)
}

/// Heuristic extractor for a plain URL-list CSV: per row, the first cell
/// that parses as an absolute http(s) URL is taken.
pub fn extract_urls_heuristic(body: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(body.as_bytes());
    let mut urls = Vec::new();
    for record in reader.records().flatten() {
        for cell in record.iter() {
            let cell = cell.trim();
            if url::Url::parse(cell).map(|u| u.scheme() == "http" || u.scheme() == "https").unwrap_or(false) {
                urls.push(cell.to_string());
                break;
            }
        }
    }
    urls
}
