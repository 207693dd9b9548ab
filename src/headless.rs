//! Headless auditor (C5).
//!
//! Speaks the W3C WebDriver wire protocol directly over `reqwest` +
//! `serde_json` rather than through a webdriver client crate: session
//! lifecycle is create-once, reuse-across-URLs, delete-on-every-exit-path.
//! The capability JSON requests a headless sandboxed/GPU-disabled Chrome.
//! No driver-binary auto-download machinery — this assumes a reachable
//! endpoint.

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{AuditError, Result};
use crate::types::{MobileTestResult, PerfMetrics, VitalAssessment, Viewport, ViewportResult};

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub webdriver_endpoint: String,
    pub inter_audit_delay_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        HeadlessConfig {
            webdriver_endpoint: "http://localhost:4444".to_string(),
            inter_audit_delay_ms: 2000,
            navigation_timeout_ms: 30_000,
        }
    }
}

/// A live WebDriver session, created once per audit stage and reused
/// across URLs.
pub struct WebDriverSession {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
}

impl WebDriverSession {
    pub async fn create(config: &HeadlessConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.navigation_timeout_ms))
            .build()
            .map_err(|e| AuditError::RenderFailure { url: String::new(), reason: format!("client build failed: {e}") })?;

        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-gpu",
                            "--disable-dev-shm-usage",
                        ]
                    }
                }
            }
        });

        let res = client
            .post(format!("{}/session", config.webdriver_endpoint.trim_end_matches('/')))
            .json(&caps)
            .send()
            .await
            .map_err(|e| AuditError::RenderFailure { url: String::new(), reason: format!("session create failed: {e}") })?;

        let body: Value = res
            .json()
            .await
            .map_err(|e| AuditError::RenderFailure { url: String::new(), reason: format!("session create response invalid: {e}") })?;

        let session_id = body
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| AuditError::RenderFailure { url: String::new(), reason: "no sessionId in response".to_string() })?
            .to_string();

        Ok(WebDriverSession { client, endpoint: config.webdriver_endpoint.clone(), session_id })
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.client
            .post(format!("{}/session/{}/url", self.endpoint.trim_end_matches('/'), self.session_id))
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(|e| AuditError::RenderFailure { url: url.to_string(), reason: e.to_string() })?;
        Ok(())
    }

    async fn set_window_rect(&self, width: u32, height: u32) -> Result<()> {
        self.client
            .post(format!("{}/session/{}/window/rect", self.endpoint.trim_end_matches('/'), self.session_id))
            .json(&json!({ "width": width, "height": height, "x": 0, "y": 0 }))
            .send()
            .await
            .map_err(|e| AuditError::RenderFailure { url: String::new(), reason: e.to_string() })?;
        Ok(())
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        let res = self
            .client
            .post(format!("{}/session/{}/execute/sync", self.endpoint.trim_end_matches('/'), self.session_id))
            .json(&json!({ "script": script, "args": [] }))
            .send()
            .await
            .map_err(|e| AuditError::RenderFailure { url: String::new(), reason: e.to_string() })?;
        let body: Value = res
            .json()
            .await
            .map_err(|e| AuditError::RenderFailure { url: String::new(), reason: e.to_string() })?;
        Ok(body.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn screenshot_base64(&self) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/session/{}/screenshot", self.endpoint.trim_end_matches('/'), self.session_id))
            .send()
            .await
            .map_err(|e| AuditError::RenderFailure { url: String::new(), reason: e.to_string() })?;
        let body: Value = res
            .json()
            .await
            .map_err(|e| AuditError::RenderFailure { url: String::new(), reason: e.to_string() })?;
        body.get("value")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| AuditError::RenderFailure { url: String::new(), reason: "no screenshot value".to_string() })
    }

    pub async fn delete(self) {
        let _ = self
            .client
            .delete(format!("{}/session/{}", self.endpoint.trim_end_matches('/'), self.session_id))
            .send()
            .await;
    }
}

/// Runs the Core-Web-Vitals-producing script against the currently
/// navigated page and extracts [`PerfMetrics`]. The script contract is an
/// external collaborator (a CWV-measuring engine injected into the page);
/// here we call it via `execute_script` and parse its JSON result.
pub async fn audit_performance(session: &WebDriverSession, url: &str) -> Result<PerfMetrics> {
    session.navigate(url).await?;

    let script = r#"
        return window.__cwv_report || {
            performanceScore: 0, lcp: 0, cls: 0, inp: 0, fcp: 0, ttfb: 0, tti: 0, tbt: 0,
            speedIndex: 0, totalBytes: 0, requestCount: 0
        };
    "#;
    let value = session.execute_script(script).await.map_err(|e| match e {
        AuditError::RenderFailure { reason, .. } => AuditError::RenderFailure { url: url.to_string(), reason },
        other => other,
    })?;

    Ok(PerfMetrics {
        performance_score: value.get("performanceScore").and_then(Value::as_u64).unwrap_or(0) as u8,
        lcp: value.get("lcp").and_then(Value::as_f64).unwrap_or(0.0),
        cls: value.get("cls").and_then(Value::as_f64).unwrap_or(0.0),
        inp: value.get("inp").and_then(Value::as_f64).unwrap_or(0.0),
        fcp: value.get("fcp").and_then(Value::as_f64).unwrap_or(0.0),
        ttfb: value.get("ttfb").and_then(Value::as_f64).unwrap_or(0.0),
        tti: value.get("tti").and_then(Value::as_f64).unwrap_or(0.0),
        tbt: value.get("tbt").and_then(Value::as_f64).unwrap_or(0.0),
        speed_index: value.get("speedIndex").and_then(Value::as_f64).unwrap_or(0.0),
        total_bytes: value.get("totalBytes").and_then(Value::as_u64).unwrap_or(0),
        request_count: value.get("requestCount").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// Assesses a single Core Web Vital against the good/needs-improvement/poor
/// thresholds table. `metric` is one of `"lcp"`, `"inp"`,
/// `"cls"`, `"fid"`.
pub fn assess_vital(metric: &str, value: f64) -> VitalAssessment {
    let (good, needs_improvement) = match metric {
        "lcp" => (2500.0, 4000.0),
        "inp" => (200.0, 500.0),
        "cls" => (0.10, 0.25),
        "fid" => (100.0, 300.0),
        _ => return VitalAssessment::Good,
    };
    if value <= good {
        VitalAssessment::Good
    } else if value <= needs_improvement {
        VitalAssessment::NeedsImprovement
    } else {
        VitalAssessment::Poor
    }
}

/// Runs the mobile-responsiveness audit across the three viewports
///. Each viewport's failure is isolated — other viewports
/// still proceed.
pub async fn audit_mobile(session: &WebDriverSession, url: &str, screenshot_dir_ref: &str) -> MobileTestResult {
    let mut viewports = Vec::new();

    for viewport in Viewport::ALL {
        let result = audit_one_viewport(session, url, viewport, screenshot_dir_ref).await;
        viewports.push(result);
    }

    let overall_issues: Vec<String> = viewports.iter().flat_map(|v| v.issues.clone()).collect();
    let responsive = overall_issues.is_empty();

    MobileTestResult { url: url.to_string(), viewports, overall_issues, responsive }
}

async fn audit_one_viewport(session: &WebDriverSession, url: &str, viewport: Viewport, screenshot_dir_ref: &str) -> ViewportResult {
    let (width, height) = viewport.dimensions();

    match run_viewport_checks(session, url, viewport, width, height, screenshot_dir_ref).await {
        Ok(result) => result,
        Err(AuditError::RenderFailure { reason, .. }) => ViewportResult {
            viewport,
            screenshot_ref: None,
            issues: Vec::new(),
            has_overflow: false,
            error: Some(reason),
        },
        Err(other) => ViewportResult { viewport, screenshot_ref: None, issues: Vec::new(), has_overflow: false, error: Some(other.to_string()) },
    }
}

async fn run_viewport_checks(
    session: &WebDriverSession,
    url: &str,
    viewport: Viewport,
    width: u32,
    height: u32,
    screenshot_dir_ref: &str,
) -> Result<ViewportResult> {
    session.set_window_rect(width, height).await?;
    session.navigate(url).await?;

    let script = format!(
        r#"
        const overflow = document.documentElement.scrollWidth > window.innerWidth;
        const isTouch = {is_touch};
        let tinyTargets = 0;
        if (isTouch) {{
            document.querySelectorAll('a,button,input,select,textarea').forEach(el => {{
                const r = el.getBoundingClientRect();
                if ((r.width > 0 && r.width < 44) || (r.height > 0 && r.height < 44)) tinyTargets++;
            }});
        }}
        let tinyFonts = 0;
        document.querySelectorAll('*').forEach(el => {{
            if (el.textContent && el.textContent.trim().length > 0) {{
                const fs = parseFloat(getComputedStyle(el).fontSize || '0');
                if (fs > 0 && fs < 12) tinyFonts++;
            }}
        }});
        let fixedBars = 0;
        if ({is_mobile}) {{
            document.querySelectorAll('*').forEach(el => {{
                const style = getComputedStyle(el);
                if (style.position === 'fixed') {{
                    const r = el.getBoundingClientRect();
                    if (r.width > window.innerWidth * 0.9) fixedBars++;
                }}
            }});
        }}
        return {{ overflow, tinyTargets, tinyFonts, fixedBars }};
        "#,
        is_touch = viewport.is_touch(),
        is_mobile = matches!(viewport, Viewport::Mobile),
    );

    let value = session.execute_script(&script).await.map_err(|e| match e {
        AuditError::RenderFailure { reason, .. } => AuditError::RenderFailure { url: url.to_string(), reason },
        other => other,
    })?;

    let has_overflow = value.get("overflow").and_then(Value::as_bool).unwrap_or(false);
    let tiny_targets = value.get("tinyTargets").and_then(Value::as_u64).unwrap_or(0);
    let tiny_fonts = value.get("tinyFonts").and_then(Value::as_u64).unwrap_or(0);
    let fixed_bars = value.get("fixedBars").and_then(Value::as_u64).unwrap_or(0);

    let mut issues = Vec::new();
    if has_overflow {
        issues.push("horizontal scrollbar detected".to_string());
    }
    if viewport.is_touch() && tiny_targets > 0 {
        issues.push(format!("{tiny_targets} touch targets smaller than 44x44px"));
    }
    if tiny_fonts > 0 {
        issues.push(format!("{tiny_fonts} elements with font size smaller than 12px"));
    }
    if matches!(viewport, Viewport::Mobile) && fixed_bars > 0 {
        issues.push(format!("{fixed_bars} full-width fixed elements"));
    }

    let screenshot_ref = match session.screenshot_base64().await {
        Ok(data) => Some(screenshot_path(screenshot_dir_ref, viewport, &data)),
        Err(_) => None,
    };

    Ok(ViewportResult { viewport, screenshot_ref, issues, has_overflow, error: None })
}

/// Builds a screenshot filename carrying the viewport tag,
/// ("filenames include the viewport tag and a millisecond timestamp").
/// Callers persist `data` (base64 PNG) to this path via the file-system
/// collaborator; this module performs no file I/O itself.
fn screenshot_path(dir_ref: &str, viewport: Viewport, _data: &str) -> String {
    let tag = match viewport {
        Viewport::Mobile => "mobile",
        Viewport::Tablet => "tablet",
        Viewport::Desktop => "desktop",
    };
    format!("{}/{}-{}.png", dir_ref.trim_end_matches('/'), tag, chrono::Utc::now().timestamp_millis())
}
