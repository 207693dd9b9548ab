//! CLI harness driving the migration audit pipeline against local file
//! inputs and a configured WebDriver endpoint.

use async_trait::async_trait;
use clap::Parser;
use migraudit::headless::{self, WebDriverSession};
use migraudit::input_readers::SitemapFetcher;
use migraudit::pipeline::{HeadlessBackend, PipelineConfig, ProbeBackend};
use migraudit::probe::{self, ProbeConfig, ProgressCallback};
use migraudit::store::{InMemoryProjectStore, LocalFileReader, NullNotifier};
use migraudit::types::{MobileTestResult, PageContent, PerfMetrics, Project, ProbeResult};
use migraudit::{run_pipeline, ProjectStore};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "migraudit-cli",
    version,
    about = "Runs the migration audit pipeline against local sitemap/analytics/redirect inputs"
)]
struct Cli {
    #[arg(long)]
    old_base_url: String,

    #[arg(long)]
    new_base_url: String,

    #[arg(long)]
    old_sitemap: Option<String>,

    #[arg(long)]
    new_sitemap: Option<String>,

    #[arg(long)]
    analytics: Option<String>,

    #[arg(long)]
    redirects: Option<String>,

    #[arg(long, default_value = "http://localhost:4444")]
    webdriver_endpoint: String,

    #[arg(long, default_value_t = 5)]
    concurrency: usize,

    #[arg(long, default_value = "project-1")]
    project_id: String,

    #[arg(long, default_value = "screenshots")]
    screenshot_root: String,
}

struct HttpSitemapFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl SitemapFetcher for HttpSitemapFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        self.client.get(url).send().await.ok()?.text().await.ok()
    }
}

struct HttpProbeBackend {
    client: reqwest::Client,
}

#[async_trait]
impl ProbeBackend for HttpProbeBackend {
    async fn probe_batch(&self, urls: Vec<String>, config: &ProbeConfig, on_progress: Option<ProgressCallback>) -> Vec<ProbeResult> {
        probe::probe_batch(urls, config, on_progress).await
    }

    async fn fetch_content(&self, url: &str) -> Option<PageContent> {
        let body = self.client.get(url).send().await.ok()?.text().await.ok()?;
        Some(probe::extract_page_content(&body, url))
    }
}

/// Owns the WebDriver session for the lifetime of one audit run.
struct WebDriverHeadlessBackend {
    session: WebDriverSession,
    inter_audit_delay: std::time::Duration,
}

#[async_trait]
impl HeadlessBackend for WebDriverHeadlessBackend {
    async fn performance_for(&self, url: &str) -> Option<PerfMetrics> {
        let result = headless::audit_performance(&self.session, url).await.ok();
        tokio::time::sleep(self.inter_audit_delay).await;
        result
    }

    async fn mobile_for(&self, url: &str, screenshot_dir_ref: &str) -> MobileTestResult {
        let result = headless::audit_mobile(&self.session, url, screenshot_dir_ref).await;
        tokio::time::sleep(self.inter_audit_delay).await;
        result
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let mut project = Project::new(cli.project_id.clone(), cli.old_base_url.clone(), cli.new_base_url.clone());
    project.inputs.old_sitemap = cli.old_sitemap.clone();
    project.inputs.new_sitemap = cli.new_sitemap.clone();
    project.inputs.analytics_export = cli.analytics.clone();
    project.inputs.redirect_map = cli.redirects.clone();

    let store = InMemoryProjectStore::new();
    store.seed(project);

    let mut config = PipelineConfig::default();
    config.probe.concurrency = cli.concurrency;
    config.screenshot_root = cli.screenshot_root.clone();
    config.headless.webdriver_endpoint = cli.webdriver_endpoint.clone();

    let http_client = reqwest::Client::builder().user_agent("Mozilla/5.0 (compatible; MigrationAuditBot/1.0)").build()?;
    let sitemap_fetcher = HttpSitemapFetcher { client: http_client.clone() };
    let probe_backend = HttpProbeBackend { client: http_client };
    let file_reader = LocalFileReader;
    let notifier = NullNotifier;

    let session = WebDriverSession::create(&config.headless).await?;
    let headless_backend = WebDriverHeadlessBackend { session, inter_audit_delay: std::time::Duration::from_millis(config.headless.inter_audit_delay_ms) };

    let result = run_pipeline(&store, &file_reader, &probe_backend, &headless_backend, &notifier, &sitemap_fetcher, &cli.project_id, &config).await;

    headless_backend.session.delete().await;

    match result {
        Ok(()) => {
            let project = store.load(&cli.project_id).await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("pipeline failed: {err}");
            Err(err.into())
        }
    }
}
