use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use dialoguer::{theme::ColorfulTheme, Select};
use env_logger::{Env, Target};
use lws_crawler::{
    capture_cookies, crawl_site, CheckpointStore, CrawlReport, CrawlSession, CrawlerConfig,
    Fetcher, HttpFetcher, OnError, RetryFetcher, Sites, StdinOperator, DEFAULT_SITES_FILE,
};
use lws_sites::{scrap_glob, scrap_page, Registry};
use tokio::runtime;

const DEFAULT_LOG_FILTER: &str = "lws=info,lws_crawler=info,lws_sites=info";

/// Logged-in Web Scraper
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Websites configuration file
    #[arg(env = "LWS_SITES", long, global = true, default_value = DEFAULT_SITES_FILE)]
    pub sites: PathBuf,
    /// When quiet no logs are outputted
    #[arg(long, short, global = true)]
    pub quiet: bool,
    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    #[command(name = "capture")]
    Capture(CaptureArgs),
    #[command(name = "crawl")]
    Crawl(CrawlArgs),
    #[command(name = "scrap")]
    Scrap(ScrapArgs),
    #[command(name = "sites")]
    Sites(SitesArgs),
    #[command(hide = true)]
    Completion {
        #[arg(value_enum, default_value = "bash")]
        shell: Shell,
    },
}

// Selection

/// Returns `alias`, or asks for one. `None` when the operator cancels.
fn select_alias(sites: &Sites, alias: Option<String>) -> anyhow::Result<Option<String>> {
    if let Some(alias) = alias {
        return Ok(Some(alias));
    }
    if sites.is_empty() {
        anyhow::bail!("No website configured in {}", sites.path().display());
    }

    let mut items = sites
        .iter()
        .map(|s| format!("{} ({})", s.alias, s.start_url))
        .collect::<Vec<_>>();
    items.push("Cancel".to_string());

    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a website")
        .items(&items)
        .default(0)
        .interact_opt()?;
    Ok(pick(sites, choice))
}

fn pick(sites: &Sites, choice: Option<usize>) -> Option<String> {
    let alias = choice.and_then(|i| sites.iter().nth(i)).map(|s| s.alias.clone());
    if alias.is_none() {
        log::info!("Cancelled, no website selected");
    }
    alias
}

// Capture

/// Open a browser on the login page and save the session cookies
#[derive(Debug, clap::Args)]
pub struct CaptureArgs {
    /// Website alias, asked interactively when missing
    pub alias: Option<String>,
    /// Override the configured login URL
    #[arg(long)]
    pub login_url: Option<String>,
    /// Directory the cookies file is written to
    #[arg(long, default_value = ".")]
    pub cookies_dir: PathBuf,
    /// Browser profile directory, kept between captures
    #[arg(long)]
    pub profile_dir: Option<PathBuf>,
}

pub fn capture(sites_file: &Path, args: CaptureArgs) -> anyhow::Result<()> {
    let (alias, login_url) = match (args.alias, args.login_url) {
        (Some(alias), Some(url)) => (alias, url),
        (alias, login_url) => {
            let sites = Sites::load(sites_file)?;
            let alias = match select_alias(&sites, alias)? {
                Some(alias) => alias,
                None => return Ok(()),
            };
            let login_url = match login_url {
                Some(url) => url,
                None => sites.get(&alias)?.login_url.clone(),
            };
            (alias, login_url)
        }
    };

    let conf = CrawlerConfig {
        cookies_dir: args.cookies_dir,
        ..Default::default()
    };
    let cookies_path = conf.cookies_path(&alias);

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let saved = rt.block_on(capture_in_browser(
        &alias,
        &login_url,
        &cookies_path,
        args.profile_dir.as_deref(),
    ))?;

    match saved {
        Some(path) => {
            println!("Cookies saved to {}", path.display());
            println!("Next: lws crawl {alias}");
        }
        None => println!("No cookies captured for {alias}, nothing saved"),
    }
    Ok(())
}

#[cfg(feature = "browser")]
async fn capture_in_browser(
    alias: &str,
    login_url: &str,
    cookies_path: &Path,
    profile_dir: Option<&Path>,
) -> anyhow::Result<Option<PathBuf>> {
    let profile_dir = profile_dir.unwrap_or_else(|| Path::new(lws_crawler::PROFILE_DIR));
    let mut browser = lws_crawler::ChromeSession::headed(profile_dir).await?;
    capture_cookies(&mut browser, &mut StdinOperator, alias, login_url, cookies_path).await
}

#[cfg(not(feature = "browser"))]
async fn capture_in_browser(
    _alias: &str,
    _login_url: &str,
    _cookies_path: &Path,
    _profile_dir: Option<&Path>,
) -> anyhow::Result<Option<PathBuf>> {
    anyhow::bail!("Cookie capture needs a browser, rebuild lws with `--features browser`")
}

// Crawl

/// Crawl a website with the captured session, resuming where it stopped
#[derive(Debug, clap::Args)]
pub struct CrawlArgs {
    /// Website alias, asked interactively when missing
    pub alias: Option<String>,
    /// Override the configured output path
    #[arg(long, short)]
    pub output: Option<PathBuf>,
    /// Stop after this many items, 0 for no limit
    #[arg(long)]
    pub max_items: Option<usize>,
    /// Override the configured number of items per output file, 0 for a single file
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Fetch pages with plain HTTP requests instead of rendering them in a
    /// headless browser, for static sites
    #[arg(long)]
    pub http: bool,
    /// Optional crawler yaml configuration file
    #[arg(env = "LWS_CRAWLER_CONFIG", long)]
    pub crawler_config: Option<PathBuf>,
    /// Override crawler's User-Agent pool, can be repeated
    #[arg(long = "user-agent")]
    pub user_agents: Vec<String>,
    /// Override crawler's minimum delay between pages, in seconds
    #[arg(long)]
    pub download_delay: Option<f32>,
    /// Disable delay adaptation to the server latency
    #[arg(long)]
    pub no_autothrottle: bool,
    /// Override crawler's number of retries per page
    #[arg(long)]
    pub max_retries: Option<u32>,
    /// Override crawler's request timeout, in seconds
    #[arg(long)]
    pub request_timeout: Option<f32>,
    /// Override crawler's checkpoint directory
    #[arg(long)]
    pub progress_dir: Option<PathBuf>,
    /// Override crawler's cookies directory
    #[arg(long)]
    pub cookies_dir: Option<PathBuf>,
    /// No SIGINT handling, Ctrl-C kills the crawl and the page in progress
    /// is fetched again on resume
    #[arg(long)]
    pub no_sigint: bool,
    /// Override crawler's download error handling strategy
    #[arg(value_enum, long)]
    pub on_dl_error: Option<OnError>,
    /// Override crawler's scrap error handling strategy
    #[arg(value_enum, long)]
    pub on_scrap_error: Option<OnError>,
    /// Override crawler's checkpoint error handling strategy
    #[arg(value_enum, long)]
    pub on_checkpoint_error: Option<OnError>,
}

fn load_crawler_config(path: Option<&Path>) -> anyhow::Result<CrawlerConfig> {
    match path {
        Some(path) => {
            log::debug!("Loading crawler configuration from {}", path.display());
            Ok(serde_yaml::from_reader(fs_err::File::open(path)?)?)
        }
        None => Ok(CrawlerConfig::default()),
    }
}

impl TryFrom<&CrawlArgs> for CrawlerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &CrawlArgs) -> Result<Self, Self::Error> {
        let mut conf = load_crawler_config(args.crawler_config.as_deref())?;
        if !args.user_agents.is_empty() {
            conf.user_agents = args.user_agents.clone();
        }
        if let Some(max_items) = args.max_items {
            conf.max_items = Some(max_items).filter(|n| *n > 0);
        }
        if let Some(delay) = args.download_delay {
            conf.throttle.download_delay = delay;
        }
        if args.no_autothrottle {
            conf.throttle.autothrottle = false;
        }
        if let Some(max_retries) = args.max_retries {
            conf.retry.max_retries = max_retries;
        }
        if let Some(timeout) = args.request_timeout {
            conf.request_timeout = timeout;
        }
        if let Some(dir) = &args.progress_dir {
            conf.progress_dir = dir.clone();
        }
        if let Some(dir) = &args.cookies_dir {
            conf.cookies_dir = dir.clone();
        }
        if let Some(on_dl_error) = args.on_dl_error {
            conf.on_dl_error = on_dl_error;
        }
        if let Some(on_scrap_error) = args.on_scrap_error {
            conf.on_scrap_error = on_scrap_error;
        }
        if let Some(on_checkpoint_error) = args.on_checkpoint_error {
            conf.on_checkpoint_error = on_checkpoint_error;
        }
        if args.no_sigint {
            conf.handle_sigint = false;
        }
        Ok(conf)
    }
}

pub fn crawl(sites_file: &Path, args: CrawlArgs) -> anyhow::Result<()> {
    let sites = Sites::load(sites_file)?;
    let alias = match select_alias(&sites, args.alias.clone())? {
        Some(alias) => alias,
        None => return Ok(()),
    };

    let mut site = sites.get(&alias)?.clone();
    if let Some(chunk_size) = args.chunk_size {
        site.chunked_size = chunk_size;
    }
    let scrapable = Registry::builtin()?.resolve(&site)?;
    let crawler_conf = CrawlerConfig::try_from(&args)?;
    let session = CrawlSession::open(scrapable, &crawler_conf, args.output.as_deref())?;

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let report = rt.block_on(async {
        let mut fetcher = open_fetcher(&crawler_conf, args.http).await?;
        let report = crawl_site(fetcher.as_mut(), session).await;
        fetcher.close().await;
        Ok::<_, anyhow::Error>(report?)
    })?;

    print_report(&report);
    report.into_result()?;
    Ok(())
}

async fn open_fetcher(conf: &CrawlerConfig, http: bool) -> anyhow::Result<Box<dyn Fetcher>> {
    if !http {
        log::info!("Rendering pages in headless Chromium");
        return browser_fetcher(conf).await;
    }
    log::info!("Fetching pages with plain HTTP requests");
    let http = HttpFetcher::new(conf)?;
    Ok(Box::new(RetryFetcher::new(http, conf.retry.clone())))
}

#[cfg(feature = "browser")]
async fn browser_fetcher(conf: &CrawlerConfig) -> anyhow::Result<Box<dyn Fetcher>> {
    let browser = lws_crawler::BrowserFetcher::launch(conf).await?;
    Ok(Box::new(RetryFetcher::new(browser, conf.retry.clone())))
}

#[cfg(not(feature = "browser"))]
async fn browser_fetcher(_conf: &CrawlerConfig) -> anyhow::Result<Box<dyn Fetcher>> {
    anyhow::bail!(
        "Browser rendering is unavailable, rebuild lws with `--features browser` or crawl with `--http`"
    )
}

fn print_report(report: &CrawlReport) {
    let stats = &report.stats;
    println!("Crawl of {} ended: {:?}", report.alias, report.outcome);
    println!(
        "  requests: {}, pages scraped: {}, skipped: {}, failed: {}, items: {}",
        stats.requests, stats.pages_scraped, stats.pages_skipped, stats.pages_failed, stats.items
    );
    for path in &report.written {
        println!("  wrote {}", path.display());
    }
}

// Scrap

/// Scrap local html pages and print the items to stdout
#[derive(Debug, clap::Args)]
#[command(group = clap::ArgGroup::new("page").required(true))]
pub struct ScrapArgs {
    /// Website alias whose extractor is applied
    #[arg(long, short)]
    pub alias: String,
    /// A local html page to scrap
    #[arg(group = "page", long)]
    pub file: Option<PathBuf>,
    /// A glob pattern of local html pages to scrap
    #[arg(group = "page", long)]
    pub glob: Option<String>,
    /// URL the page is considered to come from
    #[arg(long, conflicts_with = "glob")]
    pub location: Option<String>,
    /// Scrap error handling strategy
    #[arg(value_enum, long, default_value = "skip-and-log")]
    pub on_error: OnError,
}

pub fn scrap(sites_file: &Path, args: ScrapArgs) -> anyhow::Result<()> {
    let sites = Sites::load(sites_file)?;
    let scrapable = Registry::builtin()?.resolve(sites.get(&args.alias)?)?;

    let items = if let Some(pattern) = &args.glob {
        scrap_glob(&scrapable, pattern, args.on_error)?
    } else if let Some(path) = &args.file {
        let page = fs_err::read_to_string(path)?;
        let location = match &args.location {
            Some(location) => location.clone(),
            None => format!("file://{}", fs_err::canonicalize(path)?.display()),
        };
        scrap_page(&scrapable, page, &location)?
    } else {
        anyhow::bail!("Missing `file` or `glob`");
    };

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &items)?;
    writeln!(stdout)?;
    Ok(())
}

// Sites

/// List configured websites and their progress
#[derive(Debug, clap::Args)]
pub struct SitesArgs {
    /// Optional crawler yaml configuration file
    #[arg(env = "LWS_CRAWLER_CONFIG", long)]
    pub crawler_config: Option<PathBuf>,
    /// Override crawler's checkpoint directory
    #[arg(long)]
    pub progress_dir: Option<PathBuf>,
    /// Override crawler's cookies directory
    #[arg(long)]
    pub cookies_dir: Option<PathBuf>,
}

impl TryFrom<&SitesArgs> for CrawlerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &SitesArgs) -> Result<Self, Self::Error> {
        let mut conf = load_crawler_config(args.crawler_config.as_deref())?;
        if let Some(dir) = &args.progress_dir {
            conf.progress_dir = dir.clone();
        }
        if let Some(dir) = &args.cookies_dir {
            conf.cookies_dir = dir.clone();
        }
        Ok(conf)
    }
}

pub fn list_sites(sites_file: &Path, args: SitesArgs) -> anyhow::Result<()> {
    let sites = Sites::load(sites_file)?;
    let registry = Registry::builtin()?;
    let conf = CrawlerConfig::try_from(&args)?;
    let mut progress = CheckpointStore::new(&conf.progress_dir);

    println!("{} website(s) in {}", sites.len(), sites.path().display());
    for site in sites.iter() {
        let status = match site.validate() {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        let cookies = if conf.cookies_path(&site.alias).exists() {
            "captured"
        } else {
            "missing"
        };
        println!("- {} [{status}]", site.alias);
        println!("    start: {}", site.start_url);
        println!(
            "    next_url_func: {}",
            site.next_url_func.as_deref().unwrap_or("(none)")
        );
        println!(
            "    extractor: {}",
            if registry.has_extractor(&site.alias) { "yes" } else { "none" }
        );
        println!("    cookies: {cookies}");
        println!("    pages done: {}", progress.load(&site.alias).len());
    }
    Ok(())
}

fn init_logger(quiet: bool, log_file: Option<&Path>, default_filter: &str) -> anyhow::Result<()> {
    if quiet {
        return Ok(());
    }
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter));
    if let Some(path) = log_file {
        let file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = match args.cmd {
        SubCommand::Scrap(_) | SubCommand::Sites(_) => "lws_sites=warn,lws_crawler=warn",
        _ => DEFAULT_LOG_FILTER,
    };
    init_logger(args.quiet, args.log_file.as_deref(), log_filter)?;

    match args.cmd {
        SubCommand::Capture(cmd) => capture(&args.sites, cmd),
        SubCommand::Crawl(cmd) => crawl(&args.sites, cmd),
        SubCommand::Scrap(cmd) => scrap(&args.sites, cmd),
        SubCommand::Sites(cmd) => list_sites(&args.sites, cmd),
        SubCommand::Completion { shell } => {
            generate(shell, &mut Args::command(), "lws", &mut io::stdout());
            Ok(())
        }
    }
}
