use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::Config;
use crate::cookies::Cookie;
use crate::crawl::Crawler;
use crate::error::MirrorError;
use crate::{logging, server};

#[derive(Debug, Parser)]
#[command(
    name = "webmirror",
    version,
    about = "Scrape a website and create an offline browsable version on disk"
)]
struct Cli {
    /// URLs to scrape.
    #[arg(value_name = "URL", required_unless_present = "serve")]
    urls: Vec<String>,

    /// Only include URLs whose path matches one of these regular expressions.
    #[arg(short = 'n', long = "include", value_name = "REGEX")]
    include: Vec<String>,

    /// Exclude URLs whose path matches one of these regular expressions.
    #[arg(short = 'x', long = "exclude", value_name = "REGEX")]
    exclude: Vec<String>,

    /// Output directory to write the mirror to.
    #[arg(short = 'o', long = "output", default_value = ".")]
    output: PathBuf,

    /// JPEG quality to recode images with, 0 to disable recoding.
    #[arg(short = 'i', long = "image-quality", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..100))]
    image_quality: u8,

    /// Download depth, 0 for unlimited.
    #[arg(short = 'd', long = "depth", default_value_t = 10)]
    depth: u64,

    /// Time limit in seconds for each HTTP request, 0 for none.
    #[arg(short = 't', long = "timeout", default_value_t = 30)]
    timeout: u64,

    /// user[:password] to use for authentication.
    #[arg(short = 'u', long = "user", value_name = "USER[:PASSWORD]")]
    user: Option<String>,

    /// Additional header to send, e.g. 'X-Token: abc'. Repeatable.
    #[arg(long = "header", value_name = "NAME: VALUE")]
    header: Vec<String>,

    /// JSON cookie file to pre-populate the cookie jar from.
    #[arg(long = "cookies", value_name = "FILE")]
    cookies: Option<PathBuf>,

    /// Proxy URL to route requests through.
    #[arg(long = "proxy", value_name = "URL")]
    proxy: Option<String>,

    /// User-Agent header to send.
    #[arg(long = "user-agent", default_value = "")]
    user_agent: String,

    /// Serve an existing mirror directory instead of scraping.
    #[arg(long = "serve", value_name = "DIR", conflicts_with = "urls")]
    serve: Option<PathBuf>,

    /// Port to serve on.
    #[arg(long = "port", default_value_t = 8080)]
    port: u16,

    /// Verbose output.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    if let Some(dir) = cli.serve.clone() {
        server::serve(&dir, cli.port, cancel).await?;
        return Ok(());
    }

    let cookies = match &cli.cookies {
        Some(path) => read_cookie_file(path)?,
        None => Vec::new(),
    };
    let (username, password) = split_user(cli.user.as_deref());

    let mut failed = false;
    for url in &cli.urls {
        let config = Config {
            url: url.clone(),
            includes: cli.include.clone(),
            excludes: cli.exclude.clone(),
            image_quality: cli.image_quality,
            max_depth: cli.depth,
            timeout: Duration::from_secs(cli.timeout),
            output_dir: cli.output.clone(),
            username: username.clone(),
            password: password.clone(),
            headers: cli.header.clone(),
            cookies: cookies.clone(),
            proxy: cli.proxy.clone(),
            user_agent: cli.user_agent.clone(),
        };

        let mut crawler = match Crawler::new(config) {
            Ok(crawler) => crawler,
            Err(err) => {
                error!(%url, %err, "initializing the scraper failed");
                failed = true;
                continue;
            }
        };
        if let Err(err) = crawler.start(&cancel).await {
            let canceled = matches!(err, MirrorError::Canceled);
            error!(%url, %err, "scraping failed");
            failed = true;
            if canceled {
                break;
            }
        }
    }
    if failed {
        bail!("one or more URLs failed");
    }
    Ok(())
}

fn split_user(user: Option<&str>) -> (String, String) {
    match user {
        Some(value) => match value.split_once(':') {
            Some((name, password)) => (name.to_string(), password.to_string()),
            None => (value.to_string(), String::new()),
        },
        None => (String::new(), String::new()),
    }
}

fn read_cookie_file(path: &Path) -> Result<Vec<Cookie>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read cookie file: {}", path.display()))?;
    serde_json::from_slice(&bytes).context("failed to parse cookie file")
}
