use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::cookies::Cookie;

/// Everything a crawl needs to know, immutable once the crawler is built.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seed URL; a missing scheme defaults to `http`.
    pub url: String,
    /// Regular expressions a URL path must match to be downloaded.
    pub includes: Vec<String>,
    /// Regular expressions that exclude a URL path from the download.
    pub excludes: Vec<String>,
    /// JPEG quality for image recoding, 0 to disable.
    pub image_quality: u8,
    /// Download depth, 0 for unlimited.
    pub max_depth: u64,
    /// Time limit per HTTP request, zero for none.
    pub timeout: Duration,
    /// Directory the mirror is written to; empty means the working directory.
    pub output_dir: PathBuf,
    pub username: String,
    pub password: String,
    /// Additional request headers as `Name: value` strings.
    pub headers: Vec<String>,
    /// Cookies pre-populated for the seed origin.
    pub cookies: Vec<Cookie>,
    /// Proxy URL to route requests through.
    pub proxy: Option<String>,
    /// User-Agent header, empty to send none.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            includes: Vec::new(),
            excludes: Vec::new(),
            image_quality: 0,
            max_depth: 0,
            timeout: Duration::from_secs(30),
            output_dir: PathBuf::new(),
            username: String::new(),
            password: String::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            proxy: None,
            user_agent: String::new(),
        }
    }
}

/// Parse the seed URL, defaulting the scheme to `http`.
pub fn parse_seed(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("seed URL is empty".to_string());
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    match Url::parse(&candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(url),
        Ok(url) => Err(format!(
            "seed URL '{trimmed}' has unsupported scheme '{}'",
            url.scheme()
        )),
        Err(err) => Err(format!("invalid seed URL '{trimmed}': {err}")),
    }
}
