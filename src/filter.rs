use std::collections::HashSet;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::urls;

/// Gate deciding whether a URL gets downloaded, plus the crawl-wide memory
/// of everything already considered.
#[derive(Debug)]
pub struct UrlFilter {
    base_host: String,
    max_depth: u64,
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
    processed: HashSet<String>,
}

impl UrlFilter {
    pub fn new(base_host: String, max_depth: u64, includes: Vec<Regex>, excludes: Vec<Regex>) -> Self {
        Self {
            base_host,
            max_depth,
            includes,
            excludes,
            processed: HashSet::new(),
        }
    }

    pub fn base_host(&self) -> &str {
        &self.base_host
    }

    /// Adopt the host of the seed's redirect target.
    pub fn set_base_host(&mut self, host: String) {
        self.base_host = host;
    }

    /// Whether `url` should be downloaded. The URL is marked processed
    /// before any host, depth, or pattern check, so a rejected URL is never
    /// examined again.
    pub fn should_download(&mut self, url: &Url, current_depth: u64, is_asset: bool) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }

        let key = urls::normalize_key(url, &self.base_host);
        if self.processed.contains(&key) {
            return false;
        }
        self.processed.insert(key);

        if !is_asset {
            if urls::url_host(url) != self.base_host {
                debug!(%url, "skipping page on external host");
                return false;
            }
            if self.max_depth != 0 && current_depth == self.max_depth {
                debug!(%url, depth = current_depth, "skipping page beyond the depth limit");
                return false;
            }
        }
        if !self.includes.is_empty()
            && !self.includes.iter().any(|re| re.is_match(url.path()))
        {
            debug!(%url, "skipping URL matching no include pattern");
            return false;
        }
        if let Some(pattern) = self.excludes.iter().find(|re| re.is_match(url.path())) {
            debug!(%url, %pattern, "skipping excluded URL");
            return false;
        }
        true
    }

    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.processed.contains(key)
    }
}
