use std::collections::VecDeque;
use std::fs;

use kuchikiki::traits::TendrilSink as _;
use kuchikiki::NodeRef;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use crate::config::{self, Config};
use crate::cookies::Cookie;
use crate::css;
use crate::error::MirrorError;
use crate::fetch::Fetcher;
use crate::filter::UrlFilter;
use crate::htmlindex::{self, Index};
use crate::images;
use crate::rewrite;
use crate::storage;
use crate::urls;

/// Transformation applied to a downloaded asset before it is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PostProcess {
    Identity,
    Css,
    ImageRecode,
}

/// Tags whose references are downloaded right after a page is stored.
/// Stylesheets get the CSS pass; images are deferred to the image queue.
const ASSET_TAGS: &[(&str, PostProcess)] = &[
    (htmlindex::LINK_TAG, PostProcess::Css),
    (htmlindex::SCRIPT_TAG, PostProcess::Identity),
    (htmlindex::BODY_TAG, PostProcess::Identity),
    (htmlindex::STYLE_TAG, PostProcess::Identity),
];

/// The crawl engine. Owns the frontier, the processed set, and the image
/// queue; everything it learns ends up as files below the output directory.
#[derive(Debug)]
pub struct Crawler {
    config: Config,
    fetcher: Fetcher,
    base: Url,
    filter: UrlFilter,
    frontier: VecDeque<(Url, u64)>,
    images_queue: Vec<Url>,
}

impl Crawler {
    /// Validate the configuration and prepare a crawl. All configuration
    /// problems are reported at once.
    pub fn new(config: Config) -> Result<Self, MirrorError> {
        let mut problems = Vec::new();

        let base = match config::parse_seed(&config.url) {
            Ok(url) => Some(url),
            Err(problem) => {
                problems.push(problem);
                None
            }
        };
        let includes = compile_patterns(&config.includes, &mut problems);
        let excludes = compile_patterns(&config.excludes, &mut problems);

        let fetcher = base.as_ref().and_then(|seed| {
            match Fetcher::new(&config, seed) {
                Ok(fetcher) => Some(fetcher),
                Err(mut fetch_problems) => {
                    problems.append(&mut fetch_problems);
                    None
                }
            }
        });

        if !problems.is_empty() {
            return Err(MirrorError::InvalidConfig { problems });
        }
        let (Some(base), Some(fetcher)) = (base, fetcher) else {
            return Err(MirrorError::InvalidConfig {
                problems: vec!["seed URL missing".to_string()],
            });
        };

        let filter = UrlFilter::new(urls::url_host(&base), config.max_depth, includes, excludes);
        Ok(Self {
            config,
            fetcher,
            base,
            filter,
            frontier: VecDeque::new(),
            images_queue: Vec::new(),
        })
    }

    /// The effective base URL, replaced once by the seed's redirect target.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Cookies accumulated over the crawl.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.fetcher.cookies()
    }

    /// Run the crawl to completion. Per-URL failures are logged and skipped;
    /// only cancellation aborts the whole crawl.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<(), MirrorError> {
        if !self.config.output_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.config.output_dir)?;
        }

        let seed = self.base.clone();
        if !self.filter.should_download(&seed, 0, false) {
            return Err(MirrorError::SeedExcluded(seed));
        }
        self.process_url(seed, 0, cancel).await?;

        while let Some((url, depth)) = self.frontier.pop_front() {
            self.process_url(url, depth + 1, cancel).await?;
        }
        Ok(())
    }

    /// Fetch one page, store it, download its assets, and queue follow-up
    /// pages discovered through its hyperlinks.
    async fn process_url(
        &mut self,
        url: Url,
        depth: u64,
        cancel: &CancellationToken,
    ) -> Result<(), MirrorError> {
        info!(%url, depth, "downloading page");
        let (data, final_url) = match self.fetcher.fetch(&url, cancel).await {
            Ok(result) => result,
            Err(MirrorError::Canceled) => return Err(MirrorError::Canceled),
            Err(err) => {
                error!(%url, %err, "downloading page failed");
                return Ok(());
            }
        };

        if depth == 0 && final_url != url {
            info!(from = %url, to = %final_url, "using the redirect target as base URL");
            self.base = final_url.clone();
            self.filter.set_base_host(urls::url_host(&final_url));
        }

        // anything with a recognized binary signature is stored verbatim
        if infer::get(&data).is_some() {
            let path = storage::target_path(
                &self.config.output_dir,
                self.filter.base_host(),
                &final_url,
                false,
            );
            if let Err(err) = storage::write_file(&path, &data) {
                error!(%url, path = %path.display(), %err, "writing file failed");
            }
            return Ok(());
        }

        let document = kuchikiki::parse_html().one(String::from_utf8_lossy(&data).into_owned());
        let mut index = Index::new();
        index.index(&final_url, &document);

        self.store_page(&final_url, &data, &document, &index);
        self.download_references(&index, cancel).await?;

        for mut reference in index.urls(htmlindex::A_TAG) {
            reference.set_fragment(None);
            if self.filter.should_download(&reference, depth, false) {
                self.frontier.push_back((reference, depth));
            }
        }
        Ok(())
    }

    /// Rewrite the page for local browsing and write it out. Pages are
    /// always overwritten, their content may have changed.
    fn store_page(&self, url: &Url, data: &[u8], document: &NodeRef, index: &Index) {
        let bytes = match rewrite::rewrite_document(document, index, url, self.filter.base_host()) {
            Some(rewritten) => rewritten,
            None => data.to_vec(),
        };
        let path = storage::target_path(&self.config.output_dir, self.filter.base_host(), url, true);
        if let Err(err) = storage::write_file(&path, &bytes) {
            error!(%url, path = %path.display(), %err, "writing page failed");
        }
    }

    /// Download everything the page references. Images go last so that
    /// stylesheet passes can still enqueue what they discover.
    async fn download_references(
        &mut self,
        index: &Index,
        cancel: &CancellationToken,
    ) -> Result<(), MirrorError> {
        self.images_queue.extend(index.urls(htmlindex::BODY_TAG));
        self.images_queue.extend(index.urls(htmlindex::IMG_TAG));

        for &(tag, post_process) in ASSET_TAGS {
            for reference in index.urls(tag) {
                self.download_asset(reference, post_process, cancel).await?;
            }
        }

        let images = std::mem::take(&mut self.images_queue);
        for image in images {
            self.download_asset(image, PostProcess::ImageRecode, cancel)
                .await?;
        }
        Ok(())
    }

    /// Download one asset unless it was already stored in an earlier run.
    async fn download_asset(
        &mut self,
        mut url: Url,
        post_process: PostProcess,
        cancel: &CancellationToken,
    ) -> Result<(), MirrorError> {
        url.set_fragment(None);
        if !self.filter.should_download(&url, 0, true) {
            return Ok(());
        }
        let path = storage::target_path(
            &self.config.output_dir,
            self.filter.base_host(),
            &url,
            false,
        );
        if storage::file_exists(&path) {
            return Ok(());
        }

        info!(%url, "downloading asset");
        let (data, _) = match self.fetcher.fetch(&url, cancel).await {
            Ok(result) => result,
            Err(MirrorError::Canceled) => return Err(MirrorError::Canceled),
            Err(err) => {
                error!(%url, %err, "downloading asset failed");
                return Ok(());
            }
        };
        let data = self.post_process(post_process, &url, data);

        if let Err(err) = storage::write_file(&path, &data) {
            error!(%url, path = %path.display(), %err, "writing asset failed");
        }
        Ok(())
    }

    fn post_process(&mut self, kind: PostProcess, url: &Url, data: Vec<u8>) -> Vec<u8> {
        match kind {
            PostProcess::Identity => data,
            PostProcess::Css => {
                let text = String::from_utf8_lossy(&data);
                match css::rewrite(url, self.filter.base_host(), &text, &mut self.images_queue) {
                    Some(rewritten) => rewritten.into_bytes(),
                    None => data,
                }
            }
            PostProcess::ImageRecode => {
                if self.config.image_quality == 0 {
                    return data;
                }
                images::recode(url, &data, self.config.image_quality).unwrap_or(data)
            }
        }
    }
}

fn compile_patterns(patterns: &[String], problems: &mut Vec<String>) -> Vec<Regex> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        match Regex::new(pattern) {
            Ok(regex) => compiled.push(regex),
            Err(err) => problems.push(format!("invalid pattern '{pattern}': {err}")),
        }
    }
    compiled
}
