use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid configuration: {}", problems.join("; "))]
    InvalidConfig { problems: Vec<String> },
    #[error("seed URL is rejected by the configured filters: {0}")]
    SeedExcluded(Url),
    #[error("http request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected HTTP status code {0}")]
    UnexpectedStatus(u16),
    #[error("giving up on {0}: too many 429 responses")]
    ExhaustedRetries(Url),
    #[error("parsing HTML failed: {0}")]
    Parse(String),
    #[error("file system error: {0}")]
    Io(#[from] std::io::Error),
    #[error("canceled")]
    Canceled,
}
