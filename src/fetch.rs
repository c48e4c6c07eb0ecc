use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use bytes::BytesMut;
use futures_util::StreamExt as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use reqwest_cookie_store::CookieStoreMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::cookies;
use crate::error::MirrorError;

/// How often a 429 response is retried before giving up.
const MAX_RETRIES: u32 = 10;
/// Base delay between retries; attempt `n` (1-based) sleeps `n` times this.
const RETRY_DELAY: Duration = Duration::from_millis(1500);

/// The shared HTTP client: timeout, proxy, redirect handling, and the cookie
/// jar live here; headers and auth are applied per request.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    cookie_store: Arc<CookieStoreMutex>,
    headers: HeaderMap,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: Duration,
}

impl Fetcher {
    /// Build the client. Configuration problems are collected instead of
    /// failing one at a time.
    pub fn new(config: &Config, seed: &Url) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();

        let cookie_store = Arc::new(CookieStoreMutex::new(cookies::build_store(
            seed,
            &config.cookies,
        )));

        let mut builder = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&cookie_store))
            .redirect(reqwest::redirect::Policy::limited(10));
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout);
        }
        if let Some(proxy) = &config.proxy {
            match reqwest::Proxy::all(proxy.clone()) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(err) => problems.push(format!("invalid proxy URL '{proxy}': {err}")),
            }
        }

        let mut headers = HeaderMap::new();
        if !config.user_agent.is_empty() {
            match HeaderValue::from_str(&config.user_agent) {
                Ok(value) => {
                    headers.insert(USER_AGENT, value);
                }
                Err(err) => problems.push(format!("invalid user agent: {err}")),
            }
        }
        if !config.username.is_empty() {
            let credentials = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", config.username, config.password));
            match HeaderValue::from_str(&format!("Basic {credentials}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(err) => problems.push(format!("invalid credentials: {err}")),
            }
        }
        for header in &config.headers {
            let Some((name, value)) = header.split_once(':') else {
                problems.push(format!("invalid header '{header}', expected 'Name: value'"));
                continue;
            };
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => problems.push(format!("invalid header '{header}'")),
            }
        }

        let client = match builder.build() {
            Ok(client) => Some(client),
            Err(err) => {
                problems.push(format!("building HTTP client failed: {err}"));
                None
            }
        };

        if !problems.is_empty() {
            return Err(problems);
        }
        let Some(client) = client else {
            return Err(vec!["building HTTP client failed".to_string()]);
        };
        Ok(Self {
            client,
            cookie_store,
            headers,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        })
    }

    /// Download a URL, following redirects and retrying 429 responses with a
    /// linearly growing back-off. Returns the body and the final URL.
    pub async fn fetch(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(Vec<u8>, Url), MirrorError> {
        let mut request_url = url.clone();
        request_url.set_fragment(None);

        for attempt in 1..=self.max_retries + 1 {
            let request = self
                .client
                .get(request_url.clone())
                .headers(self.headers.clone());
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(MirrorError::Canceled),
                response = request.send() => response?,
            };

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.max_retries {
                    return Err(MirrorError::ExhaustedRetries(request_url));
                }
                let delay = self.retry_delay * attempt;
                debug!(url = %request_url, attempt, ?delay, "rate limited, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MirrorError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
            if !response.status().is_success() {
                return Err(MirrorError::UnexpectedStatus(response.status().as_u16()));
            }

            let final_url = response.url().clone();
            let mut stream = response.bytes_stream();
            let mut buf = BytesMut::new();
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return Err(MirrorError::Canceled),
                    chunk = stream.next() => chunk,
                };
                match chunk {
                    Some(chunk) => buf.extend_from_slice(&chunk?),
                    None => break,
                }
            }
            return Ok((buf.to_vec(), final_url));
        }

        Err(MirrorError::ExhaustedRetries(request_url))
    }

    /// Cookies accumulated by the jar, including anything a server set
    /// during the crawl.
    pub fn cookies(&self) -> Vec<cookies::Cookie> {
        cookies::export(&self.cookie_store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Stub server answering 429 until `failures` requests have been seen.
    fn rate_limited_server(failures: u32) -> (String, Arc<AtomicU32>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub server");
        let addr = server.server_addr().to_ip().expect("stub server address");
        let requests = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&requests);
        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                let response = if n < failures {
                    tiny_http::Response::from_string("slow down").with_status_code(429)
                } else {
                    tiny_http::Response::from_string("ok")
                };
                let _ = request.respond(response);
            }
        });
        (format!("http://{addr}/"), requests)
    }

    fn test_fetcher(seed: &Url) -> Fetcher {
        let mut fetcher = Fetcher::new(&Config::default(), seed).expect("build fetcher");
        fetcher.max_retries = 2;
        fetcher.retry_delay = Duration::from_millis(1);
        fetcher
    }

    #[tokio::test]
    async fn retries_429_until_the_server_recovers() {
        let (base, requests) = rate_limited_server(2);
        let url = Url::parse(&base).unwrap();
        let fetcher = test_fetcher(&url);

        let (body, final_url) = fetcher
            .fetch(&url, &CancellationToken::new())
            .await
            .expect("fetch succeeds after retries");
        assert_eq!(body, b"ok");
        assert_eq!(final_url, url);
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_when_the_server_keeps_responding_429() {
        let (base, requests) = rate_limited_server(u32::MAX);
        let url = Url::parse(&base).unwrap();
        let fetcher = test_fetcher(&url);

        let err = fetcher
            .fetch(&url, &CancellationToken::new())
            .await
            .expect_err("fetch exhausts its retries");
        assert!(matches!(err, MirrorError::ExhaustedRetries(_)));
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_success_statuses_fail_immediately() {
        let (base, requests) = {
            let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub server");
            let addr = server.server_addr().to_ip().expect("stub server address");
            let requests = Arc::new(AtomicU32::new(0));
            let seen = Arc::clone(&requests);
            std::thread::spawn(move || {
                for request in server.incoming_requests() {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let _ = request
                        .respond(tiny_http::Response::from_string("gone").with_status_code(404));
                }
            });
            (format!("http://{addr}/missing"), requests)
        };
        let url = Url::parse(&base).unwrap();
        let fetcher = test_fetcher(&url);

        let err = fetcher
            .fetch(&url, &CancellationToken::new())
            .await
            .expect_err("404 is an error");
        assert!(matches!(err, MirrorError::UnexpectedStatus(404)));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_wins_over_the_back_off_sleep() {
        let (base, _) = rate_limited_server(u32::MAX);
        let url = Url::parse(&base).unwrap();
        let mut fetcher = test_fetcher(&url);
        fetcher.retry_delay = Duration::from_secs(60);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = fetcher
            .fetch(&url, &cancel)
            .await
            .expect_err("cancellation aborts the fetch");
        assert!(matches!(err, MirrorError::Canceled));
    }

    #[tokio::test]
    async fn sends_auth_and_configured_headers() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub server");
        let addr = server.server_addr().to_ip().expect("stub server address");
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                let mut auth = String::new();
                let mut token = String::new();
                for header in request.headers() {
                    match header.field.as_str().as_str().to_ascii_lowercase().as_str() {
                        "authorization" => auth = header.value.as_str().to_string(),
                        "x-token" => token = header.value.as_str().to_string(),
                        _ => {}
                    }
                }
                let _ = tx.send((auth, token));
                let _ = request.respond(tiny_http::Response::from_string("ok"));
            }
        });

        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let config = Config {
            username: "user".to_string(),
            password: "secret".to_string(),
            headers: vec!["X-Token: abc".to_string()],
            ..Config::default()
        };
        let fetcher = Fetcher::new(&config, &url).expect("build fetcher");
        fetcher
            .fetch(&url, &CancellationToken::new())
            .await
            .expect("fetch");

        let (auth, token) = rx.recv().expect("request observed");
        assert_eq!(auth, "Basic dXNlcjpzZWNyZXQ=");
        assert_eq!(token, "abc");
    }
}
