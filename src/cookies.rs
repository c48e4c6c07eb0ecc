use chrono::{DateTime, Utc};
use cookie_store::CookieStore;
use reqwest_cookie_store::CookieStoreMutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// A cookie as stored in a cookie file. Optional fields are omitted when
/// serializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

/// Build a cookie store pre-populated for the seed origin.
pub fn build_store(seed: &Url, cookies: &[Cookie]) -> CookieStore {
    let mut store = CookieStore::default();
    for cookie in cookies {
        let mut raw = cookie::Cookie::new(
            cookie.name.clone(),
            cookie.value.clone().unwrap_or_default(),
        );
        if let Some(expires) = cookie.expires {
            if let Ok(timestamp) = cookie::time::OffsetDateTime::from_unix_timestamp(expires.timestamp()) {
                raw.set_expires(timestamp);
            }
        }
        if let Err(err) = store.insert_raw(&raw, seed) {
            warn!(cookie = %cookie.name, %err, "could not add cookie to the jar");
        }
    }
    store
}

/// Export the jar's cookies in the cookie file format.
pub fn export(store: &CookieStoreMutex) -> Vec<Cookie> {
    let store = store.lock().unwrap();
    let mut out = Vec::new();
    for cookie in store.iter_any() {
        let expires = match cookie.expires() {
            Some(cookie::Expiration::DateTime(timestamp)) => {
                DateTime::<Utc>::from_timestamp(timestamp.unix_timestamp(), 0)
            }
            _ => None,
        };
        out.push(Cookie {
            name: cookie.name().to_string(),
            value: match cookie.value() {
                "" => None,
                value => Some(value.to_string()),
            },
            expires,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cookie_file_format_omits_absent_fields() {
        let cookie = Cookie {
            name: "session".to_string(),
            value: None,
            expires: None,
        };
        assert_eq!(
            serde_json::to_string(&cookie).unwrap(),
            r#"{"name":"session"}"#
        );

        let parsed: Vec<Cookie> = serde_json::from_str(
            r#"[{"name":"id","value":"abc","expires":"2030-01-02T03:04:05Z"}]"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "id");
        assert_eq!(parsed[0].value.as_deref(), Some("abc"));
        assert!(parsed[0].expires.is_some());
    }

    #[test]
    fn seeded_cookies_round_trip_through_the_store() {
        let seed = Url::parse("https://example.org/").unwrap();
        let cookies = vec![Cookie {
            name: "id".to_string(),
            value: Some("abc".to_string()),
            expires: None,
        }];
        let store = CookieStoreMutex::new(build_store(&seed, &cookies));
        let exported = export(&store);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].name, "id");
        assert_eq!(exported[0].value.as_deref(), Some("abc"));
    }
}
