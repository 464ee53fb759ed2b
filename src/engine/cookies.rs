/// Engine cookie source resolution
///
/// The cookie setting accepts three shapes: a literal JSON object, a
/// `k=v; k=v` pair string, or an `http(s)://` URL whose body yields one of
/// those two. Resolution happens lazily on first use and the outcome is
/// cached for the process lifetime; a broken source logs a warning and
/// behaves like no cookies at all.

use std::collections::HashMap;
use tokio::sync::OnceCell;

/// Lazily-resolved cookie configuration
#[derive(Debug)]
pub struct CookieSource {
    raw: Option<String>,
    resolved: OnceCell<Option<HashMap<String, String>>>,
}

impl CookieSource {
    pub fn new(raw: Option<String>) -> Self {
        Self {
            raw,
            resolved: OnceCell::new(),
        }
    }

    /// Resolve the configured source into a cookie map
    pub async fn resolve(&self, http: &reqwest::Client) -> Option<&HashMap<String, String>> {
        self.resolved
            .get_or_init(|| async {
                let raw = self.raw.as_deref()?.trim().to_string();
                if raw.is_empty() {
                    return None;
                }
                match fetch_and_parse(&raw, http).await {
                    Ok(cookies) => Some(cookies),
                    Err(e) => {
                        tracing::warn!("⚠️ Failed to resolve engine cookies: {e}");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// Cookie map rendered as a `Cookie` header value
    pub async fn header_value(&self, http: &reqwest::Client) -> Option<String> {
        let cookies = self.resolve(http).await?;
        if cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = cookies.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Some(pairs.join("; "))
    }
}

async fn fetch_and_parse(
    raw: &str,
    http: &reqwest::Client,
) -> anyhow::Result<HashMap<String, String>> {
    let content = if raw.starts_with("http://") || raw.starts_with("https://") {
        let response = http.get(raw).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("cookie URL returned HTTP {}", response.status());
        }
        let body = response.text().await?;
        tracing::info!("🍪 Fetched cookies from configured URL");
        body.trim().to_string()
    } else {
        raw.to_string()
    };

    parse_cookie_text(&content)
}

/// Parse either a JSON object or a `k=v; k=v` string into a cookie map
pub fn parse_cookie_text(content: &str) -> anyhow::Result<HashMap<String, String>> {
    let content = content.trim();

    if content.starts_with('{') {
        let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(content)?;
        return Ok(parsed
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect());
    }

    let mut cookies = HashMap::new();
    for pair in content.split(';') {
        if let Some((k, v)) = pair.split_once('=') {
            cookies.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    Ok(cookies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_object() {
        let cookies = parse_cookie_text(r#"{"session": "abc", "uid": "42"}"#).unwrap();
        assert_eq!(cookies["session"], "abc");
        assert_eq!(cookies["uid"], "42");
    }

    #[test]
    fn parses_pair_string() {
        let cookies = parse_cookie_text("session=abc; uid=42;").unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies["uid"], "42");
    }

    #[test]
    fn pair_values_keep_embedded_equals() {
        let cookies = parse_cookie_text("token=a=b=c").unwrap();
        assert_eq!(cookies["token"], "a=b=c");
    }

    #[tokio::test]
    async fn unset_source_resolves_to_none() {
        let source = CookieSource::new(None);
        let http = reqwest::Client::new();
        assert!(source.resolve(&http).await.is_none());
        assert!(source.header_value(&http).await.is_none());
    }
}
