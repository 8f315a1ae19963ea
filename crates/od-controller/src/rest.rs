//! REST client for the testing cloud
//!
//! Used for the browser catalog, credential validation and per-session
//! metadata. Nothing here is on the path of a running job's tunnel.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use od_core::browser::{AutomationKind, BrowserDescriptor};
use od_core::config::GlobalConfig;
use od_core::{ConfigError, CredentialResolver, Credentials, Secret};

/// Errors from [`SauceRestClient`]
#[derive(Error, Debug)]
pub enum RestError {
    /// Transport failure (connection refused, timeout, DNS, TLS)
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx reply
    #[error("REST API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Reply body did not have the expected shape
    #[error("Invalid REST response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The call needs credentials and none are configured
    #[error("No credentials configured")]
    MissingCredentials,
}

/// One entry of the browser catalog as the REST API returns it
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    os: String,
    api_name: String,
    #[serde(default)]
    short_version: String,
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    device_type: Option<String>,
}

impl From<CatalogEntry> for BrowserDescriptor {
    fn from(entry: CatalogEntry) -> Self {
        BrowserDescriptor {
            platform: entry.os,
            browser: entry.api_name,
            version: entry.short_version,
            device: entry.device.filter(|d| !d.is_empty()),
            device_type: entry.device_type.filter(|d| !d.is_empty()),
        }
    }
}

/// Parse a catalog response body
pub fn parse_catalog(body: &str) -> Result<Vec<BrowserDescriptor>, serde_json::Error> {
    let entries: Vec<CatalogEntry> = serde_json::from_str(body)?;
    Ok(entries.into_iter().map(BrowserDescriptor::from).collect())
}

/// HTTP client for the REST API
pub struct SauceRestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl SauceRestClient {
    /// Client for the API at `base_url`, authenticating as `credentials`
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, RestError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30));
        if is_loopback(base_url) {
            builder = builder.no_proxy();
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Browsers available for `kind`
    ///
    /// Failures are logged and yield an empty list.
    pub async fn fetch_browsers(&self, kind: AutomationKind) -> Vec<BrowserDescriptor> {
        match self.try_fetch_browsers(kind).await {
            Ok(browsers) => browsers,
            Err(e) => {
                tracing::error!("Failed to fetch {} browsers: {}", kind, e);
                Vec::new()
            }
        }
    }

    async fn try_fetch_browsers(&self, kind: AutomationKind) -> Result<Vec<BrowserDescriptor>, RestError> {
        let url = format!("{}/info/browsers/{}", self.base_url, kind.catalog_path());
        let body = Self::handle_response(self.http.get(url).send().await?).await?;
        Ok(parse_catalog(&body)?)
    }

    /// Raw body of the account's tunnel list
    pub async fn tunnels(&self) -> Result<String, RestError> {
        let url = format!("{}/{}/tunnels", self.base_url, self.username()?);
        let request = self.authorized(self.http.get(url));
        Self::handle_response(request.send().await?).await
    }

    /// Update a recorded session's metadata
    pub async fn update_job_info(&self, session_id: &str, info: &serde_json::Value) -> Result<(), RestError> {
        let url = format!("{}/{}/jobs/{}", self.base_url, self.username()?, session_id);
        let request = self.authorized(self.http.put(url)).json(info);
        Self::handle_response(request.send().await?).await?;
        Ok(())
    }

    fn username(&self) -> Result<&str, RestError> {
        if self.credentials.is_unconfigured() {
            return Err(RestError::MissingCredentials);
        }
        Ok(&self.credentials.username)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(
            &self.credentials.username,
            Some(self.credentials.access_key.expose()),
        )
    }

    async fn handle_response(resp: reqwest::Response) -> Result<String, RestError> {
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(RestError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Whether `url` points at this machine; such endpoints bypass proxies
fn is_loopback(url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

/// Check the controller's credentials against the REST API
///
/// With auth reuse enabled the local auth cache must exist; otherwise the
/// stored credentials are used. Either way the tunnel list must come back
/// non-empty.
pub async fn validate_credentials(
    global: &GlobalConfig,
    resolver: &CredentialResolver,
) -> Result<(), ConfigError> {
    let credentials = if global.reuse_auth {
        let cached = resolver.read_auth_cache();
        if cached.is_unconfigured() {
            return Err(ConfigError::Credentials(
                "Unable to find ~/.sauce-ondemand file".to_string(),
            ));
        }
        cached
    } else {
        Credentials::new(global.username.clone(), Secret::new(global.api_key.clone()))
    };

    let failed = |reason: String| {
        ConfigError::Credentials(format!("Failed to connect to Sauce OnDemand: {}", reason))
    };

    let client = SauceRestClient::new(&global.api_url, credentials).map_err(|e| failed(e.to_string()))?;
    match client.tunnels().await {
        Ok(body) if !body.trim().is_empty() => Ok(()),
        Ok(_) => Err(failed("empty response".to_string())),
        Err(e) => Err(failed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP request with a fixed reply, returning the request head
    async fn serve_once(status: &'static str, body: &'static str) -> (SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&head).into_owned()
        });
        (addr, task)
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback("http://127.0.0.1:8080/rest/v1"));
        assert!(is_loopback("http://localhost/rest"));
        assert!(is_loopback("http://[::1]:9000/"));
        assert!(!is_loopback("https://saucelabs.com/rest/v1"));
        assert!(!is_loopback("not a url"));
    }

    #[test]
    fn test_parse_catalog() {
        let body = r#"[
            {"os": "Windows 10", "api_name": "chrome", "short_version": "120", "long_name": "Google Chrome"},
            {"os": "Linux", "api_name": "android", "short_version": "12.0", "device": "Pixel 6", "device_type": "phone"}
        ]"#;
        let browsers = parse_catalog(body).unwrap();
        assert_eq!(browsers.len(), 2);
        assert_eq!(browsers[0].key(), "Windows 10|chrome|120");
        assert_eq!(browsers[1].device.as_deref(), Some("Pixel 6"));
        assert_eq!(browsers[1].device_type.as_deref(), Some("phone"));
    }

    #[tokio::test]
    async fn test_fetch_browsers_failure_is_empty() {
        let addr = closed_port().await;
        let client = SauceRestClient::new(&format!("http://{}/rest/v1", addr), Credentials::empty()).unwrap();
        assert!(client.fetch_browsers(AutomationKind::WebDriver).await.is_empty());
    }

    #[tokio::test]
    async fn test_tunnels_uses_basic_auth() {
        let (addr, request) = serve_once("200 OK", r#"["tunnel-1"]"#).await;
        let client = SauceRestClient::new(
            &format!("http://{}/rest/v1/", addr),
            Credentials::new("dave", Secret::new("key")),
        )
        .unwrap();

        let body = client.tunnels().await.unwrap();
        assert_eq!(body, r#"["tunnel-1"]"#);

        let head = request.await.unwrap();
        assert!(head.starts_with("GET /rest/v1/dave/tunnels "));
        assert!(head.to_ascii_lowercase().contains("authorization: basic"));
    }

    #[tokio::test]
    async fn test_tunnels_requires_credentials() {
        let client = SauceRestClient::new("http://127.0.0.1:1", Credentials::empty()).unwrap();
        assert!(matches!(
            client.tunnels().await,
            Err(RestError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_validate_reuse_auth_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalConfig {
            reuse_auth: true,
            ..Default::default()
        };
        let resolver = CredentialResolver::new(dir.path().join("missing"));

        let err = validate_credentials(&global, &resolver).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Credentials error: Unable to find ~/.sauce-ondemand file"
        );
    }

    #[tokio::test]
    async fn test_validate_unreachable_api() {
        let addr = closed_port().await;
        let global = GlobalConfig {
            username: "erin".to_string(),
            api_key: "key".to_string(),
            api_url: format!("http://{}/rest/v1", addr),
            ..Default::default()
        };
        let resolver = CredentialResolver::for_config(&global);

        let err = validate_credentials(&global, &resolver).await.unwrap_err();
        assert!(err.to_string().contains("Failed to connect to Sauce OnDemand"));
    }

    #[tokio::test]
    async fn test_validate_success() {
        let (addr, _request) = serve_once("200 OK", "[]").await;
        let global = GlobalConfig {
            username: "erin".to_string(),
            api_key: "key".to_string(),
            api_url: format!("http://{}/rest/v1", addr),
            ..Default::default()
        };

        validate_credentials(&global, &CredentialResolver::for_config(&global))
            .await
            .unwrap();
    }
}
