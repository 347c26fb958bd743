use crate::{Error, Result};
use serde::{de, Deserialize, Deserializer};
use std::{fmt, time::Duration};
use url::Url;

const DEFAULT_SERVER_URL: &str = "tcp://localhost:7222";
const DEFAULT_USERNAME: &str = "admin";

/// Where and as whom a [`Client`](crate::Client) connects.
///
/// Built from [`Default`] with the `with_*` methods, or deserialized:
///
/// ```
/// use ems_client::ClientOptions;
///
/// # fn main() -> ems_client::Result<()> {
/// let options = ClientOptions::default()
///     .with_server_url("tcp://127.0.0.1:7222")?
///     .with_username("admin")
///     .with_password("");
/// assert_eq!(options.server_url().port(), Some(7222));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    #[serde(deserialize_with = "deserialize_server_url")]
    server_url: Url,
    username: String,
    password: String,
    request_timeout_ms: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_url: parse_server_url(DEFAULT_SERVER_URL).expect("default server url is valid"),
            username: DEFAULT_USERNAME.into(),
            password: String::new(),
            request_timeout_ms: None,
        }
    }
}

impl ClientOptions {
    /// Set the server to connect to: `tcp://host:port` or `ssl://host:port`.
    pub fn with_server_url(mut self, url: &str) -> Result<Self> {
        self.server_url = parse_server_url(url)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = username.into();
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.into();
        self
    }

    /// Bound how long [`Client::send_receive`](crate::Client::send_receive)
    /// waits for a reply. Unset, it waits forever.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn request_timeout_ms(&self) -> Option<u64> {
        self.request_timeout_ms
    }
}

fn parse_server_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    if !matches!(parsed.scheme(), "tcp" | "ssl") {
        return Err(Error::InvalidServerUrl(format!(
            "unsupported scheme {:?} in {}",
            parsed.scheme(),
            url
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidServerUrl(format!("no host in {}", url)));
    }
    Ok(parsed)
}

fn deserialize_server_url<'de, D>(deserializer: D) -> std::result::Result<Url, D::Error>
where
    D: Deserializer<'de>,
{
    let url = String::deserialize(deserializer)?;
    parse_server_url(&url).map_err(de::Error::custom)
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("server_url", &self.server_url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}
