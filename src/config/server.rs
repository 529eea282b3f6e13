use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP client configuration for outbound requests to the IdP and the
    /// proxied application.
    #[serde(default)]
    pub http_client: HttpClientConfig,

    /// Where authorized requests are sent.
    #[serde(default)]
    pub downstream: DownstreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            http_client: HttpClientConfig::default(),
            downstream: DownstreamConfig::default(),
        }
    }
}

impl ServerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.http_client.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "server.http_client.timeout_secs must be greater than zero".into(),
            ));
        }
        self.downstream.validate()
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8080
}

/// The handler authorized requests are delegated to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum DownstreamConfig {
    /// Forward to an HTTP application.
    Proxy {
        /// Base URL of the application, e.g. `http://127.0.0.1:3000`.
        url: String,
    },
    /// Serve files from a local directory.
    Static {
        /// Directory to serve.
        path: PathBuf,
    },
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self::Proxy {
            url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

impl DownstreamConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Proxy { url } => {
                let parsed = url::Url::parse(url).map_err(|e| {
                    ConfigError::Validation(format!(
                        "server.downstream.url '{url}' is not a valid URL: {e}"
                    ))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::Validation(format!(
                        "server.downstream.url '{url}' must use http or https"
                    )));
                }
                Ok(())
            }
            Self::Static { path } if path.as_os_str().is_empty() => Err(
                ConfigError::Validation("server.downstream.path cannot be empty".into()),
            ),
            Self::Static { .. } => Ok(()),
        }
    }
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpClientConfig {
    /// Request timeout in seconds for IdP calls.
    /// Calls that exceed it fail the login instead of hanging.
    #[serde(default = "default_http_client_timeout")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_http_client_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// User-Agent header to send with requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_client_timeout(),
            connect_timeout_secs: default_http_client_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpClientConfig {
    /// Build a reqwest Client from this configuration.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .user_agent(&self.user_agent)
            // Redirects from the IdP or the application go back to the browser
            .redirect(reqwest::redirect::Policy::none())
            .build()
    }

    /// Build the client used for the reverse-proxied application.
    ///
    /// Only the connect timeout applies: a total timeout would cut off
    /// downloads and long polls that outlive it.
    pub fn build_proxy_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .user_agent(&self.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
    }
}

fn default_http_client_timeout() -> u64 {
    10
}

fn default_http_client_connect_timeout() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("iyo-gateway/{}", env!("CARGO_PKG_VERSION"))
}
