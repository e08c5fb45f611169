use std::sync::OnceLock;

use reqwest::Client;
use tracing::{debug, info};

use crate::config::HttpConfig;
use crate::error::LiveHlsError;

/// Install the aws-lc-rs crypto provider for rustls once per process.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the HTTP client shared by the manifest and segment fetchers.
///
/// Per-request timeouts are applied by the fetchers themselves, so the client
/// only carries the connect timeout.
pub fn create_client(config: &HttpConfig) -> Result<Client, LiveHlsError> {
    install_rustls_provider();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| LiveHlsError::Configuration {
            reason: format!("invalid proxy URL `{proxy_url}`: {e}"),
        })?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_url, "Using explicitly configured proxy");
    } else if config.use_system_proxy {
        debug!("Using system proxy settings");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder
        .build()
        .map_err(|e| LiveHlsError::Configuration {
            reason: format!("failed to build HTTP client: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        assert!(create_client(&HttpConfig::default()).is_ok());
    }

    #[test]
    fn rejects_malformed_proxy() {
        let config = HttpConfig {
            proxy: Some("http://[::1".to_string()),
            ..HttpConfig::default()
        };
        let err = create_client(&config).unwrap_err();
        assert!(matches!(err, LiveHlsError::Configuration { .. }));
    }
}
