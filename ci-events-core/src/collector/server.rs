//! Server identity and collector endpoint information

use chrono::Utc;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Identity of the CI server reporting events, sent with every batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(rename = "type")]
    pub server_type: String,
    pub version: String,
    pub url: String,
    pub instance_id: String,
    /// Epoch milliseconds at which the batch was assembled
    pub sending_time: i64,
}

/// Where batches are delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Collector base URL without a trailing slash
    pub url: String,
    pub shared_space: String,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, shared_space: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            shared_space: shared_space.into(),
        }
    }

    /// URL events are PUT to
    pub fn events_url(&self) -> String {
        format!(
            "{}/internal-api/shared_spaces/{}/analytics/ci/events",
            self.url,
            urlencoding::encode(&self.shared_space)
        )
    }
}

/// Supplies server identity and endpoint details to the delivery worker
///
/// Both are queried once per send campaign, so implementations may change
/// them at runtime.
pub trait ServerContext: Send + Sync {
    fn server_info(&self) -> ServerInfo;

    fn endpoint(&self) -> EndpointConfig;
}

/// `ServerContext` backed by static configuration
#[derive(Debug, Clone)]
pub struct ConfiguredServer {
    server_type: String,
    version: String,
    self_url: String,
    instance_id: String,
    endpoint: EndpointConfig,
}

impl ConfiguredServer {
    /// Build from configuration
    ///
    /// A missing `instance_id` gets a random one for the lifetime of this value.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let url = config
            .url
            .clone()
            .ok_or_else(|| Error::Config("server.url is required".to_string()))?;
        let endpoint = EndpointConfig::new(url, config.shared_space.clone());

        Ok(Self {
            server_type: config.server_type.clone(),
            version: config.version.clone(),
            self_url: config
                .self_url
                .clone()
                .unwrap_or_else(|| endpoint.url.clone()),
            instance_id: config
                .instance_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            endpoint,
        })
    }
}

impl ServerContext for ConfiguredServer {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            server_type: self.server_type.clone(),
            version: self.version.clone(),
            url: self.self_url.clone(),
            instance_id: self.instance_id.clone(),
            sending_time: Utc::now().timestamp_millis(),
        }
    }

    fn endpoint(&self) -> EndpointConfig {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_url() {
        let endpoint = EndpointConfig::new("https://octane.example.com/", "1001");
        assert_eq!(
            endpoint.events_url(),
            "https://octane.example.com/internal-api/shared_spaces/1001/analytics/ci/events"
        );
    }

    #[test]
    fn test_events_url_encodes_space() {
        let endpoint = EndpointConfig::new("http://localhost", "a b");
        assert!(endpoint.events_url().contains("/shared_spaces/a%20b/"));
    }

    #[test]
    fn test_configured_server_requires_url() {
        assert!(ConfiguredServer::new(&ServerConfig::default()).is_err());
    }

    #[test]
    fn test_configured_server_info() {
        let config = ServerConfig {
            url: Some("http://collector:9000".to_string()),
            instance_id: Some("ci-7".to_string()),
            server_type: "jenkins".to_string(),
            ..Default::default()
        };
        let server = ConfiguredServer::new(&config).unwrap();

        let info = server.server_info();
        assert_eq!(info.server_type, "jenkins");
        assert_eq!(info.instance_id, "ci-7");
        assert_eq!(info.url, "http://collector:9000");
        assert!(info.sending_time > 0);
        assert_eq!(server.endpoint().shared_space, "1001");
    }

    #[test]
    fn test_configured_server_generates_instance_id() {
        let config = ServerConfig {
            url: Some("http://collector:9000".to_string()),
            ..Default::default()
        };
        let server = ConfiguredServer::new(&config).unwrap();
        let first = server.server_info().instance_id;
        assert!(!first.is_empty());
        assert_eq!(first, server.server_info().instance_id);
    }
}
