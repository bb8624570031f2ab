//! Name-resolution facade.
//!
//! A thin resolver sitting in front of the [`crate::locality::LocalityStore`]: it turns a
//! `//<authority>` target plus an optional bootstrap record into a fixed service-config
//! document and an xDS node identity, and hands both to a listener. It never resolves real
//! backend addresses itself — that is xDS's job, performed entirely inside the balancer this
//! crate builds.
//!
//! Modeled on `xds/uri.rs`'s `XdsUri`/`XdsUriError` (a small parse-and-reject value type) and
//! the general shape of `xds-client`'s `Node`/`ServerConfig` bootstrap plumbing, reimagined
//! locally since the wire client itself stays out of scope.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tonic::{Code, Status};

use crate::error::ConfigError;

const SERVICE_CONFIG_WITHOUT_BALANCER_NAME: &str =
    r#"{"loadBalancingConfig":[{"xds_experimental":{"childPolicy":[{"round_robin":{}}]}}]}"#;

/// xDS node identity, opaque to this crate and consumed by the xDS client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub cluster: String,
}

/// The `(serverUri, node)` pair a bootstrap file would normally supply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapRecord {
    pub server_uri: String,
    pub node: Node,
}

/// External collaborator: a bootstrap loader that returns `(serverUri, node)` or is
/// unavailable. Reading an actual bootstrap file is packaging/registration glue this core
/// does not own; this trait is the seam a caller plugs a real loader into.
pub trait BootstrapSource: Send + Sync {
    fn load(&self) -> Option<BootstrapRecord>;
}

/// A `BootstrapSource` that never has a bootstrap record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBootstrap;

impl BootstrapSource for NoBootstrap {
    fn load(&self) -> Option<BootstrapRecord> {
        None
    }
}

/// The structured form of the service-config JSON handed to the listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "loadBalancingConfig")]
    pub load_balancing_config: Vec<LoadBalancingConfigEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancingConfigEntry {
    pub xds_experimental: XdsExperimentalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XdsExperimentalConfig {
    #[serde(rename = "balancer_name", skip_serializing_if = "Option::is_none")]
    pub balancer_name: Option<String>,
    #[serde(rename = "childPolicy")]
    pub child_policy: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// What `XdsNameResolver::start` hands to its caller.
///
/// `addresses` is always empty: xDS discovers endpoints itself through the balancer this
/// crate builds, not through name resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionResult {
    // `addresses` stays `Vec<()>` rather than `Vec<SocketAddr>`: this resolver never discovers
    // real backend addresses, so the only thing worth expressing here is "empty".
    pub addresses: Vec<()>,
    pub service_config: ServiceConfig,
    pub node: Node,
}

/// Receives the outcome of a resolution attempt.
pub trait ResolutionListener: Send + Sync {
    fn on_result(&self, result: ResolutionResult);
    fn on_error(&self, status: Status);
}

/// Parses the `//<authority>` resolver target. The authority is required; an empty one is
/// rejected with `InvalidArgument` at construction.
fn parse_authority(target: &str) -> Result<String, ConfigError> {
    let rest = target.strip_prefix("//").unwrap_or(target);
    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return Err(ConfigError::EmptyAuthority);
    }
    Ok(authority.to_string())
}

/// The name-resolution facade sitting in front of the locality store.
pub struct XdsNameResolver {
    authority: String,
    bootstrap: Arc<dyn BootstrapSource>,
}

impl XdsNameResolver {
    /// Rejects `target` at construction if it carries no authority.
    pub fn new(target: &str, bootstrap: Arc<dyn BootstrapSource>) -> Result<Self, ConfigError> {
        let authority = parse_authority(target)?;
        Ok(Self { authority, bootstrap })
    }

    /// The authority this resolver was constructed for (`getServiceAuthority()`).
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Reads the bootstrap record (or falls back to defaults), builds and parses the
    /// service-config text, and reports the result to `listener`.
    ///
    /// Panics if the service-config text fails to parse: that text is compile-time authored
    /// in this module, so a parse failure here is a build defect, not a runtime condition
    /// `start` can recover from. `listener.on_error` is still called first with `UNKNOWN` so a
    /// caller observing through the listener sees the failure reported before the panic
    /// unwinds.
    pub fn start(&self, listener: &dyn ResolutionListener) {
        let (service_config_text, node) = match self.bootstrap.load() {
            Some(record) => (
                format!(
                    r#"{{"loadBalancingConfig":[{{"xds_experimental":{{"balancer_name":"{}","childPolicy":[{{"round_robin":{{}}}}]}}}}]}}"#,
                    record.server_uri
                ),
                record.node,
            ),
            None => (SERVICE_CONFIG_WITHOUT_BALANCER_NAME.to_string(), Node::default()),
        };

        let service_config = match serde_json::from_str::<ServiceConfig>(&service_config_text) {
            Ok(parsed) => parsed,
            Err(err) => {
                listener.on_error(Status::new(Code::Unknown, err.to_string()));
                panic!("xDS service-config text failed to parse: {err}");
            }
        };

        listener.on_result(ResolutionResult {
            addresses: Vec::new(),
            service_config,
            node,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingListener {
        result: Mutex<Option<ResolutionResult>>,
        error: Mutex<Option<Status>>,
    }
    impl RecordingListener {
        fn new() -> Self {
            Self {
                result: Mutex::new(None),
                error: Mutex::new(None),
            }
        }
    }
    impl ResolutionListener for RecordingListener {
        fn on_result(&self, result: ResolutionResult) {
            *self.result.lock().unwrap() = Some(result);
        }
        fn on_error(&self, status: Status) {
            *self.error.lock().unwrap() = Some(status);
        }
    }

    struct FixedBootstrap(BootstrapRecord);
    impl BootstrapSource for FixedBootstrap {
        fn load(&self) -> Option<BootstrapRecord> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn empty_authority_is_rejected_at_construction() {
        let err = XdsNameResolver::new("//", Arc::new(NoBootstrap)).unwrap_err();
        assert_eq!(err, ConfigError::EmptyAuthority);
        let err = XdsNameResolver::new("not-a-uri", Arc::new(NoBootstrap)).unwrap_err();
        assert_eq!(err, ConfigError::EmptyAuthority);
    }

    #[test]
    fn authority_is_extracted_up_to_first_slash() {
        let resolver = XdsNameResolver::new("//my-service/extra", Arc::new(NoBootstrap)).unwrap();
        assert_eq!(resolver.authority(), "my-service");
    }

    #[test]
    fn start_without_bootstrap_uses_default_node_and_no_balancer_name() {
        let resolver = XdsNameResolver::new("//my-service", Arc::new(NoBootstrap)).unwrap();
        let listener = RecordingListener::new();
        resolver.start(&listener);

        let result = listener.result.lock().unwrap().clone().expect("on_result was called");
        assert!(result.addresses.is_empty());
        assert_eq!(result.node, Node::default());
        assert_eq!(
            result.service_config.load_balancing_config[0]
                .xds_experimental
                .balancer_name,
            None
        );
        assert!(listener.error.lock().unwrap().is_none());
    }

    #[test]
    fn start_with_bootstrap_fills_balancer_name_and_node() {
        let bootstrap = FixedBootstrap(BootstrapRecord {
            server_uri: "xds-server.example.com:443".to_string(),
            node: Node {
                id: "node-1".to_string(),
                cluster: "my-cluster".to_string(),
            },
        });
        let resolver = XdsNameResolver::new("//my-service", Arc::new(bootstrap)).unwrap();
        let listener = RecordingListener::new();
        resolver.start(&listener);

        let result = listener.result.lock().unwrap().clone().expect("on_result was called");
        assert_eq!(result.node.id, "node-1");
        assert_eq!(
            result.service_config.load_balancing_config[0]
                .xds_experimental
                .balancer_name
                .as_deref(),
            Some("xds-server.example.com:443")
        );
    }
}
