//! kubed-gateway — the boundary through which kubed-sh talks to the cluster.
//!
//! Every create, delete, list and version query goes through the
//! [`ClusterGateway`] trait. Two implementations exist:
//!
//! - [`KubectlGateway`]: shells out to `kubectl`; its textual output is
//!   interpreted by the narrow parsing layer in [`parse`]
//! - [`fake::FakeCluster`]: an in-memory cluster used by tests
//!
//! All calls are synchronous and block until the cluster answers.

pub mod error;
pub mod fake;
pub mod kubectl;
pub mod parse;

use std::collections::BTreeMap;
use std::fmt;

use kubed_core::types::{GEN_VALUE, LABEL_DPROC, LABEL_GEN, LABEL_SCOPE, SCOPE_PREFLIGHT, SCOPE_PROCESS};

pub use error::{GatewayError, GatewayResult};
pub use kubectl::KubectlGateway;

/// Identity of a created resource, e.g. `deployment.apps/node-app-1a2b3c4d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    /// Resource type as printed by kubectl (`deployment.apps`, `configmap`).
    pub resource: String,
    pub name: String,
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource, self.name)
    }
}

/// One workload observed in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    /// Kubernetes kind (`Pod`, `Deployment`, `DaemonSet`).
    pub kind: String,
    pub namespace: String,
    pub name: String,
    /// Observed pod phase (`Pending`, `Running`, ...), if one is known.
    pub phase: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Equality-based label selector (`k1=v1,k2=v2`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    terms: Vec<(String, String)>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.terms.push((key.to_string(), value.to_string()));
        self
    }

    /// All processes launched by kubed-sh.
    pub fn processes() -> Self {
        Self::new()
            .with(LABEL_GEN, GEN_VALUE)
            .with(LABEL_SCOPE, SCOPE_PROCESS)
    }

    /// The resources of a single process.
    pub fn process(remote_name: &str) -> Self {
        Self::processes().with(LABEL_DPROC, remote_name)
    }

    /// The image pre-pull DaemonSets.
    pub fn preflight() -> Self {
        Self::new()
            .with(LABEL_GEN, GEN_VALUE)
            .with(LABEL_SCOPE, SCOPE_PREFLIGHT)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

/// Client and server versions reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versions {
    pub client: String,
    pub server: String,
}

/// Capability set the core needs from the cluster.
///
/// An empty `context` means the kubeconfig's current context.
pub trait ClusterGateway: Send + Sync {
    /// Create every resource in `manifest` and return the workload's identity.
    fn create(&self, manifest: &[u8], context: &str) -> GatewayResult<ResourceIdentity>;

    /// Delete all resources of the process `name`.
    ///
    /// Returns [`GatewayError::NotFound`] when nothing was deleted.
    fn delete(&self, name: &str, namespace: &str, context: &str) -> GatewayResult<()>;

    /// Workloads matching `selector`, in the order the cluster reports them.
    fn list(
        &self,
        selector: &LabelSelector,
        namespace: &str,
        context: &str,
    ) -> GatewayResult<Vec<ResourceSummary>>;

    /// Workloads matching `selector` in every namespace of `context`.
    fn list_all_namespaces(
        &self,
        selector: &LabelSelector,
        context: &str,
    ) -> GatewayResult<Vec<ResourceSummary>>;

    fn versions(&self, context: &str) -> GatewayResult<Versions>;

    fn server_version(&self, context: &str) -> GatewayResult<String> {
        self.versions(context).map(|v| v.server)
    }

    fn client_version(&self, context: &str) -> GatewayResult<String> {
        self.versions(context).map(|v| v.client)
    }

    fn current_context(&self) -> GatewayResult<String>;

    fn list_contexts(&self) -> GatewayResult<Vec<String>>;

    /// Pass arguments straight to the control tool and return its output.
    fn raw(&self, args: &[String], context: &str) -> GatewayResult<String>;
}
