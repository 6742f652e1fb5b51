//! In-memory [`ClusterGateway`] for tests.
//!
//! `FakeCluster` accepts the same manifests kubectl would, keeps the created
//! workloads per `(context, namespace)`, records every call, and can be told
//! to fail the next create/delete/list/versions call or to behave as
//! unreachable. Like a real cluster, only a bare Pod reaches a terminal phase.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;

use kubed_core::types::LABEL_DPROC;

use crate::error::{GatewayError, GatewayResult};
use crate::{ClusterGateway, LabelSelector, ResourceIdentity, ResourceSummary, Versions};

/// A workload stored by the fake cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeResource {
    pub context: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub phase: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// A call observed by the fake cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Create { name: String, context: String },
    Delete { name: String, namespace: String, context: String },
    List { selector: String, namespace: String, context: String },
    ListAllNamespaces { selector: String, context: String },
    Versions,
    CurrentContext,
    ListContexts,
    Raw { args: Vec<String> },
}

#[derive(Debug)]
struct FakeState {
    contexts: Vec<String>,
    current: String,
    versions: Versions,
    resources: Vec<FakeResource>,
    manifests: Vec<Value>,
    calls: Vec<GatewayCall>,
    fail_create: Option<String>,
    fail_delete: Option<String>,
    fail_list: Option<String>,
    fail_versions: Option<String>,
    unavailable: bool,
}

#[derive(Debug)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new("minikube", "v1.9.1")
    }
}

impl FakeCluster {
    /// A cluster with a single context and the given server version.
    pub fn new(context: &str, server_version: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                contexts: vec![context.to_string()],
                current: context.to_string(),
                versions: Versions {
                    client: "v1.9.1".to_string(),
                    server: server_version.to_string(),
                },
                resources: Vec::new(),
                manifests: Vec::new(),
                calls: Vec::new(),
                fail_create: None,
                fail_delete: None,
                fail_list: None,
                fail_versions: None,
                unavailable: false,
            }),
        }
    }

    pub fn add_context(&self, context: &str) {
        self.state.lock().contexts.push(context.to_string());
    }

    pub fn set_server_version(&self, version: &str) {
        self.state.lock().versions.server = version.to_string();
    }

    /// Place a workload directly, as if another session had created it.
    pub fn insert(&self, resource: FakeResource) {
        self.state.lock().resources.push(resource);
    }

    /// Set the observed phase of the workload `name`.
    ///
    /// Returns false if absent, or if `phase` is terminal and the workload is
    /// not a Pod: a Deployment replaces finished pods, so it never settles in
    /// `Succeeded` or `Failed`.
    pub fn set_phase(&self, name: &str, phase: &str) -> bool {
        let mut state = self.state.lock();
        let Some(r) = state.resources.iter_mut().find(|r| r.name == name) else {
            return false;
        };
        if r.kind != "Pod" && TERMINAL_PHASES.contains(&phase) {
            return false;
        }
        r.phase = Some(phase.to_string());
        true
    }

    /// Delete a workload behind the session's back.
    pub fn remove_external(&self, name: &str) {
        self.state.lock().resources.retain(|r| r.name != name);
    }

    pub fn fail_next_create(&self, message: &str) {
        self.state.lock().fail_create = Some(message.to_string());
    }

    pub fn fail_next_delete(&self, message: &str) {
        self.state.lock().fail_delete = Some(message.to_string());
    }

    pub fn fail_next_list(&self, message: &str) {
        self.state.lock().fail_list = Some(message.to_string());
    }

    pub fn fail_next_versions(&self, message: &str) {
        self.state.lock().fail_versions = Some(message.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn resources(&self) -> Vec<FakeResource> {
        self.state.lock().resources.clone()
    }

    /// Manifests of every accepted `create`, in order.
    pub fn created_manifests(&self) -> Vec<Value> {
        self.state.lock().manifests.clone()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    /// Names passed to successful or failed `delete` calls, in order.
    pub fn delete_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::Delete { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn enter(&self, call: GatewayCall) -> GatewayResult<parking_lot::MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.unavailable {
            return Err(GatewayError::Unavailable("fake cluster is unreachable".to_string()));
        }
        Ok(state)
    }
}

const WORKLOAD_KINDS: &[&str] = &["Pod", "Deployment", "DaemonSet"];
const TERMINAL_PHASES: &[&str] = &["Succeeded", "Failed"];

fn summary(r: &FakeResource) -> ResourceSummary {
    ResourceSummary {
        kind: r.kind.clone(),
        namespace: r.namespace.clone(),
        name: r.name.clone(),
        phase: r.phase.clone(),
        labels: r.labels.clone(),
        annotations: r.annotations.clone(),
    }
}

fn command_error(command: &str, message: String) -> GatewayError {
    GatewayError::Command {
        command: command.to_string(),
        code: 1,
        stderr: message,
    }
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

impl ClusterGateway for FakeCluster {
    fn create(&self, manifest: &[u8], context: &str) -> GatewayResult<ResourceIdentity> {
        let doc: Value = serde_json::from_slice(manifest)
            .map_err(|e| command_error("create -f -", format!("invalid manifest: {e}")))?;
        let is_list = doc["kind"].as_str() == Some("List");
        let items = if is_list {
            doc["items"].as_array().cloned().unwrap_or_default()
        } else {
            vec![doc.clone()]
        };
        let workload = items
            .iter()
            .find(|i| i["kind"].as_str().is_some_and(|k| WORKLOAD_KINDS.contains(&k)))
            .ok_or_else(|| command_error("create -f -", "no workload in manifest".to_string()))?;
        let name = workload["metadata"]["name"].as_str().unwrap_or_default().to_string();

        let mut state = self.enter(GatewayCall::Create {
            name: name.clone(),
            context: context.to_string(),
        })?;
        if let Some(message) = state.fail_create.take() {
            return Err(command_error("create -f -", message));
        }

        let context = if context.is_empty() { state.current.clone() } else { context.to_string() };
        let namespace = workload["metadata"]["namespace"].as_str().unwrap_or("default").to_string();
        let kind = workload["kind"].as_str().unwrap_or_default().to_string();

        if state
            .resources
            .iter()
            .any(|r| r.name == name && r.namespace == namespace && r.context == context)
        {
            return Err(command_error(
                "create -f -",
                format!("Error from server (AlreadyExists): \"{name}\" already exists"),
            ));
        }

        state.resources.push(FakeResource {
            context,
            namespace,
            phase: (kind != "DaemonSet").then(|| "Pending".to_string()),
            kind: kind.clone(),
            name: name.clone(),
            labels: string_map(&workload["metadata"]["labels"]),
            annotations: string_map(&workload["metadata"]["annotations"]),
        });

        state.manifests.push(doc);

        let resource = match kind.as_str() {
            "Pod" => "pod",
            "Deployment" => "deployment.apps",
            _ => "daemonset.apps",
        };
        Ok(ResourceIdentity {
            resource: resource.to_string(),
            name,
        })
    }

    fn delete(&self, name: &str, namespace: &str, context: &str) -> GatewayResult<()> {
        let mut state = self.enter(GatewayCall::Delete {
            name: name.to_string(),
            namespace: namespace.to_string(),
            context: context.to_string(),
        })?;
        if let Some(message) = state.fail_delete.take() {
            return Err(command_error("delete", message));
        }

        let before = state.resources.len();
        state.resources.retain(|r| {
            let owned = r.labels.get(LABEL_DPROC).map(String::as_str) == Some(name);
            !(owned && r.namespace == namespace && r.context == context)
        });
        if state.resources.len() == before {
            return Err(GatewayError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn list(
        &self,
        selector: &LabelSelector,
        namespace: &str,
        context: &str,
    ) -> GatewayResult<Vec<ResourceSummary>> {
        let mut state = self.enter(GatewayCall::List {
            selector: selector.to_string(),
            namespace: namespace.to_string(),
            context: context.to_string(),
        })?;
        if let Some(message) = state.fail_list.take() {
            return Err(command_error("get", message));
        }

        let context = if context.is_empty() { state.current.clone() } else { context.to_string() };
        Ok(state
            .resources
            .iter()
            .filter(|r| r.context == context && r.namespace == namespace && selector.matches(&r.labels))
            .map(summary)
            .collect())
    }

    fn list_all_namespaces(
        &self,
        selector: &LabelSelector,
        context: &str,
    ) -> GatewayResult<Vec<ResourceSummary>> {
        let mut state = self.enter(GatewayCall::ListAllNamespaces {
            selector: selector.to_string(),
            context: context.to_string(),
        })?;
        if let Some(message) = state.fail_list.take() {
            return Err(command_error("get", message));
        }

        let context = if context.is_empty() { state.current.clone() } else { context.to_string() };
        Ok(state
            .resources
            .iter()
            .filter(|r| r.context == context && selector.matches(&r.labels))
            .map(summary)
            .collect())
    }

    fn versions(&self, _context: &str) -> GatewayResult<Versions> {
        let mut state = self.enter(GatewayCall::Versions)?;
        if let Some(message) = state.fail_versions.take() {
            return Err(command_error("version", message));
        }
        Ok(state.versions.clone())
    }

    fn current_context(&self) -> GatewayResult<String> {
        let state = self.enter(GatewayCall::CurrentContext)?;
        Ok(state.current.clone())
    }

    fn list_contexts(&self) -> GatewayResult<Vec<String>> {
        let state = self.enter(GatewayCall::ListContexts)?;
        Ok(state.contexts.clone())
    }

    fn raw(&self, args: &[String], _context: &str) -> GatewayResult<String> {
        let _state = self.enter(GatewayCall::Raw { args: args.to_vec() })?;
        Ok(args.join(" "))
    }
}
