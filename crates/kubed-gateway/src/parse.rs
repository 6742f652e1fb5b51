//! Parsing of `kubectl` output.
//!
//! Every piece of text the control tool prints is interpreted here and
//! nowhere else. Malformed input surfaces as [`GatewayError::Parse`].

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use kubed_core::types::LABEL_DPROC;

use crate::error::{GatewayError, GatewayResult};
use crate::{ResourceIdentity, ResourceSummary, Versions};

/// Kinds reported as workloads by [`parse_listing`].
const WORKLOAD_KINDS: &[&str] = &["Deployment", "DaemonSet"];

static GIT_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"GitVersion:"([^"]+)""#).expect("git version pattern is valid")
});

/// Stderr fragments meaning the API server or the tool itself is unreachable.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "unable to connect to the server",
    "connection refused",
    "no such host",
    "i/o timeout",
    "the connection to the server",
    "no configuration has been provided",
];

// ── create ────────────────────────────────────────────────────────

impl ResourceIdentity {
    /// Parse one `-o name` line: `deployment.apps/node-app-1a2b3c4d`.
    pub fn parse(line: &str) -> GatewayResult<Self> {
        let line = line.trim();
        match line.split_once('/') {
            Some((resource, name)) if !resource.is_empty() && !name.is_empty() => Ok(Self {
                resource: resource.to_string(),
                name: name.to_string(),
            }),
            _ => Err(GatewayError::parse("resource identity", line)),
        }
    }

    /// Whether this is a workload (`pod`, `deployment.*`, `daemonset.*`).
    pub fn is_workload(&self) -> bool {
        let base = self.resource.split('.').next().unwrap_or_default();
        matches!(base, "pod" | "deployment" | "daemonset")
    }
}

/// Parse the output of `kubectl create -o name`.
///
/// A manifest list yields one line per resource; the workload wins.
pub fn parse_created(stdout: &str) -> GatewayResult<ResourceIdentity> {
    let identities = stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(ResourceIdentity::parse)
        .collect::<GatewayResult<Vec<_>>>()?;

    let mut fallback = None;
    for identity in identities {
        if identity.is_workload() {
            return Ok(identity);
        }
        fallback.get_or_insert(identity);
    }
    fallback.ok_or_else(|| GatewayError::parse("create output", "no resource created"))
}

// ── delete ────────────────────────────────────────────────────────

/// Parse the output of `kubectl delete ... -l dproc=<name>`.
pub fn parse_deleted(stdout: &str, name: &str) -> GatewayResult<()> {
    let deleted = stdout.lines().filter(|l| l.trim_end().ends_with("deleted")).count();
    if deleted > 0 {
        return Ok(());
    }
    if stdout.trim().is_empty() || stdout.contains("No resources found") {
        return Err(GatewayError::NotFound(name.to_string()));
    }
    Err(GatewayError::parse("delete output", stdout.trim()))
}

// ── list ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListDoc {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    kind: Option<String>,
    metadata: Metadata,
    #[serde(default)]
    status: Option<ItemStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    deletion_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemStatus {
    phase: Option<String>,
}

/// Parse `kubectl get deployments,daemonsets,pods -o json`.
///
/// A Pod named after its own `dproc` label is a foreground process and is
/// reported with its own phase. Any other pod belongs to a Deployment and is
/// folded into the Deployment with the same namespace and `dproc` label; a
/// Deployment without any live pod is reported as `Pending`.
pub fn parse_listing(json: &str) -> GatewayResult<Vec<ResourceSummary>> {
    let doc: ListDoc =
        serde_json::from_str(json).map_err(|e| GatewayError::parse("resource listing", e.to_string()))?;

    let mut phases: HashMap<(String, String), String> = HashMap::new();
    let mut workloads: Vec<(String, Metadata, Option<String>)> = Vec::new();

    for item in doc.items {
        let kind = item
            .kind
            .ok_or_else(|| GatewayError::parse("resource listing", "item without kind"))?;
        let phase = item.status.and_then(|s| s.phase);
        if kind == "Pod" {
            if item.metadata.deletion_timestamp.is_some() {
                continue;
            }
            let Some(owner) = item.metadata.labels.get(LABEL_DPROC).cloned() else {
                continue;
            };
            if owner == item.metadata.name {
                let phase = phase.unwrap_or_else(|| "Pending".to_string());
                workloads.push((kind, item.metadata, Some(phase)));
                continue;
            }
            let Some(phase) = phase else {
                continue;
            };
            let key = (item.metadata.namespace.clone(), owner);
            let better = phases
                .get(&key)
                .is_none_or(|current| phase_rank(&phase) > phase_rank(current));
            if better {
                phases.insert(key, phase);
            }
        } else if WORKLOAD_KINDS.contains(&kind.as_str()) {
            workloads.push((kind, item.metadata, None));
        }
    }

    Ok(workloads
        .into_iter()
        .map(|(kind, meta, own_phase)| {
            let phase = own_phase
                .or_else(|| phases.get(&(meta.namespace.clone(), meta.name.clone())).cloned())
                .or_else(|| (kind == "Deployment").then(|| "Pending".to_string()));
            ResourceSummary {
                kind,
                namespace: meta.namespace,
                name: meta.name,
                phase,
                labels: meta.labels,
                annotations: meta.annotations,
            }
        })
        .collect())
}

fn phase_rank(phase: &str) -> u8 {
    match phase {
        "Running" => 3,
        "Pending" => 2,
        "Succeeded" | "Failed" => 1,
        _ => 0,
    }
}

// ── versions / contexts ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionDoc {
    client_version: Option<VersionInfo>,
    server_version: Option<VersionInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    git_version: String,
}

/// Parse `kubectl version -o json`, or the older text forms
/// (`Server Version: v1.7.2` and `Server Version: version.Info{...}`).
pub fn parse_versions(output: &str) -> GatewayResult<Versions> {
    if let Ok(doc) = serde_json::from_str::<VersionDoc>(output) {
        return match (doc.client_version, doc.server_version) {
            (Some(c), Some(s)) => Ok(Versions {
                client: c.git_version,
                server: s.git_version,
            }),
            _ => Err(GatewayError::parse("version output", "missing client or server version")),
        };
    }

    let mut client = None;
    let mut server = None;
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Client Version:") {
            client = text_version(rest);
        } else if let Some(rest) = line.strip_prefix("Server Version:") {
            server = text_version(rest);
        }
    }
    match (client, server) {
        (Some(client), Some(server)) => Ok(Versions { client, server }),
        _ => Err(GatewayError::parse("version output", output.trim())),
    }
}

fn text_version(rest: &str) -> Option<String> {
    if let Some(caps) = GIT_VERSION.captures(rest) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    rest.split_whitespace().next().map(str::to_string)
}

/// Parse `kubectl config get-contexts -o name`.
pub fn parse_contexts(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// ── failures ──────────────────────────────────────────────────────

/// Turn a failed invocation into the matching error.
pub fn classify_failure(command: &str, code: i32, stderr: &str) -> GatewayError {
    let lower = stderr.to_ascii_lowercase();
    if UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return GatewayError::Unavailable(stderr.trim().to_string());
    }
    if lower.contains("notfound") || lower.contains("not found") {
        return GatewayError::NotFound(stderr.trim().to_string());
    }
    GatewayError::Command {
        command: command.to_string(),
        code,
        stderr: stderr.trim().to_string(),
    }
}
