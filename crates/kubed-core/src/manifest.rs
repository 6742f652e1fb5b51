//! Manifest generation for launched processes.
//!
//! A launch produces one Kubernetes `v1/List` holding:
//!
//! ```text
//! List
//!   ├── ConfigMap  <remote-name>   program payload (script text or base64 binary)
//!   └── Pod        <remote-name>   restartPolicy Never, payload mounted at /kubed-sh
//!       or
//!       Deployment <remote-name>   1 replica, for daemons launched with `&`
//! ```
//!
//! A Deployment's `apiVersion` is selected from the [`ApiVersionTable`]
//! using the detected server version; a Pod is always `v1`. The container image comes from the
//! [`EnvTable`] at generation time.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::env::EnvTable;
use crate::types::*;
use crate::version::ApiVersionTable;

/// Directory the payload is mounted at inside the container.
pub const PAYLOAD_DIR: &str = "/kubed-sh";

/// Image used by the pre-pull DaemonSet's placeholder container.
const PAUSE_IMAGE: &str = "gcr.io/google_containers/pause";

/// Longest generated name Kubernetes accepts for a label value.
const MAX_NAME_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no template for runtime kind: {0}")]
    UnknownKind(String),

    #[error("unresolved placeholder {0}: set it with {0}=<value>")]
    UnresolvedPlaceholder(String),

    #[error("unresolved variable ${0}")]
    UnresolvedVariable(String),

    #[error("failed to serialize manifest: {0}")]
    Serialize(String),
}

/// Invocation convention of one runtime kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeTemplate {
    pub kind: RuntimeKind,
    /// Interpreter prefixed to the payload path. `None` runs the payload.
    pub interpreter: Option<&'static str>,
}

/// Templates for every built-in runtime kind.
pub const TEMPLATES: &[RuntimeTemplate] = &[
    RuntimeTemplate {
        kind: RuntimeKind::Binary,
        interpreter: None,
    },
    RuntimeTemplate {
        kind: RuntimeKind::Node,
        interpreter: Some("node"),
    },
    RuntimeTemplate {
        kind: RuntimeKind::Python,
        interpreter: Some("python"),
    },
    RuntimeTemplate {
        kind: RuntimeKind::Ruby,
        interpreter: Some("ruby"),
    },
];

/// Everything needed to render one process manifest.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub kind: RuntimeKind,
    pub source_ref: String,
    /// Contents of the script or binary at `source_ref`.
    pub payload: Vec<u8>,
    /// Arguments after the program, before variable substitution.
    pub args: Vec<String>,
    pub workload: WorkloadKind,
    pub remote_name: String,
    pub namespace: String,
    /// Raw server version as reported by the cluster.
    pub server_version: String,
    pub started_at: u64,
}

/// A rendered execution descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub name: String,
    /// `apiVersion` chosen for the workload resource.
    pub api_version: String,
    pub body: Value,
}

impl Manifest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TemplateError> {
        serde_json::to_vec_pretty(&self.body).map_err(|e| TemplateError::Serialize(e.to_string()))
    }
}

/// Renders per-runtime manifests.
#[derive(Debug, Clone)]
pub struct ManifestGenerator {
    api_versions: ApiVersionTable,
    templates: Vec<RuntimeTemplate>,
}

impl Default for ManifestGenerator {
    fn default() -> Self {
        Self::new(ApiVersionTable::default())
    }
}

impl ManifestGenerator {
    pub fn new(api_versions: ApiVersionTable) -> Self {
        Self {
            api_versions,
            templates: TEMPLATES.to_vec(),
        }
    }

    /// Restrict the generator to the given templates.
    pub fn with_templates(mut self, templates: Vec<RuntimeTemplate>) -> Self {
        self.templates = templates;
        self
    }

    pub fn api_versions(&self) -> &ApiVersionTable {
        &self.api_versions
    }

    fn template(&self, kind: RuntimeKind) -> Result<&RuntimeTemplate, TemplateError> {
        self.templates
            .iter()
            .find(|t| t.kind == kind)
            .ok_or_else(|| TemplateError::UnknownKind(kind.label().to_string()))
    }

    /// Render the ConfigMap + workload list for one launch.
    pub fn generate(&self, spec: &LaunchSpec, env: &EnvTable) -> Result<Manifest, TemplateError> {
        let template = self.template(spec.kind)?;
        let image = resolve(env, spec.kind.image_var())?;
        let api_version = match spec.workload {
            WorkloadKind::Pod => "v1".to_string(),
            WorkloadKind::Deployment => self.api_versions.select_raw(&spec.server_version).to_string(),
        };

        let key = payload_key(file_name(&spec.source_ref));
        let payload_path = format!("{PAYLOAD_DIR}/{key}");

        let mut command: Vec<String> = template
            .interpreter
            .map(str::to_string)
            .into_iter()
            .chain(std::iter::once(payload_path))
            .collect();
        for arg in &spec.args {
            command.push(env.substitute(arg)?);
        }

        let labels = json!({
            LABEL_GEN: GEN_VALUE,
            LABEL_SCOPE: SCOPE_PROCESS,
            LABEL_DPROC: spec.remote_name,
            LABEL_KIND: spec.kind.label(),
        });
        let annotations = json!({
            ANNOTATION_SOURCE: spec.source_ref,
            ANNOTATION_STARTED_AT: spec.started_at.to_string(),
        });
        let metadata = json!({
            "name": spec.remote_name,
            "namespace": spec.namespace,
            "labels": labels,
            "annotations": annotations,
        });

        let mut config_map = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": spec.remote_name,
                "namespace": spec.namespace,
                "labels": labels,
            },
        });
        match std::str::from_utf8(&spec.payload) {
            Ok(text) if spec.kind != RuntimeKind::Binary => {
                config_map["data"] = payload_entry(&key, json!(text));
            }
            _ => {
                config_map["binaryData"] = payload_entry(&key, json!(BASE64.encode(&spec.payload)));
            }
        }

        let mut pod_spec = json!({
            "containers": [{
                "name": "dproc",
                "image": image,
                "command": command,
                "volumeMounts": [{ "name": "payload", "mountPath": PAYLOAD_DIR }],
            }],
            "volumes": [{
                "name": "payload",
                "configMap": { "name": spec.remote_name, "defaultMode": 0o755 },
            }],
        });

        let workload = match spec.workload {
            WorkloadKind::Pod => {
                pod_spec["restartPolicy"] = json!("Never");
                json!({
                    "apiVersion": api_version,
                    "kind": "Pod",
                    "metadata": metadata,
                    "spec": pod_spec,
                })
            }
            WorkloadKind::Deployment => json!({
                "apiVersion": api_version,
                "kind": "Deployment",
                "metadata": metadata,
                "spec": {
                    "replicas": 1,
                    "selector": { "matchLabels": { LABEL_DPROC: spec.remote_name } },
                    "template": {
                        "metadata": { "labels": labels },
                        "spec": pod_spec,
                    },
                },
            }),
        };

        tracing::debug!(
            name = %spec.remote_name,
            kind = %spec.kind,
            workload = %spec.workload,
            %api_version,
            %image,
            "manifest generated"
        );

        Ok(Manifest {
            name: spec.remote_name.clone(),
            api_version,
            body: json!({ "apiVersion": "v1", "kind": "List", "items": [config_map, workload] }),
        })
    }

    /// Render the single-use DaemonSet that pulls `image` onto every node.
    pub fn prepull_daemonset(
        &self,
        name: &str,
        image: &str,
        namespace: &str,
        server_version: &str,
    ) -> Result<Manifest, TemplateError> {
        if image.trim().is_empty() {
            return Err(TemplateError::UnresolvedPlaceholder(format!("image for {name}")));
        }
        let api_version = self.api_versions.select_raw(server_version).to_string();
        let body = json!({
            "apiVersion": api_version,
            "kind": "DaemonSet",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": { LABEL_GEN: GEN_VALUE, LABEL_SCOPE: SCOPE_PREFLIGHT },
            },
            "spec": {
                "selector": { "matchLabels": { "name": name } },
                "template": {
                    "metadata": { "labels": { "name": name } },
                    "spec": {
                        "initContainers": [{
                            "name": "prepull",
                            "image": "docker",
                            "command": ["docker", "pull", image],
                            "volumeMounts": [{ "name": "docker", "mountPath": "/var/run" }],
                        }],
                        "volumes": [{ "name": "docker", "hostPath": { "path": "/var/run" } }],
                        "containers": [{ "name": "pause", "image": PAUSE_IMAGE }],
                    },
                },
            },
        });
        Ok(Manifest {
            name: name.to_string(),
            api_version,
            body,
        })
    }
}

fn resolve(env: &EnvTable, var: &str) -> Result<String, TemplateError> {
    env.get(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TemplateError::UnresolvedPlaceholder(var.to_string()))
}

fn payload_entry(key: &str, value: Value) -> Value {
    let mut entry = serde_json::Map::new();
    entry.insert(key.to_string(), value);
    Value::Object(entry)
}

/// ConfigMap key for a payload file. Keys must match `[-._a-zA-Z0-9]+`.
fn payload_key(file: &str) -> String {
    let key: String = file
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') { c } else { '-' })
        .collect();
    if key.is_empty() || key.chars().all(|c| c == '.') {
        "payload".to_string()
    } else {
        key
    }
}

fn file_name(source_ref: &str) -> &str {
    source_ref.rsplit('/').next().unwrap_or(source_ref)
}

/// Generate a DNS-1123 remote name: `<kind>-<stem>-<8 hex>`.
///
/// `nonce` must differ between calls that share `kind` and `source_ref`.
pub fn remote_name(kind: RuntimeKind, source_ref: &str, nonce: &str) -> String {
    let digest = Sha256::new()
        .chain_update(source_ref.as_bytes())
        .chain_update(b"\0")
        .chain_update(nonce.as_bytes())
        .finalize();
    let suffix = &hex::encode(digest)[..8];

    let budget = MAX_NAME_LEN - kind.label().len() - suffix.len() - 2;
    let mut stem = sanitize_stem(file_name(source_ref));
    stem.truncate(budget);
    let stem = stem.trim_end_matches('-');
    let stem = if stem.is_empty() { "proc" } else { stem };

    format!("{}-{stem}-{suffix}", kind.label())
}

/// Lowercase alphanumerics of the file stem, other runs collapsed to `-`.
fn sanitize_stem(file: &str) -> String {
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };
    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}
