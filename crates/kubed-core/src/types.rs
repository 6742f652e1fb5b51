//! Domain types shared across kubed-sh crates.
//!
//! A [`ProcessRecord`] is the local representation of one program launched
//! into the cluster. Its `status` is a cache of the last observed cluster
//! phase and is never treated as the source of truth.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Ownership label key. Every resource created by kubed-sh carries it.
pub const LABEL_GEN: &str = "gen";
/// Value of [`LABEL_GEN`].
pub const GEN_VALUE: &str = "kubed-sh";
/// Scope label key, separating user processes from bootstrap resources.
pub const LABEL_SCOPE: &str = "scope";
/// Scope of user-launched processes.
pub const SCOPE_PROCESS: &str = "dproc";
/// Scope of the image pre-pull DaemonSets.
pub const SCOPE_PREFLIGHT: &str = "pre-flight";
/// Label carrying the remote name on every resource of one process.
pub const LABEL_DPROC: &str = "dproc";
/// Label carrying the [`RuntimeKind`] of a process.
pub const LABEL_KIND: &str = "dproc-kind";
/// Annotation holding the local source path that was launched.
pub const ANNOTATION_SOURCE: &str = "kubed-sh/source";
/// Annotation holding the submission time in unix seconds.
pub const ANNOTATION_STARTED_AT: &str = "kubed-sh/started-at";

/// Unique identifier of a process within a table.
pub type ProcessId = String;

// ── Runtime kind ──────────────────────────────────────────────────

/// The runtime a launched program needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// A Linux ELF binary, executed directly.
    Binary,
    Node,
    Python,
    Ruby,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 4] = [
        RuntimeKind::Binary,
        RuntimeKind::Node,
        RuntimeKind::Python,
        RuntimeKind::Ruby,
    ];

    /// Label value and remote name prefix for this kind.
    pub fn label(&self) -> &'static str {
        match self {
            RuntimeKind::Binary => "binary",
            RuntimeKind::Node => "node",
            RuntimeKind::Python => "python",
            RuntimeKind::Ruby => "ruby",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }

    /// Script kind for a file extension (without the dot).
    ///
    /// Binaries have no extension convention and are never returned here.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" => Some(RuntimeKind::Node),
            "py" => Some(RuntimeKind::Python),
            "rb" => Some(RuntimeKind::Ruby),
            _ => None,
        }
    }

    /// Infer the kind from a generated remote name (`node-app-1a2b3c4d`).
    pub fn from_remote_name(name: &str) -> Option<Self> {
        let (prefix, _) = name.split_once('-')?;
        Self::from_label(prefix)
    }

    /// Environment variable naming the container image for this kind.
    pub fn image_var(&self) -> &'static str {
        match self {
            RuntimeKind::Binary => "BINARY_IMAGE",
            RuntimeKind::Node => "NODE_IMAGE",
            RuntimeKind::Python => "PYTHON_IMAGE",
            RuntimeKind::Ruby => "RUBY_IMAGE",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Status ────────────────────────────────────────────────────────

/// Last observed lifecycle status of a remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Killed,
    /// The live phase could not be determined.
    Unknown,
}

impl ProcessStatus {
    /// Map an observed pod phase onto the status enumeration.
    pub fn from_phase(phase: &str) -> Self {
        match phase {
            "Pending" => ProcessStatus::Submitted,
            "Running" => ProcessStatus::Running,
            "Succeeded" => ProcessStatus::Completed,
            "Failed" => ProcessStatus::Failed,
            _ => ProcessStatus::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessStatus::Submitted => "Submitted",
            ProcessStatus::Running => "Running",
            ProcessStatus::Completed => "Completed",
            ProcessStatus::Failed => "Failed",
            ProcessStatus::Killed => "Killed",
            ProcessStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Workload kind ─────────────────────────────────────────────────

/// The Kubernetes resource a process runs as.
///
/// A foreground program runs as a bare `Pod` with `restartPolicy: Never`, so
/// its phase ends in `Succeeded` or `Failed`. A program launched with a
/// trailing `&` is a daemon and runs as a one-replica `Deployment`, which
/// restarts it and never reaches a terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    Pod,
    Deployment,
}

impl WorkloadKind {
    /// The `kind` field of the resource.
    pub fn resource_kind(&self) -> &'static str {
        match self {
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Deployment => "Deployment",
        }
    }

    pub fn from_resource_kind(kind: &str) -> Option<Self> {
        match kind {
            "Pod" => Some(WorkloadKind::Pod),
            "Deployment" => Some(WorkloadKind::Deployment),
            _ => None,
        }
    }

    pub fn is_daemon(&self) -> bool {
        matches!(self, WorkloadKind::Deployment)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_kind())
    }
}

// ── Process record ────────────────────────────────────────────────

/// One program launched into the cluster by kubed-sh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub kind: RuntimeKind,
    /// Local script or binary path that was launched.
    pub source_ref: String,
    pub workload: WorkloadKind,
    /// Name of the Pod or Deployment in the cluster.
    pub remote_name: String,
    pub namespace: String,
    pub context: String,
    pub status: ProcessStatus,
    /// Unix timestamp (seconds) of submission.
    pub started_at: u64,
}

impl ProcessRecord {
    /// Final path component of `source_ref`, used as a display name.
    pub fn display_name(&self) -> &str {
        self.source_ref
            .rsplit('/')
            .next()
            .unwrap_or(&self.source_ref)
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
