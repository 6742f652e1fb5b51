//! Session — the application context and the launch / kill / ps workflows.
//!
//! A `Session` owns everything one shell needs:
//! - the environment variable table
//! - the distributed process table
//! - the gateway to the cluster
//! - the manifest generator
//! - the active context and its server version
//!
//! It is created once at startup and passed by reference into every command
//! handler. Every operation takes `&self`; the tables lock internally.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use kubed_core::manifest::remote_name;
use kubed_core::types::*;
use kubed_core::{EnvTable, LaunchSpec, ManifestGenerator};
use kubed_gateway::{ClusterGateway, GatewayError, LabelSelector};
use kubed_state::{ProcessTable, TableError};

use crate::error::{LifecycleError, LifecycleResult};
use crate::invocation::Invocation;

/// Namespace used when `NAMESPACE` is unset.
const FALLBACK_NAMESPACE: &str = "default";

pub struct Session {
    env: EnvTable,
    table: ProcessTable,
    gateway: Arc<dyn ClusterGateway>,
    generator: ManifestGenerator,
    context: RwLock<String>,
    server_version: RwLock<String>,
    /// Distinguishes remote names generated within the same instant.
    launches: AtomicU64,
}

impl Session {
    /// Assemble a session without touching the cluster.
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        env: EnvTable,
        context: &str,
        server_version: &str,
    ) -> Self {
        Self {
            env,
            table: ProcessTable::new(),
            gateway,
            generator: ManifestGenerator::default(),
            context: RwLock::new(context.to_string()),
            server_version: RwLock::new(server_version.to_string()),
            launches: AtomicU64::new(0),
        }
    }

    pub fn with_generator(mut self, generator: ManifestGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Start a session: resolve the context, detect versions, rebuild.
    ///
    /// Failing to determine the context is fatal. A failed version query
    /// falls back to the newest API mapping, and a failed rebuild leaves an
    /// empty table; both are logged and the session is still returned.
    pub fn start(
        gateway: Arc<dyn ClusterGateway>,
        env: EnvTable,
        context: Option<&str>,
    ) -> LifecycleResult<Self> {
        let context = match context {
            Some(c) => c.to_string(),
            None => gateway.current_context()?,
        };

        let server_version = match gateway.versions(&context) {
            Ok(v) => {
                info!(client = %v.client, server = %v.server, "detected Kubernetes versions");
                v.server
            }
            Err(e) => {
                warn!(error = %e, "cannot detect server version");
                String::new()
            }
        };

        let session = Self::new(gateway, env, &context, &server_version);
        if let Err(e) = session.rebuild() {
            warn!(error = %e, "starting with an empty process table");
        }
        Ok(session)
    }

    pub fn env(&self) -> &EnvTable {
        &self.env
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn gateway(&self) -> &dyn ClusterGateway {
        self.gateway.as_ref()
    }

    pub fn generator(&self) -> &ManifestGenerator {
        &self.generator
    }

    pub fn context(&self) -> String {
        self.context.read().clone()
    }

    pub fn server_version(&self) -> String {
        self.server_version.read().clone()
    }

    /// Target namespace for new launches.
    pub fn namespace(&self) -> String {
        self.env
            .get("NAMESPACE")
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_NAMESPACE.to_string())
    }

    // ── Rebuild ────────────────────────────────────────────────────

    /// Re-derive the process table from every namespace of the context.
    pub fn rebuild(&self) -> LifecycleResult<usize> {
        let context = self.context();
        match self.table.rebuild(self.gateway.as_ref(), &context) {
            Ok(count) => Ok(count),
            Err(TableError::Gateway(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        }
    }

    // ── Launch ─────────────────────────────────────────────────────

    /// Launch a program. Nothing is recorded unless the cluster confirmed
    /// the creation.
    ///
    /// A plain launch runs as a bare Pod that is never restarted, so it can
    /// complete or fail; a trailing `&` runs it as a Deployment instead.
    pub fn launch(&self, line: &str) -> LifecycleResult<ProcessRecord> {
        let invocation = Invocation::parse(line)?;
        let payload = std::fs::read(&invocation.source_ref).map_err(|source| LifecycleError::Io {
            path: invocation.source_ref.clone().into(),
            source,
        })?;

        let context = self.context();
        let namespace = self.namespace();
        let started_at = epoch_secs();
        let name = remote_name(invocation.kind, &invocation.source_ref, &self.nonce());

        let workload = invocation.workload();
        let spec = LaunchSpec {
            kind: invocation.kind,
            source_ref: invocation.source_ref.clone(),
            payload,
            args: invocation.args,
            workload,
            remote_name: name,
            namespace: namespace.clone(),
            server_version: self.server_version(),
            started_at,
        };
        let manifest = self.generator.generate(&spec, &self.env)?;
        let bytes = manifest.to_bytes()?;

        let identity = self.gateway.create(&bytes, &context).map_err(|e| {
            if e.is_unavailable() {
                LifecycleError::GatewayUnavailable(e)
            } else {
                LifecycleError::Submission(e)
            }
        })?;
        info!(%identity, kind = %invocation.kind, %workload, api_version = %manifest.api_version, "process submitted");

        let record = ProcessRecord {
            id: identity.name.clone(),
            kind: invocation.kind,
            source_ref: invocation.source_ref,
            workload,
            remote_name: identity.name,
            namespace,
            context,
            status: ProcessStatus::Submitted,
            started_at,
        };
        self.table.add(record.clone())?;
        Ok(record)
    }

    fn nonce(&self) -> String {
        let seq = self.launches.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        format!("{}:{nanos}:{seq}", std::process::id())
    }

    // ── Kill ───────────────────────────────────────────────────────

    /// Delete a process from the cluster and forget it.
    ///
    /// `target` is an id or a source name matching exactly one process. If
    /// the deletion fails the record stays in the table with its previous
    /// status; the next rebuild or ps reconciles it.
    pub fn kill(&self, target: &str) -> LifecycleResult<ProcessRecord> {
        let record = self.table.resolve(target).map_err(|e| match e {
            TableError::NotFound(name) => LifecycleError::NotFound(name),
            other => other.into(),
        })?;

        match self
            .gateway
            .delete(&record.remote_name, &record.namespace, &record.context)
        {
            Ok(()) => {}
            Err(GatewayError::NotFound(_)) => {
                warn!(id = %record.id, "already gone from the cluster");
            }
            Err(e) if e.is_unavailable() => return Err(LifecycleError::GatewayUnavailable(e)),
            Err(source) => {
                warn!(id = %record.id, error = %source, "kill failed, table and cluster may diverge");
                return Err(LifecycleError::PartialDivergence {
                    id: record.id,
                    source,
                });
            }
        }

        let mut removed = self.table.remove(&record.id).map_err(|e| match e {
            TableError::NotFound(name) => LifecycleError::NotFound(name),
            other => other.into(),
        })?;
        removed.status = ProcessStatus::Killed;
        info!(id = %removed.id, "process killed");
        Ok(removed)
    }

    // ── Ps ─────────────────────────────────────────────────────────

    /// Refresh every record's status from the cluster and list the table.
    ///
    /// Processes that vanished from the cluster show as `Unknown` and stay
    /// in the table.
    pub fn ps(&self) -> LifecycleResult<Vec<ProcessRecord>> {
        for record in self.table.list() {
            let selector = LabelSelector::process(&record.remote_name);
            let status = match self.gateway.list(&selector, &record.namespace, &record.context) {
                Ok(found) => found
                    .first()
                    .and_then(|s| s.phase.as_deref())
                    .map(ProcessStatus::from_phase)
                    .unwrap_or(ProcessStatus::Unknown),
                Err(e) if e.is_unavailable() => return Err(LifecycleError::GatewayUnavailable(e)),
                Err(e) => {
                    warn!(id = %record.id, error = %e, "cannot observe process");
                    ProcessStatus::Unknown
                }
            };
            debug!(id = %record.id, %status, "observed");
            // A concurrent kill may have removed it meanwhile.
            let _ = self.table.set_status(&record.id, status);
        }
        Ok(self.table.list())
    }

    // ── Contexts ───────────────────────────────────────────────────

    /// Available contexts, flagged with whether each is the active one.
    pub fn contexts(&self) -> LifecycleResult<Vec<(String, bool)>> {
        let active = self.context();
        Ok(self
            .gateway
            .list_contexts()?
            .into_iter()
            .map(|c| {
                let is_active = c == active;
                (c, is_active)
            })
            .collect())
    }

    /// Switch the active context and rebuild the table for it.
    pub fn use_context(&self, context: &str) -> LifecycleResult<usize> {
        let known = self.gateway.list_contexts()?;
        if !known.iter().any(|c| c == context) {
            return Err(LifecycleError::UnknownContext(context.to_string()));
        }

        *self.context.write() = context.to_string();
        match self.gateway.server_version(context) {
            Ok(v) => *self.server_version.write() = v,
            Err(e) => {
                warn!(%context, error = %e, "cannot detect server version");
                self.server_version.write().clear();
            }
        }
        info!(%context, "switched context");
        self.rebuild()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubed_core::ApiVersionTable;
    use kubed_gateway::fake::FakeCluster;
    use std::fs;

    fn session(cluster: &Arc<FakeCluster>) -> Session {
        Session::start(cluster.clone(), EnvTable::with_defaults(), None).unwrap()
    }

    fn script(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, "console.log('hello')\n").unwrap();
        path.display().to_string()
    }

    #[test]
    fn start_uses_current_context_and_version() {
        let cluster = Arc::new(FakeCluster::new("kind-dev", "v1.7.4"));
        let s = session(&cluster);
        assert_eq!(s.context(), "kind-dev");
        assert_eq!(s.server_version(), "v1.7.4");
        assert!(s.table().is_empty());
    }

    #[test]
    fn start_survives_rebuild_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        session(&cluster).launch(&script(&dir, "old.js")).unwrap();
        cluster.fail_next_list("forbidden");

        let s = session(&cluster);
        assert!(s.table().is_empty());
        let rec = s.launch(&script(&dir, "a.js")).unwrap();
        assert_eq!(s.table().len(), 1);
        assert_eq!(rec.status, ProcessStatus::Submitted);
    }

    #[test]
    fn start_without_server_version_uses_latest_api() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::new("minikube", "v1.5.0"));
        cluster.fail_next_versions("server unreachable");

        let s = session(&cluster);
        assert_eq!(s.server_version(), "");
        s.launch(&format!("{} &", script(&dir, "svc.js"))).unwrap();

        let manifest = &cluster.created_manifests()[0];
        assert_eq!(manifest["items"][1]["kind"], "Deployment");
        assert_eq!(
            manifest["items"][1]["apiVersion"].as_str(),
            Some(ApiVersionTable::default().latest())
        );
    }

    #[test]
    fn start_fails_without_context() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_unavailable(true);
        let err = Session::start(cluster, EnvTable::with_defaults(), None).err().unwrap();
        assert!(matches!(err, LifecycleError::GatewayUnavailable(_)));
    }

    #[test]
    fn launch_records_submitted_process() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);

        let rec = s.launch(&script(&dir, "app.js")).unwrap();
        assert_eq!(rec.kind, RuntimeKind::Node);
        assert_eq!(rec.status, ProcessStatus::Submitted);
        assert_eq!(rec.id, rec.remote_name);
        assert_eq!(rec.namespace, "default");
        assert_eq!(rec.context, "minikube");
        assert_eq!(s.table().len(), 1);
        assert_eq!(cluster.resources()[0].name, rec.remote_name);
        assert_eq!(rec.workload, WorkloadKind::Pod);
        assert_eq!(cluster.resources()[0].kind, "Pod");
    }

    #[test]
    fn foreground_launch_can_complete_but_daemon_cannot() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let job = s.launch(&script(&dir, "job.js")).unwrap();
        let svc = s.launch(&format!("{} &", script(&dir, "svc.js"))).unwrap();
        assert_eq!(svc.workload, WorkloadKind::Deployment);
        assert_eq!(cluster.resources()[1].kind, "Deployment");

        assert!(cluster.set_phase(&job.remote_name, "Failed"));
        assert!(!cluster.set_phase(&svc.remote_name, "Succeeded"));
        assert!(cluster.set_phase(&svc.remote_name, "Running"));

        let rows = s.ps().unwrap();
        assert_eq!(rows[0].status, ProcessStatus::Failed);
        assert_eq!(rows[1].status, ProcessStatus::Running);
    }

    #[test]
    fn launch_uses_namespace_variable() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        s.env().set("NAMESPACE", "sandbox");

        let rec = s.launch(&script(&dir, "app.js")).unwrap();
        assert_eq!(rec.namespace, "sandbox");
        assert_eq!(cluster.resources()[0].namespace, "sandbox");
    }

    #[test]
    fn launch_submission_failure_leaves_table_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        cluster.fail_next_create("admission webhook denied the request");

        let err = s.launch(&script(&dir, "app.js")).unwrap_err();
        assert!(matches!(err, LifecycleError::Submission(_)), "{err}");
        assert!(s.table().is_empty());
    }

    #[test]
    fn launch_template_error_makes_no_cluster_call() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        s.env().unset("NODE_IMAGE");
        let calls_before = cluster.calls().len();

        let err = s.launch(&script(&dir, "app.js")).unwrap_err();
        assert!(matches!(err, LifecycleError::Template(_)), "{err}");
        assert_eq!(cluster.calls().len(), calls_before);
        assert!(s.table().is_empty());
    }

    #[test]
    fn launch_missing_script_is_io_error() {
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let err = s.launch("/no/such/dir/app.js").unwrap_err();
        assert!(matches!(err, LifecycleError::Io { .. }));
    }

    #[test]
    fn kill_unknown_is_not_found_without_side_effects() {
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let err = s.kill("node-ghost-1").unwrap_err();
        assert!(err.is_not_found());
        assert!(cluster.delete_calls().is_empty());
    }

    #[test]
    fn kill_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let rec = s.launch(&script(&dir, "worker.js")).unwrap();

        let killed = s.kill("worker.js").unwrap();
        assert_eq!(killed.id, rec.id);
        assert_eq!(killed.status, ProcessStatus::Killed);
        assert!(s.table().is_empty());
    }

    #[test]
    fn kill_failure_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let rec = s.launch(&script(&dir, "app.js")).unwrap();
        cluster.set_phase(&rec.remote_name, "Running");
        s.ps().unwrap();
        cluster.fail_next_delete("forbidden");

        let err = s.kill(&rec.id).unwrap_err();
        assert!(matches!(err, LifecycleError::PartialDivergence { ref id, .. } if *id == rec.id));
        assert_eq!(s.table().get(&rec.id).unwrap().status, ProcessStatus::Running);
    }

    #[test]
    fn kill_of_externally_deleted_process_forgets_it() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let rec = s.launch(&script(&dir, "app.js")).unwrap();
        cluster.remove_external(&rec.remote_name);

        s.kill(&rec.id).unwrap();
        assert!(s.table().is_empty());
    }

    #[test]
    fn ps_overlays_phase_and_keeps_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let a = s.launch(&script(&dir, "a.js")).unwrap();
        let b = s.launch(&script(&dir, "b.js")).unwrap();
        cluster.set_phase(&a.remote_name, "Succeeded");
        cluster.remove_external(&b.remote_name);

        let rows = s.ps().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, ProcessStatus::Completed);
        assert_eq!(rows[1].status, ProcessStatus::Unknown);
    }

    #[test]
    fn ps_aborts_when_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        s.launch(&script(&dir, "a.js")).unwrap();
        cluster.set_unavailable(true);

        assert!(matches!(s.ps(), Err(LifecycleError::GatewayUnavailable(_))));
        assert_eq!(s.table().len(), 1);
    }

    #[test]
    fn ps_list_failure_marks_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let rec = s.launch(&script(&dir, "a.js")).unwrap();
        cluster.set_phase(&rec.remote_name, "Running");
        cluster.fail_next_list("forbidden");

        let rows = s.ps().unwrap();
        assert_eq!(rows[0].status, ProcessStatus::Unknown);
    }

    #[test]
    fn contexts_flag_active() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.add_context("prod");
        let s = session(&cluster);
        assert_eq!(
            s.contexts().unwrap(),
            vec![("minikube".to_string(), true), ("prod".to_string(), false)]
        );
    }

    #[test]
    fn use_context_rebuilds_for_new_context() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        cluster.add_context("prod");
        let s = session(&cluster);
        s.launch(&script(&dir, "a.js")).unwrap();

        assert_eq!(s.use_context("prod").unwrap(), 0);
        assert_eq!(s.context(), "prod");
        assert!(s.table().is_empty());

        assert_eq!(s.use_context("minikube").unwrap(), 1);
    }

    #[test]
    fn use_unknown_context_rejected() {
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        assert!(matches!(
            s.use_context("nowhere"),
            Err(LifecycleError::UnknownContext(_))
        ));
        assert_eq!(s.context(), "minikube");
    }
}
