//! End-to-end session scenarios against the in-memory cluster.
//!
//! Each test builds its own `FakeCluster` and `Session`; nothing is shared.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;

use kubed_core::types::*;
use kubed_core::EnvTable;
use kubed_gateway::fake::{FakeCluster, FakeResource};
use kubed_lifecycle::{LifecycleError, Session};

fn start(cluster: &Arc<FakeCluster>) -> Session {
    Session::start(cluster.clone(), EnvTable::with_defaults(), None).unwrap()
}

fn write_script(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, "print('hi')\n").unwrap();
    path.display().to_string()
}

fn owned_deployment(name: &str, kind: &str, phase: &str) -> FakeResource {
    let labels: BTreeMap<String, String> = [
        (LABEL_GEN, GEN_VALUE),
        (LABEL_SCOPE, SCOPE_PROCESS),
        (LABEL_DPROC, name),
        (LABEL_KIND, kind),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    FakeResource {
        context: "minikube".to_string(),
        namespace: "default".to_string(),
        kind: "Deployment".to_string(),
        name: name.to_string(),
        phase: Some(phase.to_string()),
        labels,
        annotations: BTreeMap::new(),
    }
}

// ── Scenarios ──────────────────────────────────────────────────────

#[test]
fn launch_ps_kill_round() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::default());
    let session = start(&cluster);
    assert!(session.table().is_empty());

    // Launch a Node script into an empty table.
    let record = session.launch(&write_script(dir.path(), "app.js")).unwrap();
    assert_eq!(session.table().len(), 1);
    assert_eq!(record.status, ProcessStatus::Submitted);
    assert_eq!(record.kind, RuntimeKind::Node);

    // ps reflects the observed phase.
    cluster.set_phase(&record.remote_name, "Running");
    let rows = session.ps().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ProcessStatus::Running);

    // kill removes the record and deletes the right workload.
    session.kill(&record.id).unwrap();
    assert!(session.table().is_empty());
    assert_eq!(cluster.delete_calls(), vec![record.remote_name.clone()]);

    // Kill then Get is NotFound.
    assert!(session.table().get(&record.id).is_none());
    assert!(session.kill(&record.id).unwrap_err().is_not_found());
    assert_eq!(cluster.delete_calls().len(), 1);
}

#[test]
fn new_session_adopts_existing_workload() {
    let cluster = Arc::new(FakeCluster::default());
    cluster.insert(owned_deployment("python-etl-0badc0de", "python", "Running"));

    let session = start(&cluster);
    let rows = session.table().list();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, RuntimeKind::Python);
    assert_eq!(rows[0].status, ProcessStatus::Running);
    assert_eq!(rows[0].remote_name, "python-etl-0badc0de");
}

#[test]
fn manifest_api_group_follows_server_version() {
    let dir = tempfile::tempdir().unwrap();
    for (server, expected) in [("v1.7.4", "extensions/v1beta1"), ("v1.9.1", "apps/v1")] {
        let cluster = Arc::new(FakeCluster::new("minikube", server));
        let session = start(&cluster);
        let source = write_script(dir.path(), "app.js");

        let manifest = session
            .generator()
            .generate(
                &kubed_core::LaunchSpec {
                    kind: RuntimeKind::Node,
                    source_ref: source,
                    payload: b"console.log(1)".to_vec(),
                    args: Vec::new(),
                    workload: WorkloadKind::Deployment,
                    remote_name: "node-app-00000000".to_string(),
                    namespace: session.namespace(),
                    server_version: session.server_version(),
                    started_at: 0,
                },
                session.env(),
            )
            .unwrap();
        assert_eq!(manifest.api_version, expected, "server {server}");

        // A daemon launch uses the same selection; a foreground one is a core Pod.
        session.launch(&format!("{} &", write_script(dir.path(), "app.js"))).unwrap();
        session.launch(&write_script(dir.path(), "job.js")).unwrap();
        let created = cluster.created_manifests();
        assert_eq!(created[0]["items"][1]["apiVersion"], expected, "server {server}");
        assert_eq!(created[1]["items"][1]["apiVersion"], "v1");
        assert_eq!(created[1]["items"][1]["kind"], "Pod");
    }
}

#[test]
fn process_in_another_namespace_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::default());
    let record = start(&cluster).launch(&write_script(dir.path(), "app.js")).unwrap();
    assert_eq!(record.namespace, "default");

    // A new shell whose NAMESPACE points elsewhere still sees and kills it.
    let env = EnvTable::with_defaults();
    env.set("NAMESPACE", "staging");
    let session = Session::start(cluster.clone(), env, None).unwrap();
    assert_eq!(session.table().len(), 1);
    let adopted = session.table().get(&record.id).unwrap();
    assert_eq!(adopted.namespace, "default");
    assert_eq!(adopted.workload, WorkloadKind::Pod);

    session.kill(&record.id).unwrap();
    assert!(cluster.resources().is_empty());
}

// ── Properties ─────────────────────────────────────────────────────

#[test]
fn rebuild_is_idempotent_after_launches() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::default());
    let session = start(&cluster);
    session.launch(&write_script(dir.path(), "a.js")).unwrap();
    session.launch(&write_script(dir.path(), "b.rb")).unwrap();

    session.rebuild().unwrap();
    let first = session.table().list();
    session.rebuild().unwrap();
    assert_eq!(session.table().list(), first);
    assert_eq!(first.len(), 2);
}

#[test]
fn table_size_tracks_launches_minus_kills() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::default());
    let session = start(&cluster);

    let mut live = Vec::new();
    for i in 0..5 {
        live.push(session.launch(&write_script(dir.path(), &format!("job{i}.py"))).unwrap());
    }
    // A failed launch does not count.
    cluster.fail_next_create("denied");
    assert!(session.launch(&write_script(dir.path(), "extra.py")).is_err());

    session.kill(&live.remove(1).id).unwrap();
    session.kill(&live.remove(2).id).unwrap();
    assert_eq!(session.table().len(), 3);
    assert_eq!(session.table().len(), live.len());
}

#[test]
fn failed_kill_diverges_until_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::default());
    let session = start(&cluster);
    let record = session.launch(&write_script(dir.path(), "app.js")).unwrap();

    cluster.fail_next_delete("etcdserver: request timed out");
    let err = session.kill(&record.id).unwrap_err();
    assert!(matches!(err, LifecycleError::PartialDivergence { .. }));
    assert_eq!(session.table().len(), 1);

    // The workload really is gone now; the next rebuild reconciles.
    cluster.remove_external(&record.remote_name);
    assert_eq!(session.rebuild().unwrap(), 0);
}

#[test]
fn env_changes_affect_only_later_launches() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::default());
    let session = start(&cluster);

    let before = session.launch(&write_script(dir.path(), "a.js")).unwrap();
    session.env().set("NAMESPACE", "staging");
    let after = session.launch(&write_script(dir.path(), "a.js")).unwrap();

    assert_eq!(before.namespace, "default");
    assert_eq!(after.namespace, "staging");
    assert_ne!(before.id, after.id);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn launched_ids_are_pairwise_distinct(
        names in proptest::collection::vec("[a-z]{1,12}\\.(js|py|rb)", 1..12)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let session = start(&cluster);

        let mut ids = HashSet::new();
        for name in &names {
            let record = session.launch(&write_script(dir.path(), name)).unwrap();
            prop_assert!(record.id.len() <= 63);
            prop_assert!(ids.insert(record.id));
        }
        prop_assert_eq!(session.table().len(), names.len());
    }
}
