//! ProcessTable — insertion-ordered registry of remote processes.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use kubed_core::types::*;
use kubed_gateway::{ClusterGateway, LabelSelector, ResourceSummary};

use crate::error::{TableError, TableResult};

/// Registry of the processes this session knows about.
#[derive(Debug, Default)]
pub struct ProcessTable {
    entries: Mutex<Vec<ProcessRecord>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table with the processes observed in the cluster.
    ///
    /// Lists every workload labelled as a kubed-sh process in any namespace
    /// of `context`, so processes launched under another `NAMESPACE` stay
    /// visible and killable. Each record keeps the namespace it lives in. A
    /// name seen in more than one namespace gets the id `<namespace>/<name>`
    /// for every occurrence after the first.
    ///
    /// On failure the table is left empty and the error returned; callers
    /// report it and carry on.
    pub fn rebuild(&self, gateway: &dyn ClusterGateway, context: &str) -> TableResult<usize> {
        let summaries = match gateway.list_all_namespaces(&LabelSelector::processes(), context) {
            Ok(s) => s,
            Err(e) => {
                self.entries.lock().clear();
                warn!(%context, error = %e, "process table rebuild failed");
                return Err(TableError::Gateway(e));
            }
        };

        let mut rebuilt: Vec<ProcessRecord> = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            let seen = rebuilt
                .iter()
                .any(|r| r.remote_name == summary.name && r.namespace == summary.namespace);
            if seen {
                warn!(namespace = %summary.namespace, name = %summary.name, "duplicate workload in listing, skipped");
                continue;
            }
            let Some(mut record) = record_from_summary(summary, context) else {
                continue;
            };
            if rebuilt.iter().any(|r| r.id == record.id) {
                record.id = format!("{}/{}", record.namespace, record.remote_name);
            }
            rebuilt.push(record);
        }

        let count = rebuilt.len();
        *self.entries.lock() = rebuilt;
        info!(%context, count, "process table rebuilt");
        Ok(count)
    }

    /// Insert a record. Fails if its id is already present.
    pub fn add(&self, record: ProcessRecord) -> TableResult<()> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|r| r.id == record.id) {
            return Err(TableError::DuplicateId(record.id));
        }
        debug!(id = %record.id, kind = %record.kind, "process added");
        entries.push(record);
        Ok(())
    }

    /// Remove and return a record.
    pub fn remove(&self, id: &str) -> TableResult<ProcessRecord> {
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| TableError::NotFound(id.to_string()))?;
        debug!(%id, "process removed");
        Ok(entries.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<ProcessRecord> {
        self.entries.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Snapshot of all records in insertion order.
    pub fn list(&self) -> Vec<ProcessRecord> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Overwrite the cached status of a record.
    pub fn set_status(&self, id: &str, status: ProcessStatus) -> TableResult<()> {
        let mut entries = self.entries.lock();
        let record = entries
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| TableError::NotFound(id.to_string()))?;
        record.status = status;
        Ok(())
    }

    /// Find a record by id, or by a source path / file name that matches
    /// exactly one record.
    pub fn resolve(&self, name: &str) -> TableResult<ProcessRecord> {
        let entries = self.entries.lock();
        if let Some(record) = entries.iter().find(|r| r.id == name) {
            return Ok(record.clone());
        }
        let mut matches = entries
            .iter()
            .filter(|r| r.source_ref == name || r.display_name() == name);
        match (matches.next(), matches.next()) {
            (Some(record), None) => Ok(record.clone()),
            _ => Err(TableError::NotFound(name.to_string())),
        }
    }
}

/// Turn a listed workload into a record. DaemonSets and workloads of an
/// unknown runtime kind are skipped.
fn record_from_summary(summary: &ResourceSummary, context: &str) -> Option<ProcessRecord> {
    let Some(workload) = WorkloadKind::from_resource_kind(&summary.kind) else {
        debug!(kind = %summary.kind, name = %summary.name, "not a process workload, skipped");
        return None;
    };
    let Some(kind) = summary
        .labels
        .get(LABEL_KIND)
        .and_then(|k| RuntimeKind::from_label(k))
        .or_else(|| RuntimeKind::from_remote_name(&summary.name))
    else {
        warn!(name = %summary.name, "cannot infer runtime kind, skipped");
        return None;
    };

    let status = summary
        .phase
        .as_deref()
        .map(ProcessStatus::from_phase)
        .unwrap_or(ProcessStatus::Unknown);

    Some(ProcessRecord {
        id: summary.name.clone(),
        kind,
        source_ref: summary
            .annotations
            .get(ANNOTATION_SOURCE)
            .cloned()
            .unwrap_or_else(|| summary.name.clone()),
        workload,
        remote_name: summary.name.clone(),
        namespace: summary.namespace.clone(),
        context: context.to_string(),
        status,
        started_at: summary
            .annotations
            .get(ANNOTATION_STARTED_AT)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    })
}
