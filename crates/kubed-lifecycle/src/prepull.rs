//! Image pre-pull bootstrap.
//!
//! On first use of a cluster, one DaemonSet per runtime image is created so
//! every node pulls the image ahead of the first launch. The DaemonSets carry
//! `scope=pre-flight`; their presence marks the cluster as bootstrapped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use kubed_core::RuntimeKind;
use kubed_gateway::LabelSelector;

use crate::error::LifecycleResult;
use crate::session::Session;

/// Environment variable that disables the bootstrap when truthy.
pub const PREPULL_DISABLE: &str = "PREPULL_DISABLE";

/// Interval between progress ticks while waiting.
const TICK: Duration = Duration::from_secs(1);

/// DaemonSet name used to pre-pull the image of `kind`.
pub fn daemonset_name(kind: RuntimeKind) -> &'static str {
    match kind {
        RuntimeKind::Binary => "prepullbin",
        RuntimeKind::Node => "prepulljs",
        RuntimeKind::Python => "prepullpy",
        RuntimeKind::Ruby => "prepullrb",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepullOutcome {
    /// `PREPULL_DISABLE` is set.
    Disabled,
    /// Pre-flight DaemonSets already exist in the target namespace.
    AlreadyDone,
    /// DaemonSets were submitted; `failed` lists `(name, reason)` pairs that
    /// were skipped.
    Started {
        created: Vec<String>,
        failed: Vec<(String, String)>,
    },
}

/// Run the bootstrap for the session's context and namespace.
///
/// After submitting, blocks for `wait` while `progress` is called from a
/// background thread once per second. Only a failure to check for existing
/// DaemonSets is returned as an error; individual submissions that fail are
/// logged and reported in the outcome.
pub fn prepull<F>(session: &Session, wait: Duration, progress: F) -> LifecycleResult<PrepullOutcome>
where
    F: Fn() + Sync,
{
    if session.env().is_truthy(PREPULL_DISABLE) {
        info!("image pre-pull disabled");
        return Ok(PrepullOutcome::Disabled);
    }

    let context = session.context();
    let namespace = session.namespace();
    let existing = session
        .gateway()
        .list(&LabelSelector::preflight(), &namespace, &context)?;
    if !existing.is_empty() {
        info!(count = existing.len(), "pre-pull DaemonSets already present");
        return Ok(PrepullOutcome::AlreadyDone);
    }

    let server_version = session.server_version();
    let mut created = Vec::new();
    let mut failed = Vec::new();
    for kind in RuntimeKind::ALL {
        let name = daemonset_name(kind);
        let image = session.env().get(kind.image_var()).unwrap_or_default();
        let submitted = session
            .generator()
            .prepull_daemonset(name, &image, &namespace, &server_version)
            .map_err(|e| e.to_string())
            .and_then(|m| m.to_bytes().map_err(|e| e.to_string()))
            .and_then(|bytes| {
                session
                    .gateway()
                    .create(&bytes, &context)
                    .map_err(|e| e.to_string())
            });
        match submitted {
            Ok(identity) => {
                info!(%identity, %image, "pre-pull DaemonSet created");
                created.push(name.to_string());
            }
            Err(reason) => {
                warn!(%name, %reason, "pre-pull DaemonSet skipped");
                failed.push((name.to_string(), reason));
            }
        }
    }

    if !created.is_empty() && !wait.is_zero() {
        wait_with_progress(wait, &progress);
    }
    Ok(PrepullOutcome::Started { created, failed })
}

/// Sleep for `wait`, calling `progress` every tick from a helper thread.
fn wait_with_progress<F>(wait: Duration, progress: &F)
where
    F: Fn() + Sync,
{
    let done = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            loop {
                thread::sleep(TICK);
                if done.load(Ordering::Acquire) {
                    break;
                }
                progress();
            }
        });
        thread::sleep(wait);
        done.store(true, Ordering::Release);
    });
}
