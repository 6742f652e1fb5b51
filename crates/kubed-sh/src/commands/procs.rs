//! Process and context commands.

use std::io::Write;

use anyhow::Result;
use tracing::debug;

use kubed_core::types::{ProcessRecord, epoch_secs};
use kubed_lifecycle::Session;

const CURL_IMAGE: &str = "CURL_IMAGE";
const FALLBACK_CURL_IMAGE: &str = "curlimages/curl:8.10.1";

pub fn launch(session: &Session, line: &str, out: &mut dyn Write) -> Result<()> {
    let record = session.launch(line)?;
    writeln!(out, "{} launched as {}", record.source_ref, record.id)?;
    Ok(())
}

pub fn kill(session: &Session, target: &str, out: &mut dyn Write) -> Result<()> {
    let record = session.kill(target)?;
    writeln!(out, "{} killed", record.id)?;
    Ok(())
}

pub fn ps(session: &Session, out: &mut dyn Write) -> Result<()> {
    let rows = session.ps()?;
    write_table(&rows, epoch_secs(), out)
}

fn write_table(rows: &[ProcessRecord], now: u64, out: &mut dyn Write) -> Result<()> {
    let width = rows.iter().map(|r| r.id.len()).max().unwrap_or(0).max(2);
    writeln!(
        out,
        "{:<width$}  {:<6}  {:<10}  {:<9}  {:>5}  SOURCE",
        "ID", "KIND", "RUNS-AS", "STATUS", "AGE"
    )?;
    for r in rows {
        writeln!(
            out,
            "{:<width$}  {:<6}  {:<10}  {:<9}  {:>5}  {}",
            r.id,
            r.kind.label(),
            r.workload.resource_kind(),
            r.status.label(),
            age(r.started_at, now),
            r.source_ref,
        )?;
    }
    Ok(())
}

/// Compact age like kubectl prints it.
fn age(started_at: u64, now: u64) -> String {
    if started_at == 0 || started_at > now {
        return "-".to_string();
    }
    let secs = now - started_at;
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        3600..86400 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86400),
    }
}

pub fn contexts(session: &Session, out: &mut dyn Write) -> Result<()> {
    for (name, active) in session.contexts()? {
        let marker = if active { '*' } else { ' ' };
        writeln!(out, "{marker} {name}")?;
    }
    Ok(())
}

pub fn use_context(session: &Session, context: &str, out: &mut dyn Write) -> Result<()> {
    let count = session.use_context(context)?;
    writeln!(out, "now using {context} ({count} processes)")?;
    Ok(())
}

pub fn literally(session: &Session, args: &[&str], out: &mut dyn Write) -> Result<()> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let output = session.gateway().raw(&args, &session.context())?;
    write_output(&output, out)
}

/// Run curl from a short-lived pod in the session namespace, so service
/// names that only resolve inside the cluster can be reached.
pub fn curl(session: &Session, args: &[&str], out: &mut dyn Write) -> Result<()> {
    let image = session
        .env()
        .get(CURL_IMAGE)
        .filter(|i| !i.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_CURL_IMAGE.to_string());
    let pod = format!("kubed-sh-curl-{}", std::process::id());
    let mut kubectl: Vec<String> = vec![
        "run".into(),
        pod,
        "--rm".into(),
        "-i".into(),
        "--restart=Never".into(),
        "--quiet".into(),
        "--image".into(),
        image,
        "--namespace".into(),
        session.namespace(),
        "--".into(),
        "curl".into(),
    ];
    kubectl.extend(args.iter().map(|a| a.to_string()));

    debug!(?kubectl, "in-cluster curl");
    let output = session.gateway().raw(&kubectl, &session.context())?;
    write_output(&output, out)
}

fn write_output(output: &str, out: &mut dyn Write) -> Result<()> {
    out.write_all(output.as_bytes())?;
    if !output.is_empty() && !output.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use kubed_core::EnvTable;
    use kubed_core::types::{ProcessStatus, RuntimeKind, WorkloadKind};
    use kubed_gateway::fake::FakeCluster;

    fn session(cluster: &Arc<FakeCluster>) -> Session {
        Session::start(cluster.clone(), EnvTable::with_defaults(), None).unwrap()
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn age_buckets() {
        assert_eq!(age(0, 100), "-");
        assert_eq!(age(100, 130), "30s");
        assert_eq!(age(100, 100 + 125), "2m");
        assert_eq!(age(100, 100 + 7200), "2h");
        assert_eq!(age(100, 100 + 3 * 86400), "3d");
    }

    #[test]
    fn table_layout() {
        let rows = vec![ProcessRecord {
            id: "node-app-1a2b3c4d".to_string(),
            kind: RuntimeKind::Node,
            source_ref: "./app.js".to_string(),
            workload: WorkloadKind::Deployment,
            remote_name: "node-app-1a2b3c4d".to_string(),
            namespace: "default".to_string(),
            context: "minikube".to_string(),
            status: ProcessStatus::Running,
            started_at: 1000,
        }];
        let mut out = Vec::new();
        write_table(&rows, 1042, &mut out).unwrap();
        let out = text(out);
        let mut lines = out.lines();
        assert!(lines.next().unwrap().starts_with("ID "));
        let row = lines.next().unwrap();
        assert!(row.starts_with("node-app-1a2b3c4d  node    Deployment  Running"), "{row}");
        assert!(row.contains("42s"));
        assert!(row.ends_with("./app.js"));
    }

    #[test]
    fn launch_ps_kill_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("app.rb");
        std::fs::write(&script, "puts 1\n").unwrap();
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);

        let mut out = Vec::new();
        launch(&s, script.to_str().unwrap(), &mut out).unwrap();
        assert!(text(out).contains("launched as ruby-app-"));

        let id = s.table().list()[0].id.clone();
        let mut out = Vec::new();
        ps(&s, &mut out).unwrap();
        let listing = text(out);
        assert!(listing.contains(&id));
        assert!(listing.contains("Submitted"));

        let mut out = Vec::new();
        kill(&s, &id, &mut out).unwrap();
        assert_eq!(text(out), format!("{id} killed\n"));
    }

    #[test]
    fn contexts_mark_active() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.add_context("prod");
        let s = session(&cluster);

        let mut out = Vec::new();
        contexts(&s, &mut out).unwrap();
        assert_eq!(text(out), "* minikube\n  prod\n");

        let mut out = Vec::new();
        use_context(&s, "prod", &mut out).unwrap();
        assert_eq!(text(out), "now using prod (0 processes)\n");
    }

    #[test]
    fn literally_forwards_arguments() {
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        let mut out = Vec::new();
        literally(&s, &["get", "nodes"], &mut out).unwrap();
        assert_eq!(text(out), "get nodes\n");
    }

    #[test]
    fn curl_runs_in_a_throwaway_pod() {
        let cluster = Arc::new(FakeCluster::default());
        let s = session(&cluster);
        s.env().set("NAMESPACE", "staging");
        s.env().set("CURL_IMAGE", "curl:test");

        let mut out = Vec::new();
        curl(&s, &["-s", "http://web:8080/"], &mut out).unwrap();
        let line = text(out);
        assert!(line.starts_with("run kubed-sh-curl-"), "{line}");
        assert!(line.contains("--rm -i --restart=Never --quiet --image curl:test --namespace staging"));
        assert!(line.ends_with("-- curl -s http://web:8080/\n"), "{line}");
    }
}
