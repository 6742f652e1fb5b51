//! The read-eval-print loop.

use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::debug;

use kubed_lifecycle::Session;

use crate::commands::{self, Command, Flow};

/// Read commands from `input` until `exit` or end of input.
///
/// Command failures are printed to `err` as one line and the loop goes on;
/// only I/O errors on the streams themselves end it early.
pub fn run(
    session: &Session,
    mut input: impl BufRead,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<()> {
    let mut line = String::new();
    loop {
        write!(out, "[{}]$ ", session.context())?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(());
        }

        let outcome = Command::parse(&line).and_then(|cmd| {
            debug!(?cmd, "dispatch");
            commands::dispatch(session, cmd, out)
        });
        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => return Ok(()),
            Err(e) => writeln!(err, "error: {e:#}")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use kubed_core::EnvTable;
    use kubed_gateway::fake::FakeCluster;

    fn run_script(session: &Session, script: &str) -> (String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        run(session, Cursor::new(script.to_string()), &mut out, &mut err).unwrap();
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn prompt_shows_context_and_exit_stops() {
        let s = Session::start(Arc::new(FakeCluster::default()), EnvTable::with_defaults(), None)
            .unwrap();
        let (out, err) = run_script(&s, "X=1\necho $X\nexit\necho never\n");
        assert_eq!(out, "[minikube]$ [minikube]$ 1\n[minikube]$ ");
        assert!(err.is_empty());
    }

    #[test]
    fn errors_do_not_stop_the_loop() {
        let s = Session::start(Arc::new(FakeCluster::default()), EnvTable::with_defaults(), None)
            .unwrap();
        let (out, err) = run_script(&s, "kill ghost\nuse nowhere\necho ok\n");
        assert!(err.contains("no such process: ghost"), "{err}");
        assert!(err.contains("unknown context: nowhere"), "{err}");
        assert_eq!(err.lines().count(), 2);
        assert!(out.contains("ok\n"));
        // End of input ends the loop after a final prompt.
        assert!(out.ends_with("[minikube]$ \n"));
    }

    #[test]
    fn use_changes_prompt() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.add_context("prod");
        let s = Session::start(cluster, EnvTable::with_defaults(), None).unwrap();
        let (out, _) = run_script(&s, "use prod\n");
        assert!(out.contains("[prod]$ "));
    }
}
