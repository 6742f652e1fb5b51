//! Commands handled without touching the process table.

use std::io::Write;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::warn;

use kubed_lifecycle::Session;

const HELP: &str = "\
Commands:
  launch <program> [args]   run a binary or .js/.py/.rb script in the cluster
  <program> [args]          same as launch
  ps                        list processes and their current status
  kill <id|file>            stop a process and remove its resources
  contexts                  list cluster contexts (* marks the active one)
  use <context>             switch to another context
  env                       show environment variables
  NAME=value                set an environment variable
  echo <text>               print text with $NAME references expanded
  literally <args>          run kubectl with <args> (or prefix with `)
  curl <args>               run curl from a throwaway pod in the cluster
  ls, cat, pwd              run on the local machine
  version                   show shell and cluster versions
  help                      show this help
  exit                      leave the shell
";

pub fn help(out: &mut dyn Write) -> Result<()> {
    out.write_all(HELP.as_bytes())?;
    Ok(())
}

pub fn version(session: &Session, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "kubed-sh {}", env!("CARGO_PKG_VERSION"))?;
    match session.gateway().versions(&session.context()) {
        Ok(v) => {
            writeln!(out, "kubectl client {}", v.client)?;
            writeln!(out, "cluster server {}", v.server)?;
        }
        Err(e) => warn!(error = %e, "cannot query cluster versions"),
    }
    Ok(())
}

pub fn env(session: &Session, out: &mut dyn Write) -> Result<()> {
    for (name, value) in session.env().snapshot() {
        writeln!(out, "{name}={value}")?;
    }
    Ok(())
}

pub fn echo(session: &Session, text: &str, out: &mut dyn Write) -> Result<()> {
    let expanded = session.env().substitute(text)?;
    writeln!(out, "{expanded}")?;
    Ok(())
}

pub fn assign(session: &Session, name: &str, value: &str) {
    session.env().set(name, value);
}

/// Run a local program and copy its output.
pub fn local(program: &str, args: &[&str], out: &mut dyn Write) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {program}"))?;
    out.write_all(&output.stdout)?;
    out.write_all(&output.stderr)?;
    if !output.status.success() {
        warn!(%program, code = ?output.status.code(), "local command failed");
    }
    Ok(())
}
