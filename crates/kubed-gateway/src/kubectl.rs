//! [`ClusterGateway`] backed by the `kubectl` binary.
//!
//! Every call spawns `kubectl`, waits for it to exit and hands its output to
//! [`crate::parse`]. There is no timeout: a hung `kubectl` hangs the caller.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::parse;
use crate::{ClusterGateway, LabelSelector, ResourceIdentity, ResourceSummary, Versions};

/// Environment variable overriding the kubectl location.
pub const KUBECTL_ENV: &str = "KUBEDSH_KUBECTL";

/// Resources removed when a process is killed.
const PROCESS_RESOURCES: &str = "pods,deployments,configmaps";

/// Resources listed when observing processes and bootstrap DaemonSets.
const LISTED_RESOURCES: &str = "deployments,daemonsets,pods";

#[derive(Debug, Clone)]
pub struct KubectlGateway {
    binary: PathBuf,
}

impl KubectlGateway {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate kubectl.
    ///
    /// Search order:
    /// 1. `$KUBEDSH_KUBECTL`
    /// 2. `kubectl` on `$PATH` (via `which`)
    pub fn locate() -> GatewayResult<Self> {
        if let Ok(path) = std::env::var(KUBECTL_ENV) {
            let kubectl = PathBuf::from(&path);
            if kubectl.is_file() {
                debug!("Found kubectl at {} (from {KUBECTL_ENV})", kubectl.display());
                return Ok(Self::new(kubectl));
            }
        }

        if let Ok(output) = Command::new("which").arg("kubectl").output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    debug!("Found kubectl at {} (system PATH)", path);
                    return Ok(Self::new(path));
                }
            }
        }

        Err(GatewayError::Unavailable(format!(
            "kubectl not found on PATH; install it or set {KUBECTL_ENV}"
        )))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run kubectl with `args`, optionally feeding `stdin`, and return stdout.
    fn run(&self, args: &[String], stdin: Option<&[u8]>) -> GatewayResult<String> {
        let command = args.join(" ");
        debug!(kubectl = %self.binary.display(), %command, "running kubectl");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                GatewayError::Unavailable(format!("cannot execute {}: {e}", self.binary.display()))
            }
            _ => GatewayError::Io(e),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)?;
        }

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(parse::classify_failure(
                &command,
                output.status.code().unwrap_or(-1),
                &stderr,
            ));
        }
        Ok(stdout)
    }
}

/// `--context <ctx>` and `-n <ns>` prefix; empty values are omitted.
fn scope_args(namespace: &str, context: &str) -> Vec<String> {
    let mut args = Vec::new();
    if !context.is_empty() {
        args.push("--context".to_string());
        args.push(context.to_string());
    }
    if !namespace.is_empty() {
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
    }
    args
}

fn with_args(mut base: Vec<String>, rest: &[&str]) -> Vec<String> {
    base.extend(rest.iter().map(|s| s.to_string()));
    base
}

impl ClusterGateway for KubectlGateway {
    fn create(&self, manifest: &[u8], context: &str) -> GatewayResult<ResourceIdentity> {
        let args = with_args(scope_args("", context), &["create", "-f", "-", "-o", "name"]);
        let stdout = self.run(&args, Some(manifest))?;
        parse::parse_created(&stdout)
    }

    fn delete(&self, name: &str, namespace: &str, context: &str) -> GatewayResult<()> {
        let selector = LabelSelector::process(name).to_string();
        let args = with_args(
            scope_args(namespace, context),
            &["delete", PROCESS_RESOURCES, "-l", &selector],
        );
        let stdout = self.run(&args, None)?;
        parse::parse_deleted(&stdout, name)
    }

    fn list(
        &self,
        selector: &LabelSelector,
        namespace: &str,
        context: &str,
    ) -> GatewayResult<Vec<ResourceSummary>> {
        let selector = selector.to_string();
        let args = with_args(
            scope_args(namespace, context),
            &["get", LISTED_RESOURCES, "-l", &selector, "-o", "json"],
        );
        let stdout = self.run(&args, None)?;
        parse::parse_listing(&stdout)
    }

    fn list_all_namespaces(
        &self,
        selector: &LabelSelector,
        context: &str,
    ) -> GatewayResult<Vec<ResourceSummary>> {
        let selector = selector.to_string();
        let args = with_args(
            scope_args("", context),
            &["get", LISTED_RESOURCES, "-l", &selector, "--all-namespaces", "-o", "json"],
        );
        let stdout = self.run(&args, None)?;
        parse::parse_listing(&stdout)
    }

    fn versions(&self, context: &str) -> GatewayResult<Versions> {
        let json = self.run(&with_args(scope_args("", context), &["version", "-o", "json"]), None);
        match json {
            Ok(out) => parse::parse_versions(&out),
            // Older clients only know the text form.
            Err(GatewayError::Command { .. }) => {
                let out = self.run(&with_args(scope_args("", context), &["version", "--short"]), None)?;
                parse::parse_versions(&out)
            }
            Err(e) => Err(e),
        }
    }

    fn current_context(&self) -> GatewayResult<String> {
        let out = self.run(&with_args(Vec::new(), &["config", "current-context"]), None)?;
        let context = out.trim();
        if context.is_empty() {
            return Err(GatewayError::parse("current context", "empty"));
        }
        Ok(context.to_string())
    }

    fn list_contexts(&self) -> GatewayResult<Vec<String>> {
        let out = self.run(&with_args(Vec::new(), &["config", "get-contexts", "-o", "name"]), None)?;
        Ok(parse::parse_contexts(&out))
    }

    fn raw(&self, args: &[String], context: &str) -> GatewayResult<String> {
        let mut all = scope_args("", context);
        all.extend_from_slice(args);
        self.run(&all, None)
    }
}
