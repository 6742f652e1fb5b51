//! Launch invocation parsing.
//!
//! Accepted forms:
//!
//! ```text
//! app.js --port 8080          script, kind from the extension
//! node ./server.js            explicit interpreter
//! ./bin/worker arg1 arg2      any other existing file is a Linux binary
//! server.py --port 80 &       trailing `&` runs the program as a daemon
//! ```

use std::path::Path;

use kubed_core::{RuntimeKind, WorkloadKind};

use crate::error::{LifecycleError, LifecycleResult};

/// Interpreter words that force a runtime kind.
const INTERPRETERS: &[(&str, RuntimeKind)] = &[
    ("node", RuntimeKind::Node),
    ("nodejs", RuntimeKind::Node),
    ("python", RuntimeKind::Python),
    ("python3", RuntimeKind::Python),
    ("ruby", RuntimeKind::Ruby),
];

/// A parsed `launch` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub kind: RuntimeKind,
    /// Path of the script or binary, as typed.
    pub source_ref: String,
    pub args: Vec<String>,
    /// Launched with a trailing `&`: keep it running, restart it on exit.
    pub daemon: bool,
}

impl Invocation {
    /// Parse a launch line, with or without the leading `launch` word.
    pub fn parse(line: &str) -> LifecycleResult<Self> {
        let mut words: Vec<&str> = line.split_whitespace().collect();
        if words.first() == Some(&"launch") {
            words.remove(0);
        }
        let daemon = words.last() == Some(&"&");
        if daemon {
            words.pop();
        }
        let Some((&first, rest)) = words.split_first() else {
            return Err(LifecycleError::Invocation("nothing to launch".to_string()));
        };

        if let Some(&(_, kind)) = INTERPRETERS.iter().find(|(word, _)| *word == first) {
            let Some((&script, args)) = rest.split_first() else {
                return Err(LifecycleError::Invocation(format!("{first}: missing script")));
            };
            return Ok(Self::new(kind, script, args, daemon));
        }

        let path = Path::new(first);
        let by_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(RuntimeKind::from_extension);
        let kind = match by_extension {
            Some(kind) => kind,
            None if path.is_file() => RuntimeKind::Binary,
            None => {
                return Err(LifecycleError::Invocation(format!(
                    "{first}: not a .js/.py/.rb script or an existing binary"
                )));
            }
        };
        Ok(Self::new(kind, first, rest, daemon))
    }

    fn new(kind: RuntimeKind, source: &str, args: &[&str], daemon: bool) -> Self {
        Self {
            kind,
            source_ref: source.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            daemon,
        }
    }

    pub fn workload(&self) -> WorkloadKind {
        if self.daemon { WorkloadKind::Deployment } else { WorkloadKind::Pod }
    }
}
