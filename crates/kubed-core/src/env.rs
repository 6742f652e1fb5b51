//! Session environment variable table.
//!
//! Holds the runtime images, the target namespace and the bootstrap flags.
//! The manifest generator reads it on every launch, so a `set` only affects
//! processes launched afterwards.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::{Captures, Regex};

use crate::manifest::TemplateError;

/// A recognized variable with its default value and effect.
#[derive(Debug, Clone, Copy)]
pub struct EnvDefault {
    pub name: &'static str,
    pub value: &'static str,
    pub description: &'static str,
}

/// Variables seeded by [`EnvTable::init`].
pub const DEFAULTS: &[EnvDefault] = &[
    EnvDefault {
        name: "BINARY_IMAGE",
        value: "alpine:3.7",
        description: "image used to run native-binary workloads",
    },
    EnvDefault {
        name: "NODE_IMAGE",
        value: "node:9.4-alpine",
        description: "image used to run Node.js scripts",
    },
    EnvDefault {
        name: "PYTHON_IMAGE",
        value: "python:3.6-alpine3.7",
        description: "image used to run Python scripts",
    },
    EnvDefault {
        name: "RUBY_IMAGE",
        value: "ruby:2.5-alpine3.7",
        description: "image used to run Ruby scripts",
    },
    EnvDefault {
        name: "CURL_IMAGE",
        value: "curlimages/curl:8.10.1",
        description: "image of the throwaway pod used by `curl`",
    },
    EnvDefault {
        name: "NAMESPACE",
        value: "default",
        description: "target cluster namespace",
    },
    EnvDefault {
        name: "PREPULL_DISABLE",
        value: "false",
        description: "skip the one-time image pre-pull",
    },
];

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("variable reference pattern is valid")
});

/// Thread-safe table of uppercase variable names to values.
#[derive(Debug, Default)]
pub struct EnvTable {
    vars: Mutex<HashMap<String, String>>,
}

impl EnvTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table seeded with [`DEFAULTS`].
    pub fn with_defaults() -> Self {
        let table = Self::new();
        table.init();
        table
    }

    /// Seed every recognized default, overwriting current values.
    pub fn init(&self) {
        let mut vars = self.vars.lock();
        for d in DEFAULTS {
            vars.insert(d.name.to_string(), d.value.to_string());
        }
    }

    /// Current value, or `None` when the variable is unset.
    pub fn get(&self, name: &str) -> Option<String> {
        self.vars.lock().get(&normalize(name)).cloned()
    }

    /// Overwrite a variable unconditionally.
    pub fn set(&self, name: &str, value: &str) {
        let key = normalize(name);
        tracing::debug!(%key, %value, "env var set");
        self.vars.lock().insert(key, value.to_string());
    }

    /// Remove a variable. Returns the previous value.
    pub fn unset(&self, name: &str) -> Option<String> {
        self.vars.lock().remove(&normalize(name))
    }

    /// Whether a flag-like variable is switched on (`1`, `true`, `yes`, `on`).
    pub fn is_truthy(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    /// All variables sorted by name.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut all: Vec<_> = self
            .vars
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort();
        all
    }

    /// Expand `$NAME` and `${NAME}` references from the table.
    pub fn substitute(&self, text: &str) -> Result<String, TemplateError> {
        let vars = self.vars.lock();
        let mut missing = None;
        let expanded = VAR_REF.replace_all(text, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| normalize(m.as_str()))
                .unwrap_or_default();
            match vars.get(&name) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert(name);
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(TemplateError::UnresolvedVariable(name)),
            None => Ok(expanded.into_owned()),
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_seeded() {
        let env = EnvTable::with_defaults();
        assert_eq!(env.get("NODE_IMAGE").as_deref(), Some("node:9.4-alpine"));
        assert_eq!(env.get("NAMESPACE").as_deref(), Some("default"));
        assert!(!env.is_truthy("PREPULL_DISABLE"));
    }

    #[test]
    fn set_then_get_returns_value() {
        let env = EnvTable::new();
        env.set("FOO", "bar");
        assert_eq!(env.get("FOO").as_deref(), Some("bar"));
    }

    #[test]
    fn keys_are_case_normalized() {
        let env = EnvTable::new();
        env.set("node_image", "node:20");
        assert_eq!(env.get("NODE_IMAGE").as_deref(), Some("node:20"));
        assert_eq!(env.get("Node_Image").as_deref(), Some("node:20"));
    }

    #[test]
    fn last_writer_wins() {
        let env = EnvTable::with_defaults();
        env.set("NAMESPACE", "staging");
        env.set("NAMESPACE", "prod");
        assert_eq!(env.get("NAMESPACE").as_deref(), Some("prod"));
    }

    #[test]
    fn never_set_key_is_unset() {
        let env = EnvTable::with_defaults();
        assert_eq!(env.get("NOT_A_DEFAULT"), None);
    }

    #[test]
    fn unset_removes() {
        let env = EnvTable::with_defaults();
        assert_eq!(env.unset("namespace").as_deref(), Some("default"));
        assert_eq!(env.get("NAMESPACE"), None);
    }

    #[test]
    fn truthy_values() {
        let env = EnvTable::new();
        for v in ["1", "true", "YES", " on "] {
            env.set("PREPULL_DISABLE", v);
            assert!(env.is_truthy("PREPULL_DISABLE"), "{v} should be truthy");
        }
        env.set("PREPULL_DISABLE", "0");
        assert!(!env.is_truthy("PREPULL_DISABLE"));
    }

    #[test]
    fn snapshot_is_sorted() {
        let env = EnvTable::new();
        env.set("B", "2");
        env.set("A", "1");
        assert_eq!(
            env.snapshot(),
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn substitute_both_forms() {
        let env = EnvTable::new();
        env.set("PORT", "8080");
        env.set("HOST", "example.org");
        assert_eq!(
            env.substitute("--listen $HOST:${PORT}").unwrap(),
            "--listen example.org:8080"
        );
        assert_eq!(env.substitute("$port").unwrap(), "8080");
        assert_eq!(env.substitute("no refs").unwrap(), "no refs");
    }

    #[test]
    fn substitute_unset_fails() {
        let env = EnvTable::new();
        let err = env.substitute("--token $SECRET").unwrap_err();
        assert!(matches!(err, TemplateError::UnresolvedVariable(ref n) if n == "SECRET"));
    }
}
