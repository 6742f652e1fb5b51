//! Shell command parsing and dispatch.

use std::io::Write;

use anyhow::{Result, bail};

use kubed_lifecycle::Session;

pub mod builtins;
pub mod procs;

/// Programs run on the local machine instead of the cluster.
pub const LOCAL_PROGRAMS: &[&str] = &["ls", "cat", "pwd"];

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Blank line or `#` comment.
    Empty,
    Exit,
    Help,
    Version,
    Env,
    Ps,
    Contexts,
    Use(&'a str),
    Kill(&'a str),
    /// Text after `echo`, before variable expansion.
    Echo(&'a str),
    Assign { name: &'a str, value: &'a str },
    /// Arguments passed straight to kubectl.
    Literally(Vec<&'a str>),
    /// Arguments for curl run inside the cluster.
    Curl(Vec<&'a str>),
    Local { program: &'a str, args: Vec<&'a str> },
    /// A launch line, with or without the `launch` keyword.
    Launch(&'a str),
}

/// What the loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Command::Empty);
        }
        if let Some(rest) = line.strip_prefix('`') {
            let rest = rest.strip_suffix('`').unwrap_or(rest);
            return Ok(Command::Literally(rest.split_whitespace().collect()));
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let cmd = match word {
            "exit" | "quit" => Command::Exit,
            "help" => Command::Help,
            "version" => Command::Version,
            "env" => Command::Env,
            "ps" => Command::Ps,
            "contexts" => Command::Contexts,
            "use" => Command::Use(single_arg("use", rest)?),
            "kill" => Command::Kill(single_arg("kill", rest)?),
            "echo" => Command::Echo(rest),
            "literally" => {
                if rest.is_empty() {
                    bail!("usage: literally <kubectl arguments>");
                }
                Command::Literally(rest.split_whitespace().collect())
            }
            "curl" => {
                if rest.is_empty() {
                    bail!("usage: curl <curl arguments>");
                }
                Command::Curl(rest.split_whitespace().collect())
            }
            "launch" => Command::Launch(line),
            w if LOCAL_PROGRAMS.contains(&w) => Command::Local {
                program: w,
                args: rest.split_whitespace().collect(),
            },
            w => match assignment(w) {
                Some((name, value)) if rest.is_empty() => Command::Assign { name, value },
                Some(_) => bail!("usage: NAME=value (no spaces in the value)"),
                None => Command::Launch(line),
            },
        };
        Ok(cmd)
    }
}

fn single_arg<'a>(command: &str, rest: &'a str) -> Result<&'a str> {
    let mut words = rest.split_whitespace();
    match (words.next(), words.next()) {
        (Some(arg), None) => Ok(arg),
        _ => bail!("usage: {command} <name>"),
    }
}

/// Split `NAME=value` when `NAME` is a valid variable name.
fn assignment(word: &str) -> Option<(&str, &str)> {
    let (name, value) = word.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    let valid = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some((name, value))
}

/// Run one command against the session, writing its output to `out`.
pub fn dispatch(session: &Session, cmd: Command<'_>, out: &mut dyn Write) -> Result<Flow> {
    match cmd {
        Command::Empty => {}
        Command::Exit => return Ok(Flow::Exit),
        Command::Help => builtins::help(out)?,
        Command::Version => builtins::version(session, out)?,
        Command::Env => builtins::env(session, out)?,
        Command::Echo(text) => builtins::echo(session, text, out)?,
        Command::Assign { name, value } => builtins::assign(session, name, value),
        Command::Local { program, args } => builtins::local(program, &args, out)?,
        Command::Ps => procs::ps(session, out)?,
        Command::Contexts => procs::contexts(session, out)?,
        Command::Use(context) => procs::use_context(session, context, out)?,
        Command::Kill(target) => procs::kill(session, target, out)?,
        Command::Launch(line) => procs::launch(session, line, out)?,
        Command::Literally(args) => procs::literally(session, &args, out)?,
        Command::Curl(args) => procs::curl(session, &args, out)?,
    }
    Ok(Flow::Continue)
}
