//! G-code command registration and dispatch.
//!
//! [`GCodeDispatch`] owns the command table: every named command, including
//! every macro alias, registers a handler here, and [`GCodeDispatch::run_script`]
//! parses and executes command text synchronously. Handlers may call back
//! into `run_script` (this is how macro expansion recurses), so the handler
//! table lock is never held across a handler call.
//!
//! Command names and parameter keys are canonicalized to upper-case at the
//! parsing boundary; the wire syntax is case-insensitive.

use crate::error::{HostError, HostResult};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// One parsed command line.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Upper-cased command name.
    pub name: String,
    /// Upper-cased parameter keys to raw string values.
    pub params: HashMap<String, String>,
}

type CommandFn = Arc<dyn Fn(&CommandRequest) -> HostResult<()> + Send + Sync>;

struct CommandEntry {
    desc: String,
    handler: CommandFn,
}

/// Command registry and synchronous executor.
pub struct GCodeDispatch {
    commands: RwLock<HashMap<String, CommandEntry>>,
}

impl GCodeDispatch {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        GCodeDispatch {
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` under `name`. Command names are write-once.
    pub fn register_command<F>(&self, name: &str, desc: &str, handler: F) -> HostResult<()>
    where
        F: Fn(&CommandRequest) -> HostResult<()> + Send + Sync + 'static,
    {
        let name = name.to_uppercase();
        let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
        if commands.contains_key(&name) {
            return Err(HostError::Config(format!(
                "Command '{name}' already registered"
            )));
        }
        commands.insert(
            name,
            CommandEntry {
                desc: desc.to_string(),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Human-readable description of a registered command.
    pub fn command_desc(&self, name: &str) -> Option<String> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_uppercase())
            .map(|entry| entry.desc.clone())
    }

    /// Execute `script` as newline-separated commands.
    ///
    /// Commands run synchronously in order; the first error aborts the
    /// remainder of the script and propagates to the caller.
    pub fn run_script(&self, script: &str) -> HostResult<()> {
        for line in script.lines() {
            if let Some(request) = parse_line(line) {
                self.execute(&request)?;
            }
        }
        Ok(())
    }

    fn execute(&self, request: &CommandRequest) -> HostResult<()> {
        let handler = {
            let commands = self.commands.read().unwrap_or_else(PoisonError::into_inner);
            match commands.get(&request.name) {
                Some(entry) => Arc::clone(&entry.handler),
                None => return Err(HostError::UnknownCommand(request.name.clone())),
            }
        };
        debug!(command = %request.name, "dispatching command");
        handler(request)
    }
}

impl Default for GCodeDispatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one command line. Returns `None` for blank lines and comments.
///
/// Parameters take either the extended `KEY=VALUE` form or the classic
/// single-letter form (`X10` means `X=10`).
fn parse_line(line: &str) -> Option<CommandRequest> {
    let line = match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?.to_uppercase();
    let mut params = HashMap::new();
    for token in tokens {
        if let Some((key, value)) = token.split_once('=') {
            params.insert(key.to_uppercase(), value.to_string());
        } else {
            let split = token
                .char_indices()
                .nth(1)
                .map_or(token.len(), |(index, _)| index);
            let (key, value) = token.split_at(split);
            params.insert(key.to_uppercase(), value.to_string());
        }
    }
    Some(CommandRequest { name, params })
}
