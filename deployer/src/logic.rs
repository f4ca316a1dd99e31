//! Locating and identifying the middleware logic artifact.

use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::types::LogicHash;

const WASM_MAGIC: &[u8; 4] = b"\0asm";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("build command is empty")]
    EmptyCommand,

    #[error("build command `{command}` could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build command `{command}` failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("logic artifact {} is unreadable: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logic artifact {} is not a WASM module", path.display())]
    NotWasm { path: PathBuf },
}

/// A resolved logic artifact and its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicHandle {
    pub hash: LogicHash,
    pub artifact: PathBuf,
    pub size: usize,
}

/// Produces the logic the orchestrator deploys or upgrades to.
pub trait LogicBuilder {
    fn resolve_logic(&self) -> Result<LogicHandle, BuildError>;
}

/// Reads a compiled WASM artifact, optionally running a build first.
#[derive(Debug, Clone)]
pub struct WasmLogicBuilder {
    artifact: PathBuf,
    command: Option<Vec<String>>,
}

impl WasmLogicBuilder {
    pub fn new(artifact: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
            command: None,
        }
    }

    /// Run `command` before reading the artifact.
    #[must_use]
    pub fn with_build_command(mut self, command: Vec<String>) -> Self {
        self.command = Some(command);
        self
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        let builder = Self::new(&config.logic_wasm);
        match &config.command {
            Some(command) => builder.with_build_command(command.clone()),
            None => builder,
        }
    }

    fn run_build(command: &[String]) -> Result<(), BuildError> {
        let (program, args) = command.split_first().ok_or(BuildError::EmptyCommand)?;
        let command_line = command.join(" ");
        info!(command = %command_line, "building middleware logic");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| BuildError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::Failed {
                command: command_line,
                status: output.status.to_string(),
                stderr: stderr.trim().lines().last().unwrap_or_default().to_owned(),
            });
        }
        Ok(())
    }
}

impl LogicBuilder for WasmLogicBuilder {
    fn resolve_logic(&self) -> Result<LogicHandle, BuildError> {
        if let Some(command) = &self.command {
            Self::run_build(command)?;
        }

        let bytes = std::fs::read(&self.artifact).map_err(|source| BuildError::Artifact {
            path: self.artifact.clone(),
            source,
        })?;
        if !bytes.starts_with(WASM_MAGIC) {
            return Err(BuildError::NotWasm {
                path: self.artifact.clone(),
            });
        }

        let hash = LogicHash::of(&bytes);
        debug!(artifact = %self.artifact.display(), %hash, size = bytes.len(), "resolved logic");
        Ok(LogicHandle {
            hash,
            artifact: self.artifact.clone(),
            size: bytes.len(),
        })
    }
}
