//! Command line building.

use std::path::PathBuf;

use thiserror::Error;

use crate::params::{CommandParams, DigParams, PingParams};

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
    #[error("Failed to quote command: {0}")]
    QuoteError(#[from] shlex::QuoteError),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable =
            which::which(&program).map_err(|_| CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }

    /// Shell-style rendering for display, e.g. `$ ping -c 4 example.com`.
    ///
    /// # Errors
    /// Returns error if an argument cannot be quoted.
    pub fn display(&self) -> Result<String, CommandBuildError> {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        Ok(format!("$ {}", shlex::try_join(words)?))
    }
}

/// Builder for constructing commands.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command.
    pub base: String,
    /// Optional parameters to append.
    pub params: Option<Vec<String>>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: None,
        }
    }

    /// Builder preloaded with the arguments for validated parameters.
    #[must_use]
    pub fn for_params(params: &CommandParams) -> Self {
        match params {
            CommandParams::Ping(ping) => Self::ping(ping),
            CommandParams::Dig(dig) => Self::dig(dig),
        }
    }

    fn ping(params: &PingParams) -> Self {
        Self::new("ping").params(["-c".to_string(), params.count.to_string(), params.target.clone()])
    }

    fn dig(params: &DigParams) -> Self {
        let mut args = Vec::with_capacity(3 + params.options.len());
        if let Some(ns) = &params.nameserver {
            args.push(format!("@{ns}"));
        }
        args.push(params.domain.clone());
        args.push(params.record_type.as_str().to_string());
        args.extend(params.options.iter().map(|o| format!("+{o}")));
        Self::new("dig").params(args)
    }

    /// Add parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Override the base command.
    #[must_use]
    pub fn override_base<S: Into<String>>(mut self, base: S) -> Self {
        self.base = base.into();
        self
    }

    /// Build the command.
    ///
    /// # Errors
    /// Returns error if command is invalid.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts = shlex::split(&self.base)
            .ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        if let Some(ref params) = self.params {
            parts.extend(params.iter().cloned());
        }

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}
