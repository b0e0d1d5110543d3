//! Command catalog
//!
//! Each command is registered explicitly through [`CommandDefinition::builder`]:
//! name, description, ordered parameter specs, the context type it runs
//! against, and its body. [`CatalogBuilder::build`] checks every required
//! context against the validated factory graph and freezes the catalog;
//! after that it is read-only and safe to share between runs.

use crate::errors::{HfmError, Result};
use crate::factory::{ContextCache, ContextKey, ContextObject, FactoryGraph};
use crate::invoker::ResilientInvoker;
use crate::params::{BoundParameters, ParameterSpec};
use crate::status::CommandResult;
use crate::transfer::ProgressSink;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Executable part of a command
pub type CommandBody = Arc<dyn Fn(&CommandContext<'_>) -> Result<CommandResult> + Send + Sync>;

/// Everything a command body gets to work with
pub struct CommandContext<'a> {
    pub(crate) command: &'a str,
    pub(crate) params: &'a BoundParameters,
    pub(crate) cache: &'a ContextCache,
    pub(crate) invoker: &'a ResilientInvoker,
    pub(crate) progress: &'a dyn ProgressSink,
}

impl<'a> CommandContext<'a> {
    /// Assemble a context by hand (the orchestrator does this for every request)
    pub fn new(
        command: &'a str,
        params: &'a BoundParameters,
        cache: &'a ContextCache,
        invoker: &'a ResilientInvoker,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            command,
            params,
            cache,
            invoker,
            progress,
        }
    }

    pub fn command(&self) -> &str {
        self.command
    }

    pub fn params(&self) -> &BoundParameters {
        self.params
    }

    /// A context object constructed for this run
    pub fn context<T: ContextObject>(&self) -> Result<Arc<T>> {
        self.cache.get::<T>()
    }

    pub fn invoker(&self) -> &ResilientInvoker {
        self.invoker
    }

    pub fn progress(&self) -> &dyn ProgressSink {
        self.progress
    }
}

/// Immutable descriptor of one command
pub struct CommandDefinition {
    name: String,
    description: String,
    params: Vec<ParameterSpec>,
    requires: Option<ContextKey>,
    body: CommandBody,
}

impl CommandDefinition {
    pub fn builder(name: impl Into<String>) -> CommandBuilder {
        CommandBuilder {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
            requires: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> &[ParameterSpec] {
        &self.params
    }

    /// Context type the body runs against, if any
    pub fn requires(&self) -> Option<ContextKey> {
        self.requires
    }

    pub fn body(&self) -> &CommandBody {
        &self.body
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CommandDefinition`]; supplying the body finishes it
pub struct CommandBuilder {
    name: String,
    description: String,
    params: Vec<ParameterSpec>,
    requires: Option<ContextKey>,
}

impl CommandBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a parameter; declaration order is positional order
    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn requires<T: ContextObject>(mut self) -> Self {
        self.requires = Some(ContextKey::of::<T>());
        self
    }

    pub fn body<F>(self, body: F) -> CommandDefinition
    where
        F: Fn(&CommandContext<'_>) -> Result<CommandResult> + Send + Sync + 'static,
    {
        CommandDefinition {
            name: self.name,
            description: self.description,
            params: self.params,
            requires: self.requires,
            body: Arc::new(body),
        }
    }
}

// Command names are matched case-insensitively.
fn catalog_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Collects command definitions at startup
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    commands: BTreeMap<String, CommandDefinition>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command
    ///
    /// Fails without touching the builder if the name is taken, a parameter
    /// name repeats, or a default does not fit its parameter's type.
    pub fn register(&mut self, definition: CommandDefinition) -> Result<&mut Self> {
        let key = catalog_key(&definition.name);
        if self.commands.contains_key(&key) {
            return Err(HfmError::DuplicateCommand {
                name: definition.name,
            });
        }

        for (i, spec) in definition.params.iter().enumerate() {
            if definition.params[..i]
                .iter()
                .any(|p| p.name().eq_ignore_ascii_case(spec.name()))
            {
                return Err(HfmError::Config {
                    message: format!(
                        "command {} declares parameter '{}' twice",
                        definition.name,
                        spec.name()
                    ),
                });
            }
            if let Some(default) = spec.default() {
                if !default.conforms_to(spec.ty()) {
                    return Err(HfmError::Config {
                        message: format!(
                            "default '{}' of {}.{} is not a {}",
                            default,
                            definition.name,
                            spec.name(),
                            spec.ty()
                        ),
                    });
                }
            }
        }

        self.commands.insert(key, definition);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Finalize against the factory graph
    ///
    /// Every required context type must have a factory.
    pub fn build(self, factories: &FactoryGraph) -> Result<CommandCatalog> {
        for definition in self.commands.values() {
            if let Some(key) = definition.requires {
                if !factories.contains(key) {
                    return Err(HfmError::UnresolvedDependency {
                        context: key.name(),
                        required_by: definition.name.clone(),
                    });
                }
            }
        }
        Ok(CommandCatalog {
            commands: self.commands,
        })
    }
}

/// Frozen registry of commands
#[derive(Debug)]
pub struct CommandCatalog {
    commands: BTreeMap<String, CommandDefinition>,
}

impl CommandCatalog {
    pub fn lookup(&self, name: &str) -> Result<&CommandDefinition> {
        self.commands
            .get(&catalog_key(name))
            .ok_or_else(|| HfmError::CommandNotFound {
                name: name.to_string(),
            })
    }

    /// Commands in name order
    pub fn iter(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
