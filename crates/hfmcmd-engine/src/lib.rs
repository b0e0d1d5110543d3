//! hfmcmd Engine - server surface, context chain and command set
//!
//! Wires the server-independent kernel in `hfmcmd-core` to a concrete
//! [`remote::ServerBackend`]: the context factory chain, the command
//! manifest, client configuration and the loopback backend.

pub mod commands;
pub mod config;
pub mod context;
pub mod loopback;
pub mod remote;

use crate::config::ClientConfig;
use crate::remote::ServerBackend;
use hfmcmd_core::{
    CatalogBuilder, CommandCatalog, FactoryGraph, Orchestrator, ResilientInvoker, Result,
};
use std::sync::Arc;

/// Validated catalog and factory graph, ready to run batches
#[derive(Debug, Clone)]
pub struct Engine {
    catalog: Arc<CommandCatalog>,
    factories: Arc<FactoryGraph>,
    invoker: ResilientInvoker,
}

impl Engine {
    /// Build the factory graph and the catalog for `backend`
    ///
    /// # Errors
    ///
    /// Any configuration error (duplicate command, unresolvable context,
    /// dependency cycle) aborts startup here, before a command runs.
    pub fn new(backend: Arc<dyn ServerBackend>, config: &ClientConfig) -> Result<Self> {
        let factories = context::factory_graph(backend, config.connection_settings())?;

        let mut catalog = CatalogBuilder::new();
        commands::register_all(&mut catalog)?;
        let catalog = catalog.build(&factories)?;

        tracing::debug!(
            commands = catalog.len(),
            contexts = factories.topological_order().len(),
            "Engine ready"
        );
        Ok(Self {
            catalog: Arc::new(catalog),
            factories: Arc::new(factories),
            invoker: config.invoker(),
        })
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    pub fn factories(&self) -> &FactoryGraph {
        &self.factories
    }

    /// Orchestrator in continue-on-failure mode with no progress sink
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.factories),
            self.invoker.clone(),
        )
    }
}
