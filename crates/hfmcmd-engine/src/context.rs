//! Context objects and the factory chain that builds them
//!
//! ```text
//! ConnectionSettings -> Connection -> Session -> RulesLoad
//!                                            \-> FileTransfer
//! ```
//!
//! Session and Connection hold remote resources and close them on release.
//! Release goes through the same invoker as construction.

use crate::remote::{ApplicationSession, RulesLoadSurface, ServerBackend, ServerConnection};
use hfmcmd_core::factory::{
    ContextKey, ContextObject, FactoryDefinition, FactoryGraph, FactoryGraphBuilder,
};
use hfmcmd_core::invoker::ResilientInvoker;
use hfmcmd_core::transfer::RemoteFileTransfer;
use hfmcmd_core::{HfmError, Result};
use hfmcmd_core_types::Sensitive;
use std::fmt;
use std::sync::Arc;

/// Where and as whom to connect
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    pub cluster: String,
    pub application: String,
    pub user: String,
    pub password: Sensitive<String>,
}

impl ContextObject for ConnectionSettings {}

pub struct Connection {
    remote: Box<dyn ServerConnection>,
    cluster: String,
    invoker: ResilientInvoker,
}

impl Connection {
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn remote(&self) -> &dyn ServerConnection {
        self.remote.as_ref()
    }
}

impl ContextObject for Connection {
    fn release(&self) -> Result<()> {
        self.invoker
            .invoke(&format!("Closing connection to {}", self.cluster), || {
                self.remote.close()
            })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

/// An open application
pub struct Session {
    remote: Box<dyn ApplicationSession>,
    cluster: String,
    invoker: ResilientInvoker,
}

impl Session {
    pub fn application(&self) -> &str {
        self.remote.application()
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn remote(&self) -> &dyn ApplicationSession {
        self.remote.as_ref()
    }
}

impl ContextObject for Session {
    fn release(&self) -> Result<()> {
        self.invoker
            .invoke(&format!("Closing application {}", self.application()), || {
                self.remote.close()
            })
    }
}

pub struct RulesLoad {
    surface: Box<dyn RulesLoadSurface>,
}

impl RulesLoad {
    pub fn surface(&self) -> &dyn RulesLoadSurface {
        self.surface.as_ref()
    }
}

impl ContextObject for RulesLoad {}

pub struct FileTransfer {
    surface: Box<dyn RemoteFileTransfer>,
}

impl FileTransfer {
    pub fn surface(&self) -> &dyn RemoteFileTransfer {
        self.surface.as_ref()
    }
}

impl ContextObject for FileTransfer {}

/// Factory graph for the context chain above, backed by `backend`
///
/// # Errors
///
/// Fails only if the chain itself is malformed.
pub fn factory_graph(
    backend: Arc<dyn ServerBackend>,
    settings: ConnectionSettings,
) -> Result<FactoryGraph> {
    let mut builder = FactoryGraphBuilder::new();

    builder.register(FactoryDefinition::new::<ConnectionSettings, _>(
        vec![],
        move |_, _| Ok(settings.clone()),
    ))?;

    builder.register(FactoryDefinition::new::<Connection, _>(
        vec![ContextKey::of::<ConnectionSettings>()],
        move |deps, invoker| {
            let settings = deps.get::<ConnectionSettings>()?;
            let cluster = if settings.cluster.is_empty() {
                "localhost".to_string()
            } else {
                settings.cluster.clone()
            };
            let remote = invoker.invoke(&format!("Connecting to cluster {}", cluster), || {
                backend.connect(&settings)
            })?;
            tracing::info!(cluster = cluster.as_str(), user = settings.user.as_str(), "Connected");
            Ok(Connection {
                remote,
                cluster,
                invoker: invoker.clone(),
            })
        },
    ))?;

    builder.register(FactoryDefinition::new::<Session, _>(
        vec![
            ContextKey::of::<ConnectionSettings>(),
            ContextKey::of::<Connection>(),
        ],
        |deps, invoker| {
            let settings = deps.get::<ConnectionSettings>()?;
            if settings.application.is_empty() {
                return Err(HfmError::Config {
                    message: "no application configured; set connection.application".to_string(),
                });
            }
            let connection = deps.get::<Connection>()?;
            let remote = invoker.invoke(
                &format!("Opening application {}", settings.application),
                || connection.remote().open_application(&settings.application),
            )?;
            tracing::info!(
                cluster = connection.cluster(),
                application = settings.application.as_str(),
                "Application opened"
            );
            Ok(Session {
                remote,
                cluster: connection.cluster().to_string(),
                invoker: invoker.clone(),
            })
        },
    ))?;

    builder.register(FactoryDefinition::new::<RulesLoad, _>(
        vec![ContextKey::of::<Session>()],
        |deps, invoker| {
            let session = deps.get::<Session>()?;
            let surface =
                invoker.invoke("Creating rules loader", || session.remote().rules_loader())?;
            Ok(RulesLoad { surface })
        },
    ))?;

    builder.register(FactoryDefinition::new::<FileTransfer, _>(
        vec![ContextKey::of::<Session>()],
        |deps, invoker| {
            let session = deps.get::<Session>()?;
            let surface =
                invoker.invoke("Creating file transfer", || session.remote().file_transfer())?;
            Ok(FileTransfer { surface })
        },
    ))?;

    builder.build()
}
