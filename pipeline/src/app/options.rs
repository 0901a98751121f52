//! Application configuration options

use std::collections::BTreeSet;
use std::time::Duration;

use shipyard_domain::StageName;

use crate::bus::poller;
use crate::errors::ShipyardError;
use crate::notify::mqtt;
use crate::queue::ReceiveOptions;
use crate::storage::settings::Settings;
use crate::workers::stage;

/// A consumer loop the process can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Clone,
    FrontendBuild,
    BackendBuild,
    Deploy,
    Reconciler,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Clone,
        Role::FrontendBuild,
        Role::BackendBuild,
        Role::Deploy,
        Role::Reconciler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Clone => "clone",
            Role::FrontendBuild => "frontend-build",
            Role::BackendBuild => "backend-build",
            Role::Deploy => "deploy",
            Role::Reconciler => "reconciler",
        }
    }

    /// Stage queue the role consumes, `None` for the reconciler
    pub fn stage(&self) -> Option<StageName> {
        match self {
            Role::Clone => Some(StageName::Clone),
            Role::FrontendBuild => Some(StageName::FrontendBuild),
            Role::BackendBuild => Some(StageName::BackendBuild),
            Role::Deploy => Some(StageName::Deploy),
            Role::Reconciler => None,
        }
    }

    /// Roles that launch or deploy tasks on the cluster
    pub fn uses_cluster(&self) -> bool {
        matches!(self, Role::FrontendBuild | Role::BackendBuild | Role::Deploy)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ShipyardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s.trim())
            .ok_or_else(|| ShipyardError::ConfigError(format!("Invalid role: {}", s)))
    }
}

/// Parse `all` or a comma-separated list of roles
pub fn parse_roles(s: &str) -> Result<BTreeSet<Role>, ShipyardError> {
    if s.trim() == "all" {
        return Ok(Role::ALL.into_iter().collect());
    }
    let roles = s
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<BTreeSet<Role>, _>>()?;
    if roles.is_empty() {
        return Err(ShipyardError::ConfigError("no role selected".to_string()));
    }
    Ok(roles)
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Consumer loops this process runs
    pub roles: BTreeSet<Role>,

    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Backends, cluster layout and build images
    pub settings: Settings,

    /// Stage worker options, shared by every stage
    pub stage_worker: stage::Options,

    /// Event poller options
    pub event_poller: poller::Options,

    /// MQTT notifier options
    pub notifier: mqtt::Options,

    /// Enable the health server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            roles: Role::ALL.into_iter().collect(),
            lifecycle: LifecycleOptions::default(),
            settings: Settings::default(),
            stage_worker: stage::Options::default(),
            event_poller: poller::Options::default(),
            notifier: mqtt::Options::default(),
            enable_server: true,
            server: ServerOptions::default(),
        }
    }
}

impl AppOptions {
    /// Runtime options for `roles` under `settings`
    pub fn from_settings(settings: Settings, roles: BTreeSet<Role>) -> Self {
        let receive = ReceiveOptions {
            max_messages: settings.queue.batch_size,
            wait_time: Duration::from_secs(settings.queue.wait_time_secs),
            visibility_timeout: Duration::from_secs(settings.queue.visibility_timeout_secs),
        };
        let event_poller = poller::Options {
            receive,
            max_receive_count: settings.queue.max_receive_count,
            purge_on_startup: settings.queue.purge_events_on_startup,
            ..Default::default()
        };
        let server = ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        };

        Self {
            roles,
            enable_server: settings.server.enabled,
            server,
            event_poller,
            settings,
            ..Default::default()
        }
    }

    pub fn runs(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Health server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
