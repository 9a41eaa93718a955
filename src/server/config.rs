//! Effective per-route configuration and its inheritance.
//!
//! The server holds one root [`ServerConfig`]. Every group and route derives a
//! child snapshot from its parent once, at registration, by applying
//! [`ConfigOverride`]s in order. Snapshots are never mutated afterwards.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    config_error,
    core::FrameworkResult,
    template::{TemplateDefinition, TemplateEngine, TemplateOverride},
};

/// Shortest request timeout a server accepts
pub const MIN_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7);

/// What happens to a handler task once its request timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancellationPolicy {
    /// Let the task run to completion; its late writes are discarded
    #[default]
    Abandon,
    /// Abort the task at its next await point
    Abort,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    uses_database: bool,
    uses_session: bool,
    timeout: Duration,
    template: Option<Arc<TemplateEngine>>,
    cancellation: CancellationPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uses_database: false,
            uses_session: false,
            timeout: DEFAULT_TIMEOUT,
            template: None,
            cancellation: CancellationPolicy::default(),
        }
    }
}

/// Reject timeouts below [`MIN_TIMEOUT`]
pub fn validate_timeout(timeout: Duration) -> FrameworkResult<()> {
    if timeout < MIN_TIMEOUT {
        return Err(config_error!(
            "timeout {:?} is below the minimum of {:?}",
            timeout,
            MIN_TIMEOUT
        ));
    }
    Ok(())
}

impl ServerConfig {
    pub fn new(timeout: Duration) -> FrameworkResult<Self> {
        validate_timeout(timeout)?;
        Ok(Self {
            timeout,
            ..Default::default()
        })
    }

    pub fn uses_database(&self) -> bool {
        self.uses_database
    }

    pub fn uses_session(&self) -> bool {
        self.uses_session
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn template(&self) -> Option<&Arc<TemplateEngine>> {
        self.template.as_ref()
    }

    pub fn cancellation(&self) -> CancellationPolicy {
        self.cancellation
    }

    pub(crate) fn set_template(&mut self, engine: TemplateEngine) {
        self.template = Some(Arc::new(engine));
    }

    /// Child snapshot with `overrides` applied in order; `self` is untouched.
    ///
    /// Timeouts are not validated here.
    pub fn derive(&self, overrides: &[ConfigOverride]) -> ServerConfig {
        let mut derived = self.clone();
        for patch in overrides {
            match patch {
                ConfigOverride::Database(enabled) => derived.uses_database = *enabled,
                ConfigOverride::Session(enabled) => derived.uses_session = *enabled,
                ConfigOverride::Timeout(timeout) => derived.timeout = *timeout,
                ConfigOverride::Template(template) => {
                    let engine = match &derived.template {
                        Some(parent) => parent.derive(template),
                        None => TemplateEngine::new(TemplateDefinition::default().merge(template)),
                    };
                    derived.template = Some(Arc::new(engine));
                }
                ConfigOverride::Cancellation(policy) => derived.cancellation = *policy,
            }
        }
        derived
    }
}

/// One change applied when deriving a child [`ServerConfig`]
#[derive(Debug, Clone)]
pub enum ConfigOverride {
    Database(bool),
    Session(bool),
    Timeout(Duration),
    Template(TemplateOverride),
    Cancellation(CancellationPolicy),
}

pub fn with_database(enabled: bool) -> ConfigOverride {
    ConfigOverride::Database(enabled)
}

pub fn with_session(enabled: bool) -> ConfigOverride {
    ConfigOverride::Session(enabled)
}

pub fn with_timeout(timeout: Duration) -> ConfigOverride {
    ConfigOverride::Timeout(timeout)
}

pub fn with_template(template: TemplateOverride) -> ConfigOverride {
    ConfigOverride::Template(template)
}

pub fn with_cancellation(policy: CancellationPolicy) -> ConfigOverride {
    ConfigOverride::Cancellation(policy)
}
