use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use http::StatusCode;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use validator::{Validate, ValidationError};

use crate::{
    core::{ErrorContext, FrameworkResult},
    database::Placeholder,
    server::{CancellationPolicy, ServerBuilder, StatusBusyResponder, DEFAULT_TIMEOUT, MIN_TIMEOUT},
    session::{CookieOptions, MemoryStore, SameSite, SessionManager, DEFAULT_COOKIE_NAME, DEFAULT_LIFETIME},
    template::{Delimiters, TemplateDefinition},
};

#[serde_as]
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[serde(default = "Settings::default_listen")]
    #[validate(length(min = 1))]
    pub listen: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Settings::default_timeout")]
    #[validate(custom(function = "Settings::validate_timeout"))]
    pub timeout: Duration,

    #[serde(default)]
    pub cancellation: CancellationPolicy,

    #[serde(default)]
    pub database: Option<DatabaseSettings>,

    #[serde(default)]
    #[validate(nested)]
    pub busy: BusySettings,

    #[serde(default)]
    #[validate(nested)]
    pub template: Option<TemplateSettings>,

    #[serde(default)]
    #[validate(nested)]
    pub session: Option<SessionSettings>,

    #[serde(default)]
    pub log: Option<Log>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            timeout: Self::default_timeout(),
            cancellation: CancellationPolicy::default(),
            database: None,
            busy: BusySettings::default(),
            template: None,
            session: None,
            log: None,
        }
    }
}

impl Settings {
    pub fn load_from_yaml<P>(path: P) -> FrameworkResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .with_context(&format!("Unable to read conf file from {path}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> FrameworkResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Settings = serde_yaml::from_str(conf_str)?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> FrameworkResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Server builder preconfigured from these settings. The database pool
    /// still has to be supplied by the caller when `database` is set.
    pub fn server_builder(&self) -> ServerBuilder {
        let mut builder = ServerBuilder::new()
            .timeout(self.timeout)
            .cancellation(self.cancellation)
            .busy_responder(Arc::new(self.busy.responder()));

        if let Some(database) = &self.database {
            builder = builder
                .with_database(database.enabled)
                .placeholder(database.placeholder);
        }
        if let Some(template) = &self.template {
            builder = builder.template(template.definition());
        }
        if let Some(session) = &self.session {
            builder = builder
                .session_manager(session.manager())
                .with_session(session.enabled);
        }
        builder
    }

    fn default_listen() -> String {
        "127.0.0.1:8080".to_string()
    }

    fn default_timeout() -> Duration {
        DEFAULT_TIMEOUT
    }

    fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
        if *timeout < MIN_TIMEOUT {
            return Err(ValidationError::new("timeout_below_minimum"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Enable the database for every route
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub placeholder: Placeholder,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "BusySettings::validate_statuses"))]
pub struct BusySettings {
    #[serde(default = "BusySettings::default_timeout_status")]
    pub timeout_status: u16,
    #[serde(default = "BusySettings::default_unavailable_status")]
    pub unavailable_status: u16,
}

impl Default for BusySettings {
    fn default() -> Self {
        Self {
            timeout_status: Self::default_timeout_status(),
            unavailable_status: Self::default_unavailable_status(),
        }
    }
}

impl BusySettings {
    fn default_timeout_status() -> u16 {
        StatusCode::GATEWAY_TIMEOUT.as_u16()
    }

    fn default_unavailable_status() -> u16 {
        StatusCode::SERVICE_UNAVAILABLE.as_u16()
    }

    fn validate_statuses(&self) -> Result<(), ValidationError> {
        for status in [self.timeout_status, self.unavailable_status] {
            match StatusCode::from_u16(status) {
                Ok(code) if code.is_client_error() || code.is_server_error() => {}
                _ => return Err(ValidationError::new("busy_status_must_be_an_error")),
            }
        }
        Ok(())
    }

    pub fn responder(&self) -> StatusBusyResponder {
        let status = |code: u16, fallback: StatusCode| StatusCode::from_u16(code).unwrap_or(fallback);
        StatusBusyResponder::new(
            status(self.timeout_status, StatusCode::GATEWAY_TIMEOUT),
            status(self.unavailable_status, StatusCode::SERVICE_UNAVAILABLE),
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct TemplateSettings {
    #[validate(length(min = 1))]
    pub root: String,
    pub master: Option<String>,
    #[serde(default)]
    pub partials: Vec<String>,
    #[serde(default)]
    pub delimiters: Option<Delimiters>,
    #[serde(default)]
    pub disable_cache: bool,
}

impl TemplateSettings {
    pub fn definition(&self) -> TemplateDefinition {
        let mut definition = TemplateDefinition::new(PathBuf::from(&self.root))
            .partials(self.partials.iter().cloned())
            .disable_cache(self.disable_cache);
        if let Some(master) = &self.master {
            definition = definition.master(master.clone());
        }
        if let Some(delimiters) = &self.delimiters {
            definition = definition.delimiters(delimiters.clone());
        }
        definition
    }
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct SessionSettings {
    /// Enable sessions for every route
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "SessionSettings::default_cookie_name")]
    #[validate(length(min = 1))]
    pub cookie_name: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "SessionSettings::default_lifetime")]
    pub lifetime: Duration,
    #[serde(default = "SessionSettings::default_path")]
    pub path: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "SessionSettings::default_http_only")]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: SameSite,
    #[serde(default = "SessionSettings::default_persist")]
    pub persist: bool,
}

impl SessionSettings {
    fn default_cookie_name() -> String {
        DEFAULT_COOKIE_NAME.to_string()
    }

    fn default_lifetime() -> Duration {
        DEFAULT_LIFETIME
    }

    fn default_path() -> String {
        "/".to_string()
    }

    fn default_http_only() -> bool {
        true
    }

    fn default_persist() -> bool {
        true
    }

    pub fn cookie(&self) -> CookieOptions {
        CookieOptions {
            name: self.cookie_name.clone(),
            path: self.path.clone(),
            domain: self.domain.clone(),
            http_only: self.http_only,
            secure: self.secure,
            same_site: self.same_site,
            persist: self.persist,
        }
    }

    /// Session manager backed by the in-memory store
    pub fn manager(&self) -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()))
            .lifetime(self.lifetime)
            .cookie(self.cookie())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FrameworkError;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn not_a_test_i_cannot_write_yaml_by_hand() {
        init_log();
        let conf = Settings::default();
        // cargo test -- --nocapture not_a_test_i_cannot_write_yaml_by_hand
        println!("{}", conf.to_yaml().unwrap());
    }

    #[test]
    fn test_load_file() {
        init_log();
        let conf_str = r#"
---
listen: 0.0.0.0:9000
timeout: 10
cancellation: abort

database:
  enabled: true
  placeholder: question

busy:
  timeout_status: 503

template:
  root: views
  master: layouts/master
  partials: [partials/nav]
  delimiters:
    left: "[["
    right: "]]"

session:
  cookie_name: sid
  lifetime: 3600
  secure: true
  same_site: strict

log:
  path: /tmp/timebox.log
        "#;
        let conf = Settings::from_yaml(conf_str).unwrap();
        assert_eq!(conf.listen, "0.0.0.0:9000");
        assert_eq!(conf.timeout, Duration::from_secs(10));
        assert_eq!(conf.cancellation, CancellationPolicy::Abort);

        let database = conf.database.as_ref().unwrap();
        assert!(database.enabled);
        assert_eq!(database.placeholder, Placeholder::Question);

        assert_eq!(conf.busy.timeout_status, 503);
        assert_eq!(conf.busy.unavailable_status, 503);

        let definition = conf.template.as_ref().unwrap().definition();
        assert_eq!(definition.master.as_deref(), Some("layouts/master"));
        assert_eq!(definition.delimiters.left, "[[");

        let cookie = conf.session.as_ref().unwrap().cookie();
        assert_eq!(cookie.name, "sid");
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site, SameSite::Strict);

        assert_eq!(conf.log.unwrap().path, "/tmp/timebox.log");
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        init_log();
        let err = Settings::load_from_yaml("/nonexistent/timebox.yaml").unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }

    #[test]
    fn test_load_from_file() {
        init_log();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timebox.yaml");
        std::fs::write(&path, "listen: 0.0.0.0:3000\n").unwrap();
        let conf = Settings::load_from_yaml(path.display().to_string()).unwrap();
        assert_eq!(conf.listen, "0.0.0.0:3000");
    }

    #[test]
    fn test_defaults() {
        init_log();
        let conf = Settings::from_yaml("---\n{}").unwrap();
        assert_eq!(conf.listen, "127.0.0.1:8080");
        assert_eq!(conf.timeout, DEFAULT_TIMEOUT);
        assert_eq!(conf.busy.timeout_status, 504);
        assert!(conf.database.is_none());
        assert!(conf.session.is_none());
    }

    #[test]
    fn test_valid_timeout_minimum() {
        init_log();
        let err = Settings::from_yaml("timeout: 1").unwrap_err();
        assert!(matches!(err, FrameworkError::Validation(_)));
        assert!(Settings::from_yaml("timeout: 2").is_ok());
    }

    #[test]
    fn test_valid_busy_status() {
        init_log();
        let err = Settings::from_yaml("busy:\n  timeout_status: 200").unwrap_err();
        assert!(matches!(err, FrameworkError::Validation(_)));
    }

    #[test]
    fn test_valid_template_root() {
        init_log();
        let err = Settings::from_yaml("template:\n  root: ''").unwrap_err();
        assert!(matches!(err, FrameworkError::Validation(_)));
    }

    #[test]
    fn test_database_without_pool_fails_build() {
        init_log();
        let conf = Settings::from_yaml("database:\n  enabled: true").unwrap();
        assert!(conf.server_builder().build().is_err());
    }

    #[test]
    fn test_server_builder_from_settings() {
        init_log();
        let conf = Settings::from_yaml("timeout: 3\nsession:\n  enabled: true").unwrap();
        let server = conf.server_builder().build().unwrap();
        assert_eq!(server.config().timeout(), Duration::from_secs(3));
        assert!(server.config().uses_session());
    }
}
