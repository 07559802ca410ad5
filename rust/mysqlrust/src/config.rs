//! Authentication settings, read from the environment or embedded in a
//! larger configuration file.
use crate::handshake::SwitchPolicy;
use mysql_auth::{BuiltinMechanism, CharacterEncoding, ConnectionContext, MechanismRegistry};
use std::{borrow::Cow, collections::HashMap, str::FromStr, time::Duration};
use thiserror::Error;

pub const ENV_PLUGINS: &str = "MYSQL_AUTH_PLUGINS";
pub const ENV_SWITCH_POLICY: &str = "MYSQL_AUTH_SWITCH_POLICY";
pub const ENV_ENCODING: &str = "MYSQL_AUTH_ENCODING";
pub const ENV_TIMEOUT_MS: &str = "MYSQL_AUTH_TIMEOUT_MS";

pub trait EnvVar {
    fn read(&self, name: &'static str) -> Option<Cow<str>>;
}

impl<K, V> EnvVar for HashMap<K, V>
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<str>,
    V: std::borrow::Borrow<str>,
{
    fn read(&self, name: &'static str) -> Option<Cow<str>> {
        self.get(name).map(|value| value.borrow().into())
    }
}

impl EnvVar for std::env::Vars {
    fn read(&self, name: &'static str) -> Option<Cow<str>> {
        std::env::var(name).ok().map(Cow::Owned)
    }
}

impl EnvVar for &[(&str, &str)] {
    fn read(&self, name: &'static str) -> Option<Cow<str>> {
        self.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| Cow::Borrowed(*value))
    }
}

impl EnvVar for () {
    fn read(&self, _: &'static str) -> Option<Cow<str>> {
        None
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for \"{0}\": \"{1}\"")]
    InvalidValue(&'static str, String),

    #[error("Invalid plugin alias \"{0}\", expected name=builtin")]
    InvalidAlias(String),

    #[error("Unknown built-in mechanism \"{builtin}\" for alias \"{name}\"")]
    UnknownBuiltin { name: String, builtin: String },
}

/// Registers a built-in mechanism under another method name.
#[derive(Clone, Debug, PartialEq, Eq, serde_derive::Deserialize)]
pub struct PluginAlias {
    pub name: String,
    pub builtin: String,
}

impl FromStr for PluginAlias {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, builtin)) if !name.trim().is_empty() && !builtin.trim().is_empty() => {
                Ok(Self {
                    name: name.trim().to_owned(),
                    builtin: builtin.trim().to_owned(),
                })
            }
            _ => Err(ConfigError::InvalidAlias(s.to_owned())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde_derive::Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub plugins: Vec<PluginAlias>,
    pub switch_policy: SwitchPolicy,
    /// Encoding used for text in the handshake and for password hashing.
    pub encoding: CharacterEncoding,
    pub read_timeout_ms: Option<u64>,
}

impl AuthConfig {
    /// Read the configuration from `env`. Unset variables keep their
    /// defaults.
    pub fn from_env(env: impl EnvVar) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(plugins) = env.read(ENV_PLUGINS) {
            config.plugins = plugins
                .split(',')
                .filter(|alias| !alias.trim().is_empty())
                .map(PluginAlias::from_str)
                .collect::<Result<_, _>>()?;
        }
        if let Some(policy) = env.read(ENV_SWITCH_POLICY) {
            config.switch_policy = parse(ENV_SWITCH_POLICY, &policy)?;
        }
        if let Some(encoding) = env.read(ENV_ENCODING) {
            config.encoding = parse(ENV_ENCODING, &encoding)?;
        }
        if let Some(timeout) = env.read(ENV_TIMEOUT_MS) {
            config.read_timeout_ms = Some(parse(ENV_TIMEOUT_MS, &timeout)?);
        }
        Ok(config)
    }

    /// The built-in mechanisms plus every configured alias.
    pub fn build_registry(&self) -> Result<MechanismRegistry, ConfigError> {
        let mut registry = MechanismRegistry::with_builtins();
        for alias in &self.plugins {
            let builtin = BuiltinMechanism::from_str(&alias.builtin).map_err(|_| {
                ConfigError::UnknownBuiltin {
                    name: alias.name.clone(),
                    builtin: alias.builtin.clone(),
                }
            })?;
            registry.register_builtin(alias.name.as_str(), builtin);
        }
        Ok(registry)
    }

    /// Use the configured encoding for `context`.
    pub fn apply(&self, context: ConnectionContext) -> ConnectionContext {
        context.with_encoding(self.encoding)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name, value.to_owned()))
}
