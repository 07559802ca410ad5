use crate::{native::NativePassword, AuthError, AuthMechanism, Challenge};
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tracing::trace;

/// The method name of the pre-4.1 password protocol, which is always refused.
pub const OLD_PASSWORD: &str = "mysql_old_password";

/// Constructs a fresh, uninitialized mechanism.
pub type MechanismFactory = Arc<dyn Fn() -> Box<dyn AuthMechanism> + Send + Sync>;

/// The mechanisms shipped with this crate.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, strum::EnumString, strum::IntoStaticStr, strum::EnumIter,
)]
pub enum BuiltinMechanism {
    #[strum(serialize = "mysql_native_password")]
    NativePassword,
}

impl BuiltinMechanism {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn instantiate(self) -> Box<dyn AuthMechanism> {
        match self {
            Self::NativePassword => Box::new(NativePassword::new()),
        }
    }
}

#[derive(Clone)]
enum RegistryEntry {
    Builtin(BuiltinMechanism),
    Extension(MechanismFactory),
}

impl Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin(builtin) => write!(f, "Builtin({builtin:?})"),
            Self::Extension(_) => f.write_str("Extension(..)"),
        }
    }
}

/// Maps method names announced by the server to mechanism constructors.
///
/// The registry starts out with the built-in mechanisms. Additional
/// mechanisms are added with [`Self::register`] without touching the
/// handshake.
#[derive(Clone, Debug)]
pub struct MechanismRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl Default for MechanismRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl MechanismRegistry {
    /// A registry with no mechanisms at all.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::default(),
        }
    }

    /// A registry with every [`BuiltinMechanism`] under its wire name.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for builtin in <BuiltinMechanism as strum::IntoEnumIterator>::iter() {
            registry.register_builtin(builtin.name(), builtin);
        }
        registry
    }

    /// Register an extension mechanism under `name`, replacing any previous
    /// entry with that name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn AuthMechanism> + Send + Sync + 'static,
    {
        self.entries
            .insert(name.into(), RegistryEntry::Extension(Arc::new(factory)));
    }

    /// Make a built-in mechanism available under an additional name.
    pub fn register_builtin(&mut self, name: impl Into<String>, builtin: BuiltinMechanism) {
        self.entries
            .insert(name.into(), RegistryEntry::Builtin(builtin));
    }

    /// Remove `name`, returning whether it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Construct the mechanism registered as `name` and bind it to
    /// `challenge`.
    pub fn create(
        &self,
        name: &str,
        challenge: Challenge,
    ) -> Result<Box<dyn AuthMechanism>, AuthError> {
        if name == OLD_PASSWORD {
            return Err(AuthError::UnsupportedLegacyMethod);
        }
        let mut mechanism = match self.entries.get(name) {
            Some(RegistryEntry::Builtin(builtin)) => builtin.instantiate(),
            Some(RegistryEntry::Extension(factory)) => factory(),
            None => return Err(AuthError::UnknownMechanism(name.to_owned())),
        };
        trace!("Created mechanism {} for {name:?}", mechanism.name());
        mechanism.initialize(challenge)?;
        Ok(mechanism)
    }
}
