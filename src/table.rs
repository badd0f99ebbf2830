use std::sync::Arc;

use ahash::AHashMap;
use thiserror::Error;

use crate::{
    address::Mailaddr,
    envelope::UserInfo,
    expand::{NodeKind, ParseNodeError},
};

/// Well-known name of the table answering system-user lookups.
pub const GETPWNAM: &str = "<getpwnam>";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table backend failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An alias table: maps a key (user name, address, or `@domain`
/// catch-all) to the expansion targets configured for it. Keys are
/// matched case-insensitively. An empty result means the key has no
/// aliases; `Err` means the backend could not answer and the lookup
/// should be retried later.
pub trait AliasLookup: Send + Sync {
    fn lookup(&self, key: &str) -> Result<Vec<NodeKind>, TableError>;
}

/// A user-info table in the shape of `getpwnam(3)`: resolves a system
/// user name to its account record, case-insensitively.
pub trait UserLookup: Send + Sync {
    fn lookup(&self, user: &str) -> Result<Option<UserInfo>, TableError>;
}

/// Named-table registry. Backends register under a string name at
/// configuration time; the engine resolves the [`GETPWNAM`] user table
/// through it, and rule loading resolves alias-table handles the same
/// way.
#[derive(Default)]
pub struct Tables {
    aliases: AHashMap<String, Arc<dyn AliasLookup>>,
    users: AHashMap<String, Arc<dyn UserLookup>>,
}

impl Tables {
    pub fn register_aliases(&mut self, name: impl Into<String>, table: Arc<dyn AliasLookup>) {
        self.aliases.insert(name.into(), table);
    }

    pub fn register_users(&mut self, name: impl Into<String>, table: Arc<dyn UserLookup>) {
        self.users.insert(name.into(), table);
    }

    #[must_use]
    pub fn aliases(&self, name: &str) -> Option<Arc<dyn AliasLookup>> {
        self.aliases.get(name).cloned()
    }

    #[must_use]
    pub fn users(&self, name: &str) -> Option<Arc<dyn UserLookup>> {
        self.users.get(name).cloned()
    }
}

/// Resolves a virtual-domain address through an alias table, trying the
/// most specific key first: `user@domain` (tag stripped, lowercased),
/// then the bare user, then the `@domain` catch-all.
pub fn virtual_lookup(
    table: &dyn AliasLookup,
    addr: &Mailaddr,
) -> Result<Vec<NodeKind>, TableError> {
    let user = addr.to_username();
    let domain = addr.domain.to_ascii_lowercase();

    let targets = table.lookup(&format!("{user}@{domain}"))?;
    if !targets.is_empty() {
        return Ok(targets);
    }
    let targets = table.lookup(&user)?;
    if !targets.is_empty() {
        return Ok(targets);
    }
    table.lookup(&format!("@{domain}"))
}

/// In-memory alias table over a hash map; doubles as the test backend.
#[derive(Debug, Default)]
pub struct MemoryAliasTable {
    entries: AHashMap<String, Vec<NodeKind>>,
}

impl MemoryAliasTable {
    /// Adds an alias, parsing `targets` as a comma-separated list of
    /// expansion targets.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        targets: &str,
    ) -> Result<(), ParseNodeError> {
        self.entries
            .insert(key.into().to_ascii_lowercase(), crate::expand::parse_targets(targets)?);
        Ok(())
    }
}

impl AliasLookup for MemoryAliasTable {
    fn lookup(&self, key: &str) -> Result<Vec<NodeKind>, TableError> {
        Ok(self
            .entries
            .get(&key.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory user-info table, keyed by lowercased user name.
#[derive(Debug, Default)]
pub struct MemoryUserTable {
    users: AHashMap<String, UserInfo>,
}

impl MemoryUserTable {
    pub fn insert(&mut self, info: UserInfo) {
        self.users.insert(info.username.to_ascii_lowercase(), info);
    }
}

impl UserLookup for MemoryUserTable {
    fn lookup(&self, user: &str) -> Result<Option<UserInfo>, TableError> {
        Ok(self.users.get(&user.to_ascii_lowercase()).cloned())
    }
}
