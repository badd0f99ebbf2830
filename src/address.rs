use core::fmt::{self, Display, Formatter};
use std::{
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted local part, in bytes.
pub const MAX_LOCALPART: usize = 64;
/// Longest accepted domain part, in bytes.
pub const MAX_DOMAINPART: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address {0:?} is missing a user or domain part")]
    Incomplete(String),
    #[error("address part {0:?} exceeds the maximum length")]
    TooLong(String),
}

/// An envelope-level mail address: a bare (local part, domain) pair.
///
/// Display-name syntax, source routes and comments are the front-end's
/// problem; by the time an address reaches expansion it is just the two
/// halves. Comparison is ASCII case-insensitive on both halves, which is
/// what keeps `Alice@Example.COM` and `alice@example.com` from being
/// expanded twice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mailaddr {
    pub user: String,
    pub domain: String,
}

impl Mailaddr {
    pub fn new(user: impl Into<String>, domain: impl Into<String>) -> Result<Self, AddressError> {
        let (user, domain) = (user.into(), domain.into());
        if user.is_empty() || domain.is_empty() {
            return Err(AddressError::Incomplete(format!("{user}@{domain}")));
        }
        if user.len() > MAX_LOCALPART {
            return Err(AddressError::TooLong(user));
        }
        if domain.len() > MAX_DOMAINPART {
            return Err(AddressError::TooLong(domain));
        }
        Ok(Self { user, domain })
    }

    /// The system user this address maps to: the local part lowercased
    /// and truncated at the first `+`, so `Gilles+Hackers@example.org`
    /// maps to `gilles`.
    #[must_use]
    pub fn to_username(&self) -> String {
        let user = self.user.to_ascii_lowercase();
        match user.find('+') {
            Some(cut) => user[..cut].to_owned(),
            None => user,
        }
    }

    /// The routing tag: whatever follows the first `+` in the local
    /// part, with leading dots skipped. `None` when absent or empty.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        let tag = self.user[self.user.find('+')? + 1..].trim_start_matches('.');
        (!tag.is_empty()).then_some(tag)
    }
}

impl PartialEq for Mailaddr {
    fn eq(&self, other: &Self) -> bool {
        self.user.eq_ignore_ascii_case(&other.user)
            && self.domain.eq_ignore_ascii_case(&other.domain)
    }
}

impl Eq for Mailaddr {}

impl Hash for Mailaddr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user.to_ascii_lowercase().hash(state);
        self.domain.to_ascii_lowercase().hash(state);
    }
}

impl Display for Mailaddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.domain)
    }
}

impl FromStr for Mailaddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, domain) = s
            .rsplit_once('@')
            .ok_or_else(|| AddressError::Incomplete(s.to_owned()))?;
        Self::new(user, domain)
    }
}
