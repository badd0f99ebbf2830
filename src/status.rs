use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// SMTP-style reply codes the expansion engine hands back to the
/// front-end. `AccessDenied` covers every permanent expansion failure
/// (no rule, rejected, unknown user, alias loops past the depth cap);
/// `ActionUnavailable` covers transient backend failures worth retrying.
#[repr(C, u32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug, Serialize, Deserialize)]
pub enum Status {
    Ok = 250,
    Unavailable = 421,
    ActionUnavailable = 451,
    AccessDenied = 530,
    Error = 550,
    Unknown(u32),
}

impl Status {
    /// Checks if the status is a permanent rejection
    #[must_use]
    pub fn is_permanent(self) -> bool {
        u32::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    #[must_use]
    pub fn is_temporary(self) -> bool {
        u32::from(self) >= 400 && u32::from(self) < 500
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            250 => Self::Ok,
            421 => Self::Unavailable,
            451 => Self::ActionUnavailable,
            530 => Self::AccessDenied,
            550 => Self::Error,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::Ok => 250,
            Status::Unavailable => 421,
            Status::ActionUnavailable => 451,
            Status::AccessDenied => 530,
            Status::Error => 550,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn status() {
        assert!(Status::AccessDenied.is_permanent());
        assert!(!Status::AccessDenied.is_temporary());

        assert!(Status::ActionUnavailable.is_temporary());
        assert!(!Status::ActionUnavailable.is_permanent());

        assert_eq!(Status::from(530), Status::AccessDenied);
        assert_eq!(u32::from(Status::ActionUnavailable), 451);
        assert_eq!(Status::from(352), Status::Unknown(352));
    }
}
