//! Domain enumerations persisted as text columns.
//!
//! The wire string of every variant is what the database stores and what the
//! backup envelope carries, so these strings must never change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returned when a stored string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

wire_enum! {
    /// Account role
    Role, "role" {
        User => "user",
        Admin => "admin",
    }
}

wire_enum! {
    /// Account lifecycle status
    UserStatus, "user status" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

wire_enum! {
    /// Contribution workflow status
    ContributionStatus, "contribution status" {
        Draft => "draft",
        Submitted => "submitted",
        Approved => "approved",
        Rejected => "rejected",
    }
}

wire_enum! {
    /// Outcome of a complex project
    ProjectStatus, "project status" {
        Win => "win",
        Loss => "loss",
        Ongoing => "ongoing",
    }
}

impl ProjectStatus {
    /// Whether success factors apply to a project in this status.
    pub fn expects_success_factors(self) -> bool {
        matches!(self, ProjectStatus::Win | ProjectStatus::Ongoing)
    }

    /// Whether loss reasons apply to a project in this status.
    pub fn expects_loss_reasons(self) -> bool {
        matches!(self, ProjectStatus::Loss)
    }
}

/// Derive the calendar year from a `YYYY-MM` period tag.
///
/// ```rust
/// use tally_core::year_from_period;
///
/// assert_eq!(year_from_period("2024-07"), Some(2024));
/// assert_eq!(year_from_period("24-07"), None);
/// ```
pub fn year_from_period(period: &str) -> Option<i64> {
    let (year, month) = period.trim().split_once('-')?;
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let month: u8 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    year.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_strings_round_trip() {
        for status in ContributionStatus::ALL {
            assert_eq!(status.as_str().parse::<ContributionStatus>(), Ok(*status));
        }
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(
            serde_json::to_string(&ProjectStatus::Ongoing).unwrap(),
            "\"ongoing\""
        );
    }

    #[test]
    fn test_unknown_variant() {
        let err = "archived".parse::<UserStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown user status 'archived'");
    }

    #[test]
    fn test_project_conditional_fields() {
        assert!(ProjectStatus::Win.expects_success_factors());
        assert!(ProjectStatus::Ongoing.expects_success_factors());
        assert!(!ProjectStatus::Loss.expects_success_factors());
        assert!(ProjectStatus::Loss.expects_loss_reasons());
    }

    #[test]
    fn test_year_from_period() {
        assert_eq!(year_from_period("2023-01"), Some(2023));
        assert_eq!(year_from_period(" 2023-12 "), Some(2023));
        assert_eq!(year_from_period("2023-13"), None);
        assert_eq!(year_from_period("2023"), None);
        assert_eq!(year_from_period("abcd-01"), None);
        assert_eq!(year_from_period(""), None);
    }
}
