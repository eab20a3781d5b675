//! Referral handling policy.
//!
//! Each server decides per encountered referral whether it is chased.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::{LdapError, LdapResult};

/// Setting value that follows every referral.
pub const ALLOW: &str = "allow";
/// Setting value that ignores every referral.
pub const DENY: &str = "deny";
/// Setting value that ignores referrals matching the filter list.
pub const FILTERED: &str = "filtered";

/// Decides whether a referral target is followed.
#[derive(Clone, Default)]
pub enum ReferralPolicy {
    /// Follow every referral.
    #[default]
    AllowAll,
    /// Never follow referrals.
    DenyAll,
    /// Follow unless the target fully matches one of the patterns.
    DenyByPattern(Vec<Regex>),
}

impl ReferralPolicy {
    /// Builds a pattern-based policy. Each pattern must match the whole target.
    pub fn deny_by_pattern<I, S>(patterns: I) -> LdapResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    LdapError::config(format!("invalid referral filter '{pattern}': {e}"))
                })
            })
            .collect::<LdapResult<Vec<_>>>()?;
        Ok(Self::DenyByPattern(compiled))
    }

    /// Builds the policy from the `referralHandling` selector and filter list.
    ///
    /// A missing selector means [`ReferralPolicy::AllowAll`]; an unknown one
    /// is a configuration error.
    pub fn from_settings(selector: Option<&str>, filters: &[String]) -> LdapResult<Self> {
        let policy = match selector {
            None => Self::AllowAll,
            Some(name) => name.parse()?,
        };
        match policy {
            Self::DenyByPattern(_) => {
                if filters.is_empty() {
                    return Err(LdapError::config(
                        "referral handling 'filtered' requires a non-empty referralFilterList",
                    ));
                }
                Self::deny_by_pattern(filters)
            }
            other => Ok(other),
        }
    }

    /// Returns true if the referral target should be chased.
    #[must_use]
    pub fn follow(&self, target: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::DenyAll => false,
            Self::DenyByPattern(patterns) => {
                if let Some(pattern) = patterns.iter().find(|p| p.is_match(target)) {
                    tracing::debug!(referral = %target, pattern = %pattern, "Ignoring referral");
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Returns the setting value naming this policy.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AllowAll => ALLOW,
            Self::DenyAll => DENY,
            Self::DenyByPattern(_) => FILTERED,
        }
    }
}

impl FromStr for ReferralPolicy {
    type Err = LdapError;

    /// Parses the selector only; filtered policies start with no pattern.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            ALLOW | "follow" | "allow_all" => Ok(Self::AllowAll),
            DENY | "ignore" | "deny_all" => Ok(Self::DenyAll),
            FILTERED | "deny_regex" => Ok(Self::DenyByPattern(Vec::new())),
            other => Err(LdapError::config(format!(
                "unknown referral handling '{other}', expected one of: {ALLOW}, {DENY}, {FILTERED}"
            ))),
        }
    }
}

impl fmt::Debug for ReferralPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowAll => f.write_str("AllowAll"),
            Self::DenyAll => f.write_str("DenyAll"),
            Self::DenyByPattern(patterns) => f
                .debug_tuple("DenyByPattern")
                .field(&patterns.iter().map(Regex::as_str).collect::<Vec<_>>())
                .finish(),
        }
    }
}
