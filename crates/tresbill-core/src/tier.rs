//! Customer tier classification.
//!
//! Every cluster user bills at one of three tiers. Classification is a
//! heuristic over the username; admins can pin a user to a tier with an
//! override row, which the store resolves ahead of this function.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

/// Pricing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// University-internal accounts.
    Mu,
    /// Government and research-agency accounts.
    Gov,
    /// Commercial accounts.
    Private,
}

impl Tier {
    /// All tiers, in display order.
    pub const ALL: [Tier; 3] = [Tier::Mu, Tier::Gov, Tier::Private];

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Mu => "mu",
            Tier::Gov => "gov",
            Tier::Private => "private",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mu" => Ok(Tier::Mu),
            "gov" => Ok(Tier::Gov),
            "private" => Ok(Tier::Private),
            other => Err(BillingError::UnknownTier(other.to_string())),
        }
    }
}

static PERSONAL_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]+\.[a-z]+$").unwrap_or_else(|e| panic!("invalid name regex: {e}"))
});

const MU_KEYWORDS: &[&str] = &["test", "support", "admin", "monitor", "sys"];
const GOV_KEYWORDS: &[&str] = &["dip", "gits", "nstda", "nectec", ".go.", "gov"];
const PRIVATE_KEYWORDS: &[&str] = &["co.th", ".com", "corp", "inc"];

/// Classify a username into a tier.
///
/// Rules are checked in order on the lowercased name: operational accounts
/// bill internally, agency keywords mark government, `first.last` shapes
/// and university domains mark internal, commercial markers mark private,
/// and anything unrecognized bills at the private rate.
#[must_use]
pub fn classify_username(username: &str) -> Tier {
    let name = username.trim().to_ascii_lowercase();

    if MU_KEYWORDS.iter().any(|k| name.contains(k)) {
        return Tier::Mu;
    }
    if GOV_KEYWORDS.iter().any(|k| name.contains(k)) {
        return Tier::Gov;
    }
    if PERSONAL_NAME_RE.is_match(&name) || name.contains("ku.ac.th") || name.contains("mu.ac.th") {
        return Tier::Mu;
    }
    if PRIVATE_KEYWORDS.iter().any(|k| name.contains(k)) {
        return Tier::Private;
    }
    Tier::Private
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operational_accounts_are_mu() {
        assert_eq!(classify_username("sysadmin"), Tier::Mu);
        assert_eq!(classify_username("Monitor01"), Tier::Mu);
        assert_eq!(classify_username("test.runner"), Tier::Mu);
    }

    #[test]
    fn agency_keywords_are_gov() {
        assert_eq!(classify_username("nstda-lab3"), Tier::Gov);
        assert_eq!(classify_username("user.go.th"), Tier::Gov);
        assert_eq!(classify_username("nectec01"), Tier::Gov);
    }

    #[test]
    fn personal_names_are_mu() {
        assert_eq!(classify_username("somchai.jaidee"), Tier::Mu);
        assert_eq!(classify_username("alice@mu.ac.th"), Tier::Mu);
    }

    #[test]
    fn commercial_markers_are_private() {
        assert_eq!(classify_username("acme.co.th"), Tier::Private);
        assert_eq!(classify_username("robotcorp7"), Tier::Private);
    }

    #[test]
    fn unknown_defaults_to_private() {
        assert_eq!(classify_username("x9z"), Tier::Private);
    }

    #[test]
    fn tier_round_trips_through_str() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>().ok(), Some(tier));
        }
        assert!("platinum".parse::<Tier>().is_err());
    }
}
