//! Audience rules: who a poll is for.
//!
//! Rules are a closed, validated structure. Free-form JSON exists only at the
//! persistence boundary; unknown fields are rejected on the way in. An empty
//! rule set means the whole enrolled universe.
//!
//! Age comparison works on birth years, never full dates of birth.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Gender constraint. `All` matches everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GenderRule {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "M")]
    Male,
}

impl GenderRule {
    fn matches(self, gender: &str) -> bool {
        match self {
            GenderRule::All => true,
            GenderRule::Female => gender == "F",
            GenderRule::Male => gender == "M",
        }
    }
}

/// The demographic view of a user that eligibility is decided on.
///
/// Re-read from the persistent user record on every protected call; never
/// taken from a session token.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub gender: String,
    pub birth_year: i32,
    pub region_codes: Vec<String>,
}

/// Validated audience rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AudienceRules {
    pub gender: GenderRule,
    pub regions: BTreeSet<String>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
}

impl AudienceRules {
    pub fn universe() -> Self {
        Self::default()
    }

    /// Parse from the stored JSON. Unknown fields or wrong shapes are an
    /// error, not a silent universe.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("audience rules serialize")
    }

    /// Eligibility predicate.
    ///
    /// (gender ∈ {none,all} ∨ user.gender = gender)
    /// ∧ (regions = ∅ ∨ regions ∩ user.regions ≠ ∅)
    /// ∧ (min_age = none ∨ age ≥ min_age) ∧ (max_age = none ∨ age ≤ max_age)
    pub fn matches(&self, user: &UserProfile, current_year: i32) -> bool {
        if !self.gender.matches(&user.gender) {
            return false;
        }
        if !self.regions.is_empty()
            && !user.region_codes.iter().any(|c| self.regions.contains(c))
        {
            return false;
        }
        let age = current_year.saturating_sub(user.birth_year);
        if let Some(min) = self.min_age {
            if age < min as i32 {
                return false;
            }
        }
        if let Some(max) = self.max_age {
            if age > max as i32 {
                return false;
            }
        }
        true
    }

    /// Region entries still carrying legacy UUIDs instead of codes.
    ///
    /// Such a poll predates the region-code migration and must not accept
    /// votes or be published until converted.
    pub fn legacy_region_ids(&self) -> Vec<&str> {
        self.regions
            .iter()
            .filter(|r| looks_like_uuid(r))
            .map(String::as_str)
            .collect()
    }

    pub fn has_legacy_region_ids(&self) -> bool {
        !self.legacy_region_ids().is_empty()
    }
}

fn looks_like_uuid(s: &str) -> bool {
    s.len() == 36
        && s.bytes().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}
