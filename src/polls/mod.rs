//! Poll lifecycle: types, status transitions, publication gate, eligibility.

pub mod audience;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use audience::{AudienceRules, GenderRule, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    Election,
    Referendum,
    Survey,
}

impl PollType {
    pub fn as_str(self) -> &'static str {
        match self {
            PollType::Election => "election",
            PollType::Referendum => "referendum",
            PollType::Survey => "survey",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "election" => Some(PollType::Election),
            "referendum" => Some(PollType::Referendum),
            "survey" => Some(PollType::Survey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Draft,
    Scheduled,
    Active,
    Ended,
    Archived,
}

impl PollStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PollStatus::Draft => "draft",
            PollStatus::Scheduled => "scheduled",
            PollStatus::Active => "active",
            PollStatus::Ended => "ended",
            PollStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(PollStatus::Draft),
            "scheduled" => Some(PollStatus::Scheduled),
            "active" => Some(PollStatus::Active),
            "ended" => Some(PollStatus::Ended),
            "archived" => Some(PollStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll is not in a publishable state")]
    NotPublishable,

    #[error("active window is invalid")]
    InvalidWindow,

    #[error("poll needs at least 2 options or 1 survey question")]
    NotEnoughChoices,

    #[error("audience rules still carry legacy region ids")]
    LegacyRegions,
}

/// Result of the publication gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Set when the audience estimate is below the poll's k. Publication is
    /// allowed, but results stay suppressed until k is reached.
    pub warning: Option<String>,
}

/// Decide whether a draft may be published.
///
/// (a) the active window is valid, (b) the poll has enough choices, (c) the
/// audience rules are fully code-based. A below-k audience estimate produces
/// a warning rather than a rejection.
pub fn check_publishable(
    status: PollStatus,
    starts_at: i64,
    ends_at: i64,
    rules: &AudienceRules,
    option_count: usize,
    question_count: usize,
    audience_estimate: u64,
    min_k: u32,
    now: i64,
) -> Result<PublishOutcome, PollError> {
    if status != PollStatus::Draft {
        return Err(PollError::NotPublishable);
    }
    if starts_at >= ends_at || ends_at <= now {
        return Err(PollError::InvalidWindow);
    }
    if option_count < 2 && question_count < 1 {
        return Err(PollError::NotEnoughChoices);
    }
    if rules.has_legacy_region_ids() {
        return Err(PollError::LegacyRegions);
    }
    let warning = if audience_estimate < min_k as u64 {
        Some(format!(
            "estimated audience {audience_estimate} is below k={min_k}; results suppressed until k is reached"
        ))
    } else {
        None
    };
    Ok(PublishOutcome { warning })
}

/// Status a published poll should hold at `now`. Drives the background
/// status monitor; `None` means no transition is due.
pub fn due_transition(status: PollStatus, starts_at: i64, ends_at: i64, now: i64) -> Option<PollStatus> {
    match status {
        PollStatus::Scheduled if now >= starts_at && now < ends_at => Some(PollStatus::Active),
        PollStatus::Scheduled if now >= ends_at => Some(PollStatus::Ended),
        PollStatus::Active if now >= ends_at => Some(PollStatus::Ended),
        _ => None,
    }
}

/// Current calendar year, for birth-year age arithmetic.
pub fn current_year() -> i32 {
    use chrono::Datelike;
    chrono::Utc::now().year()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3600;

    #[test]
    fn test_publish_happy_path() {
        let outcome = check_publishable(
            PollStatus::Draft,
            1000,
            1000 + HOUR,
            &AudienceRules::universe(),
            2,
            0,
            100,
            30,
            900,
        )
        .unwrap();
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn test_publish_rejects_non_draft() {
        let err = check_publishable(
            PollStatus::Active,
            1000,
            2000,
            &AudienceRules::universe(),
            2,
            0,
            100,
            30,
            900,
        )
        .unwrap_err();
        assert!(matches!(err, PollError::NotPublishable));
    }

    #[test]
    fn test_publish_rejects_bad_window() {
        // ends before it starts
        assert!(matches!(
            check_publishable(PollStatus::Draft, 2000, 1000, &AudienceRules::universe(), 2, 0, 100, 30, 900),
            Err(PollError::InvalidWindow)
        ));
        // already over
        assert!(matches!(
            check_publishable(PollStatus::Draft, 100, 200, &AudienceRules::universe(), 2, 0, 100, 30, 900),
            Err(PollError::InvalidWindow)
        ));
    }

    #[test]
    fn test_publish_requires_choices() {
        assert!(matches!(
            check_publishable(PollStatus::Draft, 1000, 2000, &AudienceRules::universe(), 1, 0, 100, 30, 900),
            Err(PollError::NotEnoughChoices)
        ));
        // One survey question is enough.
        assert!(check_publishable(
            PollStatus::Draft,
            1000,
            2000,
            &AudienceRules::universe(),
            0,
            1,
            100,
            30,
            900
        )
        .is_ok());
    }

    #[test]
    fn test_publish_below_k_warns_but_allows() {
        let outcome = check_publishable(
            PollStatus::Draft,
            1000,
            2000,
            &AudienceRules::universe(),
            2,
            0,
            12,
            30,
            900,
        )
        .unwrap();
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn test_publish_rejects_legacy_regions() {
        let rules = AudienceRules {
            regions: ["a7c3f8f2-4a1b-4a6e-9a2f-0c1d2e3f4a5b".to_string()]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        assert!(matches!(
            check_publishable(PollStatus::Draft, 1000, 2000, &rules, 2, 0, 100, 30, 900),
            Err(PollError::LegacyRegions)
        ));
    }

    #[test]
    fn test_due_transitions() {
        assert_eq!(due_transition(PollStatus::Scheduled, 100, 200, 50), None);
        assert_eq!(
            due_transition(PollStatus::Scheduled, 100, 200, 150),
            Some(PollStatus::Active)
        );
        // A scheduled poll whose whole window passed goes straight to ended.
        assert_eq!(
            due_transition(PollStatus::Scheduled, 100, 200, 250),
            Some(PollStatus::Ended)
        );
        assert_eq!(
            due_transition(PollStatus::Active, 100, 200, 250),
            Some(PollStatus::Ended)
        );
        assert_eq!(due_transition(PollStatus::Active, 100, 200, 150), None);
        assert_eq!(due_transition(PollStatus::Ended, 100, 200, 300), None);
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            PollStatus::Draft,
            PollStatus::Scheduled,
            PollStatus::Active,
            PollStatus::Ended,
            PollStatus::Archived,
        ] {
            assert_eq!(PollStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(PollStatus::parse("bogus"), None);
    }
}
