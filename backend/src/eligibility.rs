//! Eligibility rules.
//!
//! Identity-provider roles give a first answer. `provisioned` is final and
//! skips the directory. A present role set without `eligible` is final too.
//! Anything else is provisional and must be confirmed against the membership
//! directory before the user may fill out the form.

use chrono::{DateTime, Utc};
use spend_onboarding_common::{MembershipRecord, Status};

pub const ROLE_ELIGIBLE: &str = "eligible";
pub const ROLE_PROVISIONED: &str = "provisioned";

/// Directory roles that do not qualify on their own.
const BASELINE_ROLES: [&str; 2] = ["member", "non-member"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible,
    Provisioned,
}

impl From<Eligibility> for Status {
    fn from(value: Eligibility) -> Self {
        match value {
            Eligibility::Eligible => Status::Eligible,
            Eligibility::Ineligible => Status::Ineligible,
            Eligibility::Provisioned => Status::Provisioned,
        }
    }
}

/// What the identity claims alone say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimsDecision {
    /// No directory lookup needed.
    Final(Eligibility),
    /// Directory confirmation required; `provisional` stands until then.
    Confirm { provisional: Eligibility },
}

/// Decide from the role claim alone.
pub fn decide_from_claims(roles: Option<&[String]>) -> ClaimsDecision {
    let Some(roles) = roles else {
        return ClaimsDecision::Confirm {
            provisional: Eligibility::Ineligible,
        };
    };

    if roles.iter().any(|r| r == ROLE_PROVISIONED) {
        ClaimsDecision::Final(Eligibility::Provisioned)
    } else if roles.iter().any(|r| r == ROLE_ELIGIBLE) {
        ClaimsDecision::Confirm {
            provisional: Eligibility::Eligible,
        }
    } else {
        ClaimsDecision::Final(Eligibility::Ineligible)
    }
}

/// Directory-backed eligibility rules.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityPolicy {
    track_travel: bool,
}

impl EligibilityPolicy {
    pub fn new(track_travel: bool) -> Self {
        Self { track_travel }
    }

    pub fn tracks_travel(&self) -> bool {
        self.track_travel
    }

    /// Apply the membership predicate to a directory record.
    pub fn confirm(&self, record: &MembershipRecord, now: DateTime<Utc>) -> Eligibility {
        let role_check = record
            .roles()
            .iter()
            .any(|role| !BASELINE_ROLES.contains(&role.name.as_str()));

        let travel_check = self.track_travel && has_upcoming_travel(record, now);

        if record.is_active
            && record.is_access_active
            && record.signed_latest_agreement
            && record.team_count() > 0
            && (role_check || travel_check)
        {
            Eligibility::Eligible
        } else {
            Eligibility::Ineligible
        }
    }
}

fn has_upcoming_travel(record: &MembershipRecord, now: DateTime<Utc>) -> bool {
    record.travel().iter().any(|assignment| {
        match assignment.travel.return_date() {
            Some(return_date) => now < return_date,
            None => {
                tracing::warn!(
                    member_id = record.id,
                    return_date = %assignment.travel.return_date,
                    "Ignoring travel assignment with unparseable return date"
                );
                false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;
    use spend_onboarding_common::{MembershipRole, TravelAssignment, TravelDetails};

    fn record() -> MembershipRecord {
        MembershipRecord {
            id: 12,
            is_active: true,
            is_access_active: true,
            signed_latest_agreement: true,
            teams: Some(vec![serde_json::json!(1)]),
            roles: Some(vec![MembershipRole {
                name: "captain".to_string(),
            }]),
            travel: None,
            manager: None,
        }
    }

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn travel_returning(at: DateTime<Utc>) -> Option<Vec<TravelAssignment>> {
        Some(vec![TravelAssignment {
            travel: TravelDetails {
                return_date: at.to_rfc3339(),
            },
        }])
    }

    #[test]
    fn test_provisioned_claim_is_final() {
        for claims in [roles(&["eligible", "provisioned"]), roles(&["provisioned"])] {
            assert_eq!(
                decide_from_claims(Some(&claims)),
                ClaimsDecision::Final(Eligibility::Provisioned)
            );
        }
    }

    #[test]
    fn test_roles_without_eligible_are_final() {
        for claims in [roles(&["admin"]), roles(&[])] {
            assert_eq!(
                decide_from_claims(Some(&claims)),
                ClaimsDecision::Final(Eligibility::Ineligible)
            );
        }
    }

    #[test]
    fn test_missing_roles_need_confirmation() {
        assert_eq!(
            decide_from_claims(None),
            ClaimsDecision::Confirm {
                provisional: Eligibility::Ineligible
            }
        );
    }

    #[test]
    fn test_eligible_claim_needs_confirmation() {
        let claims = roles(&["eligible"]);
        assert_eq!(
            decide_from_claims(Some(&claims)),
            ClaimsDecision::Confirm {
                provisional: Eligibility::Eligible
            }
        );
        assert_eq!(
            EligibilityPolicy::new(false).confirm(&record(), Utc::now()),
            Eligibility::Eligible
        );
    }

    #[rstest]
    #[case::inactive(|r: &mut MembershipRecord| r.is_active = false)]
    #[case::access_inactive(|r: &mut MembershipRecord| r.is_access_active = false)]
    #[case::unsigned(|r: &mut MembershipRecord| r.signed_latest_agreement = false)]
    #[case::no_teams(|r: &mut MembershipRecord| r.teams = Some(vec![]))]
    #[case::null_teams(|r: &mut MembershipRecord| r.teams = None)]
    #[case::member_only(|r: &mut MembershipRecord| r.roles = Some(vec![MembershipRole { name: "member".to_string() }]))]
    #[case::null_roles(|r: &mut MembershipRecord| r.roles = None)]
    fn test_predicate_failures(#[case] mutate: fn(&mut MembershipRecord)) {
        let mut candidate = record();
        mutate(&mut candidate);
        let policy = EligibilityPolicy::new(true);
        assert_eq!(policy.confirm(&candidate, Utc::now()), Eligibility::Ineligible);
    }

    #[test]
    fn test_no_teams_is_never_eligible() {
        let now = Utc::now();
        let mut candidate = record();
        candidate.teams = Some(vec![]);
        candidate.travel = travel_returning(now + Duration::days(30));
        candidate.roles = Some(vec![
            MembershipRole { name: "captain".to_string() },
            MembershipRole { name: "admin".to_string() },
        ]);
        for track in [true, false] {
            assert_eq!(
                EligibilityPolicy::new(track).confirm(&candidate, now),
                Eligibility::Ineligible
            );
        }
    }

    #[test]
    fn test_upcoming_travel_counts_when_tracked() {
        let now = Utc::now();
        let mut candidate = record();
        candidate.roles = Some(vec![MembershipRole { name: "non-member".to_string() }]);
        candidate.travel = travel_returning(now + Duration::days(3));

        assert_eq!(
            EligibilityPolicy::new(true).confirm(&candidate, now),
            Eligibility::Eligible
        );
        assert_eq!(
            EligibilityPolicy::new(false).confirm(&candidate, now),
            Eligibility::Ineligible
        );
    }

    #[test]
    fn test_past_travel_does_not_count() {
        let now = Utc::now();
        let mut candidate = record();
        candidate.roles = Some(vec![]);
        candidate.travel = travel_returning(now - Duration::days(1));

        assert_eq!(
            EligibilityPolicy::new(true).confirm(&candidate, now),
            Eligibility::Ineligible
        );
    }

    #[test]
    fn test_travel_returning_now_does_not_count() {
        let now = Utc::now();
        let mut candidate = record();
        candidate.roles = None;
        candidate.travel = travel_returning(now);

        assert_eq!(
            EligibilityPolicy::new(true).confirm(&candidate, now),
            Eligibility::Ineligible
        );
    }

    #[test]
    fn test_status_conversion() {
        assert_eq!(Status::from(Eligibility::Eligible), Status::Eligible);
        assert_eq!(Status::from(Eligibility::Ineligible), Status::Ineligible);
        assert_eq!(Status::from(Eligibility::Provisioned), Status::Provisioned);
    }
}
