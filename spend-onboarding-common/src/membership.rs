//! Membership directory payloads.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a member as reported by the membership directory.
///
/// Collections the directory may send as `null` are kept optional and read
/// through accessors that treat `None` as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub id: i64,
    pub is_active: bool,
    pub is_access_active: bool,
    pub signed_latest_agreement: bool,
    #[serde(default)]
    pub teams: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub roles: Option<Vec<MembershipRole>>,
    #[serde(default)]
    pub travel: Option<Vec<TravelAssignment>>,
    #[serde(default)]
    pub manager: Option<ManagerRef>,
}

impl MembershipRecord {
    pub fn team_count(&self) -> usize {
        self.teams.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn roles(&self) -> &[MembershipRole] {
        self.roles.as_deref().unwrap_or(&[])
    }

    pub fn travel(&self) -> &[TravelAssignment] {
        self.travel.as_deref().unwrap_or(&[])
    }

    pub fn manager_id(&self) -> Option<i64> {
        self.manager.as_ref().map(|m| m.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRole {
    pub name: String,
}

/// A travel assignment; only the return date matters here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelAssignment {
    pub travel: TravelDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelDetails {
    pub return_date: String,
}

impl TravelDetails {
    /// Parse the return date.
    ///
    /// Accepts RFC 3339 timestamps, naive timestamps (read as UTC) and bare
    /// dates (midnight UTC).
    pub fn return_date(&self) -> Option<DateTime<Utc>> {
        let raw = self.return_date.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(naive.and_utc());
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

/// Manager reference embedded in a member's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerRef {
    pub id: i64,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub gt_email: Option<String>,
    #[serde(default)]
    pub gmail_address: Option<String>,
}

/// Full manager profile fetched at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerProfile {
    pub id: i64,
    /// Directory username.
    pub uid: String,
    pub full_name: String,
    /// Institutional email address. Some managers only have the alternate.
    #[serde(default)]
    pub gt_email: Option<String>,
    /// Alternate address in the secondary organization, if any.
    #[serde(default)]
    pub gmail_address: Option<String>,
}

/// Entry in the manager picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerOption {
    pub id: i64,
    pub full_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_null_collections_are_empty() {
        let record: MembershipRecord = serde_json::from_str(
            r#"{
                "id": 7,
                "is_active": true,
                "is_access_active": true,
                "signed_latest_agreement": true,
                "teams": null,
                "roles": null,
                "travel": null,
                "manager": null
            }"#,
        )
        .unwrap();
        assert_eq!(record.team_count(), 0);
        assert!(record.roles().is_empty());
        assert!(record.travel().is_empty());
        assert_eq!(record.manager_id(), None);
    }

    #[test]
    fn test_absent_collections_are_empty() {
        let record: MembershipRecord = serde_json::from_str(
            r#"{"id": 7, "is_active": false, "is_access_active": false, "signed_latest_agreement": false}"#,
        )
        .unwrap();
        assert_eq!(record.team_count(), 0);
        assert!(record.roles().is_empty());
    }

    #[test]
    fn test_manager_id_from_record() {
        let record: MembershipRecord = serde_json::from_str(
            r#"{
                "id": 7,
                "is_active": true,
                "is_access_active": true,
                "signed_latest_agreement": true,
                "teams": [1, 2],
                "manager": {"id": 42, "full_name": "Jane Doe"}
            }"#,
        )
        .unwrap();
        assert_eq!(record.team_count(), 2);
        assert_eq!(record.manager_id(), Some(42));
    }

    #[test]
    fn test_return_date_formats() {
        let expected = Utc.with_ymd_and_hms(2030, 5, 1, 12, 0, 0).unwrap();
        for raw in [
            "2030-05-01T12:00:00+00:00",
            "2030-05-01T12:00:00Z",
            "2030-05-01T08:00:00-04:00",
            "2030-05-01T12:00:00",
            "2030-05-01 12:00:00",
        ] {
            let details = TravelDetails { return_date: raw.to_string() };
            assert_eq!(details.return_date(), Some(expected), "{}", raw);
        }

        let date_only = TravelDetails { return_date: "2030-05-01".to_string() };
        assert_eq!(
            date_only.return_date(),
            Some(Utc.with_ymd_and_hms(2030, 5, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_manager_profile_without_institutional_email() {
        let manager: ManagerProfile = serde_json::from_str(
            r#"{
                "id": 7,
                "uid": "jdoe3",
                "full_name": "Jane Doe",
                "gt_email": null,
                "gmail_address": "jane@robojackets.org"
            }"#,
        )
        .unwrap();
        assert_eq!(manager.gt_email, None);
        assert_eq!(manager.gmail_address.as_deref(), Some("jane@robojackets.org"));

        let absent: ManagerProfile =
            serde_json::from_str(r#"{"id": 7, "uid": "jdoe3", "full_name": "Jane Doe"}"#).unwrap();
        assert_eq!(absent.gt_email, None);
    }

    #[test]
    fn test_return_date_garbage() {
        let details = TravelDetails { return_date: "next tuesday".to_string() };
        assert!(details.return_date().is_none());
    }
}
