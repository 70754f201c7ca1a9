//! Wire rows of the vote store and the change feed
//!
//! The same vote row arrives from the REST store (with the participant name
//! embedded as `employee.name`) and from the change feed (bare, or wrapped in
//! a realtime insert envelope).

use crate::domain::{GroupId, ParticipantId, PerformanceUnit, Rating, RatingRecord};
use crate::error::{SourceError, SourceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Ids may be serialized as text (uuid) or as integers (serial keys)
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "id_string")] String);
    Ok(Option::<Wrap>::deserialize(deserializer)?.map(|Wrap(s)| s))
}

#[derive(Debug, Deserialize)]
pub struct EmployeeRow {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRow {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub group_id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub employee_id: Option<String>,
    pub rating: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub employee: Option<EmployeeRow>,
}

impl VoteRow {
    pub fn into_record(self) -> SourceResult<RatingRecord> {
        let rating = Rating::new(self.rating)
            .map_err(|e| SourceError::Decode(format!("vote {}: {e}", self.id)))?;
        Ok(RatingRecord {
            id: self.id,
            group_id: GroupId(self.group_id),
            participant_id: self.employee_id.filter(|id| !id.is_empty()).map(ParticipantId),
            participant_name: self.employee.and_then(|e| e.name),
            rating,
            submitted_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Realtime insert notification, either bare or enveloped
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedPayload {
    Envelope {
        #[serde(alias = "record")]
        new: VoteRow,
    },
    Bare(VoteRow),
}

/// Decode one change feed payload into a rating record
pub fn parse_feed_payload(payload: &[u8]) -> SourceResult<RatingRecord> {
    let parsed: FeedPayload =
        serde_json::from_slice(payload).map_err(|e| SourceError::Decode(e.to_string()))?;
    match parsed {
        FeedPayload::Envelope { new } => new.into_record(),
        FeedPayload::Bare(row) => row.into_record(),
    }
}

#[derive(Debug, Deserialize)]
pub struct GroupRow {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub theme: Option<String>,
}

impl From<GroupRow> for PerformanceUnit {
    fn from(row: GroupRow) -> Self {
        PerformanceUnit { id: GroupId(row.id), name: row.name, theme: row.theme.unwrap_or_default() }
    }
}

/// `schedules?select=group:groups(...)` row; `group` is null when the schedule has no group
#[derive(Debug, Deserialize)]
pub struct ScheduleRow {
    #[serde(default)]
    pub group: Option<GroupRow>,
}

#[derive(Debug, Deserialize)]
pub struct NameRow {
    #[serde(default)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_vote_row_with_embedded_name() {
        let json = r#"{
            "id": "8f1c",
            "group_id": "g1",
            "employee_id": "emp-3",
            "rating": 9,
            "created_at": "2026-10-19T19:30:00.123456+00:00",
            "employee": {"name": "Ayu"}
        }"#;
        let row: VoteRow = serde_json::from_str(json).unwrap();
        let record = row.into_record().unwrap();
        assert_eq!(record.group_id, GroupId::new("g1"));
        assert_eq!(record.participant_id, Some(ParticipantId::new("emp-3")));
        assert_eq!(record.participant_name.as_deref(), Some("Ayu"));
        assert_eq!(record.rating.value(), 9);
    }

    #[test]
    fn test_feed_payload_envelope_and_numeric_ids() {
        let json = br#"{"new": {"id": 41, "group_id": 7, "employee_id": 12, "rating": 4}}"#;
        let record = parse_feed_payload(json).unwrap();
        assert_eq!(record.id, "41");
        assert_eq!(record.group_id, GroupId::new("7"));
        assert_eq!(record.participant_id, Some(ParticipantId::new("12")));
        assert!(record.participant_name.is_none());
    }

    #[test]
    fn test_feed_payload_bare_without_participant() {
        let json = br#"{"id": "a", "group_id": "g1", "employee_id": null, "rating": 10}"#;
        let record = parse_feed_payload(json).unwrap();
        assert!(record.participant_id.is_none());
        assert_eq!(record.rating.value(), 10);
    }

    #[test]
    fn test_out_of_range_rating_is_decode_error() {
        let json = br#"{"id": "a", "group_id": "g1", "rating": 11}"#;
        assert!(matches!(parse_feed_payload(json), Err(SourceError::Decode(_))));
        assert!(matches!(parse_feed_payload(b"not json"), Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_schedule_row_without_group() {
        let rows: Vec<ScheduleRow> = serde_json::from_str(r#"[{"group": null}]"#).unwrap();
        assert!(rows[0].group.is_none());

        let rows: Vec<ScheduleRow> =
            serde_json::from_str(r#"[{"group": {"id": "g1", "name": "Angklung", "theme": null}}]"#).unwrap();
        let unit: PerformanceUnit = rows.into_iter().next().unwrap().group.unwrap().into();
        assert_eq!(unit.name, "Angklung");
        assert_eq!(unit.theme, "");
    }
}
