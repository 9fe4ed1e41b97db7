use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::MutationError;
use crate::models::{required, set, Owner, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    PhoneScreen,
    Technical,
    Behavioral,
    Onsite,
    Panel,
    Final,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewOutcome {
    #[default]
    Pending,
    Scheduled,
    Passed,
    #[serde(alias = "not_selected")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewStage {
    pub id: i64,
    pub application_id: i64,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    #[serde(default)]
    pub scheduled_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub interviewers: Vec<String>,
    #[serde(default)]
    pub outcome: InterviewOutcome,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewStagePatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub stage_type: Option<StageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interviewers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InterviewOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl Record for InterviewStage {
    type Patch = InterviewStagePatch;

    fn id(&self) -> i64 {
        self.id
    }

    fn apply(&mut self, patch: &InterviewStagePatch) {
        set(&mut self.stage_type, &patch.stage_type);
        set(&mut self.scheduled_date, &patch.scheduled_date);
        set(&mut self.location, &patch.location);
        set(&mut self.interviewers, &patch.interviewers);
        set(&mut self.outcome, &patch.outcome);
        set(&mut self.notes, &patch.notes);
    }

    fn from_patch(
        id: i64,
        owner: Owner,
        patch: &InterviewStagePatch,
        _now: DateTime<Utc>,
    ) -> Result<Self, MutationError> {
        let mut stage = InterviewStage {
            id,
            application_id: owner.id(),
            stage_type: *required(&patch.stage_type, id, "type")?,
            scheduled_date: None,
            location: None,
            interviewers: Vec::new(),
            outcome: InterviewOutcome::default(),
            notes: None,
            updated_at: None,
            extra: Map::new(),
        };
        stage.apply(patch);
        Ok(stage)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }

    fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_selected_reads_as_failed() {
        let stage: InterviewStage = serde_json::from_value(json!({
            "id": 3,
            "applicationId": 12,
            "type": "onsite",
            "outcome": "not_selected"
        }))
        .unwrap();
        assert_eq!(stage.outcome, InterviewOutcome::Failed);
        assert!(stage.interviewers.is_empty());
        assert!(stage.scheduled_date.is_none());
    }

    #[test]
    fn test_scheduled_date_uses_iso_8601() {
        let stage: InterviewStage = serde_json::from_value(json!({
            "id": 3,
            "applicationId": 12,
            "type": "phone_screen",
            "scheduledDate": "2024-03-01T15:30:00Z"
        }))
        .unwrap();
        let back = serde_json::to_value(&stage).unwrap();
        assert_eq!(back["scheduledDate"], "2024-03-01T15:30:00Z");
        assert_eq!(back["type"], "phone_screen");
    }

    #[test]
    fn test_create_takes_application_from_owner() {
        let stage = InterviewStage::from_patch(
            8,
            Owner::Application(12),
            &InterviewStagePatch {
                stage_type: Some(StageType::Panel),
                interviewers: Some(vec!["Dana".to_string(), "Lee".to_string()]),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(stage.application_id, 12);
        assert_eq!(stage.interviewers.len(), 2);
        assert_eq!(stage.outcome, InterviewOutcome::Pending);
    }

    #[test]
    fn test_create_without_type_is_incomplete() {
        let result = InterviewStage::from_patch(
            8,
            Owner::Application(12),
            &InterviewStagePatch::default(),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(MutationError::Incomplete { field: "type", .. })
        ));
    }
}
