use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::MutationError;
use crate::models::{required, set, Owner, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupType {
    ThankYouEmail,
    FollowUp,
    Preparation,
    DocumentSubmission,
    Networking,
    Other,
}

/// A follow-up owned by either an application or a networking contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupAction {
    pub id: i64,
    #[serde(default)]
    pub application_id: Option<i64>,
    #[serde(default)]
    pub contact_id: Option<i64>,
    #[serde(rename = "type")]
    pub followup_type: FollowupType,
    pub description: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FollowupAction {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.completed && self.due_date.is_some_and(|due| due < today)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub followup_type: Option<FollowupType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl FollowupPatch {
    pub fn completed() -> Self {
        FollowupPatch {
            completed: Some(true),
            ..Default::default()
        }
    }
}

impl Record for FollowupAction {
    type Patch = FollowupPatch;

    fn id(&self) -> i64 {
        self.id
    }

    fn apply(&mut self, patch: &FollowupPatch) {
        set(&mut self.followup_type, &patch.followup_type);
        set(&mut self.description, &patch.description);
        set(&mut self.due_date, &patch.due_date);
        set(&mut self.completed, &patch.completed);
        set(&mut self.notes, &patch.notes);
    }

    fn from_patch(
        id: i64,
        owner: Owner,
        patch: &FollowupPatch,
        _now: DateTime<Utc>,
    ) -> Result<Self, MutationError> {
        let (application_id, contact_id) = match owner {
            Owner::Application(app) => (Some(app), None),
            Owner::Contact(contact) => (None, Some(contact)),
            Owner::Account(_) => (None, None),
        };
        let mut followup = FollowupAction {
            id,
            application_id,
            contact_id,
            followup_type: *required(&patch.followup_type, id, "type")?,
            description: required(&patch.description, id, "description")?.clone(),
            due_date: None,
            completed: false,
            notes: None,
            updated_at: None,
            extra: Map::new(),
        };
        followup.apply(patch);
        Ok(followup)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}
