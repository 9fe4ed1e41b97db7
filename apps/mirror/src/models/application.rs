use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::MutationError;
use crate::models::{required, set, Owner, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStatus {
    NotStarted,
    InProgress,
    Applied,
    Interviewing,
    Offer,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: i64,
    pub job_title: String,
    pub company: String,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resume_id: Option<i64>,
    #[serde(default)]
    pub cover_letter_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Server fields this crate does not model, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Application {
    /// Interview stages are only shown (and accepted) while interviewing.
    pub fn accepts_interview_stages(&self) -> bool {
        self.status == ApplicationStatus::Interviewing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_letter_id: Option<Option<i64>>,
}

impl Record for Application {
    type Patch = ApplicationPatch;

    fn id(&self) -> i64 {
        self.id
    }

    fn apply(&mut self, patch: &ApplicationPatch) {
        set(&mut self.job_title, &patch.job_title);
        set(&mut self.company, &patch.company);
        set(&mut self.status, &patch.status);
        set(&mut self.notes, &patch.notes);
        set(&mut self.description, &patch.description);
        set(&mut self.resume_id, &patch.resume_id);
        set(&mut self.cover_letter_id, &patch.cover_letter_id);
    }

    fn from_patch(
        id: i64,
        _owner: Owner,
        patch: &ApplicationPatch,
        now: DateTime<Utc>,
    ) -> Result<Self, MutationError> {
        let mut application = Application {
            id,
            job_title: required(&patch.job_title, id, "jobTitle")?.clone(),
            company: required(&patch.company, id, "company")?.clone(),
            status: ApplicationStatus::NotStarted,
            notes: None,
            description: None,
            resume_id: None,
            cover_letter_id: None,
            created_at: Some(now),
            updated_at: None,
            extra: Map::new(),
        };
        application.apply(patch);
        Ok(application)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}
