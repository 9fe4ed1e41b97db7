use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::MutationError;
use crate::models::{required, set, Owner, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Recruiter,
    HiringManager,
    Colleague,
    Mentor,
    Referral,
    Alumni,
    Friend,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingContact {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub relationship_type: Option<RelationshipType>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub last_contacted_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingContactPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<Option<RelationshipType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_contacted_date: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl Record for NetworkingContact {
    type Patch = NetworkingContactPatch;

    fn id(&self) -> i64 {
        self.id
    }

    fn apply(&mut self, patch: &NetworkingContactPatch) {
        set(&mut self.name, &patch.name);
        set(&mut self.company, &patch.company);
        set(&mut self.job_title, &patch.job_title);
        set(&mut self.relationship_type, &patch.relationship_type);
        set(&mut self.email, &patch.email);
        set(&mut self.phone, &patch.phone);
        set(&mut self.linkedin_url, &patch.linkedin_url);
        set(&mut self.last_contacted_date, &patch.last_contacted_date);
        set(&mut self.notes, &patch.notes);
    }

    fn from_patch(
        id: i64,
        _owner: Owner,
        patch: &NetworkingContactPatch,
        _now: DateTime<Utc>,
    ) -> Result<Self, MutationError> {
        let mut contact = NetworkingContact {
            id,
            name: required(&patch.name, id, "name")?.clone(),
            company: None,
            job_title: None,
            relationship_type: None,
            email: None,
            phone: None,
            linkedin_url: None,
            last_contacted_date: None,
            notes: None,
            updated_at: None,
            extra: Map::new(),
        };
        contact.apply(patch);
        Ok(contact)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionType {
    Call,
    Email,
    Meeting,
    #[serde(rename = "Video Call")]
    VideoCall,
    #[serde(rename = "Coffee Chat")]
    CoffeeChat,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInteraction {
    pub id: i64,
    pub contact_id: i64,
    pub interaction_type: InteractionType,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_type: Option<InteractionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl Record for ContactInteraction {
    type Patch = InteractionPatch;

    fn id(&self) -> i64 {
        self.id
    }

    fn apply(&mut self, patch: &InteractionPatch) {
        set(&mut self.interaction_type, &patch.interaction_type);
        set(&mut self.date, &patch.date);
        set(&mut self.notes, &patch.notes);
    }

    fn from_patch(
        id: i64,
        owner: Owner,
        patch: &InteractionPatch,
        _now: DateTime<Utc>,
    ) -> Result<Self, MutationError> {
        let mut interaction = ContactInteraction {
            id,
            contact_id: owner.id(),
            interaction_type: *required(&patch.interaction_type, id, "interactionType")?,
            date: *required(&patch.date, id, "date")?,
            notes: None,
            updated_at: None,
            extra: Map::new(),
        };
        interaction.apply(patch);
        Ok(interaction)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}

/// Free-form note kept only in the local mirror; the server has no schema for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactNote {
    pub id: i64,
    pub contact_id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Record for ContactNote {
    type Patch = NotePatch;

    fn id(&self) -> i64 {
        self.id
    }

    fn apply(&mut self, patch: &NotePatch) {
        set(&mut self.text, &patch.text);
    }

    fn from_patch(
        id: i64,
        owner: Owner,
        patch: &NotePatch,
        now: DateTime<Utc>,
    ) -> Result<Self, MutationError> {
        Ok(ContactNote {
            id,
            contact_id: owner.id(),
            text: required(&patch.text, id, "text")?.clone(),
            timestamp: now,
            updated_at: None,
        })
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}
