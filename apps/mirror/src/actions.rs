//! Editor-facing operations. Each one is a single reconciling mutation on
//! the right collection, so the views the editor shows refresh through the
//! bus without the caller naming any query key.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::MutationError;
use crate::keys::Collection;
use crate::models::{
    compare_schedule, Application, ApplicationPatch, ApplicationStatus, ContactInteraction,
    ContactNote, FollowupAction, FollowupPatch, FollowupType, InteractionPatch, InteractionType,
    InterviewOutcome, InterviewStage, InterviewStagePatch, NetworkingContactPatch, NotePatch,
};
use crate::reconcile::{MutationReport, Reconciler};

/// Fields the editor collects when scheduling a follow-up.
#[derive(Debug, Clone)]
pub struct NewFollowup {
    pub followup_type: FollowupType,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl NewFollowup {
    fn into_patch(self) -> FollowupPatch {
        FollowupPatch {
            followup_type: Some(self.followup_type),
            description: Some(self.description),
            due_date: Some(self.due_date),
            completed: Some(false),
            notes: self.notes.map(Some),
        }
    }
}

pub async fn complete_followup(
    reconciler: &Reconciler,
    collection: &Collection<FollowupAction>,
    followup_id: i64,
) -> Result<MutationReport<FollowupAction>, MutationError> {
    reconciler
        .upsert(collection, followup_id, FollowupPatch::completed())
        .await
}

pub async fn schedule_application_followup(
    reconciler: &Reconciler,
    application_id: i64,
    followup: NewFollowup,
) -> Result<MutationReport<FollowupAction>, MutationError> {
    let collection = Collection::application_followups(application_id);
    let id = reconciler.next_local_id(&collection);
    reconciler.upsert(&collection, id, followup.into_patch()).await
}

pub async fn schedule_contact_followup(
    reconciler: &Reconciler,
    contact_id: i64,
    followup: NewFollowup,
) -> Result<MutationReport<FollowupAction>, MutationError> {
    let collection = Collection::contact_followups(contact_id);
    let id = reconciler.next_local_id(&collection);
    reconciler.upsert(&collection, id, followup.into_patch()).await
}

pub async fn update_application_status(
    reconciler: &Reconciler,
    account_id: i64,
    application_id: i64,
    status: ApplicationStatus,
) -> Result<MutationReport<Application>, MutationError> {
    let patch = ApplicationPatch {
        status: Some(status),
        ..Default::default()
    };
    reconciler
        .upsert(&Collection::applications(account_id), application_id, patch)
        .await
}

/// Adds a stage to `application`. Only applications in the `Interviewing`
/// status take stages; anything else is refused before any write.
pub async fn add_interview_stage(
    reconciler: &Reconciler,
    application: &Application,
    stage: InterviewStagePatch,
) -> Result<MutationReport<InterviewStage>, MutationError> {
    if !application.accepts_interview_stages() {
        warn!(
            "Refusing interview stage for application {} in status {:?}",
            application.id, application.status
        );
        return Err(MutationError::NotInterviewing(application.id));
    }
    let collection = Collection::interview_stages(application.id);
    let id = reconciler.next_local_id(&collection);
    reconciler.upsert(&collection, id, stage).await
}

pub async fn record_stage_outcome(
    reconciler: &Reconciler,
    application_id: i64,
    stage_id: i64,
    outcome: InterviewOutcome,
    notes: Option<String>,
) -> Result<MutationReport<InterviewStage>, MutationError> {
    let patch = InterviewStagePatch {
        outcome: Some(outcome),
        notes: notes.map(Some),
        ..Default::default()
    };
    reconciler
        .upsert(&Collection::interview_stages(application_id), stage_id, patch)
        .await
}

/// Notes live only in the local mirror; a blank note is refused.
pub async fn add_contact_note(
    reconciler: &Reconciler,
    contact_id: i64,
    text: impl Into<String>,
) -> Result<MutationReport<ContactNote>, MutationError> {
    let collection = Collection::notes(contact_id);
    let id = reconciler.next_local_id(&collection);
    let text = text.into();
    if text.trim().is_empty() {
        return Err(MutationError::Incomplete { id, field: "text" });
    }
    let patch = NotePatch { text: Some(text) };
    reconciler.upsert(&collection, id, patch).await
}

/// Records an interaction, then moves the contact's last-contacted date
/// forward when the contact is in the mirror and the interaction is newer.
/// A failure of that second write is logged and does not fail the first.
pub async fn log_interaction(
    reconciler: &Reconciler,
    account_id: i64,
    contact_id: i64,
    interaction_type: InteractionType,
    date: NaiveDate,
    notes: Option<String>,
) -> Result<MutationReport<ContactInteraction>, MutationError> {
    let collection = Collection::interactions(contact_id);
    let id = reconciler.next_local_id(&collection);
    let patch = InteractionPatch {
        interaction_type: Some(interaction_type),
        date: Some(date),
        notes: notes.map(Some),
    };
    let report = reconciler.upsert(&collection, id, patch).await?;

    let contacts = Collection::contacts(account_id);
    let Some(contact) = reconciler
        .mirror()
        .load(&contacts)
        .into_iter()
        .find(|c| c.id == contact_id)
    else {
        debug!("Contact {contact_id} not mirrored, leaving last-contacted date alone");
        return Ok(report);
    };
    if contact.last_contacted_date.is_some_and(|last| last >= date) {
        return Ok(report);
    }

    let touch = NetworkingContactPatch {
        last_contacted_date: Some(Some(date)),
        ..Default::default()
    };
    if let Err(e) = reconciler.upsert(&contacts, contact_id, touch).await {
        warn!(kind = %e.kind(), "Could not update last-contacted date of contact {contact_id}: {e}");
    }
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingFollowup<'a> {
    pub followup: &'a FollowupAction,
    pub overdue: bool,
}

/// Open follow-ups ordered by due date, undated ones last in their original
/// order.
pub fn needs_followup(followups: &[FollowupAction], today: NaiveDate) -> Vec<PendingFollowup<'_>> {
    let mut pending: Vec<PendingFollowup<'_>> = followups
        .iter()
        .filter(|f| !f.completed)
        .map(|followup| PendingFollowup {
            followup,
            overdue: followup.is_overdue(today),
        })
        .collect();
    pending.sort_by(|a, b| compare_schedule(a.followup.due_date, b.followup.due_date));
    pending
}
