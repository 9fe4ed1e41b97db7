pub mod application;
pub mod contact;
pub mod followup;
pub mod interview;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::MutationError;

pub use application::{Application, ApplicationPatch, ApplicationStatus};
pub use contact::{
    ContactInteraction, ContactNote, InteractionPatch, InteractionType, NetworkingContact,
    NetworkingContactPatch, NotePatch, RelationshipType,
};
pub use followup::{FollowupAction, FollowupPatch, FollowupType};
pub use interview::{InterviewOutcome, InterviewStage, InterviewStagePatch, StageType};

/// The entity that owns a mirrored list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Top-level lists (applications, contacts) belong to the signed-in account.
    Account(i64),
    Application(i64),
    Contact(i64),
}

impl Owner {
    pub fn id(&self) -> i64 {
        match self {
            Owner::Account(id) | Owner::Application(id) | Owner::Contact(id) => *id,
        }
    }
}

/// A record that can live in a local mirror list and be patched in place.
///
/// `apply` is a shallow merge: every field present in the patch overrides,
/// every other field (including unmodelled server fields kept in `extra`)
/// is left alone.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Patch: Serialize + Send + Sync;

    fn id(&self) -> i64;

    fn apply(&mut self, patch: &Self::Patch);

    /// Builds a new record when the id is not in the mirror yet.
    /// The patch must carry the entity's minimal required fields.
    fn from_patch(
        id: i64,
        owner: Owner,
        patch: &Self::Patch,
        now: DateTime<Utc>,
    ) -> Result<Self, MutationError>;

    fn touch(&mut self, now: DateTime<Utc>);

    /// Ordering key for mirror lists. Records without a schedule keep
    /// their insertion order.
    fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Returns `existing` with `patch` applied, leaving `existing` untouched.
pub fn merge_record<R: Record>(existing: &R, patch: &R::Patch) -> R {
    let mut merged = existing.clone();
    merged.apply(patch);
    merged
}

/// Stable sort by scheduled date ascending, undated records last.
pub fn sort_by_schedule<R: Record>(records: &mut [R]) {
    records.sort_by(|a, b| compare_schedule(a.scheduled_at(), b.scheduled_at()));
}

/// Dated before undated; undated compare equal so stable sorts keep their order.
pub(crate) fn compare_schedule<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub(crate) fn required<'a, T>(
    value: &'a Option<T>,
    id: i64,
    field: &'static str,
) -> Result<&'a T, MutationError> {
    value.as_ref().ok_or(MutationError::Incomplete { id, field })
}

/// Applies a plain optional patch field.
pub(crate) fn set<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}
