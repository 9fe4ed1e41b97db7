//! Typed key registry.
//!
//! Every local-mirror key and every query key the mirror publishes is
//! derived here, so storage keys, REST paths and invalidation topics for a
//! given collection cannot drift apart.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;

use crate::models::{
    Application, ContactInteraction, ContactNote, FollowupAction, InterviewStage,
    NetworkingContact, Owner, Record,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Applications,
    InterviewStages,
    ApplicationFollowups,
    Contacts,
    ContactFollowups,
    ContactInteractions,
    ContactNotes,
}

impl Namespace {
    pub const ALL: [Namespace; 7] = [
        Namespace::Applications,
        Namespace::InterviewStages,
        Namespace::ApplicationFollowups,
        Namespace::Contacts,
        Namespace::ContactFollowups,
        Namespace::ContactInteractions,
        Namespace::ContactNotes,
    ];

    /// Storage key prefix, including the separator.
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Applications => "mockApplications_",
            Namespace::InterviewStages => "mockInterviewStages_",
            Namespace::ApplicationFollowups => "mockFollowups_",
            Namespace::Contacts => "mockContacts_",
            Namespace::ContactFollowups => "mockContactFollowups_",
            Namespace::ContactInteractions => "mockInteractions_",
            Namespace::ContactNotes => "notes.",
        }
    }

    pub fn storage_key(&self, parent: i64) -> String {
        format!("{}{}", self.prefix(), parent)
    }

    /// Inverse of [`Namespace::storage_key`]. Unrelated keys yield `None`.
    pub fn parse_key(key: &str) -> Option<(Namespace, i64)> {
        Namespace::ALL.iter().find_map(|ns| {
            key.strip_prefix(ns.prefix())
                .and_then(|rest| rest.parse::<i64>().ok())
                .map(|parent| (*ns, parent))
        })
    }

    pub fn owner(&self, parent: i64) -> Owner {
        match self {
            Namespace::Applications | Namespace::Contacts => Owner::Account(parent),
            Namespace::InterviewStages | Namespace::ApplicationFollowups => {
                Owner::Application(parent)
            }
            Namespace::ContactFollowups
            | Namespace::ContactInteractions
            | Namespace::ContactNotes => Owner::Contact(parent),
        }
    }

    /// Queries that must re-fetch after this namespace changes for `parent`.
    /// `record` narrows top-level collections to the touched detail view.
    pub fn dependent_queries(&self, parent: i64, record: Option<i64>) -> Vec<QueryKey> {
        let mut keys = match self {
            Namespace::Applications => vec![QueryKey::applications()],
            Namespace::Contacts => vec![QueryKey::contacts(), QueryKey::followups_needed()],
            Namespace::InterviewStages => vec![
                QueryKey::application(parent).child("stages"),
                QueryKey::application(parent),
                QueryKey::applications(),
                QueryKey::upcoming_interviews(),
            ],
            Namespace::ApplicationFollowups => vec![
                QueryKey::application(parent).child("followups"),
                QueryKey::application(parent),
                QueryKey::applications(),
                QueryKey::followups_needed(),
            ],
            Namespace::ContactFollowups => vec![
                QueryKey::contact(parent).child("followups"),
                QueryKey::contact(parent),
                QueryKey::contacts(),
                QueryKey::followups_needed(),
            ],
            Namespace::ContactInteractions => vec![
                QueryKey::contact(parent).child("interactions"),
                QueryKey::contact(parent),
                QueryKey::contacts(),
                QueryKey::recent_contacts(),
            ],
            Namespace::ContactNotes => vec![
                QueryKey::contact(parent).child("notes"),
                QueryKey::contact(parent),
                QueryKey::contacts(),
            ],
        };
        if let Some(id) = record {
            match self {
                Namespace::Applications => keys.insert(0, QueryKey::application(id)),
                Namespace::Contacts => keys.insert(0, QueryKey::contact(id)),
                _ => {}
            }
        }
        keys
    }
}

/// A namespace bound to a parent id and to the record type it stores.
/// Constructors are the only way to build one, so a follow-up collection
/// can never be read as interview stages.
#[derive(Debug)]
pub struct Collection<R> {
    namespace: Namespace,
    parent: i64,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Collection<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Collection<R> {}

impl<R: Record> Collection<R> {
    fn new(namespace: Namespace, parent: i64) -> Self {
        Collection {
            namespace,
            parent,
            _record: PhantomData,
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn parent(&self) -> i64 {
        self.parent
    }

    pub fn owner(&self) -> Owner {
        self.namespace.owner(self.parent)
    }

    pub fn storage_key(&self) -> String {
        self.namespace.storage_key(self.parent)
    }

    pub fn list_query(&self) -> QueryKey {
        self.namespace
            .dependent_queries(self.parent, None)
            .into_iter()
            .next()
            .unwrap_or_else(QueryKey::root)
    }
}

impl Collection<Application> {
    pub fn applications(account: i64) -> Self {
        Collection::new(Namespace::Applications, account)
    }
}

impl Collection<InterviewStage> {
    pub fn interview_stages(application: i64) -> Self {
        Collection::new(Namespace::InterviewStages, application)
    }
}

impl Collection<FollowupAction> {
    pub fn application_followups(application: i64) -> Self {
        Collection::new(Namespace::ApplicationFollowups, application)
    }

    pub fn contact_followups(contact: i64) -> Self {
        Collection::new(Namespace::ContactFollowups, contact)
    }
}

impl Collection<NetworkingContact> {
    pub fn contacts(account: i64) -> Self {
        Collection::new(Namespace::Contacts, account)
    }
}

impl Collection<ContactInteraction> {
    pub fn interactions(contact: i64) -> Self {
        Collection::new(Namespace::ContactInteractions, contact)
    }
}

impl Collection<ContactNote> {
    pub fn notes(contact: i64) -> Self {
        Collection::new(Namespace::ContactNotes, contact)
    }
}

/// Opaque query-key tuple. A subscriber registered under `k` hears every
/// publication of a key that starts with `k`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn root() -> Self {
        QueryKey(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryKey(segments.into_iter().map(Into::into).collect())
    }

    pub fn applications() -> Self {
        QueryKey::new(["applications"])
    }

    pub fn application(id: i64) -> Self {
        QueryKey::new(["applications".to_string(), id.to_string()])
    }

    pub fn contacts() -> Self {
        QueryKey::new(["contacts"])
    }

    pub fn contact(id: i64) -> Self {
        QueryKey::new(["contacts".to_string(), id.to_string()])
    }

    pub fn followups_needed() -> Self {
        QueryKey::new(["followups", "needed"])
    }

    pub fn upcoming_interviews() -> Self {
        QueryKey::new(["interviews", "upcoming"])
    }

    pub fn recent_contacts() -> Self {
        QueryKey::new(["contacts", "recent"])
    }

    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}
