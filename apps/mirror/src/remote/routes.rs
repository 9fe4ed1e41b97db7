use crate::keys::Namespace;
use crate::remote::Method;

/// REST paths for one collection. Client-only namespaces have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    list: String,
    create: String,
}

impl Routes {
    pub fn for_collection(namespace: Namespace, parent: i64) -> Option<Routes> {
        let (list, create) = match namespace {
            Namespace::Applications => {
                let list = "/api/applications".to_string();
                (list.clone(), list)
            }
            Namespace::Contacts => {
                let list = "/api/contacts".to_string();
                (list.clone(), list)
            }
            Namespace::InterviewStages => {
                let list = format!("/api/applications/{parent}/stages");
                (list.clone(), list)
            }
            Namespace::ApplicationFollowups => {
                let list = format!("/api/applications/{parent}/followups");
                (list.clone(), list)
            }
            Namespace::ContactFollowups => (
                format!("/api/contacts/{parent}/followups"),
                format!("/api/contacts/{parent}/schedule-followup"),
            ),
            Namespace::ContactInteractions => {
                let list = format!("/api/contacts/{parent}/interactions");
                (list.clone(), list)
            }
            Namespace::ContactNotes => return None,
        };
        Some(Routes { list, create })
    }

    pub fn list(&self) -> (Method, String) {
        (Method::Get, self.list.clone())
    }

    pub fn create(&self) -> (Method, String) {
        (Method::Post, self.create.clone())
    }

    pub fn update(&self, id: i64) -> (Method, String) {
        (Method::Patch, self.item(id))
    }

    pub fn delete(&self, id: i64) -> (Method, String) {
        (Method::Delete, self.item(id))
    }

    fn item(&self, id: i64) -> String {
        format!("{}/{id}", self.list)
    }
}
