//! Test doubles shared by unit tests across modules.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::errors::{RemoteError, StoreError};
use crate::models::{FollowupAction, FollowupType};
use crate::remote::{Method, RemoteApi, RemoteResponse};
use crate::store::LocalStore;

/// A store whose backing medium is gone (quota exhausted, storage disabled).
pub struct BrokenStore;

impl LocalStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("quota exceeded".to_string()))
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }
}

pub fn followup(id: i64, completed: bool) -> FollowupAction {
    FollowupAction {
        id,
        application_id: Some(42),
        contact_id: None,
        followup_type: FollowupType::FollowUp,
        description: format!("Follow up #{id}"),
        due_date: None,
        completed,
        notes: None,
        updated_at: None,
        extra: Map::new(),
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Option<Value>),
    Status(u16),
    /// 2xx whose body is not JSON, as the HTTP adapter reports it.
    Undecodable,
}

impl Reply {
    fn into_result(self) -> Result<RemoteResponse, RemoteError> {
        match self {
            Reply::Ok(body) => Ok(RemoteResponse { status: 200, body }),
            Reply::Status(status) => Err(RemoteError::Api {
                status,
                message: format!("scripted {status}"),
            }),
            Reply::Undecodable => match serde_json::from_str::<Value>("Created") {
                Ok(body) => Ok(RemoteResponse {
                    status: 201,
                    body: Some(body),
                }),
                Err(e) => Err(RemoteError::Decode(e)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Remote that answers from a queue, then from a fallback reply.
pub struct ScriptedRemote {
    queued: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: Mutex<Vec<RecordedCall>>,
    gate: Option<(Arc<Notify>, Hold)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    Gets,
    Writes,
}

impl ScriptedRemote {
    pub fn new(fallback: Reply) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(Reply::Ok(None))
    }

    pub fn failing(status: u16) -> Self {
        Self::new(Reply::Status(status))
    }

    pub fn then(self, reply: Reply) -> Self {
        self.queued.lock().unwrap().push_back(reply);
        self
    }

    /// GET requests pick their reply, then wait for `gate` before answering.
    pub fn hold_gets(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some((gate, Hold::Gets));
        self
    }

    /// Every non-GET request picks its reply, then waits for `gate`.
    pub fn hold_writes(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some((gate, Hold::Writes));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<RemoteResponse, RemoteError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });
        let reply = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if let Some((gate, hold)) = &self.gate {
            let held = match hold {
                Hold::Gets => method == Method::Get,
                Hold::Writes => method != Method::Get,
            };
            if held {
                gate.notified().await;
            }
        }
        reply.into_result()
    }
}
