//! Outstanding tagged requests.
//!
//! Every request expecting a tagged reply gets an entry keyed by its message
//! tag. An entry leaves the table exactly once: matched by a reply, expired
//! by the timeout sweep or cancelled at teardown. Responders always learn
//! which of the three happened.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::core::Node;
use crate::error::{constants, ProtocolError, Result};

/// What a pending tag is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `admin/init`, answered with the server ref
    Login,
    Status,
    RestoreSession,
    /// Text JSON request
    Query,
    /// Encrypted node request
    Binary,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Login => "login",
            RequestKind::Status => "status",
            RequestKind::RestoreSession => "restore_session",
            RequestKind::Query => "query",
            RequestKind::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// Body of a matched reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json(Value),
    Text(String),
    Node(Node),
}

pub type Responder = oneshot::Sender<Result<Reply>>;

#[derive(Debug)]
pub struct PendingRequest {
    pub kind: RequestKind,
    pub sent_at: Instant,
    responder: Option<Responder>,
}

impl PendingRequest {
    /// Deliver the outcome. A dropped receiver is not an error.
    pub fn resolve(self, outcome: Result<Reply>) {
        if let Some(responder) = self.responder {
            let _ = responder.send(outcome);
        }
    }

    #[cfg(test)]
    fn has_responder(&self) -> bool {
        self.responder.is_some()
    }
}

/// Tag-keyed table owned by one session.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<String, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        tag: impl Into<String>,
        kind: RequestKind,
        sent_at: Instant,
        responder: Option<Responder>,
    ) -> Result<()> {
        let tag = tag.into();
        if self.entries.contains_key(&tag) {
            return Err(ProtocolError::InvalidState(format!(
                "{}: {tag}",
                constants::ERR_DUPLICATE_TAG
            )));
        }
        self.entries.insert(
            tag,
            PendingRequest {
                kind,
                sent_at,
                responder,
            },
        );
        Ok(())
    }

    /// Remove and return the entry for `tag`.
    pub fn take(&mut self, tag: &str) -> Option<PendingRequest> {
        self.entries.remove(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    #[cfg(test)]
    fn kind_of(&self, tag: &str) -> Option<RequestKind> {
        self.entries.get(tag).map(|entry| entry.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries older than `timeout`, failing them with `RequestTimeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<(String, RequestKind)> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.sent_at) >= timeout)
            .map(|(tag, _)| tag.clone())
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for tag in expired {
            if let Some(entry) = self.entries.remove(&tag) {
                let kind = entry.kind;
                entry.resolve(Err(ProtocolError::RequestTimeout(tag.clone())));
                out.push((tag, kind));
            }
        }
        out
    }

    /// Fail every entry with `RequestCancelled` and empty the table.
    pub fn cancel_all(&mut self) -> Vec<(String, RequestKind)> {
        self.entries
            .drain()
            .map(|(tag, entry)| {
                let kind = entry.kind;
                entry.resolve(Err(ProtocolError::RequestCancelled(tag.clone())));
                (tag, kind)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_tag_rejected() {
        let mut table = PendingRequests::new();
        let now = Instant::now();
        table.insert("1.--0", RequestKind::Login, now, None).unwrap();
        assert!(matches!(
            table.insert("1.--0", RequestKind::Query, now, None),
            Err(ProtocolError::InvalidState(_))
        ));
        assert_eq!(table.kind_of("1.--0"), Some(RequestKind::Login));
    }

    #[test]
    fn test_take_removes_entry() {
        let mut table = PendingRequests::new();
        let (tx, mut rx) = oneshot::channel();
        table
            .insert("t", RequestKind::Query, Instant::now(), Some(tx))
            .unwrap();
        let entry = table.take("t").unwrap();
        assert!(entry.has_responder());
        assert!(table.take("t").is_none());
        entry.resolve(Ok(Reply::Text("ok".into())));
        assert_eq!(rx.try_recv().unwrap().unwrap(), Reply::Text("ok".into()));
    }

    #[test]
    fn test_expire_only_old_entries() {
        let mut table = PendingRequests::new();
        let start = Instant::now();
        let (tx, mut rx) = oneshot::channel();
        table
            .insert("old", RequestKind::Status, start, Some(tx))
            .unwrap();
        table
            .insert(
                "new",
                RequestKind::Query,
                start + Duration::from_secs(20),
                None,
            )
            .unwrap();

        let expired = table.expire(start + Duration::from_secs(30), Duration::from_secs(30));
        assert_eq!(expired, vec![("old".to_string(), RequestKind::Status)]);
        assert!(table.contains("new"));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ProtocolError::RequestTimeout(tag)) if tag == "old"
        ));
    }

    #[test]
    fn test_cancel_all_reports_every_entry() {
        let mut table = PendingRequests::new();
        let (tx, mut rx) = oneshot::channel();
        let now = Instant::now();
        table.insert("a", RequestKind::Binary, now, Some(tx)).unwrap();
        table.insert("b", RequestKind::Login, now, None).unwrap();

        let cancelled = table.cancel_all();
        assert_eq!(cancelled.len(), 2);
        assert!(table.is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ProtocolError::RequestCancelled(_))
        ));
    }
}
