//! Contract of the remote persistence service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::markup::Markup;
use crate::scope::{LinkOption, LinkedContext, LinkedType};

/// Body of `PUT /markups`. Both scope fields are `null` for document-level
/// markups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupsPayload {
    pub linked_type: Option<LinkedType>,
    pub linked_id: Option<i64>,
    pub markups: Vec<Markup>,
}

impl MarkupsPayload {
    pub fn new(scope: Option<LinkedContext>, markups: Vec<Markup>) -> Self {
        Self {
            linked_type: scope.map(|s| s.linked_type),
            linked_id: scope.map(|s| s.linked_id),
            markups,
        }
    }

    pub fn scope(&self) -> Option<LinkedContext> {
        match (self.linked_type, self.linked_id) {
            (Some(linked_type), Some(linked_id)) => Some(LinkedContext::new(linked_type, linked_id)),
            _ => None,
        }
    }
}

/// Body of `POST /save-document`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScopeBody {
    pub linked_type: Option<LinkedType>,
    pub linked_id: Option<i64>,
}

impl From<Option<LinkedContext>> for ScopeBody {
    fn from(scope: Option<LinkedContext>) -> Self {
        Self {
            linked_type: scope.map(|s| s.linked_type),
            linked_id: scope.map(|s| s.linked_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    #[serde(default)]
    pub saved_at: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: u64,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub original_name: Option<String>,
}

/// `GET /document` response: the document plus the scopes linked to it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub document: DocumentRecord,
    #[serde(default)]
    pub linked: Vec<LinkOption>,
}

#[async_trait]
pub trait PersistenceApi: Send + Sync {
    async fn document(&self) -> Result<DocumentInfo, ApiError>;

    async fn fetch_file(&self) -> Result<Vec<u8>, ApiError>;

    async fn fetch_markups(&self, scope: Option<LinkedContext>) -> Result<Vec<Markup>, ApiError>;

    async fn put_markups(&self, payload: &MarkupsPayload) -> Result<(), ApiError>;

    /// Asks the service to flatten the scope's markups into the document.
    async fn save_document(&self, scope: Option<LinkedContext>) -> Result<(), ApiError>;

    async fn history(&self, scope: Option<LinkedContext>) -> Result<Vec<HistoryEntry>, ApiError>;

    async fn restore(&self, version: u64, scope: Option<LinkedContext>) -> Result<(), ApiError>;

    /// Fire-and-forget flush used on teardown. Must not block and reports
    /// nothing back.
    fn send_beacon(&self, payload: MarkupsPayload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_level_payload_sends_nulls() {
        let payload = MarkupsPayload::new(None, Vec::new());
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value["linked_type"].is_null());
        assert!(value["linked_id"].is_null());
        assert_eq!(payload.scope(), None);
    }

    #[test]
    fn linked_payload_round_trips_scope() {
        let scope = LinkedContext::new(LinkedType::Project, 7);
        let payload = MarkupsPayload::new(Some(scope), Vec::new());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["linked_type"], "project");
        assert_eq!(value["linked_id"], 7);
        assert_eq!(payload.scope(), Some(scope));
    }

    #[test]
    fn document_info_tolerates_missing_links() {
        let info: DocumentInfo =
            serde_json::from_str(r#"{"document": {"id": 3, "filename": "a.pdf"}}"#).unwrap();
        assert_eq!(info.document.id, 3);
        assert!(info.linked.is_empty());
    }
}
