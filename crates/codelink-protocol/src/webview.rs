//! Webview channel method payloads.
//!
//! The webview namespace is disjoint from the agent namespace and much
//! smaller: editor-state notifications pushed from the host into the
//! panel, and UI-originated requests the host answers itself (reveal a
//! range, read/write a scratch file). Domain requests originating in
//! the webview reuse the agent payload types and pass through the
//! bridge unchanged.

use serde::{Deserialize, Serialize};

use crate::agent::{Position, Range};
use crate::methods::{RpcNotification, RpcRequest};

// ============================================================================
// Editor state notifications (host -> webview)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorSelection {
    pub start: Position,
    pub end: Position,
    pub cursor: Position,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorMetrics {
    pub font_size: u32,
    pub line_height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorInformation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub metrics: EditorMetrics,
    pub selections: Vec<EditorSelection>,
    pub visible_ranges: Vec<Range>,
    pub line_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub selections: Vec<EditorSelection>,
    pub visible_ranges: Vec<Range>,
    pub line_count: u64,
}

impl RpcNotification for DidChangeSelection {
    const METHOD: &'static str = "webview/editor/didChangeSelection";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeVisibleRanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub selections: Vec<EditorSelection>,
    pub visible_ranges: Vec<Range>,
    pub line_count: u64,
}

impl RpcNotification for DidChangeVisibleRanges {
    const METHOD: &'static str = "webview/editor/didChangeVisibleRanges";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidChangeActiveEditor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<EditorInformation>,
}

impl RpcNotification for DidChangeActiveEditor {
    const METHOD: &'static str = "webview/editor/didChangeActive";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodemarkType {
    Comment,
    Issue,
    Link,
}

/// Host gesture opening the new-codemark form in the panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCodemark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub range: Range,
    #[serde(rename = "type")]
    pub codemark_type: CodemarkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RpcNotification for NewCodemark {
    const METHOD: &'static str = "webview/codemark/new";
}

// ============================================================================
// UI-originated host requests (webview -> host)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRangeRequest {
    pub uri: String,
    pub range: Range,
    #[serde(default)]
    pub at_top: bool,
}

impl RpcRequest for RevealRangeRequest {
    const METHOD: &'static str = "host/editor/revealRange";
    type Result = RevealRangeResult;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealRangeResult {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadScratchRequest {
    pub name: String,
}

impl RpcRequest for ReadScratchRequest {
    const METHOD: &'static str = "host/scratch/read";
    type Result = ReadScratchResult;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadScratchResult {
    #[serde(default)]
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteScratchRequest {
    pub name: String,
    pub contents: String,
}

impl RpcRequest for WriteScratchRequest {
    const METHOD: &'static str = "host/scratch/write";
    type Result = WriteScratchResult;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteScratchResult {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_selection_notification_wire_shape() {
        let note = DidChangeSelection {
            uri: Some("file:///a.rs".into()),
            selections: vec![],
            visible_ranges: vec![],
            line_count: 120,
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["uri"], "file:///a.rs");
        assert_eq!(json["visibleRanges"], json!([]));
        assert_eq!(json["lineCount"], 120);
    }

    #[test]
    fn test_new_codemark_type_tag() {
        let note = NewCodemark {
            uri: None,
            range: Range {
                start: Position { line: 0, character: 0 },
                end: Position { line: 0, character: 4 },
            },
            codemark_type: CodemarkType::Issue,
            source: Some("gutter".into()),
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["type"], "issue");
        assert!(json.get("uri").is_none());
    }

    #[test]
    fn test_scratch_read_round_trip() {
        let request: ReadScratchRequest = serde_json::from_value(json!({"name": "draft"})).unwrap();
        assert_eq!(request.name, "draft");
        let result: ReadScratchResult = serde_json::from_value(json!({})).unwrap();
        assert!(result.contents.is_none());
    }
}
