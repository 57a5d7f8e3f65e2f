//! Wire types for the wrapped tool's JSON-over-stdio control protocol.
//!
//! One JSON object per line on the tool's stdout/stdin, exactly as
//! specified: `control_request`/`control_cancel_request` flow tool → bridge,
//! `control_response` flows bridge → tool.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound frame from the wrapped tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ToolFrame {
    #[serde(rename = "control_request")]
    ControlRequest {
        request_id: String,
        request: ControlRequestBody,
    },
    #[serde(rename = "control_cancel_request")]
    ControlCancelRequest { request_id: String },
}

/// The body of a `control_request`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequestBody {
    pub subtype: String,
    pub tool_name: String,
    pub input: Value,
}

/// Outbound frame sent back to the wrapped tool.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "control_response")]
pub struct ControlResponse {
    pub response: ControlResponseBody,
}

/// `subtype: success|error` plus either a `PermissionResult` or an error
/// string.
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponseBody {
    pub subtype: ResponseSubtype,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<PermissionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSubtype {
    Success,
    Error,
}

/// The tool's expected answer shape for a permission decision.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionResult {
    pub behavior: Behavior,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Allow,
    Deny,
}

impl ControlResponse {
    #[must_use]
    pub fn success(request_id: String, result: PermissionResult) -> Self {
        Self {
            response: ControlResponseBody {
                subtype: ResponseSubtype::Success,
                request_id,
                response: Some(result),
                error: None,
            },
        }
    }

    #[must_use]
    pub fn error(request_id: String, message: String) -> Self {
        Self {
            response: ControlResponseBody {
                subtype: ResponseSubtype::Error,
                request_id,
                response: None,
                error: Some(message),
            },
        }
    }

    /// Serialize as a single newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> crate::Result<String> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }
}

/// The tool name that the bridge treats as §4.3's question flow; everything
/// else in `can_use_tool` requests maps to the approval queue.
pub const ASK_USER_QUESTION_TOOL: &str = "AskUserQuestion";

/// Shell-tool names whose `type` field is reported as the `"bash"`
/// semantic category, rather than the stdio protocol's constant
/// `subtype` discriminator.
pub const SHELL_TOOLS: &[&str] = &["Bash", "bash", "Shell", "Execute"];

/// Destructive bash primitives (spec.md §4.6) whose exact command text
/// MUST NOT be echoed into an approval's `title`/`command` fields. An
/// ordinary command like `npm install` surfaces in full; these don't.
pub const DESTRUCTIVE_COMMAND_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "mkfs",
    "dd if=",
    "dd of=",
    ":(){ :|:& };:",
    "> /dev/sd",
    "chmod -r 777 /",
    "shutdown",
    "reboot",
    "drop table",
    "delete from",
];

/// Case-insensitive substring match against `DESTRUCTIVE_COMMAND_PATTERNS`.
#[must_use]
pub fn is_destructive_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    DESTRUCTIVE_COMMAND_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Map a tool name to the semantic `type` category an `ApprovalRequest`
/// carries, per spec.md §3 (`type` distinguishes request kinds, not the
/// stdio protocol's constant `can_use_tool` subtype).
#[must_use]
pub fn approval_kind(tool_name: &str) -> String {
    if SHELL_TOOLS.contains(&tool_name) {
        "bash".to_string()
    } else {
        match tool_name {
            "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => "file".to_string(),
            other => other.to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_request() {
        let line = r#"{"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"}}}"#;
        let frame: ToolFrame = serde_json::from_str(line).unwrap();
        match frame {
            ToolFrame::ControlRequest { request_id, request } => {
                assert_eq!(request_id, "r1");
                assert_eq!(request.tool_name, "Bash");
            }
            ToolFrame::ControlCancelRequest { .. } => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_control_cancel_request() {
        let line = r#"{"type":"control_cancel_request","request_id":"r1"}"#;
        let frame: ToolFrame = serde_json::from_str(line).unwrap();
        assert!(matches!(frame, ToolFrame::ControlCancelRequest { request_id } if request_id == "r1"));
    }

    #[test]
    fn success_response_serializes_expected_shape() {
        let response = ControlResponse::success(
            "r1".into(),
            PermissionResult {
                behavior: Behavior::Allow,
                updated_input: Some(serde_json::json!({"command": "ls"})),
                message: None,
            },
        );
        let line = response.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"behavior\":\"allow\""));
    }

    #[test]
    fn approval_kind_maps_shell_tools_to_bash() {
        assert_eq!(approval_kind("Bash"), "bash");
        assert_eq!(approval_kind("Shell"), "bash");
    }

    #[test]
    fn approval_kind_falls_back_to_lowercase_tool_name() {
        assert_eq!(approval_kind("RunScript"), "runscript");
    }

    #[test]
    fn destructive_command_detection_is_case_insensitive() {
        assert!(is_destructive_command("RM -RF /"));
        assert!(is_destructive_command("sudo rm -rf /var"));
        assert!(!is_destructive_command("npm install"));
    }
}
