use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub i64);

/// One row per tool invocation. `finished_at == None` marks an invocation
/// that never reached finalization.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommandHistory {
    pub id: CommandId,
    pub started_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    pub tool_version: String,
    pub invocation: String,
    pub pm_command: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

impl CommandHistory {
    pub fn is_interrupted(&self) -> bool {
        self.finished_at.is_none()
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}
