//! Agent modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a conversation is served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentMode {
    /// One shell tool, one bounded loop per request, no server-side state
    /// beyond the sandbox map.
    #[default]
    BashTool,
    /// Five tools in a durable run that suspends between messages.
    Workflow,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::BashTool => "bash-tool",
            AgentMode::Workflow => "workflow",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bash-tool" | "bash" => Ok(AgentMode::BashTool),
            "workflow" => Ok(AgentMode::Workflow),
            other => Err(format!(
                "unknown agent mode '{other}' (expected bash-tool or workflow)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("workflow".parse::<AgentMode>().unwrap(), AgentMode::Workflow);
        assert_eq!("bash".parse::<AgentMode>().unwrap(), AgentMode::BashTool);
        assert!("durable".parse::<AgentMode>().is_err());
        assert_eq!(AgentMode::default().to_string(), "bash-tool");
        assert_eq!(
            serde_json::to_string(&AgentMode::Workflow).unwrap(),
            "\"workflow\""
        );
    }
}
