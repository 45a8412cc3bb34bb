//! Named agents that take part in team conversations.

use serde::Serialize;

/// A backend agent the client knows how to label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Agent {
    pub name: &'static str,
    pub role: &'static str,
}

/// The default team roster.
pub const DEFAULT_AGENTS: &[Agent] = &[
    Agent { name: "Mike", role: "Team Leader" },
    Agent { name: "Emma", role: "Product Manager" },
    Agent { name: "Bob", role: "Architect" },
    Agent { name: "Alex", role: "Engineer" },
    Agent { name: "David", role: "Data Analyst" },
];

/// Look up an agent by name, ignoring case.
pub fn find_agent(name: &str) -> Option<&'static Agent> {
    DEFAULT_AGENTS
        .iter()
        .find(|agent| agent.name.eq_ignore_ascii_case(name))
}
