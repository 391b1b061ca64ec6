/// Turn gating state for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnMode {
    /// Not turn based; any agent may act.
    #[default]
    None,
    /// Turn based. Holds the key last issued to this agent by the server.
    Gated(String),
}

impl TurnMode {
    /// Interpret a key received on the wire. The server sends an empty key
    /// when the mission is not turn based.
    pub fn from_key(key: impl Into<String>) -> Self {
        let key = key.into();
        if key.is_empty() {
            TurnMode::None
        } else {
            TurnMode::Gated(key)
        }
    }

    /// The key to present with the next step; empty when not gated.
    pub fn key(&self) -> &str {
        match self {
            TurnMode::None => "",
            TurnMode::Gated(key) => key,
        }
    }

    pub fn is_gated(&self) -> bool {
        matches!(self, TurnMode::Gated(_))
    }
}
