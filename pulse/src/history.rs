use chrono::{DateTime, Utc};

/// One completed instruction and the summary shown for it.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ConversationTurn {
    pub instruction: String,
    pub response_summary: String,
    pub at: DateTime<Utc>,
}

/// Insertion-ordered instruction history. Every turn is retained for
/// display and export; only the most recent window feeds generation
/// context.
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    window: usize,
}

impl ConversationHistory {
    pub fn new(window: usize) -> Self {
        Self {
            turns: Vec::new(),
            window,
        }
    }

    pub fn push(&mut self, instruction: impl Into<String>, response_summary: impl Into<String>) {
        self.turns.push(ConversationTurn {
            instruction: instruction.into(),
            response_summary: response_summary.into(),
            at: Utc::now(),
        });
    }

    /// The turns inside the context window, oldest first.
    pub fn recent(&self) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(self.window);
        &self.turns[start..]
    }

    /// All turns ever recorded, oldest first.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(3)
    }
}
