use std::fmt::Display;

use super::message_type;

/// The first message of every exchange, decides what the client wants to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intro {
    BetData,
    RequestWinners,
    Unknown(String),
}

impl From<String> for Intro {
    fn from(token: String) -> Self {
        match token.as_str() {
            message_type::BETDATA => Self::BetData,
            message_type::REQWINN => Self::RequestWinners,
            _ => Self::Unknown(token),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ReplyInternal {
    BatchAck { success: bool, count: usize },
    NoWinners,
    Winners { documents: Vec<String> },
}

// Hide the internal Reply enum to provide a cleaner interface to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub(super) internal: ReplyInternal,
}

impl Reply {
    /// The whole batch was stored
    pub fn batch_stored(count: usize) -> Self {
        Self {
            internal: ReplyInternal::BatchAck {
                success: true,
                count,
            },
        }
    }

    /// The batch was rejected, `attempted` is the number of records it contained
    pub fn batch_rejected(attempted: usize) -> Self {
        Self {
            internal: ReplyInternal::BatchAck {
                success: false,
                count: attempted,
            },
        }
    }

    pub fn no_winners() -> Self {
        Self {
            internal: ReplyInternal::NoWinners,
        }
    }

    pub fn winners(documents: Vec<String>) -> Self {
        Self {
            internal: ReplyInternal::Winners { documents },
        }
    }
}

// The status line sent back for every batch
pub(super) struct BatchStatus {
    pub success: bool,
    pub count: usize,
}

impl Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = if self.success { "success" } else { "fail" };
        write!(
            f,
            "action: apuesta_recibida | result: {} | cantidad: {}",
            result, self.count
        )
    }
}
