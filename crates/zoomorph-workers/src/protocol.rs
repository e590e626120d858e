//! Messages exchanged between the pool and its workers.
//!
//! Every message is self-contained: model shapes, hyperparameters, batches,
//! and weights travel by value. On the process transport each message is
//! one JSON value per line, externally tagged so nested maps with integer
//! keys decode without buffering.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zoomorph_policy::{LearnOutcome, LearnRequest, ModelSpec, TrainOutput};
use zoomorph_types::EntityId;

use crate::error::WorkerError;

/// Parent-to-worker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Create a learner for `agent_id` and start its handler thread.
    Register {
        /// The agent.
        agent_id: EntityId,
        /// Shape of the agent's model.
        spec: ModelSpec,
    },
    /// Queue one training step for `agent_id`.
    Learn {
        /// The agent.
        agent_id: EntityId,
        /// The request.
        request: LearnRequest,
    },
    /// Stop the handler thread for `agent_id`.
    Unregister {
        /// The agent.
        agent_id: EntityId,
    },
    /// Stop every handler and exit.
    Terminate,
}

/// Worker-to-parent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerReply {
    /// A training step completed.
    Trained {
        /// The agent.
        agent_id: EntityId,
        /// Step result.
        output: TrainOutput,
    },
    /// A command for `agent_id` could not be carried out.
    Failed {
        /// The agent.
        agent_id: EntityId,
        /// Error description.
        message: String,
    },
}

impl WorkerReply {
    /// The agent this reply belongs to.
    pub const fn agent_id(&self) -> EntityId {
        match self {
            Self::Trained { agent_id, .. } | Self::Failed { agent_id, .. } => *agent_id,
        }
    }

    /// Strip the routing header.
    pub fn into_outcome(self) -> LearnOutcome {
        match self {
            Self::Trained { output, .. } => LearnOutcome::Trained(output),
            Self::Failed { message, .. } => LearnOutcome::Failed { message },
        }
    }
}

/// Encode a message as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, WorkerError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON line.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, WorkerError> {
    Ok(serde_json::from_str(line.trim_end())?)
}
