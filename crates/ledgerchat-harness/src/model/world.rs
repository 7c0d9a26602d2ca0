//! Model world.
//!
//! Chatrooms are plain message lists and membership is a set per chatroom.
//! There is no ledger, no cryptography and no concurrency: every send lands
//! at the end of its chatroom immediately.

use std::collections::BTreeSet;

use super::operation::{ClientId, ModelRoomId, Operation, OperationError, OperationResult};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelChatroom {
    members: BTreeSet<ClientId>,
    messages: Vec<String>,
}

/// Reference implementation for model-based tests.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    num_clients: usize,
    chatrooms: Vec<ModelChatroom>,
}

impl ModelWorld {
    /// World with `num_clients` members and no chatrooms.
    pub fn new(num_clients: usize) -> Self {
        Self { num_clients, chatrooms: Vec::new() }
    }

    /// Number of clients.
    pub fn num_clients(&self) -> usize {
        self.num_clients
    }

    /// Number of chatrooms created.
    pub fn num_chatrooms(&self) -> usize {
        self.chatrooms.len()
    }

    /// Messages of every chatroom in creation order.
    pub fn messages(&self) -> Vec<Vec<String>> {
        self.chatrooms.iter().map(|c| c.messages.clone()).collect()
    }

    /// Resolve a generated chatroom index.
    pub fn resolve(&self, room: ModelRoomId) -> Option<usize> {
        (!self.chatrooms.is_empty()).then(|| usize::from(room) % self.chatrooms.len())
    }

    /// Apply an operation and return its result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::CreateChatroom { client_id, invite } => {
                if !self.is_client(*client_id) {
                    return OperationResult::Error(OperationError::InvalidClient);
                }
                let mut members: BTreeSet<_> = (0..self.num_clients)
                    .filter(|i| *i < 8 && invite & (1 << i) != 0)
                    .filter_map(|i| ClientId::try_from(i).ok())
                    .collect();
                members.insert(*client_id);
                self.chatrooms.push(ModelChatroom { members, messages: Vec::new() });
                OperationResult::Ok
            },
            Operation::SendMessage { client_id, room, content } => {
                let index = match self.authorize(*client_id, *room) {
                    Ok(index) => index,
                    Err(e) => return OperationResult::Error(e),
                };
                let text = content.to_text();
                if text.trim().is_empty() {
                    return OperationResult::Error(OperationError::EmptyMessage);
                }
                self.chatrooms[index].messages.push(text);
                OperationResult::Ok
            },
            Operation::ReadHistory { client_id, room, .. } => {
                match self.authorize(*client_id, *room) {
                    Ok(index) => OperationResult::History(self.chatrooms[index].messages.clone()),
                    Err(e) => OperationResult::Error(e),
                }
            },
            Operation::Revoke { client_id, room } => {
                if !self.is_client(*client_id) {
                    return OperationResult::Error(OperationError::InvalidClient);
                }
                let Some(index) = self.resolve(*room) else {
                    return OperationResult::Error(OperationError::ChatroomNotFound);
                };
                self.chatrooms[index].members.remove(client_id);
                OperationResult::Ok
            },
        }
    }

    fn is_client(&self, client_id: ClientId) -> bool {
        usize::from(client_id) < self.num_clients
    }

    fn authorize(&self, client_id: ClientId, room: ModelRoomId) -> Result<usize, OperationError> {
        if !self.is_client(client_id) {
            return Err(OperationError::InvalidClient);
        }
        let index = self.resolve(room).ok_or(OperationError::ChatroomNotFound)?;
        if !self.chatrooms[index].members.contains(&client_id) {
            return Err(OperationError::NotAuthorized);
        }
        Ok(index)
    }
}
