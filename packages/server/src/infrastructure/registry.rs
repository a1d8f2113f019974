//! Connection registry: connection id ↔ user id.
//!
//! ## 不変条件
//!
//! - connection id が `users` のいずれかの集合に含まれる ⇔ `connections` に存在する
//! - `users` に空の集合は残らない
//!
//! 2 つのマップは 1 つのロックの下で常に同時に更新します。

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::{
    domain::{ConnectionId, UserId},
    infrastructure::connection::Connection,
};

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    users: HashMap<UserId, HashSet<ConnectionId>>,
}

impl RegistryState {
    /// Remove `id` from its user's set, dropping the set when it empties.
    /// Returns whether the user has no connections left.
    fn detach(&mut self, id: &ConnectionId, user_id: UserId) -> bool {
        let Some(ids) = self.users.get_mut(&user_id) else {
            return true;
        };
        ids.remove(id);
        if ids.is_empty() {
            self.users.remove(&user_id);
            true
        } else {
            false
        }
    }
}

/// Result of removing a registered connection.
#[derive(Debug)]
pub struct Unregistered {
    pub connection: Arc<Connection>,
    /// The removed connection was the user's last one
    pub last_for_user: bool,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its user.
    ///
    /// Returns `true` when this is the user's first open connection.
    pub async fn register(&self, connection: Arc<Connection>) -> bool {
        let id = connection.id();
        let user_id = connection.user_id();
        let mut state = self.state.lock().await;

        if let Some(previous) = state.connections.insert(id, connection) {
            tracing::warn!(connection_id = %id, "Connection registered twice, replacing");
            state.detach(&id, previous.user_id());
        }
        let ids = state.users.entry(user_id).or_default();
        ids.insert(id);
        let first_for_user = ids.len() == 1;

        tracing::debug!(
            connection_id = %id,
            user_id = %user_id,
            "Connection registered ({} open)",
            state.connections.len()
        );
        first_for_user
    }

    /// Remove a connection. Unknown ids are a no-op returning `None`, so the
    /// read-loop exit path and the shutdown path may both call this.
    pub async fn unregister(&self, id: &ConnectionId) -> Option<Unregistered> {
        let mut state = self.state.lock().await;
        let connection = state.connections.remove(id)?;
        let last_for_user = state.detach(id, connection.user_id());

        tracing::debug!(
            connection_id = %id,
            user_id = %connection.user_id(),
            "Connection unregistered ({} open)",
            state.connections.len()
        );
        Some(Unregistered {
            connection,
            last_for_user,
        })
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state.lock().await.users.contains_key(&user_id)
    }

    /// Users with at least one open connection, sorted.
    pub async fn online_users(&self) -> Vec<UserId> {
        let state = self.state.lock().await;
        let mut users: Vec<UserId> = state.users.keys().copied().collect();
        users.sort();
        users
    }

    /// Snapshot of one user's open connections.
    pub async fn connections_of(&self, user_id: UserId) -> Vec<Arc<Connection>> {
        let state = self.state.lock().await;
        state
            .users
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.connections.get(id).cloned())
            .collect()
    }

    /// Snapshot of every open connection.
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.state.lock().await.connections.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.connections.is_empty()
    }

    /// Signal every registered connection to close, holding the lock so no
    /// connection registered concurrently is missed. Writes blocked on a peer
    /// that stopped reading are aborted.
    ///
    /// Returns how many connections were signalled.
    pub async fn close_all(&self) -> usize {
        let state = self.state.lock().await;
        for connection in state.connections.values() {
            connection.request_close();
        }
        state.connections.len()
    }

    #[cfg(test)]
    pub(crate) async fn check_invariants(&self) -> Result<(), String> {
        let state = self.state.lock().await;
        for (user_id, ids) in &state.users {
            if ids.is_empty() {
                return Err(format!("user {} has an empty connection set", user_id));
            }
            for id in ids {
                match state.connections.get(id) {
                    Some(connection) if connection.user_id() == *user_id => {}
                    Some(_) => return Err(format!("{} indexed under the wrong user", id)),
                    None => return Err(format!("{} indexed but not registered", id)),
                }
            }
        }
        for (id, connection) in &state.connections {
            let indexed = state
                .users
                .get(&connection.user_id())
                .is_some_and(|ids| ids.contains(id));
            if !indexed {
                return Err(format!("{} registered but not indexed", id));
            }
        }
        Ok(())
    }
}
