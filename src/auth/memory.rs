//! In-process user directory, used when no database is configured and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    repo::{DirectoryError, UserDirectory},
    repo_types::User,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

/// Both maps sit behind one lock so check-and-insert cannot interleave.
#[derive(Default)]
pub struct MemoryUserDirectory {
    tables: RwLock<Tables>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn remove(&self, id: Uuid) -> Option<User> {
        let mut tables = self.tables.write().await;
        let user = tables.users.remove(&id)?;
        tables.by_email.remove(&user.email);
        Some(user)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, DirectoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn insert_if_absent(&self, user: &User) -> Result<(), DirectoryError> {
        let mut tables = self.tables.write().await;
        if tables.by_email.contains_key(&user.email) {
            return Err(DirectoryError::Conflict);
        }
        if tables.users.contains_key(&user.id) {
            return Err(DirectoryError::Backend(anyhow::anyhow!(
                "duplicate user id {}",
                user.id
            )));
        }
        tables.by_email.insert(user.email.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(())
    }
}
