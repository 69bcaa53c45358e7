//! Encrypted connection persistence
//!
//! All registered calendar connections live in a single JSON blob under the
//! `calendar_connections` key of an injected [`KeyValueStore`]. Token fields
//! (access and refresh tokens) are encrypted with an injected [`TokenCipher`]
//! before serialization and decrypted on load; everything else is stored in
//! the clear so the blob stays inspectable.

use std::sync::Arc;

use calbridge_common::{KeyValueStore, TokenCipher};
use calbridge_domain::constants::CONNECTIONS_STORE_KEY;
use calbridge_domain::{CalendarConnection, CalendarError, Result};
use tracing::{debug, warn};

/// Persistence layer for calendar connections with token-at-rest encryption.
pub struct ConnectionStore {
    store: Arc<dyn KeyValueStore>,
    cipher: Arc<dyn TokenCipher>,
}

impl std::fmt::Debug for ConnectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStore").finish_non_exhaustive()
    }
}

impl ConnectionStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, cipher: Arc<dyn TokenCipher>) -> Self {
        Self { store, cipher }
    }

    async fn encrypt_connection(&self, conn: &CalendarConnection) -> Result<CalendarConnection> {
        let mut sealed = conn.clone();
        sealed.tokens.access_token = self
            .cipher
            .encrypt(&conn.tokens.access_token)
            .await
            .map_err(|e| CalendarError::Storage(format!("token encryption failed: {e}")))?;
        if let Some(refresh) = &conn.tokens.refresh_token {
            sealed.tokens.refresh_token = Some(
                self.cipher
                    .encrypt(refresh)
                    .await
                    .map_err(|e| CalendarError::Storage(format!("token encryption failed: {e}")))?,
            );
        }
        Ok(sealed)
    }

    async fn decrypt_connection(&self, mut conn: CalendarConnection) -> Result<CalendarConnection> {
        conn.tokens.access_token = self
            .cipher
            .decrypt(&conn.tokens.access_token)
            .await
            .map_err(|e| CalendarError::Storage(format!("token decryption failed: {e}")))?;
        if let Some(refresh) = conn.tokens.refresh_token.take() {
            conn.tokens.refresh_token = Some(
                self.cipher
                    .decrypt(&refresh)
                    .await
                    .map_err(|e| CalendarError::Storage(format!("token decryption failed: {e}")))?,
            );
        }
        Ok(conn)
    }

    async fn read_raw(&self) -> Result<Vec<CalendarConnection>> {
        let blob = self
            .store
            .get(CONNECTIONS_STORE_KEY)
            .await
            .map_err(|e| CalendarError::Storage(e.to_string()))?;
        match blob {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(vec![]),
        }
    }

    async fn write_raw(&self, connections: &[CalendarConnection]) -> Result<()> {
        let json = serde_json::to_string(connections)?;
        self.store
            .put(CONNECTIONS_STORE_KEY, &json)
            .await
            .map_err(|e| CalendarError::Storage(e.to_string()))
    }

    /// Load every stored connection with tokens decrypted.
    ///
    /// A connection whose tokens fail to decrypt (key rotation, corrupted
    /// blob) is skipped with a warning rather than poisoning the whole load.
    ///
    /// # Errors
    /// Fails when the backing store cannot be read or the blob is not valid
    /// JSON.
    pub async fn load_all(&self) -> Result<Vec<CalendarConnection>> {
        let raw = self.read_raw().await?;
        let mut connections = Vec::with_capacity(raw.len());
        for conn in raw {
            let id = conn.id.clone();
            match self.decrypt_connection(conn).await {
                Ok(conn) => connections.push(conn),
                Err(err) => {
                    warn!(connection_id = %id, error = %err, "skipping undecryptable connection");
                }
            }
        }
        debug!(count = connections.len(), "loaded calendar connections");
        Ok(connections)
    }

    /// Insert or replace a connection by id.
    ///
    /// # Errors
    /// Fails when encryption or the backing store fails.
    pub async fn save(&self, conn: &CalendarConnection) -> Result<()> {
        let sealed = self.encrypt_connection(conn).await?;
        let mut all = self.read_raw().await?;
        match all.iter_mut().find(|existing| existing.id == conn.id) {
            Some(existing) => *existing = sealed,
            None => all.push(sealed),
        }
        self.write_raw(&all).await?;
        debug!(connection_id = %conn.id, provider = %conn.provider, "persisted connection");
        Ok(())
    }

    /// Fetch one connection by id with tokens decrypted.
    ///
    /// # Errors
    /// Returns `ConnectionNotFound` when no connection has the id.
    pub async fn get(&self, id: &str) -> Result<CalendarConnection> {
        let raw = self.read_raw().await?;
        let conn = raw
            .into_iter()
            .find(|conn| conn.id == id)
            .ok_or_else(|| CalendarError::ConnectionNotFound(id.to_string()))?;
        self.decrypt_connection(conn).await
    }

    /// Remove a connection by id. Removing an unknown id is a no-op.
    ///
    /// # Errors
    /// Fails when the backing store cannot be read or written.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut all = self.read_raw().await?;
        let before = all.len();
        all.retain(|conn| conn.id != id);
        if all.len() != before {
            self.write_raw(&all).await?;
            debug!(connection_id = %id, "removed connection");
        }
        Ok(())
    }
}
