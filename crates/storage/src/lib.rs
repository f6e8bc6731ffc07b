use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use group_lifecycle::ConversationStore;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use shared::{
    domain::{
        CipherSuite, ConversationId, ConversationKind, Epoch, GroupId, GroupLifecycleState,
        ProtocolInfo, UserId,
    },
    error::StorageFailure,
    protocol::{ConversationResponse, ProtocolTag},
};

/// SQLite-backed conversation metadata store.
///
/// Epochs never move backwards for a given group id: applying remote
/// state clamps the epoch to the stored maximum unless the group id
/// itself changed (a reset allocates a fresh group that legitimately
/// starts over).
#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: Pool<Sqlite>,
}

impl SqliteConversationStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id_value                    TEXT NOT NULL,
                id_domain                   TEXT NOT NULL,
                kind                        TEXT NOT NULL,
                protocol                    TEXT NOT NULL,
                group_id                    TEXT,
                group_state                 TEXT,
                epoch                       INTEGER NOT NULL DEFAULT 0,
                cipher_suite                INTEGER,
                keying_material_last_update TEXT,
                PRIMARY KEY (id_value, id_domain)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure conversations table exists")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_members (
                conversation_value  TEXT NOT NULL,
                conversation_domain TEXT NOT NULL,
                user_value          TEXT NOT NULL,
                user_domain         TEXT NOT NULL,
                PRIMARY KEY (conversation_value, conversation_domain, user_value, user_domain)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure conversation_members table exists")?;

        Ok(())
    }
}

fn generic(err: impl Into<anyhow::Error>) -> StorageFailure {
    StorageFailure::Generic(err.into())
}

fn kind_to_str(kind: ConversationKind) -> &'static str {
    match kind {
        ConversationKind::SelfConversation => "self",
        ConversationKind::OneOnOne => "one_on_one",
        ConversationKind::Group => "group",
    }
}

fn kind_from_str(raw: &str) -> Result<ConversationKind, StorageFailure> {
    match raw {
        "self" => Ok(ConversationKind::SelfConversation),
        "one_on_one" => Ok(ConversationKind::OneOnOne),
        "group" => Ok(ConversationKind::Group),
        other => Err(generic(anyhow!("unknown conversation kind '{other}'"))),
    }
}

fn state_to_str(state: GroupLifecycleState) -> &'static str {
    match state {
        GroupLifecycleState::PendingCreation => "pending_creation",
        GroupLifecycleState::PendingJoin => "pending_join",
        GroupLifecycleState::PendingWelcomeMessage => "pending_welcome_message",
        GroupLifecycleState::PendingAfterReset => "pending_after_reset",
        GroupLifecycleState::Established => "established",
    }
}

fn state_from_str(raw: &str) -> Result<GroupLifecycleState, StorageFailure> {
    match raw {
        "pending_creation" => Ok(GroupLifecycleState::PendingCreation),
        "pending_join" => Ok(GroupLifecycleState::PendingJoin),
        "pending_welcome_message" => Ok(GroupLifecycleState::PendingWelcomeMessage),
        "pending_after_reset" => Ok(GroupLifecycleState::PendingAfterReset),
        "established" => Ok(GroupLifecycleState::Established),
        other => Err(generic(anyhow!("unknown group state '{other}'"))),
    }
}

struct ConversationColumns {
    protocol: String,
    group_id: Option<String>,
    group_state: Option<String>,
    epoch: i64,
    cipher_suite: Option<i64>,
    keying_material_last_update: Option<DateTime<Utc>>,
}

impl ConversationColumns {
    fn into_protocol_info(self) -> Result<ProtocolInfo, StorageFailure> {
        match self.protocol.as_str() {
            "proteus" => Ok(ProtocolInfo::Proteus),
            "mls" => {
                let group_id = self
                    .group_id
                    .ok_or_else(|| generic(anyhow!("mls conversation row without group id")))?;
                let group_state = self
                    .group_state
                    .ok_or_else(|| generic(anyhow!("mls conversation row without group state")))?;
                Ok(ProtocolInfo::Mls {
                    group_id: GroupId(group_id),
                    group_state: state_from_str(&group_state)?,
                    epoch: Epoch(self.epoch as u64),
                    cipher_suite: CipherSuite(self.cipher_suite.unwrap_or(0) as u16),
                    keying_material_last_update: self
                        .keying_material_last_update
                        .unwrap_or_else(Utc::now),
                })
            }
            other => Err(generic(anyhow!("unknown protocol '{other}'"))),
        }
    }
}

fn protocol_columns(info: &ProtocolInfo) -> ConversationColumns {
    match info {
        ProtocolInfo::Proteus => ConversationColumns {
            protocol: "proteus".to_string(),
            group_id: None,
            group_state: None,
            epoch: 0,
            cipher_suite: None,
            keying_material_last_update: None,
        },
        ProtocolInfo::Mls {
            group_id,
            group_state,
            epoch,
            cipher_suite,
            keying_material_last_update,
        } => ConversationColumns {
            protocol: "mls".to_string(),
            group_id: Some(group_id.0.clone()),
            group_state: Some(state_to_str(*group_state).to_string()),
            epoch: i64::try_from(epoch.0).unwrap_or(i64::MAX),
            cipher_suite: Some(cipher_suite.0 as i64),
            keying_material_last_update: Some(*keying_material_last_update),
        },
    }
}

/// Columns a freshly fetched `ConversationResponse` contributes to the
/// local record. `group_state` defaults to `PendingJoin` when the
/// server is silent; the engine advances it as it joins or establishes
/// the group.
fn response_columns(response: &ConversationResponse) -> ConversationColumns {
    match response.protocol {
        ProtocolTag::Proteus => ConversationColumns {
            protocol: "proteus".to_string(),
            group_id: None,
            group_state: None,
            epoch: 0,
            cipher_suite: None,
            keying_material_last_update: None,
        },
        ProtocolTag::Mls => ConversationColumns {
            protocol: "mls".to_string(),
            group_id: response.group_id_b64.clone(),
            group_state: Some(
                state_to_str(
                    response
                        .group_state
                        .unwrap_or(GroupLifecycleState::PendingJoin),
                )
                .to_string(),
            ),
            epoch: i64::try_from(response.epoch).unwrap_or(i64::MAX),
            cipher_suite: response.cipher_suite.map(|suite| suite as i64),
            keying_material_last_update: Some(Utc::now()),
        },
    }
}

async fn replace_members(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    conversation: &ConversationId,
    members: &[UserId],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "DELETE FROM conversation_members WHERE conversation_value = ? AND conversation_domain = ?",
    )
    .bind(&conversation.value)
    .bind(&conversation.domain)
    .execute(&mut **tx)
    .await?;

    for member in members {
        sqlx::query(
            "INSERT INTO conversation_members (conversation_value, conversation_domain, user_value, user_domain)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&conversation.value)
        .bind(&conversation.domain)
        .bind(&member.value)
        .bind(&member.domain)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn protocol_info(
        &self,
        conversation: &ConversationId,
    ) -> Result<ProtocolInfo, StorageFailure> {
        let row = sqlx::query(
            "SELECT protocol, group_id, group_state, epoch, cipher_suite, keying_material_last_update
             FROM conversations
             WHERE id_value = ? AND id_domain = ?",
        )
        .bind(&conversation.value)
        .bind(&conversation.domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(generic)?;

        let row = row.ok_or(StorageFailure::NotFound)?;
        ConversationColumns {
            protocol: row.get::<String, _>(0),
            group_id: row.get::<Option<String>, _>(1),
            group_state: row.get::<Option<String>, _>(2),
            epoch: row.get::<i64, _>(3),
            cipher_suite: row.get::<Option<i64>, _>(4),
            keying_material_last_update: row.get::<Option<DateTime<Utc>>, _>(5),
        }
        .into_protocol_info()
    }

    async fn set_protocol_info(
        &self,
        conversation: &ConversationId,
        info: &ProtocolInfo,
    ) -> Result<(), StorageFailure> {
        let columns = protocol_columns(info);
        let updated = sqlx::query(
            "UPDATE conversations
             SET protocol = ?, group_id = ?, group_state = ?, epoch = ?, cipher_suite = ?, keying_material_last_update = ?
             WHERE id_value = ? AND id_domain = ?",
        )
        .bind(&columns.protocol)
        .bind(&columns.group_id)
        .bind(&columns.group_state)
        .bind(columns.epoch)
        .bind(columns.cipher_suite)
        .bind(columns.keying_material_last_update)
        .bind(&conversation.value)
        .bind(&conversation.domain)
        .execute(&self.pool)
        .await
        .map_err(generic)?
        .rows_affected();

        if updated == 0 {
            return Err(StorageFailure::NotFound);
        }
        Ok(())
    }

    async fn set_group_state(
        &self,
        conversation: &ConversationId,
        state: GroupLifecycleState,
    ) -> Result<(), StorageFailure> {
        let updated = sqlx::query(
            "UPDATE conversations
             SET group_state = ?
             WHERE id_value = ? AND id_domain = ? AND protocol = 'mls'",
        )
        .bind(state_to_str(state))
        .bind(&conversation.value)
        .bind(&conversation.domain)
        .execute(&self.pool)
        .await
        .map_err(generic)?
        .rows_affected();

        if updated == 0 {
            return Err(StorageFailure::NotFound);
        }
        Ok(())
    }

    async fn kind(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationKind, StorageFailure> {
        let row = sqlx::query("SELECT kind FROM conversations WHERE id_value = ? AND id_domain = ?")
            .bind(&conversation.value)
            .bind(&conversation.domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(generic)?;

        let row = row.ok_or(StorageFailure::NotFound)?;
        kind_from_str(&row.get::<String, _>(0))
    }

    async fn members(&self, conversation: &ConversationId) -> Result<Vec<UserId>, StorageFailure> {
        let rows = sqlx::query(
            "SELECT user_value, user_domain
             FROM conversation_members
             WHERE conversation_value = ? AND conversation_domain = ?
             ORDER BY user_domain ASC, user_value ASC",
        )
        .bind(&conversation.value)
        .bind(&conversation.domain)
        .fetch_all(&self.pool)
        .await
        .map_err(generic)?;

        Ok(rows
            .into_iter()
            .map(|row| UserId::new(row.get::<String, _>(0), row.get::<String, _>(1)))
            .collect())
    }

    async fn set_members(
        &self,
        conversation: &ConversationId,
        members: &[UserId],
    ) -> Result<(), StorageFailure> {
        let mut tx = self.pool.begin().await.map_err(generic)?;
        replace_members(&mut tx, conversation, members)
            .await
            .map_err(generic)?;
        tx.commit().await.map_err(generic)?;
        Ok(())
    }

    async fn conversations_by_group_state(
        &self,
        state: GroupLifecycleState,
    ) -> Result<Vec<ConversationId>, StorageFailure> {
        let rows = sqlx::query(
            "SELECT id_value, id_domain
             FROM conversations
             WHERE protocol = 'mls' AND group_state = ?
             ORDER BY id_domain ASC, id_value ASC",
        )
        .bind(state_to_str(state))
        .fetch_all(&self.pool)
        .await
        .map_err(generic)?;

        Ok(rows
            .into_iter()
            .map(|row| ConversationId::new(row.get::<String, _>(0), row.get::<String, _>(1)))
            .collect())
    }

    async fn insert_conversation(
        &self,
        response: &ConversationResponse,
    ) -> Result<(), StorageFailure> {
        let columns = response_columns(response);
        let mut tx = self.pool.begin().await.map_err(generic)?;

        sqlx::query(
            "INSERT INTO conversations
             (id_value, id_domain, kind, protocol, group_id, group_state, epoch, cipher_suite, keying_material_last_update)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&response.id.value)
        .bind(&response.id.domain)
        .bind(kind_to_str(response.kind))
        .bind(&columns.protocol)
        .bind(&columns.group_id)
        .bind(&columns.group_state)
        .bind(columns.epoch)
        .bind(columns.cipher_suite)
        .bind(columns.keying_material_last_update)
        .execute(&mut *tx)
        .await
        .map_err(generic)?;

        replace_members(&mut tx, &response.id, &response.members)
            .await
            .map_err(generic)?;

        tx.commit().await.map_err(generic)?;
        Ok(())
    }

    async fn apply_remote_conversation(
        &self,
        response: &ConversationResponse,
    ) -> Result<(), StorageFailure> {
        let columns = response_columns(response);
        let mut tx = self.pool.begin().await.map_err(generic)?;

        let existing = sqlx::query(
            "SELECT group_id, group_state, epoch, keying_material_last_update
             FROM conversations
             WHERE id_value = ? AND id_domain = ?",
        )
        .bind(&response.id.value)
        .bind(&response.id.domain)
        .fetch_optional(&mut *tx)
        .await
        .map_err(generic)?;

        let (epoch, group_state, keying_material_last_update) = match &existing {
            Some(row) => {
                let stored_group_id = row.get::<Option<String>, _>(0);
                let stored_state = row.get::<Option<String>, _>(1);
                let stored_epoch = row.get::<i64, _>(2);
                let stored_keying = row.get::<Option<DateTime<Utc>>, _>(3);

                let same_group = stored_group_id == columns.group_id;
                let epoch = if same_group {
                    stored_epoch.max(columns.epoch)
                } else {
                    columns.epoch
                };

                // A refetch after reset moves the record back into the
                // join path; otherwise an explicit server state wins
                // and a silent server leaves the local state alone.
                let group_state = match (&response.group_state, stored_state.as_deref()) {
                    (Some(state), _) => Some(state_to_str(*state).to_string()),
                    (None, Some("pending_after_reset")) => {
                        Some(state_to_str(GroupLifecycleState::PendingJoin).to_string())
                    }
                    (None, stored) if same_group => stored.map(str::to_string),
                    (None, _) => columns.group_state.clone(),
                };

                (
                    epoch,
                    group_state,
                    stored_keying.or(columns.keying_material_last_update),
                )
            }
            None => (
                columns.epoch,
                columns.group_state.clone(),
                columns.keying_material_last_update,
            ),
        };

        sqlx::query(
            "INSERT INTO conversations
             (id_value, id_domain, kind, protocol, group_id, group_state, epoch, cipher_suite, keying_material_last_update)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id_value, id_domain) DO UPDATE SET
                kind = excluded.kind,
                protocol = excluded.protocol,
                group_id = excluded.group_id,
                group_state = excluded.group_state,
                epoch = excluded.epoch,
                cipher_suite = excluded.cipher_suite,
                keying_material_last_update = excluded.keying_material_last_update",
        )
        .bind(&response.id.value)
        .bind(&response.id.domain)
        .bind(kind_to_str(response.kind))
        .bind(&columns.protocol)
        .bind(&columns.group_id)
        .bind(&group_state)
        .bind(epoch)
        .bind(columns.cipher_suite)
        .bind(keying_material_last_update)
        .execute(&mut *tx)
        .await
        .map_err(generic)?;

        replace_members(&mut tx, &response.id, &response.members)
            .await
            .map_err(generic)?;

        tx.commit().await.map_err(generic)?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
