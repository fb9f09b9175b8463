//! Relational store for users, sessions, conversations, and messages.
//!
//! All functions take the pool directly and use raw SQL with bound
//! parameters. Invariants enforced here:
//! - at most one active session per user (creation deactivates the rest)
//! - one conversation per (user, session) pair, created atomically
//! - messages are append-only and ordered by timestamp
//! - profile merges never overwrite a populated field with an empty one

use anyhow::{bail, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Conversation, Document, Message, User, UserSession};
use crate::profile::ExtractedProfile;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============ Users ============

/// Fetch a user, creating an empty record if none exists.
pub async fn ensure_user(pool: &SqlitePool, user_id: &str) -> Result<User> {
    if let Some(user) = get_user(pool, user_id).await? {
        return Ok(user);
    }

    let now = now_ms();
    sqlx::query(
        "INSERT OR IGNORE INTO users (id, preferences_json, created_at, updated_at, is_active)
         VALUES (?, '{}', ?, ?, 1)",
    )
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_user(pool, user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User {} missing after insert", user_id))
}

pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, name, email, phone, company, role, preferences_json,
                created_at, updated_at, is_active
         FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        company: row.get("company"),
        role: row.get("role"),
        preferences: serde_json::from_str(&row.get::<String, _>("preferences_json"))
            .unwrap_or_else(|_| Value::Object(Default::default())),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        is_active: row.get::<i64, _>("is_active") != 0,
    }))
}

/// Merge extracted profile attributes into a user record.
///
/// Non-empty extracted values win over stored ones; empty or missing
/// values never erase what is already known. Emails are lowercased.
/// Preferences merge key-by-key. Returns the updated user.
pub async fn apply_profile(
    pool: &SqlitePool,
    user_id: &str,
    profile: &ExtractedProfile,
) -> Result<User> {
    let current = ensure_user(pool, user_id).await?;

    let pick = |extracted: &Option<String>, stored: &Option<String>| -> Option<String> {
        match extracted.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Some(v.to_string()),
            _ => stored.clone(),
        }
    };

    let name = pick(&profile.name, &current.name);
    let email = pick(&profile.email, &current.email).map(|e| e.to_lowercase());
    let phone = pick(&profile.phone, &current.phone);
    let company = pick(&profile.company, &current.company);
    let role = pick(&profile.role, &current.role);

    let mut preferences = match current.preferences {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    for (key, value) in &profile.preferences {
        preferences.insert(key.clone(), value.clone());
    }

    sqlx::query(
        "UPDATE users SET name = ?, email = ?, phone = ?, company = ?, role = ?,
                          preferences_json = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&name)
    .bind(&email)
    .bind(&phone)
    .bind(&company)
    .bind(&role)
    .bind(Value::Object(preferences).to_string())
    .bind(now_ms())
    .bind(user_id)
    .execute(pool)
    .await?;

    get_user(pool, user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User {} missing after update", user_id))
}

// ============ Sessions ============

/// Create a fresh session, deactivating any other active sessions for the
/// user in the same transaction.
pub async fn create_session(
    pool: &SqlitePool,
    user_id: &str,
    session_hours: i64,
) -> Result<UserSession> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE user_sessions SET is_active = 0 WHERE user_id = ? AND is_active = 1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let id = Uuid::new_v4().to_string();
    let token = Uuid::new_v4().to_string();
    let now = now_ms();
    let expires_at = now + session_hours * 3_600_000;

    sqlx::query(
        "INSERT INTO user_sessions (id, user_id, token, created_at, expires_at, is_active)
         VALUES (?, ?, ?, ?, ?, 1)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(&token)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(UserSession {
        id,
        user_id: user_id.to_string(),
        token,
        created_at: now,
        expires_at,
        is_active: true,
    })
}

/// Find the user's active, unexpired session and extend its expiry, or
/// create a new one. Expired active sessions are deactivated on the way.
pub async fn ensure_session(
    pool: &SqlitePool,
    user_id: &str,
    session_hours: i64,
) -> Result<UserSession> {
    let now = now_ms();

    sqlx::query(
        "UPDATE user_sessions SET is_active = 0
         WHERE user_id = ? AND is_active = 1 AND expires_at <= ?",
    )
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await?;

    // Earliest-created wins if duplicates ever exist.
    let row = sqlx::query(
        "SELECT id, user_id, token, created_at, expires_at, is_active
         FROM user_sessions
         WHERE user_id = ? AND is_active = 1
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = row {
        let expires_at = now + session_hours * 3_600_000;
        let id: String = row.get("id");
        sqlx::query("UPDATE user_sessions SET expires_at = ? WHERE id = ?")
            .bind(expires_at)
            .bind(&id)
            .execute(pool)
            .await?;

        return Ok(UserSession {
            id,
            user_id: row.get("user_id"),
            token: row.get("token"),
            created_at: row.get("created_at"),
            expires_at,
            is_active: true,
        });
    }

    create_session(pool, user_id, session_hours).await
}

/// Deactivate every expired session across all users. Returns the count.
pub async fn cleanup_expired_sessions(pool: &SqlitePool) -> Result<u64> {
    let result =
        sqlx::query("UPDATE user_sessions SET is_active = 0 WHERE is_active = 1 AND expires_at <= ?")
            .bind(now_ms())
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

pub async fn active_sessions(pool: &SqlitePool, user_id: &str) -> Result<Vec<UserSession>> {
    let rows = sqlx::query(
        "SELECT id, user_id, token, created_at, expires_at, is_active
         FROM user_sessions WHERE user_id = ? AND is_active = 1
         ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| UserSession {
            id: row.get("id"),
            user_id: row.get("user_id"),
            token: row.get("token"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            is_active: true,
        })
        .collect())
}

// ============ Conversations ============

/// Fetch the conversation for a (user, session) pair, creating it if
/// absent. `INSERT OR IGNORE` against the UNIQUE pair makes racing turns
/// converge on one row.
pub async fn find_or_create_conversation(
    pool: &SqlitePool,
    user_id: &str,
    session_id: &str,
) -> Result<Conversation> {
    let id = Uuid::new_v4().to_string();
    // Session ids are caller-supplied; truncate on char boundaries.
    let short: String = session_id.chars().take(8).collect();
    let title = format!("Chat Session {}", short);
    let now = now_ms();

    sqlx::query(
        "INSERT OR IGNORE INTO conversations
             (id, user_id, session_id, title, status, created_at, updated_at)
         VALUES (?, ?, ?, ?, 'active', ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(session_id)
    .bind(&title)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT id, user_id, session_id, title, category, status, created_at, updated_at
         FROM conversations WHERE user_id = ? AND session_id = ?",
    )
    .bind(user_id)
    .bind(session_id)
    .fetch_one(pool)
    .await?;

    Ok(Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        title: row.get("title"),
        category: row.get("category"),
        status: row.get("status"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Move a conversation to `active`, `resolved`, or `unresolved`.
pub async fn set_status(pool: &SqlitePool, conversation_id: &str, status: &str) -> Result<()> {
    if !matches!(status, "active" | "resolved" | "unresolved") {
        bail!("Invalid conversation status: {}", status);
    }
    sqlx::query("UPDATE conversations SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now_ms())
        .bind(conversation_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Last-turn-wins category update; also bumps `updated_at`.
pub async fn set_category(pool: &SqlitePool, conversation_id: &str, category: &str) -> Result<()> {
    sqlx::query("UPDATE conversations SET category = ?, updated_at = ? WHERE id = ?")
        .bind(category)
        .bind(now_ms())
        .bind(conversation_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a user's conversations and their messages. Returns the number
/// of conversations removed.
pub async fn clear_user_conversations(pool: &SqlitePool, user_id: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM messages WHERE conversation_id IN
             (SELECT id FROM conversations WHERE user_id = ?)",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM conversations WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected())
}

// ============ Messages ============

pub async fn append_message(
    pool: &SqlitePool,
    conversation_id: &str,
    role: &str,
    content: &str,
    metadata: &Value,
) -> Result<Message> {
    let id = Uuid::new_v4().to_string();
    let now = now_ms();

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, role, content, metadata_json, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(conversation_id)
    .bind(role)
    .bind(content)
    .bind(metadata.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(conversation_id)
        .execute(pool)
        .await?;

    Ok(Message {
        id,
        conversation_id: conversation_id.to_string(),
        role: role.to_string(),
        content: content.to_string(),
        metadata: metadata.clone(),
        timestamp: now,
    })
}

/// The most recent `limit` messages, returned oldest-first.
pub async fn recent_messages(
    pool: &SqlitePool,
    conversation_id: &str,
    limit: i64,
) -> Result<Vec<Message>> {
    let rows = sqlx::query(
        "SELECT id, conversation_id, role, content, metadata_json, timestamp
         FROM messages WHERE conversation_id = ?
         ORDER BY timestamp DESC, rowid DESC LIMIT ?",
    )
    .bind(conversation_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut messages: Vec<Message> = rows
        .into_iter()
        .map(|row| Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            role: row.get("role"),
            content: row.get("content"),
            metadata: serde_json::from_str(&row.get::<String, _>("metadata_json"))
                .unwrap_or(Value::Null),
            timestamp: row.get("timestamp"),
        })
        .collect();
    messages.reverse();
    Ok(messages)
}

pub async fn message_count(pool: &SqlitePool, conversation_id: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE conversation_id = ?")
        .bind(conversation_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

// ============ Documents ============

/// Current (active) knowledge-base documents, newest first.
pub async fn active_documents(pool: &SqlitePool) -> Result<Vec<Document>> {
    let rows = sqlx::query(
        "SELECT id, filename, content_type, file_size, metadata_json,
                created_at, indexed_at, is_active
         FROM documents WHERE is_active = 1
         ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Document {
            id: row.get("id"),
            filename: row.get("filename"),
            content_type: row.get("content_type"),
            file_size: row.get("file_size"),
            metadata: serde_json::from_str(&row.get::<String, _>("metadata_json"))
                .unwrap_or(Value::Null),
            created_at: row.get("created_at"),
            indexed_at: row.get("indexed_at"),
            is_active: true,
        })
        .collect())
}

// ============ Stats ============

#[derive(Debug, serde::Serialize)]
pub struct StoreStats {
    pub users: i64,
    pub conversations: i64,
    pub messages: i64,
    pub active_documents: i64,
    pub categories: Vec<(String, i64)>,
}

pub async fn stats(pool: &SqlitePool) -> Result<StoreStats> {
    let users: i64 = sqlx::query("SELECT COUNT(*) AS n FROM users")
        .fetch_one(pool)
        .await?
        .get("n");
    let conversations: i64 = sqlx::query("SELECT COUNT(*) AS n FROM conversations")
        .fetch_one(pool)
        .await?
        .get("n");
    let messages: i64 = sqlx::query("SELECT COUNT(*) AS n FROM messages")
        .fetch_one(pool)
        .await?
        .get("n");
    let active_documents: i64 =
        sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE is_active = 1")
            .fetch_one(pool)
            .await?
            .get("n");

    let category_rows = sqlx::query(
        "SELECT category, COUNT(*) AS n FROM conversations
         WHERE category IS NOT NULL GROUP BY category ORDER BY n DESC",
    )
    .fetch_all(pool)
    .await?;
    let categories = category_rows
        .into_iter()
        .map(|row| (row.get::<String, _>("category"), row.get::<i64, _>("n")))
        .collect();

    Ok(StoreStats {
        users,
        conversations,
        messages,
        active_documents,
        categories,
    })
}
