//! Учёт пользователей и групп + агрегированная статистика.
//!
//! Каждая операция — один атомарный SQL-запрос (upsert через `ON CONFLICT`),
//! поэтому параллельные вызовы с одним ключом не теряют обновления и не плодят дубликаты.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::SCHEMA;

/// `request_count` при обычном касании не меняется (`+ 0`), считаются только успешные поиски.
const TOUCH_INCREMENT: i64 = 0;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("usage store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

/// Одно входящее событие. `chat_title` имеет смысл только для не-приватных чатов.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub user_id: i64,
    pub display_name: String,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub chat_title: Option<String>,
}

impl Interaction {
    pub fn private(user_id: i64, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            chat_id: user_id,
            chat_kind: ChatKind::Private,
            chat_title: None,
        }
    }

    pub fn in_chat(
        user_id: i64,
        display_name: impl Into<String>,
        chat_id: i64,
        chat_kind: ChatKind,
        chat_title: Option<String>,
    ) -> Self {
        let chat_title = if chat_kind == ChatKind::Private { None } else { chat_title };
        Self { user_id, display_name: display_name.into(), chat_id, chat_kind, chat_title }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub total_users: i64,
    pub total_groups: i64,
    pub total_requests: i64,
    pub active_last_24h: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UsageStore {
    pool: SqlitePool,
}

impl UsageStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // in-memory база живёт, пока жив её единственный коннект
        let in_memory = database_url.contains(":memory:");
        let options = if in_memory {
            SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        info!(in_memory, "usage store ready");
        Ok(Self { pool })
    }

    pub async fn record_interaction(&self, interaction: &Interaction) -> Result<()> {
        self.record_interaction_at(interaction, Utc::now()).await
    }

    /// Upsert пользователя (и группы для не-приватных чатов).
    /// `first_seen`/имя/тип пишутся только при вставке, `last_seen`/`last_active` — всегда.
    pub async fn record_interaction_at(&self, interaction: &Interaction, now: DateTime<Utc>) -> Result<()> {
        let ts = now.timestamp_millis();

        sqlx::query(
            r#"INSERT INTO users (user_id, username, first_seen, last_seen, request_count)
               VALUES (?, ?, ?, ?, 0)
               ON CONFLICT(user_id) DO UPDATE SET
                 last_seen = excluded.last_seen,
                 request_count = users.request_count + ?"#,
        )
        .bind(interaction.user_id)
        .bind(&interaction.display_name)
        .bind(ts)
        .bind(ts)
        .bind(TOUCH_INCREMENT)
        .execute(&self.pool)
        .await?;

        if interaction.chat_kind != ChatKind::Private {
            sqlx::query(
                r#"INSERT INTO chat_groups (chat_id, title, chat_type, first_seen, last_active)
                   VALUES (?, ?, ?, ?, ?)
                   ON CONFLICT(chat_id) DO UPDATE SET
                     last_active = excluded.last_active"#,
            )
            .bind(interaction.chat_id)
            .bind(interaction.chat_title.as_deref())
            .bind(interaction.chat_kind.as_str())
            .bind(ts)
            .bind(ts)
            .execute(&self.pool)
            .await?;
        }

        debug!(
            user_id = interaction.user_id,
            chat_id = interaction.chat_id,
            chat_type = interaction.chat_kind.as_str(),
            "interaction recorded"
        );
        Ok(())
    }

    pub async fn increment_request_count(&self, user_id: i64) -> Result<()> {
        self.increment_request_count_at(user_id, Utc::now()).await
    }

    /// +1 к счётчику успешных запросов и обновление `last_seen`.
    /// Незнакомого пользователя не создаёт.
    pub async fn increment_request_count_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<()> {
        let res = sqlx::query(
            "UPDATE users SET request_count = request_count + 1, last_seen = ? WHERE user_id = ?",
        )
        .bind(now.timestamp_millis())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            debug!(user_id, "request count not incremented: unknown user");
        }
        Ok(())
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        self.statistics_at(Utc::now()).await
    }

    /// Все четыре агрегата читаются одним запросом.
    pub async fn statistics_at(&self, now: DateTime<Utc>) -> Result<Statistics> {
        let since = (now - Duration::hours(24)).timestamp_millis();

        let (total_users, total_groups, total_requests, active_last_24h): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"SELECT
                     (SELECT COUNT(*) FROM users),
                     (SELECT COUNT(*) FROM chat_groups),
                     (SELECT COALESCE(SUM(request_count), 0) FROM users),
                     (SELECT COUNT(*) FROM users WHERE last_seen >= ?)"#,
            )
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        Ok(Statistics { total_users, total_groups, total_requests, active_last_24h, timestamp: now })
    }

    /// Закрывает пул; повторный вызов безопасен.
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("usage store closed");
        }
    }
}

/* ====== Чтение записей обратно (нужно только тестам) ====== */
