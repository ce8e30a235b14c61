pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY NOT NULL,
    username TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    request_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_users_last_seen ON users(last_seen);

CREATE TABLE IF NOT EXISTS chat_groups (
    chat_id INTEGER PRIMARY KEY NOT NULL,
    title TEXT,
    chat_type TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_active INTEGER NOT NULL
);
"#;
