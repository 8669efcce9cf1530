use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dataset_permissions (
    id           TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    dataset_id   TEXT NOT NULL,                -- FK -> datasets(id)
    teacher_id   TEXT NOT NULL,
    teacher_name TEXT NOT NULL,
    granted_by   TEXT NOT NULL,
    granted_at   TEXT NOT NULL,

    UNIQUE (dataset_id, teacher_id),
    FOREIGN KEY (dataset_id) REFERENCES datasets(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS saved_chats (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    dataset_id TEXT NOT NULL,                  -- FK -> datasets(id)
    title      TEXT NOT NULL,
    created_by TEXT NOT NULL,                  -- display name
    user_id    TEXT NOT NULL,                  -- creator id
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (dataset_id) REFERENCES datasets(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_saved_chats_dataset
    ON saved_chats(dataset_id, created_at DESC);

CREATE TABLE IF NOT EXISTS chat_messages (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    chat_id    TEXT NOT NULL,                  -- FK -> saved_chats(id)
    question   TEXT NOT NULL,
    answer     TEXT NOT NULL,
    citations  TEXT NOT NULL DEFAULT '[]',     -- JSON array
    order_num  INTEGER NOT NULL,               -- dense 1..N
    created_at TEXT NOT NULL,

    UNIQUE (chat_id, order_num),
    FOREIGN KEY (chat_id) REFERENCES saved_chats(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
