//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `topics`, `topic_assignments` and `datasets`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Topics (teacher-authored)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS topics (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    title         TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    created_by_id TEXT NOT NULL,               -- external user id
    created_by    TEXT NOT NULL,               -- display name at creation
    created_at    TEXT NOT NULL,               -- RFC-3339
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_topics_creator
    ON topics(created_by_id, created_at DESC);

-- ----------------------------------------------------------------
-- Topic assignments (one row per student per topic)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS topic_assignments (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    topic_id       TEXT NOT NULL,              -- FK -> topics(id)
    student_id     TEXT NOT NULL,
    student_name   TEXT NOT NULL,
    assigned_by    TEXT NOT NULL,              -- display name of the teacher
    assigned_by_id TEXT NOT NULL,
    assigned_at    TEXT NOT NULL,

    UNIQUE (topic_id, student_id),
    FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_assignments_student
    ON topic_assignments(student_id, assigned_at DESC);

-- ----------------------------------------------------------------
-- Datasets (student-owned documents)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS datasets (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    user_id       TEXT NOT NULL,               -- owner
    author        TEXT NOT NULL,               -- owner display name
    title         TEXT NOT NULL,
    file_path     TEXT NOT NULL,               -- blob store path
    status        TEXT NOT NULL DEFAULT 'active', -- 'active' | 'deleted'
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    indexed_at    TEXT,                        -- NULL until indexing succeeds
    topic_id      TEXT,
    assignment_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_datasets_owner
    ON datasets(user_id, status, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_datasets_topic
    ON datasets(user_id, topic_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
