use sqlx::{Executor, Pool, Row, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;

/// Bumped whenever `CURRENT_SCHEMA` changes shape.
pub const SCHEMA_VERSION: i64 = 1;

pub const CURRENT_SCHEMA: &str = r#"
PRAGMA foreign_keys = 1;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL DEFAULT '',
    display_name TEXT,
    is_superuser BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS user_groups (
    user_id INTEGER NOT NULL,
    group_name TEXT NOT NULL CHECK (group_name IN ('department_head', 'teacher')),
    PRIMARY KEY (user_id, group_name),
    FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS user_sessions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    token TEXT NOT NULL UNIQUE,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    expires_at TIMESTAMP NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS departments (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS semesters (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    year INTEGER NOT NULL DEFAULT 2024,
    term TEXT NOT NULL DEFAULT 'Fall' CHECK (term IN ('Fall', 'Spring', 'Summer'))
);

CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY,
    user_id INTEGER UNIQUE,
    student_number TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    department_id INTEGER,
    FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE,
    FOREIGN KEY (department_id) REFERENCES departments (id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS courses (
    id INTEGER PRIMARY KEY,
    teacher_id INTEGER,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    semester_id INTEGER NOT NULL,
    FOREIGN KEY (teacher_id) REFERENCES users (id) ON DELETE SET NULL,
    FOREIGN KEY (semester_id) REFERENCES semesters (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS program_outcomes (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS learning_outcomes (
    id INTEGER PRIMARY KEY,
    course_id INTEGER NOT NULL,
    code TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    FOREIGN KEY (course_id) REFERENCES courses (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS outcome_mappings (
    id INTEGER PRIMARY KEY,
    learning_outcome_id INTEGER NOT NULL,
    program_outcome_id INTEGER NOT NULL,
    weight REAL NOT NULL,
    FOREIGN KEY (learning_outcome_id) REFERENCES learning_outcomes (id) ON DELETE CASCADE,
    FOREIGN KEY (program_outcome_id) REFERENCES program_outcomes (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS assessments (
    id INTEGER PRIMARY KEY,
    course_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    weight INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (course_id) REFERENCES courses (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS assessment_weights (
    id INTEGER PRIMARY KEY,
    assessment_id INTEGER NOT NULL,
    learning_outcome_id INTEGER NOT NULL,
    percentage REAL NOT NULL,
    FOREIGN KEY (assessment_id) REFERENCES assessments (id) ON DELETE CASCADE,
    FOREIGN KEY (learning_outcome_id) REFERENCES learning_outcomes (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS student_scores (
    id INTEGER PRIMARY KEY,
    student_id INTEGER NOT NULL,
    assessment_id INTEGER NOT NULL,
    score REAL NOT NULL,
    UNIQUE (student_id, assessment_id),
    FOREIGN KEY (student_id) REFERENCES students (id) ON DELETE CASCADE,
    FOREIGN KEY (assessment_id) REFERENCES assessments (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS enrollments (
    id INTEGER PRIMARY KEY,
    student_id INTEGER NOT NULL,
    course_id INTEGER NOT NULL,
    enrolled_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (student_id, course_id),
    FOREIGN KEY (student_id) REFERENCES students (id) ON DELETE CASCADE,
    FOREIGN KEY (course_id) REFERENCES courses (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_learning_outcomes_course ON learning_outcomes (course_id);
CREATE INDEX IF NOT EXISTS idx_assessments_course ON assessments (course_id);
CREATE INDEX IF NOT EXISTS idx_assessment_weights_lo ON assessment_weights (learning_outcome_id);
CREATE INDEX IF NOT EXISTS idx_outcome_mappings_po ON outcome_mappings (program_outcome_id);
CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments (course_id);
"#;

/// Applies `CURRENT_SCHEMA` and stamps `user_version`. Returns true when the
/// database was freshly initialised.
#[instrument(skip(pool))]
pub async fn apply_schema(pool: &Pool<Sqlite>) -> Result<bool, AppError> {
    let current_version = sqlx::query("PRAGMA user_version")
        .fetch_one(pool)
        .await?
        .get::<i64, _>(0);

    if current_version > SCHEMA_VERSION {
        return Err(AppError::Internal(format!(
            "Database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    let mut tx = pool.begin().await?;
    tx.execute(sqlx::raw_sql(CURRENT_SCHEMA)).await?;
    tx.execute(sqlx::raw_sql(&format!("PRAGMA user_version = {}", SCHEMA_VERSION)))
        .await?;
    tx.commit().await?;

    if current_version == 0 {
        info!(version = SCHEMA_VERSION, "Initialised database schema");
    } else {
        info!(version = SCHEMA_VERSION, "Database schema up to date");
    }

    Ok(current_version == 0)
}
