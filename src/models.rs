use anyhow::Error;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct Department {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    Fall,
    Spring,
    Summer,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Fall => "Fall",
            Term::Spring => "Spring",
            Term::Summer => "Summer",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Fall" => Ok(Term::Fall),
            "Spring" => Ok(Term::Spring),
            "Summer" => Ok(Term::Summer),
            _ => Err(Error::msg(format!("Unknown term: {}", s))),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Semester {
    pub id: i64,
    pub name: String,
    pub year: i64,
    pub term: Term,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbSemester {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub year: Option<i64>,
    pub term: Option<String>,
}

impl From<DbSemester> for Semester {
    fn from(db: DbSemester) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            year: db.year.unwrap_or(2024),
            term: db
                .term
                .as_deref()
                .and_then(|t| Term::from_str(t).ok())
                .unwrap_or(Term::Fall),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Student {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbStudent {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub student_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
}

impl From<DbStudent> for Student {
    fn from(db: DbStudent) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id,
            username: db.username,
            student_number: db.student_number.unwrap_or_default(),
            first_name: db.first_name.unwrap_or_default(),
            last_name: db.last_name.unwrap_or_default(),
            department_id: db.department_id,
            department_name: db.department_name,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub semester_id: i64,
    pub semester_name: String,
    pub teacher_id: Option<i64>,
    pub teacher_name: Option<String>, // Denormalized for display
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCourse {
    pub id: Option<i64>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub semester_id: Option<i64>,
    pub semester_name: Option<String>,
    pub teacher_id: Option<i64>,
    pub teacher_name: Option<String>,
}

impl From<DbCourse> for Course {
    fn from(db: DbCourse) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            code: db.code.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            semester_id: db.semester_id.unwrap_or_default(),
            semester_name: db.semester_name.unwrap_or_default(),
            teacher_id: db.teacher_id,
            teacher_name: db.teacher_name,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct ProgramOutcome {
    pub id: i64,
    pub code: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct LearningOutcome {
    pub id: i64,
    pub course_id: i64,
    pub course_code: String,
    pub code: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct OutcomeMapping {
    pub id: i64,
    pub learning_outcome_id: i64,
    pub program_outcome_id: i64,
    pub program_outcome_code: String,
    pub weight: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Assessment {
    pub id: i64,
    pub course_id: i64,
    pub course_code: String,
    pub name: String,
    pub weight: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbAssessment {
    pub id: Option<i64>,
    pub course_id: Option<i64>,
    pub course_code: Option<String>,
    pub name: Option<String>,
    pub weight: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbAssessment> for Assessment {
    fn from(db: DbAssessment) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            course_code: db.course_code.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            weight: db.weight.unwrap_or_default(),
            created_at: to_utc(db.created_at),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct AssessmentWeight {
    pub id: i64,
    pub assessment_id: i64,
    pub learning_outcome_id: i64,
    pub learning_outcome_code: String,
    pub percentage: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct StudentScore {
    pub id: i64,
    pub student_id: i64,
    pub assessment_id: i64,
    pub score: f64,
}

/// A score joined with the student and assessment it belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct ScoreDetail {
    pub student_id: i64,
    pub student_number: String,
    pub student_name: String,
    pub assessment_id: i64,
    pub assessment_name: String,
    pub assessment_weight: i64,
    pub course_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub score: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub student_number: String,
    pub student_name: String,
    pub course_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbEnrollment {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub student_number: Option<String>,
    pub student_name: Option<String>,
    pub course_id: Option<i64>,
    pub course_code: Option<String>,
    pub course_name: Option<String>,
    pub enrolled_at: Option<NaiveDateTime>,
}

impl From<DbEnrollment> for Enrollment {
    fn from(db: DbEnrollment) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            student_number: db.student_number.unwrap_or_default(),
            student_name: db.student_name.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            course_code: db.course_code.unwrap_or_default(),
            course_name: db.course_name.unwrap_or_default(),
            enrolled_at: to_utc(db.enrolled_at),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct StaffMember {
    pub id: i64,
    pub username: String,
    pub display_name: String,
}

/// Stored rows reachable from one student's roll-up scope.
#[derive(Debug, Clone, Default)]
pub struct OutcomeRows {
    pub learning_outcomes: Vec<LearningOutcome>,
    pub assessment_weights: Vec<AssessmentWeight>,
    pub mappings: Vec<OutcomeMapping>,
    pub program_outcomes: Vec<ProgramOutcome>,
    pub scores: Vec<StudentScore>,
}
