use crate::{
    auth::{CourseScope, DbUser, DbUserSession, Group, User, UserSession},
    error::AppError,
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::models::{
    Assessment, AssessmentWeight, Course, DbAssessment, DbCourse, DbEnrollment, DbSemester,
    DbStudent, Department, Enrollment, LearningOutcome, OutcomeMapping, OutcomeRows,
    ProgramOutcome, ScoreDetail, Semester, StaffMember, Student, StudentScore, Term,
};

// ---------------------------------------------------------------------------
// Users, groups and sessions
// ---------------------------------------------------------------------------

#[instrument]
pub async fn get_identity(pool: &Pool<Sqlite>, user_id: i64) -> Result<User, AppError> {
    info!("Fetching user identity");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT u.id, u.username, u.display_name, u.is_superuser, s.id AS student_id
         FROM users u
         LEFT JOIN students s ON s.user_id = u.id
         WHERE u.id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            user_id
        )));
    };

    let groups = get_user_groups(pool, user_id).await?;
    Ok(row.into_user(&groups))
}

#[instrument]
pub async fn get_user_groups(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<Group>, AppError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT group_name FROM user_groups WHERE user_id = ? ORDER BY group_name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(name,)| Group::from_str(&name).ok())
        .collect())
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<i64>, AppError> {
    let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(id,)| id))
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, password FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some((user_id, hashed)) = row else {
        return Ok(None);
    };

    // A malformed hash is treated as a failed login rather than a server error.
    if !bcrypt::verify(password, &hashed).unwrap_or(false) {
        return Ok(None);
    }

    get_identity(pool, user_id).await.map(Some)
}

/// Creates a login account, and its group membership when one is given, in
/// a single transaction.
#[instrument(skip_all, fields(username))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    display_name: Option<&str>,
    group: Option<Group>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_username(pool, username).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let mut tx = pool.begin().await?;

    let user_id =
        sqlx::query("INSERT INTO users (username, password, display_name) VALUES (?, ?, ?)")
            .bind(username)
            .bind(hashed_password)
            .bind(display_name)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

    if let Some(group) = group {
        add_user_to_group(&mut *tx, user_id, group).await?;
    }

    tx.commit().await?;

    Ok(user_id)
}

#[instrument(skip(executor))]
pub async fn add_user_to_group<'e, E>(
    executor: E,
    user_id: i64,
    group: Group,
) -> Result<(), AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    info!(group = group.as_str(), "Adding user to group");
    sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, group_name) VALUES (?, ?)")
        .bind(user_id)
        .bind(group.as_str())
        .execute(executor)
        .await?;

    Ok(())
}

#[instrument(skip_all, fields(user_id))]
pub async fn update_user_password(
    pool: &Pool<Sqlite>,
    user_id: i64,
    new_password: &str,
) -> Result<(), AppError> {
    info!("Updating user password");
    let hashed_password = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed_password)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Users that can be assigned as a course teacher.
#[instrument]
pub async fn get_staff(pool: &Pool<Sqlite>) -> Result<Vec<StaffMember>, AppError> {
    info!("Getting staff members");
    let rows = sqlx::query_as::<_, StaffMember>(
        "SELECT DISTINCT u.id, u.username, COALESCE(u.display_name, u.username) AS display_name
         FROM users u
         JOIN user_groups g ON g.user_id = u.id
         ORDER BY u.username",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn is_staff(pool: &Pool<Sqlite>, user_id: i64) -> Result<bool, AppError> {
    let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM user_groups WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(row.0 > 0)
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Departments and semesters
// ---------------------------------------------------------------------------

#[instrument]
pub async fn get_departments(pool: &Pool<Sqlite>) -> Result<Vec<Department>, AppError> {
    info!("Getting departments");
    let rows = sqlx::query_as::<_, Department>("SELECT id, name FROM departments ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

#[instrument]
pub async fn create_department(pool: &Pool<Sqlite>, name: &str) -> Result<i64, AppError> {
    info!("Creating department");
    let res = sqlx::query("INSERT INTO departments (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn delete_department(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting department");
    let res = sqlx::query("DELETE FROM departments WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Department {} not found", id)));
    }

    Ok(())
}

#[instrument]
pub async fn get_semesters(pool: &Pool<Sqlite>) -> Result<Vec<Semester>, AppError> {
    info!("Getting semesters");
    let rows = sqlx::query_as::<_, DbSemester>(
        "SELECT id, name, year, term FROM semesters ORDER BY name, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Semester::from).collect())
}

#[instrument]
pub async fn semester_exists(pool: &Pool<Sqlite>, id: i64) -> Result<bool, AppError> {
    let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM semesters WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;

    Ok(row.0 > 0)
}

#[instrument]
pub async fn create_semester(
    pool: &Pool<Sqlite>,
    name: &str,
    year: i64,
    term: Term,
) -> Result<i64, AppError> {
    info!("Creating semester");
    let res = sqlx::query("INSERT INTO semesters (name, year, term) VALUES (?, ?, ?)")
        .bind(name)
        .bind(year)
        .bind(term.as_str())
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn delete_semester(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting semester");
    let res = sqlx::query("DELETE FROM semesters WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Semester {} not found", id)));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Students
// ---------------------------------------------------------------------------

const STUDENT_SELECT: &str = "SELECT s.id, s.user_id, u.username, s.student_number,
        s.first_name, s.last_name, s.department_id, d.name AS department_name
     FROM students s
     LEFT JOIN users u ON u.id = s.user_id
     LEFT JOIN departments d ON d.id = s.department_id";

#[instrument]
pub async fn get_students(pool: &Pool<Sqlite>) -> Result<Vec<Student>, AppError> {
    info!("Getting all students");
    let rows = sqlx::query_as::<_, DbStudent>(&format!(
        "{} ORDER BY s.student_number",
        STUDENT_SELECT
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Student::from).collect())
}

#[instrument]
pub async fn get_student(pool: &Pool<Sqlite>, id: i64) -> Result<Student, AppError> {
    info!("Getting student");
    let row = sqlx::query_as::<_, DbStudent>(&format!("{} WHERE s.id = ?", STUDENT_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Student::from)
        .ok_or_else(|| AppError::NotFound(format!("Student {} not found", id)))
}

#[derive(Debug)]
pub struct NewStudent<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub student_number: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub department_id: Option<i64>,
}

/// Creates the login account and the student profile together.
#[instrument(skip_all, fields(student_number = new_student.student_number))]
pub async fn create_student(
    pool: &Pool<Sqlite>,
    new_student: &NewStudent<'_>,
) -> Result<i64, AppError> {
    info!("Creating student");

    if find_user_by_username(pool, new_student.username)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            new_student.username
        )));
    }

    let existing = sqlx::query_as::<_, (i64,)>("SELECT id FROM students WHERE student_number = ?")
        .bind(new_student.student_number)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Student number '{}' already exists",
            new_student.student_number
        )));
    }

    let hashed_password = bcrypt::hash(new_student.password, bcrypt::DEFAULT_COST)?;
    let display_name = format!("{} {}", new_student.first_name, new_student.last_name);

    let mut tx = pool.begin().await?;

    let user_id = sqlx::query(
        "INSERT INTO users (username, password, display_name) VALUES (?, ?, ?)",
    )
    .bind(new_student.username)
    .bind(hashed_password)
    .bind(display_name)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let student_id = sqlx::query(
        "INSERT INTO students (user_id, student_number, first_name, last_name, department_id)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(new_student.student_number)
    .bind(new_student.first_name)
    .bind(new_student.last_name)
    .bind(new_student.department_id)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    tx.commit().await?;

    Ok(student_id)
}

/// Removes the student together with its login account; enrollments and
/// scores go with it through the foreign-key cascade.
#[instrument]
pub async fn delete_student(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting student");
    let student = get_student(pool, id).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(student.id)
        .execute(&mut *tx)
        .await?;

    if let Some(user_id) = student.user_id {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Courses
// ---------------------------------------------------------------------------

const COURSE_SELECT: &str = "SELECT c.id, c.code, c.name, c.semester_id, sem.name AS semester_name,
        c.teacher_id, COALESCE(t.display_name, t.username) AS teacher_name
     FROM courses c
     JOIN semesters sem ON sem.id = c.semester_id
     LEFT JOIN users t ON t.id = c.teacher_id";

#[instrument]
pub async fn get_courses(pool: &Pool<Sqlite>, scope: CourseScope) -> Result<Vec<Course>, AppError> {
    info!("Getting courses in scope");
    let rows = sqlx::query_as::<_, DbCourse>(&format!(
        "{} WHERE (?1 IS NULL OR c.teacher_id = ?1) ORDER BY c.code, c.id",
        COURSE_SELECT
    ))
    .bind(scope.teacher_id())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

#[instrument]
pub async fn get_course(pool: &Pool<Sqlite>, id: i64) -> Result<Course, AppError> {
    info!("Getting course");
    let row = sqlx::query_as::<_, DbCourse>(&format!("{} WHERE c.id = ?", COURSE_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Course::from)
        .ok_or_else(|| AppError::NotFound(format!("Course {} not found", id)))
}

#[instrument]
pub async fn create_course(
    pool: &Pool<Sqlite>,
    code: &str,
    name: &str,
    semester_id: i64,
    teacher_id: Option<i64>,
) -> Result<i64, AppError> {
    info!("Creating course");
    let res = sqlx::query(
        "INSERT INTO courses (code, name, semester_id, teacher_id) VALUES (?, ?, ?, ?)",
    )
    .bind(code)
    .bind(name)
    .bind(semester_id)
    .bind(teacher_id)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn delete_course(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting course");
    let res = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Course {} not found", id)));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeCounts {
    pub courses: i64,
    pub students: i64,
    pub assessments: i64,
}

/// Course, distinct enrolled student and assessment counts for a scope.
#[instrument]
pub async fn get_scope_counts(
    pool: &Pool<Sqlite>,
    scope: CourseScope,
) -> Result<ScopeCounts, AppError> {
    info!("Counting scope statistics");
    let teacher_id = scope.teacher_id();

    let (courses,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM courses WHERE (?1 IS NULL OR teacher_id = ?1)",
    )
    .bind(teacher_id)
    .fetch_one(pool)
    .await?;

    let (students,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(DISTINCT e.student_id)
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE (?1 IS NULL OR c.teacher_id = ?1)",
    )
    .bind(teacher_id)
    .fetch_one(pool)
    .await?;

    let (assessments,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*)
         FROM assessments a
         JOIN courses c ON c.id = a.course_id
         WHERE (?1 IS NULL OR c.teacher_id = ?1)",
    )
    .bind(teacher_id)
    .fetch_one(pool)
    .await?;

    Ok(ScopeCounts {
        courses,
        students,
        assessments,
    })
}

// ---------------------------------------------------------------------------
// Assessments and their outcome weights
// ---------------------------------------------------------------------------

const ASSESSMENT_SELECT: &str = "SELECT a.id, a.course_id, c.code AS course_code, a.name, a.weight, a.created_at
     FROM assessments a
     JOIN courses c ON c.id = a.course_id";

/// Assessments in scope, newest first.
#[instrument]
pub async fn get_scope_assessments(
    pool: &Pool<Sqlite>,
    scope: CourseScope,
    limit: Option<i64>,
) -> Result<Vec<Assessment>, AppError> {
    info!("Getting assessments in scope");
    let rows = sqlx::query_as::<_, DbAssessment>(&format!(
        "{} WHERE (?1 IS NULL OR c.teacher_id = ?1)
         ORDER BY a.created_at DESC, a.id DESC
         LIMIT ?2",
        ASSESSMENT_SELECT
    ))
    .bind(scope.teacher_id())
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Assessment::from).collect())
}

/// A course's assessments, newest first.
#[instrument]
pub async fn get_course_assessments(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<Assessment>, AppError> {
    info!("Getting course assessments");
    let rows = sqlx::query_as::<_, DbAssessment>(&format!(
        "{} WHERE a.course_id = ? ORDER BY a.created_at DESC, a.id DESC",
        ASSESSMENT_SELECT
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Assessment::from).collect())
}

#[instrument]
pub async fn get_assessment(pool: &Pool<Sqlite>, id: i64) -> Result<Assessment, AppError> {
    info!("Getting assessment");
    let row = sqlx::query_as::<_, DbAssessment>(&format!("{} WHERE a.id = ?", ASSESSMENT_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Assessment::from)
        .ok_or_else(|| AppError::NotFound(format!("Assessment {} not found", id)))
}

#[instrument]
pub async fn create_assessment(
    pool: &Pool<Sqlite>,
    course_id: i64,
    name: &str,
    weight: i64,
) -> Result<i64, AppError> {
    info!("Creating assessment");
    let res = sqlx::query("INSERT INTO assessments (course_id, name, weight) VALUES (?, ?, ?)")
        .bind(course_id)
        .bind(name)
        .bind(weight)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

const ASSESSMENT_WEIGHT_SELECT: &str = "SELECT aw.id, aw.assessment_id, aw.learning_outcome_id,
        lo.code AS learning_outcome_code, aw.percentage
     FROM assessment_weights aw
     JOIN learning_outcomes lo ON lo.id = aw.learning_outcome_id";

#[instrument]
pub async fn get_assessment_weights(
    pool: &Pool<Sqlite>,
    assessment_id: i64,
) -> Result<Vec<AssessmentWeight>, AppError> {
    info!("Getting assessment weights");
    let rows = sqlx::query_as::<_, AssessmentWeight>(&format!(
        "{} WHERE aw.assessment_id = ? ORDER BY lo.code, aw.id",
        ASSESSMENT_WEIGHT_SELECT
    ))
    .bind(assessment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn create_assessment_weight(
    pool: &Pool<Sqlite>,
    assessment_id: i64,
    learning_outcome_id: i64,
    percentage: f64,
) -> Result<i64, AppError> {
    info!("Creating assessment weight");
    let res = sqlx::query(
        "INSERT INTO assessment_weights (assessment_id, learning_outcome_id, percentage)
         VALUES (?, ?, ?)",
    )
    .bind(assessment_id)
    .bind(learning_outcome_id)
    .bind(percentage)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Learning outcomes, program outcomes and mappings
// ---------------------------------------------------------------------------

const LEARNING_OUTCOME_SELECT: &str = "SELECT lo.id, lo.course_id, c.code AS course_code, lo.code, lo.description
     FROM learning_outcomes lo
     JOIN courses c ON c.id = lo.course_id";

#[instrument]
pub async fn get_course_learning_outcomes(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<LearningOutcome>, AppError> {
    info!("Getting course learning outcomes");
    let rows = sqlx::query_as::<_, LearningOutcome>(&format!(
        "{} WHERE lo.course_id = ? ORDER BY lo.code, lo.id",
        LEARNING_OUTCOME_SELECT
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_all_learning_outcomes(
    pool: &Pool<Sqlite>,
) -> Result<Vec<LearningOutcome>, AppError> {
    info!("Getting all learning outcomes");
    let rows = sqlx::query_as::<_, LearningOutcome>(&format!(
        "{} ORDER BY c.code, lo.code, lo.id",
        LEARNING_OUTCOME_SELECT
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_learning_outcome(
    pool: &Pool<Sqlite>,
    id: i64,
) -> Result<LearningOutcome, AppError> {
    info!("Getting learning outcome");
    let row = sqlx::query_as::<_, LearningOutcome>(&format!(
        "{} WHERE lo.id = ?",
        LEARNING_OUTCOME_SELECT
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("Learning outcome {} not found", id)))
}

#[instrument]
pub async fn create_learning_outcome(
    pool: &Pool<Sqlite>,
    course_id: i64,
    code: &str,
    description: &str,
) -> Result<i64, AppError> {
    info!("Creating learning outcome");
    let existing = sqlx::query_as::<_, (i64,)>(
        "SELECT id FROM learning_outcomes WHERE course_id = ? AND code = ?",
    )
    .bind(course_id)
    .bind(code)
    .fetch_optional(pool)
    .await?;

    if existing.is_some() {
        return Err(AppError::Validation(format!(
            "Learning outcome '{}' already exists in this course",
            code
        )));
    }

    let res = sqlx::query(
        "INSERT INTO learning_outcomes (course_id, code, description) VALUES (?, ?, ?)",
    )
    .bind(course_id)
    .bind(code)
    .bind(description)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_program_outcomes(pool: &Pool<Sqlite>) -> Result<Vec<ProgramOutcome>, AppError> {
    info!("Getting program outcomes");
    let rows = sqlx::query_as::<_, ProgramOutcome>(
        "SELECT id, code, description FROM program_outcomes ORDER BY code, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_program_outcome(
    pool: &Pool<Sqlite>,
    id: i64,
) -> Result<ProgramOutcome, AppError> {
    let row = sqlx::query_as::<_, ProgramOutcome>(
        "SELECT id, code, description FROM program_outcomes WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("Program outcome {} not found", id)))
}

#[instrument]
pub async fn create_program_outcome(
    pool: &Pool<Sqlite>,
    code: &str,
    description: &str,
) -> Result<i64, AppError> {
    info!("Creating program outcome");
    let res = sqlx::query("INSERT INTO program_outcomes (code, description) VALUES (?, ?)")
        .bind(code)
        .bind(description)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn delete_program_outcome(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting program outcome");
    let res = sqlx::query("DELETE FROM program_outcomes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Program outcome {} not found",
            id
        )));
    }

    Ok(())
}

const MAPPING_SELECT: &str = "SELECT m.id, m.learning_outcome_id, m.program_outcome_id,
        po.code AS program_outcome_code, m.weight
     FROM outcome_mappings m
     JOIN program_outcomes po ON po.id = m.program_outcome_id";

#[instrument]
pub async fn get_learning_outcome_mappings(
    pool: &Pool<Sqlite>,
    learning_outcome_id: i64,
) -> Result<Vec<OutcomeMapping>, AppError> {
    info!("Getting learning outcome mappings");
    let rows = sqlx::query_as::<_, OutcomeMapping>(&format!(
        "{} WHERE m.learning_outcome_id = ? ORDER BY po.code, m.id",
        MAPPING_SELECT
    ))
    .bind(learning_outcome_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_mapping(pool: &Pool<Sqlite>, id: i64) -> Result<OutcomeMapping, AppError> {
    let row = sqlx::query_as::<_, OutcomeMapping>(&format!("{} WHERE m.id = ?", MAPPING_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.ok_or_else(|| AppError::NotFound(format!("Outcome mapping {} not found", id)))
}

#[instrument]
pub async fn create_mapping(
    pool: &Pool<Sqlite>,
    learning_outcome_id: i64,
    program_outcome_id: i64,
    weight: f64,
) -> Result<i64, AppError> {
    info!("Creating outcome mapping");
    let res = sqlx::query(
        "INSERT INTO outcome_mappings (learning_outcome_id, program_outcome_id, weight)
         VALUES (?, ?, ?)",
    )
    .bind(learning_outcome_id)
    .bind(program_outcome_id)
    .bind(weight)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn delete_mapping(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting outcome mapping");
    let res = sqlx::query("DELETE FROM outcome_mappings WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Outcome mapping {} not found",
            id
        )));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Enrollments
// ---------------------------------------------------------------------------

const ENROLLMENT_SELECT: &str = "SELECT e.id, e.student_id, s.student_number,
        s.first_name || ' ' || s.last_name AS student_name,
        e.course_id, c.code AS course_code, c.name AS course_name, e.enrolled_at
     FROM enrollments e
     JOIN students s ON s.id = e.student_id
     JOIN courses c ON c.id = e.course_id";

#[instrument]
pub async fn get_course_enrollments(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<Enrollment>, AppError> {
    info!("Getting course enrollments");
    let rows = sqlx::query_as::<_, DbEnrollment>(&format!(
        "{} WHERE e.course_id = ? ORDER BY s.student_number",
        ENROLLMENT_SELECT
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Enrollment::from).collect())
}

#[instrument]
pub async fn get_student_enrollments(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<Enrollment>, AppError> {
    info!("Getting student enrollments");
    let rows = sqlx::query_as::<_, DbEnrollment>(&format!(
        "{} WHERE e.student_id = ? ORDER BY c.code, c.id",
        ENROLLMENT_SELECT
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Enrollment::from).collect())
}

#[instrument]
pub async fn is_enrolled(
    pool: &Pool<Sqlite>,
    student_id: i64,
    course_id: i64,
) -> Result<bool, AppError> {
    let row = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM enrollments WHERE student_id = ? AND course_id = ?",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0 > 0)
}

#[instrument]
pub async fn enroll_student(
    pool: &Pool<Sqlite>,
    student_id: i64,
    course_id: i64,
) -> Result<i64, AppError> {
    info!("Enrolling student");
    if is_enrolled(pool, student_id, course_id).await? {
        return Err(AppError::Conflict(format!(
            "Student {} is already enrolled in course {}",
            student_id, course_id
        )));
    }

    let res = sqlx::query("INSERT INTO enrollments (student_id, course_id) VALUES (?, ?)")
        .bind(student_id)
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

#[instrument]
pub async fn get_assessment_scores(
    pool: &Pool<Sqlite>,
    assessment_id: i64,
) -> Result<Vec<StudentScore>, AppError> {
    info!("Getting assessment scores");
    let rows = sqlx::query_as::<_, StudentScore>(
        "SELECT id, student_id, assessment_id, score
         FROM student_scores WHERE assessment_id = ?
         ORDER BY student_id",
    )
    .bind(assessment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_student_scores(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<StudentScore>, AppError> {
    info!("Getting student scores");
    let rows = sqlx::query_as::<_, StudentScore>(
        "SELECT id, student_id, assessment_id, score
         FROM student_scores WHERE student_id = ?
         ORDER BY assessment_id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Writes every `(student_id, score)` pair in one transaction. An existing
/// score for the same student and assessment is overwritten.
#[instrument(skip(pool, scores), fields(count = scores.len()))]
pub async fn upsert_scores(
    pool: &Pool<Sqlite>,
    assessment_id: i64,
    scores: &[(i64, f64)],
) -> Result<(), AppError> {
    info!("Saving assessment scores");
    let mut tx = pool.begin().await?;

    for (student_id, score) in scores {
        sqlx::query(
            "INSERT INTO student_scores (student_id, assessment_id, score)
             VALUES (?, ?, ?)
             ON CONFLICT (student_id, assessment_id) DO UPDATE SET score = excluded.score",
        )
        .bind(student_id)
        .bind(assessment_id)
        .bind(score)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

const SCORE_DETAIL_SELECT: &str = "SELECT ss.student_id, s.student_number,
        s.first_name || ' ' || s.last_name AS student_name,
        ss.assessment_id, a.name AS assessment_name, a.weight AS assessment_weight,
        c.id AS course_id, c.code AS course_code, c.name AS course_name, ss.score
     FROM student_scores ss
     JOIN students s ON s.id = ss.student_id
     JOIN assessments a ON a.id = ss.assessment_id
     JOIN courses c ON c.id = a.course_id";

/// All of a student's scores, course code ascending then newest assessment
/// first.
#[instrument]
pub async fn get_student_score_details(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<ScoreDetail>, AppError> {
    info!("Getting student score details");
    let rows = sqlx::query_as::<_, ScoreDetail>(&format!(
        "{} WHERE ss.student_id = ?
         ORDER BY c.code, c.id, a.created_at DESC, a.id DESC",
        SCORE_DETAIL_SELECT
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn get_scores_below(
    pool: &Pool<Sqlite>,
    assessment_id: i64,
    threshold: f64,
) -> Result<Vec<ScoreDetail>, AppError> {
    info!("Getting scores below threshold");
    let rows = sqlx::query_as::<_, ScoreDetail>(&format!(
        "{} WHERE ss.assessment_id = ? AND ss.score < ?
         ORDER BY ss.score, s.student_number",
        SCORE_DETAIL_SELECT
    ))
    .bind(assessment_id)
    .bind(threshold)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Mean and maximum of every score recorded in a course.
#[instrument]
pub async fn get_course_score_stats(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<(Option<f64>, Option<f64>), AppError> {
    let row = sqlx::query_as::<_, (Option<f64>, Option<f64>)>(
        "SELECT AVG(ss.score), MAX(ss.score)
         FROM student_scores ss
         JOIN assessments a ON a.id = ss.assessment_id
         WHERE a.course_id = ?",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

#[instrument]
pub async fn get_assessment_mean(
    pool: &Pool<Sqlite>,
    assessment_id: i64,
) -> Result<Option<f64>, AppError> {
    let row = sqlx::query_as::<_, (Option<f64>,)>(
        "SELECT AVG(score) FROM student_scores WHERE assessment_id = ?",
    )
    .bind(assessment_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

// ---------------------------------------------------------------------------
// Roll-up inputs
// ---------------------------------------------------------------------------

/// Rows feeding the learning-outcome roll-up of one course for one student.
#[instrument]
pub async fn get_course_outcome_rows(
    pool: &Pool<Sqlite>,
    student_id: i64,
    course_id: i64,
) -> Result<OutcomeRows, AppError> {
    info!("Loading course outcome rows");
    let learning_outcomes = get_course_learning_outcomes(pool, course_id).await?;

    let assessment_weights = sqlx::query_as::<_, AssessmentWeight>(&format!(
        "{} WHERE lo.course_id = ? ORDER BY aw.id",
        ASSESSMENT_WEIGHT_SELECT
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    let scores = get_student_scores(pool, student_id).await?;

    Ok(OutcomeRows {
        learning_outcomes,
        assessment_weights,
        scores,
        ..OutcomeRows::default()
    })
}

/// Rows feeding the program-outcome roll-up across every course the student
/// is enrolled in. All program outcomes are included, mapped or not.
#[instrument]
pub async fn get_program_outcome_rows(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<OutcomeRows, AppError> {
    info!("Loading program outcome rows");
    let learning_outcomes = sqlx::query_as::<_, LearningOutcome>(&format!(
        "{} JOIN enrollments e ON e.course_id = lo.course_id
         WHERE e.student_id = ?
         ORDER BY lo.code, lo.id",
        LEARNING_OUTCOME_SELECT
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let assessment_weights = sqlx::query_as::<_, AssessmentWeight>(&format!(
        "{} JOIN enrollments e ON e.course_id = lo.course_id
         WHERE e.student_id = ?
         ORDER BY aw.id",
        ASSESSMENT_WEIGHT_SELECT
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mappings = sqlx::query_as::<_, OutcomeMapping>(&format!(
        "{} JOIN learning_outcomes lo ON lo.id = m.learning_outcome_id
         JOIN enrollments e ON e.course_id = lo.course_id
         WHERE e.student_id = ?
         ORDER BY m.id",
        MAPPING_SELECT
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let program_outcomes = get_program_outcomes(pool).await?;
    let scores = get_student_scores(pool, student_id).await?;

    Ok(OutcomeRows {
        learning_outcomes,
        assessment_weights,
        mappings,
        program_outcomes,
        scores,
    })
}
