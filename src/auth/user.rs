use chrono::{NaiveDateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use rocket::http::Status;
use serde::Serialize;

use super::{Group, Permission, Role};

/// The authenticated caller, resolved once per request and passed explicitly
/// to every handler that needs it.
#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    /// Linked student profile, present only for student accounts.
    pub student_id: Option<i64>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub is_superuser: Option<bool>,
    pub student_id: Option<i64>,
}

impl DbUser {
    pub fn into_user(self, groups: &[Group]) -> User {
        let role = Role::resolve(
            groups,
            self.is_superuser.unwrap_or_default(),
            self.student_id.is_some(),
        );
        let username = self.username.unwrap_or_default();

        User {
            id: self.id.unwrap_or_default(),
            display_name: self.display_name.unwrap_or_else(|| username.clone()),
            username,
            role,
            student_id: self.student_id,
        }
    }
}

/// Which courses a staff member may see and edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseScope {
    All,
    OwnedBy(i64),
}

impl CourseScope {
    pub fn teacher_id(&self) -> Option<i64> {
        match self {
            CourseScope::All => None,
            CourseScope::OwnedBy(id) => Some(*id),
        }
    }

    pub fn allows(&self, course_teacher_id: Option<i64>) -> bool {
        match self {
            CourseScope::All => true,
            CourseScope::OwnedBy(id) => course_teacher_id == Some(*id),
        }
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), Status> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(Status::Forbidden)
        }
    }

    pub fn course_scope(&self) -> CourseScope {
        if self.has_permission(Permission::ViewAllCourses) {
            CourseScope::All
        } else {
            CourseScope::OwnedBy(self.id)
        }
    }

    /// Staff access to a single course: department heads always, teachers
    /// only for courses they own.
    pub fn require_course_access(&self, course_teacher_id: Option<i64>) -> Result<(), Status> {
        self.require_permission(Permission::ViewTeachingDashboard)?;

        if self.course_scope().allows(course_teacher_id) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                course_teacher_id = ?course_teacher_id,
                "Course access denied"
            );
            Err(Status::Forbidden)
        }
    }

    pub fn require_student(&self) -> Result<i64, Status> {
        self.require_permission(Permission::ViewOwnOutcomes)?;
        self.student_id.ok_or(Status::Forbidden)
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserSession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

impl From<DbUserSession> for UserSession {
    fn from(db: DbUserSession) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            token: db.token.unwrap_or_default(),
            created_at: db.created_at.unwrap_or(now),
            // A row without an expiry is treated as already expired.
            expires_at: db.expires_at.unwrap_or(now),
        }
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now().naive_utc()
    }
}
