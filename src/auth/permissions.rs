use anyhow::Error;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ChangeOwnPassword,

    ViewOwnCourses,
    ViewOwnOutcomes,

    ViewTeachingDashboard,
    ManageCourseContent,
    EnterGrades,
    ManageEnrollments,

    ViewAllCourses,
    ManageStudents,
    ManageCourses,
    ManageSemesters,
    ManageProgramOutcomes,
    ManageDepartments,
    RegisterStaff,
}

/// Group memberships stored per user. Only staff roles are groups; students
/// are identified by a linked student profile instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    DepartmentHead,
    Teacher,
}

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::DepartmentHead => "department_head",
            Group::Teacher => "teacher",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "department_head" => Ok(Group::DepartmentHead),
            "teacher" => Ok(Group::Teacher),
            _ => Err(Error::msg(format!("Unknown group: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    DepartmentHead,
    Teacher,
    Student,
    Unauthorized,
}

static STUDENT_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ChangeOwnPassword);
    permissions.insert(Permission::ViewOwnCourses);
    permissions.insert(Permission::ViewOwnOutcomes);

    permissions
});

static TEACHER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ChangeOwnPassword);
    permissions.insert(Permission::ViewTeachingDashboard);
    permissions.insert(Permission::ManageCourseContent);
    permissions.insert(Permission::EnterGrades);
    permissions.insert(Permission::ManageEnrollments);

    permissions
});

static DEPARTMENT_HEAD_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(TEACHER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ViewAllCourses);
    permissions.insert(Permission::ManageStudents);
    permissions.insert(Permission::ManageCourses);
    permissions.insert(Permission::ManageSemesters);
    permissions.insert(Permission::ManageProgramOutcomes);
    permissions.insert(Permission::ManageDepartments);
    permissions.insert(Permission::RegisterStaff);

    permissions
});

static NO_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(HashSet::new);

impl Role {
    /// Priority order: department head (or superuser), teacher, student
    /// profile. Anything else is `Unauthorized`.
    pub fn resolve(groups: &[Group], is_superuser: bool, has_student_profile: bool) -> Self {
        if is_superuser || groups.contains(&Group::DepartmentHead) {
            Role::DepartmentHead
        } else if groups.contains(&Group::Teacher) {
            Role::Teacher
        } else if has_student_profile {
            Role::Student
        } else {
            Role::Unauthorized
        }
    }

    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Student => &STUDENT_PERMISSIONS,
            Role::Teacher => &TEACHER_PERMISSIONS,
            Role::DepartmentHead => &DEPARTMENT_HEAD_PERMISSIONS,
            Role::Unauthorized => &NO_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::DepartmentHead => "department_head",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Unauthorized => "unauthorized",
        }
    }

    /// Landing page for the role, mirrored by the front end's router.
    pub fn home_url(&self) -> Option<&'static str> {
        match self {
            Role::DepartmentHead => Some("/ui/department"),
            Role::Teacher => Some("/ui/dashboard"),
            Role::Student => Some("/ui/student/courses"),
            Role::Unauthorized => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
