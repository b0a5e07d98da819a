use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use super::{CreatedResponse, created};
use crate::auth::{CourseScope, Group, Permission, User};
use crate::db::{
    NewStudent, create_course, create_department, create_program_outcome, create_semester,
    create_student, create_user, delete_course, delete_department, delete_program_outcome, delete_semester, delete_student, get_all_learning_outcomes,
    get_courses, get_departments, get_program_outcomes, get_semesters, get_staff, get_students,
    is_staff, semester_exists,
};
use crate::models::{
    Course, Department, LearningOutcome, ProgramOutcome, Semester, StaffMember, Student, Term,
};
use crate::validation::{
    ApiResult, AppErrorExt, JsonValidateExt, PermissionCheckExt, field_error,
};

#[get("/department/students")]
pub async fn api_list_students(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Student>>, Status> {
    user.require_permission(Permission::ManageStudents)?;
    Ok(Json(get_students(db).await?))
}

#[derive(Deserialize, Validate)]
pub struct StudentRequest {
    #[validate(length(min = 1, max = 150, message = "Username must be 1-150 characters"))]
    username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(length(min = 1, max = 20, message = "Student number must be 1-20 characters"))]
    student_number: String,
    #[validate(length(min = 1, max = 50, message = "First name must be 1-50 characters"))]
    first_name: String,
    #[validate(length(min = 1, max = 50, message = "Last name must be 1-50 characters"))]
    last_name: String,
    department_id: Option<i64>,
}

#[post("/department/students", data = "<request>")]
pub async fn api_create_student(
    request: Json<StudentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    if let Some(department_id) = validated.department_id {
        let departments = get_departments(db).await.validate_custom()?;
        if !departments.iter().any(|d| d.id == department_id) {
            return Err(field_error("department_id", "Department does not exist"));
        }
    }

    let student_id = create_student(
        db,
        &NewStudent {
            username: &validated.username,
            password: &validated.password,
            student_number: &validated.student_number,
            first_name: &validated.first_name,
            last_name: &validated.last_name,
            department_id: validated.department_id,
        },
    )
    .await
    .validate_custom()?;

    Ok(created(student_id))
}

#[delete("/department/students/<id>")]
pub async fn api_delete_student(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    user.require_permission(Permission::ManageStudents)?;
    delete_student(db, id).await?;
    Ok(Status::NoContent)
}

#[get("/department/courses")]
pub async fn api_list_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Course>>, Status> {
    user.require_permission(Permission::ManageCourses)?;
    Ok(Json(get_courses(db, CourseScope::All).await?))
}

#[derive(Deserialize, Validate)]
pub struct CourseRequest {
    #[validate(length(min = 1, max = 20, message = "Code must be 1-20 characters"))]
    code: String,
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    name: String,
    semester_id: i64,
    teacher_id: Option<i64>,
}

#[post("/department/courses", data = "<request>")]
pub async fn api_create_course(
    request: Json<CourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageCourses)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    if !semester_exists(db, validated.semester_id)
        .await
        .validate_custom()?
    {
        return Err(field_error("semester_id", "Semester does not exist"));
    }

    if let Some(teacher_id) = validated.teacher_id {
        if !is_staff(db, teacher_id).await.validate_custom()? {
            return Err(field_error("teacher_id", "Teacher does not exist"));
        }
    }

    let course_id = create_course(
        db,
        &validated.code,
        &validated.name,
        validated.semester_id,
        validated.teacher_id,
    )
    .await
    .validate_custom()?;

    Ok(created(course_id))
}

#[delete("/department/courses/<id>")]
pub async fn api_delete_course(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    user.require_permission(Permission::ManageCourses)?;
    delete_course(db, id).await?;
    Ok(Status::NoContent)
}

#[get("/department/semesters")]
pub async fn api_list_semesters(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Semester>>, Status> {
    user.require_permission(Permission::ManageSemesters)?;
    Ok(Json(get_semesters(db).await?))
}

fn default_year() -> i64 {
    2024
}

fn default_term() -> Term {
    Term::Fall
}

#[derive(Deserialize, Validate)]
pub struct SemesterRequest {
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    name: String,
    #[serde(default = "default_year")]
    #[validate(range(min = 1900, max = 2100, message = "Year must be between 1900 and 2100"))]
    year: i64,
    #[serde(default = "default_term")]
    term: Term,
}

#[post("/department/semesters", data = "<request>")]
pub async fn api_create_semester(
    request: Json<SemesterRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageSemesters)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let semester_id = create_semester(db, &validated.name, validated.year, validated.term)
        .await
        .validate_custom()?;

    Ok(created(semester_id))
}

#[delete("/department/semesters/<id>")]
pub async fn api_delete_semester(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    user.require_permission(Permission::ManageSemesters)?;
    delete_semester(db, id).await?;
    Ok(Status::NoContent)
}

#[derive(Serialize, Deserialize)]
pub struct ProgramOutcomesResponse {
    pub program_outcomes: Vec<ProgramOutcome>,
    /// Every learning outcome, by course code then outcome code.
    pub learning_outcomes: Vec<LearningOutcome>,
}

#[get("/department/pos")]
pub async fn api_list_program_outcomes(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProgramOutcomesResponse>, Status> {
    user.require_permission(Permission::ManageProgramOutcomes)?;

    Ok(Json(ProgramOutcomesResponse {
        program_outcomes: get_program_outcomes(db).await?,
        learning_outcomes: get_all_learning_outcomes(db).await?,
    }))
}

#[derive(Deserialize, Validate)]
pub struct ProgramOutcomeRequest {
    #[validate(length(min = 1, max = 10, message = "Code must be 1-10 characters"))]
    code: String,
    #[validate(length(min = 1, message = "Description is required"))]
    description: String,
}

#[post("/department/pos", data = "<request>")]
pub async fn api_create_program_outcome(
    request: Json<ProgramOutcomeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageProgramOutcomes)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let outcome_id = create_program_outcome(db, &validated.code, &validated.description)
        .await
        .validate_custom()?;

    Ok(created(outcome_id))
}

#[delete("/department/pos/<id>")]
pub async fn api_delete_program_outcome(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    user.require_permission(Permission::ManageProgramOutcomes)?;
    delete_program_outcome(db, id).await?;
    Ok(Status::NoContent)
}

#[get("/department/departments")]
pub async fn api_list_departments(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Department>>, Status> {
    user.require_permission(Permission::ManageDepartments)?;
    Ok(Json(get_departments(db).await?))
}

#[derive(Deserialize, Validate)]
pub struct DepartmentRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    name: String,
}

#[post("/department/departments", data = "<request>")]
pub async fn api_create_department(
    request: Json<DepartmentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageDepartments)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let department_id = create_department(db, &validated.name)
        .await
        .validate_custom()?;

    Ok(created(department_id))
}

#[delete("/department/departments/<id>")]
pub async fn api_delete_department(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    user.require_permission(Permission::ManageDepartments)?;
    delete_department(db, id).await?;
    Ok(Status::NoContent)
}

#[get("/department/teachers")]
pub async fn api_list_teachers(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<StaffMember>>, Status> {
    user.require_permission(Permission::ManageCourses)?;
    Ok(Json(get_staff(db).await?))
}

#[derive(Deserialize, Validate)]
pub struct StaffRegistrationRequest {
    #[validate(length(min = 1, max = 150, message = "Username must be 1-150 characters"))]
    username: String,
    #[validate(length(min = 1, max = 100, message = "Display name must be 1-100 characters"))]
    display_name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    group: Group,
}

#[post("/department/staff", data = "<request>")]
pub async fn api_register_staff(
    request: Json<StaffRegistrationRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::RegisterStaff)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let user_id = create_user(
        db,
        &validated.username,
        &validated.password,
        Some(&validated.display_name),
        Some(validated.group),
    )
    .await
    .validate_custom()?;

    Ok(created(user_id))
}
