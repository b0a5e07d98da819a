use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use validator::Validate;

use super::{
    ChartSeries, CreatedResponse, created, load_accessible_course, load_accessible_course_custom,
};
use crate::auth::{Permission, User};
use crate::db::{
    create_assessment, create_assessment_weight, create_learning_outcome, create_mapping,
    delete_mapping, enroll_student, get_assessment, get_assessment_mean, get_assessment_scores,
    get_assessment_weights, get_course_assessments, get_course_enrollments,
    get_course_learning_outcomes, get_course_score_stats, get_courses, get_learning_outcome,
    get_learning_outcome_mappings, get_mapping, get_program_outcome, get_program_outcomes,
    get_scope_assessments, get_scope_counts, get_scores_below, get_student, upsert_scores,
};
use crate::models::{
    Assessment, AssessmentWeight, Course, Enrollment, LearningOutcome, OutcomeMapping,
    ProgramOutcome, ScoreDetail,
};
use crate::rollup::{WARNING_THRESHOLD, round1};
use crate::validation::{
    ApiResult, AppErrorExt, JsonValidateExt, PermissionCheckExt, field_error,
};

const RECENT_ASSESSMENTS: i64 = 5;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeStats {
    pub total_courses: i64,
    pub total_students: i64,
    pub total_exams: i64,
}

#[derive(Serialize, Deserialize)]
pub struct DashboardResponse {
    pub courses: Vec<Course>,
    pub stats: ScopeStats,
    pub recent_assessments: Vec<Assessment>,
}

#[derive(Serialize, Deserialize)]
pub struct CoursesResponse {
    pub courses: Vec<Course>,
    pub stats: ScopeStats,
}

async fn scope_stats(db: &Pool<Sqlite>, user: &User) -> Result<ScopeStats, Status> {
    let counts = get_scope_counts(db, user.course_scope()).await?;
    Ok(ScopeStats {
        total_courses: counts.courses,
        total_students: counts.students,
        total_exams: counts.assessments,
    })
}

#[get("/dashboard")]
pub async fn api_dashboard(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<DashboardResponse>, Status> {
    user.require_permission(Permission::ViewTeachingDashboard)?;
    let scope = user.course_scope();

    let courses = get_courses(db, scope).await?;
    let stats = scope_stats(db, &user).await?;
    let recent_assessments = get_scope_assessments(db, scope, Some(RECENT_ASSESSMENTS)).await?;

    Ok(Json(DashboardResponse {
        courses,
        stats,
        recent_assessments,
    }))
}

#[get("/courses")]
pub async fn api_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CoursesResponse>, Status> {
    user.require_permission(Permission::ViewTeachingDashboard)?;

    let courses = get_courses(db, user.course_scope()).await?;
    let stats = scope_stats(db, &user).await?;

    Ok(Json(CoursesResponse { courses, stats }))
}

#[get("/exams")]
pub async fn api_exams(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Assessment>>, Status> {
    user.require_permission(Permission::ViewTeachingDashboard)?;
    let assessments = get_scope_assessments(db, user.course_scope(), None).await?;
    Ok(Json(assessments))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CourseStats {
    pub average: f64,
    pub max: f64,
    pub students: i64,
}

#[derive(Serialize, Deserialize)]
pub struct CourseDashboardResponse {
    pub course: Course,
    pub outcomes: Vec<LearningOutcome>,
    pub assessments: Vec<Assessment>,
    pub stats: CourseStats,
    /// Mean score of every visible course, by course code.
    pub comparison: ChartSeries,
    /// Class average per assessment, oldest first.
    pub exam_averages: ChartSeries,
    /// Scores below the warning threshold on the most recent assessment.
    pub risky_scores: Vec<ScoreDetail>,
}

#[get("/course/<id>/dashboard")]
pub async fn api_course_dashboard(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseDashboardResponse>, Status> {
    let course = load_accessible_course(db, &user, id).await?;

    let outcomes = get_course_learning_outcomes(db, id).await?;
    let assessments = get_course_assessments(db, id).await?;
    let enrollments = get_course_enrollments(db, id).await?;
    let (average, max) = get_course_score_stats(db, id).await?;

    let mut comparison = ChartSeries::default();
    for visible in get_courses(db, user.course_scope()).await? {
        let (course_average, _) = get_course_score_stats(db, visible.id).await?;
        comparison.push(visible.code, course_average.unwrap_or_default());
    }

    let mut exam_averages = ChartSeries::default();
    for assessment in assessments.iter().rev() {
        let mean = get_assessment_mean(db, assessment.id).await?;
        exam_averages.push(assessment.name.clone(), mean.unwrap_or_default());
    }

    let risky_scores = match assessments.first() {
        Some(recent) => get_scores_below(db, recent.id, WARNING_THRESHOLD).await?,
        None => Vec::new(),
    };

    Ok(Json(CourseDashboardResponse {
        course,
        outcomes,
        assessments,
        stats: CourseStats {
            average: round1(average.unwrap_or_default()),
            max: max.unwrap_or_default(),
            students: enrollments.len() as i64,
        },
        comparison,
        exam_averages,
        risky_scores,
    }))
}

#[derive(Deserialize, Validate)]
pub struct LearningOutcomeRequest {
    #[validate(length(min = 1, max = 10, message = "Code must be 1-10 characters"))]
    code: String,
    #[validate(length(min = 1, message = "Description is required"))]
    description: String,
}

#[post("/course/<id>/learning_outcomes", data = "<request>")]
pub async fn api_create_learning_outcome(
    id: i64,
    request: Json<LearningOutcomeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageCourseContent)
        .validate_custom()?;
    load_accessible_course_custom(db, &user, id).await?;

    let validated = request.validate_custom()?;

    let outcome_id = create_learning_outcome(db, id, &validated.code, &validated.description)
        .await
        .validate_custom()?;

    Ok(created(outcome_id))
}

#[derive(Deserialize, Validate)]
pub struct AssessmentRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    name: String,
    #[validate(range(min = 0, max = 100, message = "Weight must be between 0 and 100"))]
    weight: i64,
}

#[post("/course/<id>/assessments", data = "<request>")]
pub async fn api_create_assessment(
    id: i64,
    request: Json<AssessmentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageCourseContent)
        .validate_custom()?;
    load_accessible_course_custom(db, &user, id).await?;

    let validated = request.validate_custom()?;

    let assessment_id = create_assessment(db, id, &validated.name, validated.weight)
        .await
        .validate_custom()?;

    Ok(created(assessment_id))
}

#[get("/course/<id>/students")]
pub async fn api_course_students(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Enrollment>>, Status> {
    load_accessible_course(db, &user, id).await?;
    let enrollments = get_course_enrollments(db, id).await?;
    Ok(Json(enrollments))
}

#[derive(Deserialize, Validate)]
pub struct EnrollmentRequest {
    student_id: i64,
}

#[post("/course/<id>/students", data = "<request>")]
pub async fn api_enroll_student(
    id: i64,
    request: Json<EnrollmentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageEnrollments)
        .validate_custom()?;
    load_accessible_course_custom(db, &user, id).await?;

    let validated = request.validate_custom()?;

    get_student(db, validated.student_id)
        .await
        .or_field_error("student_id", "Student does not exist")?;

    let enrollment_id = enroll_student(db, validated.student_id, id)
        .await
        .validate_custom()?;

    Ok(created(enrollment_id))
}

#[derive(Serialize, Deserialize)]
pub struct AssessmentDetailResponse {
    pub assessment: Assessment,
    pub weights: Vec<AssessmentWeight>,
    pub learning_outcomes: Vec<LearningOutcome>,
}

async fn load_accessible_assessment(
    db: &Pool<Sqlite>,
    user: &User,
    assessment_id: i64,
) -> ApiResult<Assessment> {
    let assessment = get_assessment(db, assessment_id)
        .await
        .validate_custom()?;
    load_accessible_course_custom(db, user, assessment.course_id).await?;
    Ok(assessment)
}

#[get("/assessment/<id>")]
pub async fn api_assessment_detail(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<AssessmentDetailResponse>> {
    let assessment = load_accessible_assessment(db, &user, id).await?;

    let weights = get_assessment_weights(db, id).await.validate_custom()?;
    let learning_outcomes = get_course_learning_outcomes(db, assessment.course_id)
        .await
        .validate_custom()?;

    Ok(Json(AssessmentDetailResponse {
        assessment,
        weights,
        learning_outcomes,
    }))
}

#[derive(Deserialize, Validate)]
pub struct AssessmentWeightRequest {
    learning_outcome_id: i64,
    #[validate(range(min = 0.0, max = 100.0, message = "Percentage must be between 0 and 100"))]
    percentage: f64,
}

#[post("/assessment/<id>/weights", data = "<request>")]
pub async fn api_create_assessment_weight(
    id: i64,
    request: Json<AssessmentWeightRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageCourseContent)
        .validate_custom()?;
    let assessment = load_accessible_assessment(db, &user, id).await?;

    let validated = request.validate_custom()?;

    let outcome_error = "Learning outcome must belong to the assessment's course";
    let outcome = get_learning_outcome(db, validated.learning_outcome_id)
        .await
        .or_field_error("learning_outcome_id", outcome_error)?;
    if outcome.course_id != assessment.course_id {
        return Err(field_error("learning_outcome_id", outcome_error));
    }

    let weight_id =
        create_assessment_weight(db, id, validated.learning_outcome_id, validated.percentage)
            .await
            .validate_custom()?;

    Ok(created(weight_id))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GradeRow {
    pub student_id: i64,
    pub student_number: String,
    pub student_name: String,
    pub score: Option<f64>,
}

#[derive(Serialize, Deserialize)]
pub struct GradeSheetResponse {
    pub assessment: Assessment,
    pub grades: Vec<GradeRow>,
}

#[get("/assessment/<id>/grades")]
pub async fn api_grade_sheet(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<GradeSheetResponse>> {
    user.require_permission(Permission::EnterGrades)
        .validate_custom()?;
    let assessment = load_accessible_assessment(db, &user, id).await?;

    let scores: HashMap<i64, f64> = get_assessment_scores(db, id)
        .await
        .validate_custom()?
        .into_iter()
        .map(|s| (s.student_id, s.score))
        .collect();

    let grades = get_course_enrollments(db, assessment.course_id)
        .await
        .validate_custom()?
        .into_iter()
        .map(|e| GradeRow {
            score: scores.get(&e.student_id).copied(),
            student_id: e.student_id,
            student_number: e.student_number,
            student_name: e.student_name,
        })
        .collect();

    Ok(Json(GradeSheetResponse { assessment, grades }))
}

#[derive(Deserialize, Validate)]
pub struct GradeEntry {
    student_id: i64,
    #[validate(range(min = 0.0, max = 100.0, message = "Score must be between 0 and 100"))]
    score: Option<f64>,
}

#[derive(Deserialize, Validate)]
pub struct GradeEntryRequest {
    #[validate(nested)]
    scores: Vec<GradeEntry>,
}

/// Saves a grade sheet. Blank entries are skipped; a single student outside
/// the course rejects the whole sheet.
#[post("/assessment/<id>/grades", data = "<request>")]
pub async fn api_enter_grades(
    id: i64,
    request: Json<GradeEntryRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::EnterGrades)
        .validate_custom()?;
    let assessment = load_accessible_assessment(db, &user, id).await?;

    let validated = request.validate_custom()?;

    let enrolled: HashSet<i64> = get_course_enrollments(db, assessment.course_id)
        .await
        .validate_custom()?
        .into_iter()
        .map(|e| e.student_id)
        .collect();

    let mut scores = Vec::with_capacity(validated.scores.len());
    for (index, entry) in validated.scores.iter().enumerate() {
        if !enrolled.contains(&entry.student_id) {
            return Err(field_error(
                &format!("scores[{}].student_id", index),
                "Student is not enrolled in this course",
            ));
        }
        if let Some(score) = entry.score {
            scores.push((entry.student_id, score));
        }
    }

    upsert_scores(db, id, &scores).await.validate_custom()?;

    Ok(Status::Ok)
}

#[derive(Serialize, Deserialize)]
pub struct MappingDetailResponse {
    pub learning_outcome: LearningOutcome,
    pub mappings: Vec<OutcomeMapping>,
    pub program_outcomes: Vec<ProgramOutcome>,
}

async fn load_accessible_outcome(
    db: &Pool<Sqlite>,
    user: &User,
    learning_outcome_id: i64,
) -> ApiResult<LearningOutcome> {
    let outcome = get_learning_outcome(db, learning_outcome_id)
        .await
        .validate_custom()?;
    load_accessible_course_custom(db, user, outcome.course_id).await?;
    Ok(outcome)
}

#[get("/lo/<id>/mapping")]
pub async fn api_outcome_mappings(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<MappingDetailResponse>> {
    let learning_outcome = load_accessible_outcome(db, &user, id).await?;

    let mappings = get_learning_outcome_mappings(db, id)
        .await
        .validate_custom()?;
    let program_outcomes = get_program_outcomes(db).await.validate_custom()?;

    Ok(Json(MappingDetailResponse {
        learning_outcome,
        mappings,
        program_outcomes,
    }))
}

#[derive(Deserialize, Validate)]
pub struct MappingRequest {
    program_outcome_id: i64,
    #[validate(range(min = 0.0, max = 1.0, message = "Weight must be between 0 and 1"))]
    weight: f64,
}

#[post("/lo/<id>/mapping", data = "<request>")]
pub async fn api_create_mapping(
    id: i64,
    request: Json<MappingRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<CreatedResponse>>> {
    user.require_permission(Permission::ManageCourseContent)
        .validate_custom()?;
    load_accessible_outcome(db, &user, id).await?;

    let validated = request.validate_custom()?;

    get_program_outcome(db, validated.program_outcome_id)
        .await
        .or_field_error("program_outcome_id", "Program outcome does not exist")?;

    let mapping_id = create_mapping(db, id, validated.program_outcome_id, validated.weight)
        .await
        .validate_custom()?;

    Ok(created(mapping_id))
}

#[delete("/mapping/<id>")]
pub async fn api_delete_mapping(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    user.require_permission(Permission::ManageCourseContent)?;

    let mapping = get_mapping(db, id).await?;
    let outcome = get_learning_outcome(db, mapping.learning_outcome_id).await?;
    load_accessible_course(db, &user, outcome.course_id).await?;

    delete_mapping(db, id).await?;

    Ok(Status::NoContent)
}
