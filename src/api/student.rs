use rocket::State;
use rocket::http::Status;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;

use crate::auth::{Permission, User};
use crate::db::{
    get_assessment_mean, get_course, get_course_assessments, get_course_outcome_rows,
    get_program_outcome_rows, get_student_enrollments, get_student_score_details, is_enrolled,
};
use crate::models::{Course, Enrollment, ScoreDetail};
use crate::rollup::{
    RollupReport, learning_outcome_report, program_outcome_report, round1, weighted_average,
};

#[get("/student/courses")]
pub async fn api_student_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Enrollment>>, Status> {
    user.require_permission(Permission::ViewOwnCourses)?;
    let student_id = user.require_student()?;
    Ok(Json(get_student_enrollments(db, student_id).await?))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExamSeries {
    pub labels: Vec<String>,
    /// The student's score per assessment, 0 where none is recorded.
    pub my_scores: Vec<f64>,
    pub class_averages: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
pub struct StudentCourseResponse {
    pub course: Course,
    pub current_average: f64,
    pub scores: HashMap<i64, f64>,
    pub exams: ExamSeries,
    pub outcomes: RollupReport,
}

#[get("/student/course/<id>")]
pub async fn api_student_course(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<StudentCourseResponse>, Status> {
    let student_id = user.require_student()?;
    let course = get_course(db, id).await?;

    if !is_enrolled(db, student_id, id).await? {
        tracing::warn!(student_id, course_id = id, "Student is not enrolled in course");
        return Err(Status::Forbidden);
    }

    let rows = get_course_outcome_rows(db, student_id, id).await?;
    let scores: HashMap<i64, f64> = rows
        .scores
        .iter()
        .map(|s| (s.assessment_id, s.score))
        .collect();

    // Oldest first for the chart.
    let mut assessments = get_course_assessments(db, id).await?;
    assessments.reverse();

    let mut exams = ExamSeries {
        labels: Vec::with_capacity(assessments.len()),
        my_scores: Vec::with_capacity(assessments.len()),
        class_averages: Vec::with_capacity(assessments.len()),
    };
    for assessment in &assessments {
        let class_average = get_assessment_mean(db, assessment.id).await?;
        exams.labels.push(assessment.name.clone());
        exams
            .my_scores
            .push(scores.get(&assessment.id).copied().unwrap_or_default());
        exams
            .class_averages
            .push(round1(class_average.unwrap_or_default()));
    }

    let current_average = weighted_average(assessments.iter().filter_map(|a| {
        scores
            .get(&a.id)
            .map(|score| (*score, a.weight as f64))
    }));

    let course_scores = assessments
        .iter()
        .filter_map(|a| scores.get(&a.id).map(|score| (a.id, *score)))
        .collect();

    Ok(Json(StudentCourseResponse {
        course,
        current_average: round1(current_average),
        scores: course_scores,
        exams,
        outcomes: learning_outcome_report(&rows),
    }))
}

#[get("/student/general-success")]
pub async fn api_general_success(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<RollupReport>, Status> {
    let student_id = user.require_student()?;
    let rows = get_program_outcome_rows(db, student_id).await?;
    Ok(Json(program_outcome_report(&rows)))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CourseGrades {
    pub course_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub scores: Vec<ScoreDetail>,
    pub average: f64,
}

/// Groups score rows already ordered by course, keeping that order.
pub fn group_grades(details: Vec<ScoreDetail>) -> Vec<CourseGrades> {
    let mut groups: Vec<CourseGrades> = Vec::new();

    for detail in details {
        match groups.last_mut() {
            Some(group) if group.course_id == detail.course_id => group.scores.push(detail),
            _ => groups.push(CourseGrades {
                course_id: detail.course_id,
                course_code: detail.course_code.clone(),
                course_name: detail.course_name.clone(),
                scores: vec![detail],
                average: 0.0,
            }),
        }
    }

    for group in &mut groups {
        group.average = round1(weighted_average(
            group
                .scores
                .iter()
                .map(|s| (s.score, s.assessment_weight as f64)),
        ));
    }

    groups
}

#[get("/student/grades")]
pub async fn api_student_grades(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<CourseGrades>>, Status> {
    let student_id = user.require_student()?;
    let details = get_student_score_details(db, student_id).await?;
    Ok(Json(group_grades(details)))
}
