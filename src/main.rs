#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod database;
mod db;
mod env;
mod error;
mod models;
mod rollup;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::department::{
    api_create_course, api_create_department, api_create_program_outcome, api_create_semester,
    api_create_student, api_delete_course, api_delete_department, api_delete_program_outcome,
    api_delete_semester, api_delete_student, api_list_courses, api_list_departments,
    api_list_program_outcomes, api_list_semesters, api_list_students, api_list_teachers,
    api_register_staff,
};
use api::student::{
    api_general_success, api_student_course, api_student_courses, api_student_grades,
};
use api::teaching::{
    api_assessment_detail, api_course_dashboard, api_course_students, api_courses,
    api_create_assessment, api_create_assessment_weight, api_create_learning_outcome,
    api_create_mapping, api_dashboard, api_delete_mapping, api_enroll_student, api_enter_grades,
    api_exams, api_grade_sheet, api_outcome_mappings,
};
use api::{api_change_password, api_home, api_login, api_logout, api_me, health};
use auth::{forbidden_api, unauthorized_api};
use config::AppConfig;
use database::apply_schema;
use db::clean_expired_sessions;
use error::AppError;
use rocket::{Build, Rocket, tokio};
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;

use sqlx::SqlitePool;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    env::load_environment()?;

    let config = AppConfig::load()?;
    let _otel_guard = init_tracing(&config)?;

    let pool = SqlitePool::connect(&config.database_url).await?;

    info!("Applying database schema...");
    if apply_schema(&pool).await? {
        info!("Initialised empty database");
    }

    spawn_session_sweeper(pool.clone(), config.session_sweep_secs);

    init_rocket(pool, config).await.launch().await?;

    Ok(())
}

/// Deletes expired sessions every `interval_secs`, starting shortly after
/// launch.
fn spawn_session_sweeper(pool: SqlitePool, interval_secs: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
        }
    });
}

pub async fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting outcome tracker");

    rocket::build()
        .manage(pool)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_home,
                api_change_password,
                health,
            ],
        )
        .mount(
            "/api",
            routes![
                api_dashboard,
                api_courses,
                api_exams,
                api_course_dashboard,
                api_create_learning_outcome,
                api_create_assessment,
                api_course_students,
                api_enroll_student,
                api_assessment_detail,
                api_create_assessment_weight,
                api_grade_sheet,
                api_enter_grades,
                api_outcome_mappings,
                api_create_mapping,
                api_delete_mapping,
            ],
        )
        .mount(
            "/api",
            routes![
                api_list_students,
                api_create_student,
                api_delete_student,
                api_list_courses,
                api_create_course,
                api_delete_course,
                api_list_semesters,
                api_create_semester,
                api_delete_semester,
                api_list_program_outcomes,
                api_create_program_outcome,
                api_delete_program_outcome,
                api_list_departments,
                api_create_department,
                api_delete_department,
                api_list_teachers,
                api_register_staff,
            ],
        )
        .mount(
            "/api",
            routes![
                api_student_courses,
                api_student_course,
                api_general_success,
                api_student_grades,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .attach(TelemetryFairing)
}
