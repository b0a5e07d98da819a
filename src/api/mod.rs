use chrono::Utc;
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{
    GENERIC_AUTH_FAILURE, Permission, Role, SESSION_COOKIE, User, UserSession,
    clear_session_cookies,
};
use crate::config::AppConfig;
use crate::db::{authenticate_user, create_user_session, invalidate_session, update_user_password};
use crate::models::Course;
use crate::rollup::round1;
use crate::validation::{
    ApiResult, AppErrorExt, JsonValidateExt, PermissionCheckExt, ValidationResponse,
};

pub mod department;
pub mod student;
pub mod teaching;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub student_id: Option<i64>,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role,
            student_id: user.student_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HomeResponse {
    pub role: Role,
    pub redirect_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedResponse {
    pub id: i64,
}

pub fn created(id: i64) -> Custom<Json<CreatedResponse>> {
    Custom(Status::Created, Json(CreatedResponse { id }))
}

/// Parallel label/value arrays for a chart.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl ChartSeries {
    pub fn push(&mut self, label: impl Into<String>, value: f64) {
        self.labels.push(label.into());
        self.values.push(round1(value));
    }
}

fn login_failure() -> Json<LoginResponse> {
    Json(LoginResponse {
        success: false,
        user: None,
        error: Some(GENERIC_AUTH_FAILURE.to_string()),
        redirect_url: None,
    })
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Json<LoginResponse>> {
    let validated = login.validate_custom()?;

    let Some(user) = authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    else {
        return Ok(login_failure());
    };

    // An account with no usable role never gets a session.
    let Some(redirect_url) = user.role.home_url() else {
        tracing::warn!(username = %user.username, "Login refused for identity without a role");
        return Ok(login_failure());
    };

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + config.session_duration();

    create_user_session(db, user.id, &token, expires_at.naive_utc())
        .await
        .validate_custom()?;

    let max_age = rocket::time::Duration::hours(config.session_hours);

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(max_age),
    );

    cookies.add_private(
        Cookie::build(("user_id", user.id.to_string()))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(max_age),
    );

    cookies.add_private(
        Cookie::build(("user_role", user.role.to_string()))
            .same_site(SameSite::Lax)
            .max_age(max_age),
    );

    Ok(Json(LoginResponse {
        success: true,
        user: Some(UserData::from(user)),
        error: None,
        redirect_url: Some(redirect_url.to_string()),
    }))
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    clear_session_cookies(cookies);

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/home")]
pub async fn api_home(user: User) -> Json<HomeResponse> {
    Json(HomeResponse {
        role: user.role,
        redirect_url: user.role.home_url().map(String::from),
    })
}

#[derive(Deserialize, Validate)]
pub struct PasswordChangeRequest {
    current_password: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    new_password: String,
}

#[post("/change-password", data = "<password>")]
pub async fn api_change_password(
    password: Json<PasswordChangeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::ChangeOwnPassword)
        .validate_custom()?;

    let validated = password.validate_custom()?;

    let is_valid = authenticate_user(db, &user.username, &validated.current_password)
        .await
        .validate_custom()?;

    match is_valid {
        Some(_) => {
            update_user_password(db, user.id, &validated.new_password)
                .await
                .validate_custom()?;

            Ok(Status::Ok)
        }
        _ => Err(Custom(
            Status::Unauthorized,
            Json(ValidationResponse::with_error(
                "current_password",
                "Current password is incorrect",
            )),
        )),
    }
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

/// Loads a course and checks the caller may work on it.
pub(crate) async fn load_accessible_course(
    db: &Pool<Sqlite>,
    user: &User,
    course_id: i64,
) -> Result<Course, Status> {
    let course = crate::db::get_course(db, course_id).await?;
    user.require_course_access(course.teacher_id)?;
    Ok(course)
}

/// `load_accessible_course` for handlers that answer with validation
/// responses.
pub(crate) async fn load_accessible_course_custom(
    db: &Pool<Sqlite>,
    user: &User,
    course_id: i64,
) -> ApiResult<Course> {
    let course = crate::db::get_course(db, course_id)
        .await
        .validate_custom()?;
    user.require_course_access(course.teacher_id)
        .validate_custom()?;
    Ok(course)
}
