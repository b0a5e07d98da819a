use rocket::Request;
use rocket::http::{Cookie, CookieJar, Header, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::{self, Responder, status::Custom};
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;

use crate::db::{get_identity, get_session_by_token, invalidate_session};

use super::{Role, User};

pub const SESSION_COOKIE: &str = "session_token";

/// Same wording as a failed login so a rejected identity cannot be told
/// apart from a wrong password.
pub const GENERIC_AUTH_FAILURE: &str = "Invalid username or password";

/// Marks a request whose session was torn down because the identity has no
/// usable role.
#[derive(Debug, Clone, Copy, Default)]
struct ForcedLogout(bool);

const SESSION_COOKIES: [&str; 3] = [SESSION_COOKIE, "user_id", "user_role"];

pub fn clear_session_cookies(cookies: &CookieJar<'_>) {
    for name in SESSION_COOKIES {
        cookies.remove_private(Cookie::build(name));
    }
}

/// JSON 401 body. A forced logout also expires the session cookies, since
/// jar changes made by a failing guard never reach the catcher's response.
pub struct UnauthorizedResponse {
    body: Custom<Json<Value>>,
    clear_cookies: bool,
}

impl<'r> Responder<'r, 'static> for UnauthorizedResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let mut response = self.body.respond_to(req)?;
        if self.clear_cookies {
            for name in SESSION_COOKIES {
                let mut removal = Cookie::from(name);
                removal.set_path("/");
                removal.make_removal();
                response.adjoin_header(Header::new("Set-Cookie", removal.to_string()));
            }
        }
        Ok(response)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        authenticate(request).await
    }
}

#[tracing::instrument(name = "user_auth_guard", skip_all)]
async fn authenticate(request: &Request<'_>) -> Outcome<User, ()> {
    let cookies = request.cookies();

    let Some(token) = cookies
        .get_private(SESSION_COOKIE)
        .map(|c| c.value().to_string())
    else {
        return Outcome::Error((Status::Unauthorized, ()));
    };

    let db = match request.rocket().state::<SqlitePool>() {
        Some(pool) => pool,
        _ => {
            tracing::error!("Database pool not found in managed state");
            return Outcome::Error((Status::InternalServerError, ()));
        }
    };

    let session = match get_session_by_token(db, &token).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = ?err, "Invalid session token");
            return Outcome::Error((Status::Unauthorized, ()));
        }
    };

    if !session.is_valid() {
        tracing::warn!(user_id = session.user_id, "Session token expired");
        return Outcome::Error((Status::Unauthorized, ()));
    }

    let user = match get_identity(db, session.user_id).await {
        Ok(user) => user,
        Err(err) => {
            tracing::error!(user_id = %session.user_id, error = ?err, "Failed to fetch user for valid session");
            return Outcome::Error((Status::InternalServerError, ()));
        }
    };

    if user.role == Role::Unauthorized {
        tracing::warn!(username = %user.username, "Identity has no role, terminating session");
        if let Err(err) = invalidate_session(db, &token).await {
            tracing::error!(error = ?err, "Failed to invalidate session");
        }
        request.local_cache(|| ForcedLogout(true));
        return Outcome::Error((Status::Unauthorized, ()));
    }

    tracing::info!(username = %user.username, role = %user.role.as_str(), "User authenticated via session token");
    Outcome::Success(user)
}

#[catch(401)]
pub fn unauthorized_api(req: &Request) -> UnauthorizedResponse {
    let ForcedLogout(forced) = *req.local_cache(|| ForcedLogout(false));

    let message = if forced {
        GENERIC_AUTH_FAILURE
    } else {
        "Authentication required"
    };

    tracing::warn!("Unauthorized access attempt to {}", req.uri());
    UnauthorizedResponse {
        body: Custom(
            Status::Unauthorized,
            Json(json!({
                "error": "Unauthorized",
                "message": message,
                "redirect_url": "/ui/login"
            })),
        ),
        clear_cookies: forced,
    }
}

#[catch(403)]
pub fn forbidden_api(req: &Request) -> Custom<Json<Value>> {
    tracing::warn!("Forbidden access attempt to {}", req.uri());
    Custom(
        Status::Forbidden,
        Json(json!({
            "error": "Forbidden",
            "message": "You don't have permission to access this resource"
        })),
    )
}
