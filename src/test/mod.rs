mod db;
mod sessions;
mod utils;

pub use utils::test_db;

pub mod test_utils {
    use rocket::http::{ContentType, Cookie};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use crate::config::AppConfig;
    use crate::init_rocket;

    pub use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};

    /// Two teachers with one course each, a department head, two enrolled
    /// students with scores and an account without any role.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .department("Computer Engineering")
            .department_head("head_user", "Head User")
            .teacher("teacher_user", "Teacher User")
            .teacher("other_teacher", "Other Teacher")
            .student("student_user", "S001", "Student", "User")
            .student("second_student", "S002", "Second", "Student")
            .user_without_role("roleless_user")
            .course("CSE101", "Intro to Programming", Some("teacher_user"))
            .course("CSE202", "Data Structures", Some("other_teacher"))
            .learning_outcome("CSE101", "LO1")
            .learning_outcome("CSE101", "LO2")
            .learning_outcome("CSE202", "LO1")
            .program_outcome("PO1")
            .program_outcome("PO2")
            .mapping("CSE101", "LO1", "PO1", 0.5)
            .assessment("CSE101", "Midterm", 40)
            .assessment("CSE101", "Final", 60)
            .assessment("CSE202", "Quiz", 100)
            .assessment_weight("CSE101", "Midterm", "LO1", 50.0)
            .assessment_weight("CSE101", "Final", "LO2", 100.0)
            .enroll("student_user", "CSE101")
            .enroll("second_student", "CSE101")
            .score("student_user", "CSE101", "Midterm", 50.0)
            .score("student_user", "CSE101", "Final", 90.0)
            .score("second_student", "CSE101", "Midterm", 30.0)
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), AppConfig::default()).await;
        let client = Client::untracked(rocket)
            .await
            .expect("valid rocket instance");
        (client, test_db)
    }

    pub async fn login_test_user(
        client: &Client,
        username: &str,
        password: &str,
    ) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        response
            .cookies()
            .iter()
            .map(|cookie| cookie.clone().into_owned())
            .collect()
    }
}
