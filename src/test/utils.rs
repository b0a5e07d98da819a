#[cfg(test)]
pub mod test_db {
    use crate::auth::Group;
    use crate::database::apply_schema;
    use crate::db::{
        NewStudent, create_assessment, create_assessment_weight, create_course,
        create_department, create_learning_outcome, create_mapping, create_program_outcome,
        create_semester, create_student, create_user, enroll_student, upsert_scores,
    };
    use crate::error::AppError;
    use crate::models::Term;
    use sqlx::{Pool, Sqlite, sqlite::SqlitePoolOptions};
    use std::collections::HashMap;
    use std::sync::Once;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";
    const DEFAULT_SEMESTER: &str = "Fall 2024";

    pub enum TestAccount {
        Staff { group: Group, display_name: String },
        Superuser,
        Student { student_number: String, first_name: String, last_name: String },
        NoRole,
    }

    pub struct TestUser {
        pub username: String,
        pub account: TestAccount,
    }

    pub struct TestCourse {
        pub code: String,
        pub name: String,
        pub teacher_username: Option<String>,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        departments: Vec<String>,
        users: Vec<TestUser>,
        courses: Vec<TestCourse>,
        learning_outcomes: Vec<(String, String)>,
        program_outcomes: Vec<String>,
        mappings: Vec<(String, String, String, f64)>,
        assessments: Vec<(String, String, i64)>,
        weights: Vec<(String, String, String, f64)>,
        enrollments: Vec<(String, String)>,
        scores: Vec<(String, String, String, f64)>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn department(mut self, name: &str) -> Self {
            self.departments.push(name.to_string());
            self
        }

        pub fn department_head(mut self, username: &str, display_name: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                account: TestAccount::Staff {
                    group: Group::DepartmentHead,
                    display_name: display_name.to_string(),
                },
            });
            self
        }

        pub fn teacher(mut self, username: &str, display_name: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                account: TestAccount::Staff {
                    group: Group::Teacher,
                    display_name: display_name.to_string(),
                },
            });
            self
        }

        pub fn superuser(mut self, username: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                account: TestAccount::Superuser,
            });
            self
        }

        pub fn student(
            mut self,
            username: &str,
            student_number: &str,
            first_name: &str,
            last_name: &str,
        ) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                account: TestAccount::Student {
                    student_number: student_number.to_string(),
                    first_name: first_name.to_string(),
                    last_name: last_name.to_string(),
                },
            });
            self
        }

        /// An account with no group and no student profile.
        pub fn user_without_role(mut self, username: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                account: TestAccount::NoRole,
            });
            self
        }

        pub fn course(mut self, code: &str, name: &str, teacher_username: Option<&str>) -> Self {
            self.courses.push(TestCourse {
                code: code.to_string(),
                name: name.to_string(),
                teacher_username: teacher_username.map(String::from),
            });
            self
        }

        pub fn learning_outcome(mut self, course_code: &str, code: &str) -> Self {
            self.learning_outcomes
                .push((course_code.to_string(), code.to_string()));
            self
        }

        pub fn program_outcome(mut self, code: &str) -> Self {
            self.program_outcomes.push(code.to_string());
            self
        }

        pub fn mapping(mut self, course_code: &str, lo_code: &str, po_code: &str, weight: f64) -> Self {
            self.mappings.push((
                course_code.to_string(),
                lo_code.to_string(),
                po_code.to_string(),
                weight,
            ));
            self
        }

        pub fn assessment(mut self, course_code: &str, name: &str, weight: i64) -> Self {
            self.assessments
                .push((course_code.to_string(), name.to_string(), weight));
            self
        }

        pub fn assessment_weight(
            mut self,
            course_code: &str,
            assessment_name: &str,
            lo_code: &str,
            percentage: f64,
        ) -> Self {
            self.weights.push((
                course_code.to_string(),
                assessment_name.to_string(),
                lo_code.to_string(),
                percentage,
            ));
            self
        }

        pub fn enroll(mut self, username: &str, course_code: &str) -> Self {
            self.enrollments
                .push((username.to_string(), course_code.to_string()));
            self
        }

        pub fn score(
            mut self,
            username: &str,
            course_code: &str,
            assessment_name: &str,
            score: f64,
        ) -> Self {
            self.scores.push((
                username.to_string(),
                course_code.to_string(),
                assessment_name.to_string(),
                score,
            ));
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            // One connection keeps every query on the same in-memory database.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?;

            apply_schema(&pool).await?;

            let mut db = TestDb {
                pool,
                department_ids: HashMap::new(),
                user_ids: HashMap::new(),
                student_ids: HashMap::new(),
                semester_id: 0,
                course_ids: HashMap::new(),
                learning_outcome_ids: HashMap::new(),
                program_outcome_ids: HashMap::new(),
                assessment_ids: HashMap::new(),
            };
            let pool = &db.pool;

            for name in &self.departments {
                let id = create_department(pool, name).await?;
                db.department_ids.insert(name.clone(), id);
            }

            for user in &self.users {
                match &user.account {
                    TestAccount::Staff {
                        group,
                        display_name,
                    } => {
                        let id = create_user(
                            pool,
                            &user.username,
                            STANDARD_PASSWORD,
                            Some(display_name.as_str()),
                            Some(*group),
                        )
                        .await?;
                        db.user_ids.insert(user.username.clone(), id);
                    }
                    TestAccount::Superuser => {
                        let id = create_user(pool, &user.username, STANDARD_PASSWORD, None, None)
                            .await?;
                        sqlx::query("UPDATE users SET is_superuser = 1 WHERE id = ?")
                            .bind(id)
                            .execute(pool)
                            .await?;
                        db.user_ids.insert(user.username.clone(), id);
                    }
                    TestAccount::Student {
                        student_number,
                        first_name,
                        last_name,
                    } => {
                        let student_id = create_student(
                            pool,
                            &NewStudent {
                                username: &user.username,
                                password: STANDARD_PASSWORD,
                                student_number,
                                first_name,
                                last_name,
                                department_id: db.department_ids.values().next().copied(),
                            },
                        )
                        .await?;
                        let user_id = crate::db::get_student(pool, student_id)
                            .await?
                            .user_id
                            .unwrap_or_default();
                        db.student_ids.insert(user.username.clone(), student_id);
                        db.user_ids.insert(user.username.clone(), user_id);
                    }
                    TestAccount::NoRole => {
                        let id = create_user(pool, &user.username, STANDARD_PASSWORD, None, None)
                            .await?;
                        db.user_ids.insert(user.username.clone(), id);
                    }
                }
            }

            db.semester_id = create_semester(pool, DEFAULT_SEMESTER, 2024, Term::Fall).await?;

            for course in &self.courses {
                let teacher_id = course
                    .teacher_username
                    .as_ref()
                    .and_then(|u| db.user_ids.get(u).copied());
                let id =
                    create_course(pool, &course.code, &course.name, db.semester_id, teacher_id)
                        .await?;
                db.course_ids.insert(course.code.clone(), id);
            }

            for (course_code, code) in &self.learning_outcomes {
                let course_id = db.lookup_course(course_code)?;
                let id = create_learning_outcome(
                    pool,
                    course_id,
                    code,
                    &format!("{} of {}", code, course_code),
                )
                .await?;
                db.learning_outcome_ids
                    .insert((course_code.clone(), code.clone()), id);
            }

            for code in &self.program_outcomes {
                let id = create_program_outcome(pool, code, &format!("{} description", code))
                    .await?;
                db.program_outcome_ids.insert(code.clone(), id);
            }

            for (course_code, lo_code, po_code, weight) in &self.mappings {
                let lo_id = db.lookup_learning_outcome(course_code, lo_code)?;
                let po_id = db.lookup_program_outcome(po_code)?;
                create_mapping(pool, lo_id, po_id, *weight).await?;
            }

            for (course_code, name, weight) in &self.assessments {
                let course_id = db.lookup_course(course_code)?;
                let id = create_assessment(pool, course_id, name, *weight).await?;
                db.assessment_ids
                    .insert((course_code.clone(), name.clone()), id);
            }

            for (course_code, assessment_name, lo_code, percentage) in &self.weights {
                let assessment_id = db.lookup_assessment(course_code, assessment_name)?;
                let lo_id = db.lookup_learning_outcome(course_code, lo_code)?;
                create_assessment_weight(pool, assessment_id, lo_id, *percentage).await?;
            }

            for (username, course_code) in &self.enrollments {
                let student_id = db.lookup_student(username)?;
                let course_id = db.lookup_course(course_code)?;
                enroll_student(pool, student_id, course_id).await?;
            }

            for (username, course_code, assessment_name, score) in &self.scores {
                let student_id = db.lookup_student(username)?;
                let assessment_id = db.lookup_assessment(course_code, assessment_name)?;
                upsert_scores(pool, assessment_id, &[(student_id, *score)]).await?;
            }

            Ok(db)
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub department_ids: HashMap<String, i64>,
        pub user_ids: HashMap<String, i64>,
        pub student_ids: HashMap<String, i64>,
        pub semester_id: i64,
        pub course_ids: HashMap<String, i64>,
        pub learning_outcome_ids: HashMap<(String, String), i64>,
        pub program_outcome_ids: HashMap<String, i64>,
        pub assessment_ids: HashMap<(String, String), i64>,
    }

    fn missing(what: &str, key: &str) -> AppError {
        AppError::NotFound(format!("Test fixture has no {} '{}'", what, key))
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_ids.get(username).copied()
        }

        pub fn student_id(&self, username: &str) -> Option<i64> {
            self.student_ids.get(username).copied()
        }

        pub fn course_id(&self, code: &str) -> Option<i64> {
            self.course_ids.get(code).copied()
        }

        pub fn learning_outcome_id(&self, course_code: &str, code: &str) -> Option<i64> {
            self.learning_outcome_ids
                .get(&(course_code.to_string(), code.to_string()))
                .copied()
        }

        pub fn program_outcome_id(&self, code: &str) -> Option<i64> {
            self.program_outcome_ids.get(code).copied()
        }

        pub fn assessment_id(&self, course_code: &str, name: &str) -> Option<i64> {
            self.assessment_ids
                .get(&(course_code.to_string(), name.to_string()))
                .copied()
        }

        fn lookup_course(&self, code: &str) -> Result<i64, AppError> {
            self.course_id(code).ok_or_else(|| missing("course", code))
        }

        fn lookup_student(&self, username: &str) -> Result<i64, AppError> {
            self.student_id(username)
                .ok_or_else(|| missing("student", username))
        }

        fn lookup_learning_outcome(&self, course_code: &str, code: &str) -> Result<i64, AppError> {
            self.learning_outcome_id(course_code, code)
                .ok_or_else(|| missing("learning outcome", code))
        }

        fn lookup_program_outcome(&self, code: &str) -> Result<i64, AppError> {
            self.program_outcome_id(code)
                .ok_or_else(|| missing("program outcome", code))
        }

        fn lookup_assessment(&self, course_code: &str, name: &str) -> Result<i64, AppError> {
            self.assessment_id(course_code, name)
                .ok_or_else(|| missing("assessment", name))
        }

        pub async fn score_count(&self, assessment_id: i64) -> Result<i64, sqlx::Error> {
            let (count,) = sqlx::query_as::<_, (i64,)>(
                "SELECT COUNT(*) FROM student_scores WHERE assessment_id = ?",
            )
            .bind(assessment_id)
            .fetch_one(&self.pool)
            .await?;

            Ok(count)
        }
    }
}
