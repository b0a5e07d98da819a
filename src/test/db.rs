#[cfg(test)]
mod tests {
    use crate::auth::{CourseScope, Group, Role};
    use crate::database::{SCHEMA_VERSION, apply_schema};
    use crate::db::{
        NewStudent, add_user_to_group, authenticate_user, create_learning_outcome, create_student, create_user,
        delete_course, delete_department, enroll_student, find_user_by_username, get_course,
        get_identity, get_learning_outcome, get_program_outcome_rows, get_scope_counts,
        get_student, get_student_scores, upsert_scores,
    };
    use crate::error::AppError;
    use crate::test::test_utils::{STANDARD_PASSWORD, TestDbBuilder, create_standard_test_db};

    use rocket::tokio;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_create_user_and_resolve_role() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");
        let pool = &test_db.pool;

        let user_id = create_user(pool, "test_user", "password123", Some("Test User"), None)
            .await
            .expect("Failed to create test user");

        let found = find_user_by_username(pool, "test_user")
            .await
            .expect("Failed to get user");
        assert_eq!(found, Some(user_id));

        let user = get_identity(pool, user_id)
            .await
            .expect("Failed to load identity");
        assert_eq!(user.display_name, "Test User");
        assert_eq!(user.role, Role::Unauthorized);

        match create_user(pool, "test_user", "other-password", None, None).await {
            Err(AppError::Conflict(_)) => {}
            other => panic!("Expected conflict, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_create_staff_user_with_group() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher_user", "Teacher User")
            .build()
            .await
            .expect("Failed to build test database");
        let pool = &test_db.pool;

        let user_id = create_user(
            pool,
            "new_teacher",
            "password123",
            Some("New Teacher"),
            Some(Group::Teacher),
        )
        .await
        .expect("Failed to create staff user");

        let user = get_identity(pool, user_id)
            .await
            .expect("Failed to load identity");
        assert_eq!(user.role, Role::Teacher);
        assert_eq!(user.display_name, "New Teacher");

        let (groups,) =
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM user_groups WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(pool)
                .await
                .unwrap();
        assert_eq!(groups, 1);

        let result = create_user(
            pool,
            "teacher_user",
            "password123",
            Some("Duplicate"),
            Some(Group::DepartmentHead),
        )
        .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let (users, groups) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT (SELECT COUNT(*) FROM users), (SELECT COUNT(*) FROM user_groups)",
        )
        .fetch_one(pool)
        .await
        .unwrap();
        assert_eq!((users, groups), (2, 2));
    }

    #[tokio::test]
    async fn test_group_insert_failure_rolls_back_user() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");
        let pool = &test_db.pool;

        sqlx::raw_sql(
            "CREATE TRIGGER reject_groups BEFORE INSERT ON user_groups
             BEGIN SELECT RAISE(ABORT, 'group insert rejected'); END;",
        )
        .execute(pool)
        .await
        .unwrap();

        let result = create_user(
            pool,
            "new_teacher",
            "password123",
            Some("New Teacher"),
            Some(Group::Teacher),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            find_user_by_username(pool, "new_teacher").await.unwrap(),
            None,
            "Failed group insert must not leave an account behind"
        );
    }

    #[tokio::test]
    async fn test_authenticate_user() {
        let test_db = create_standard_test_db().await;
        let pool = &test_db.pool;

        let user = authenticate_user(pool, "teacher_user", STANDARD_PASSWORD)
            .await
            .expect("Authentication query failed")
            .expect("Valid credentials should authenticate");
        assert_eq!(user.role, Role::Teacher);

        let wrong = authenticate_user(pool, "teacher_user", "nope")
            .await
            .expect("Authentication query failed");
        assert!(wrong.is_none());

        let unknown = authenticate_user(pool, "ghost", STANDARD_PASSWORD)
            .await
            .expect("Authentication query failed");
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_create_student_links_account() {
        let test_db = TestDbBuilder::new()
            .department("Computer Engineering")
            .build()
            .await
            .expect("Failed to build test database");
        let pool = &test_db.pool;

        let student_id = create_student(
            pool,
            &NewStudent {
                username: "ada",
                password: "secret-pass",
                student_number: "S042",
                first_name: "Ada",
                last_name: "Lovelace",
                department_id: test_db.department_ids.get("Computer Engineering").copied(),
            },
        )
        .await
        .expect("Failed to create student");

        let student = get_student(pool, student_id)
            .await
            .expect("Failed to load student");
        assert_eq!(student.username.as_deref(), Some("ada"));
        assert_eq!(
            (student.first_name.as_str(), student.last_name.as_str()),
            ("Ada", "Lovelace")
        );
        assert_eq!(
            student.department_name.as_deref(),
            Some("Computer Engineering")
        );

        let user = get_identity(pool, student.user_id.expect("Student has no account"))
            .await
            .expect("Failed to load identity");
        assert_eq!(user.role, Role::Student);
        assert_eq!(user.student_id, Some(student_id));
        assert_eq!(user.display_name, "Ada Lovelace");

        let duplicate_number = create_student(
            pool,
            &NewStudent {
                username: "other",
                password: "secret-pass",
                student_number: "S042",
                first_name: "Other",
                last_name: "Person",
                department_id: None,
            },
        )
        .await;
        assert!(matches!(duplicate_number, Err(AppError::Conflict(_))));
        assert_eq!(
            find_user_by_username(pool, "other").await.unwrap(),
            None,
            "Rejected student must not leave an account behind"
        );
    }

    #[tokio::test]
    async fn test_staff_group_outranks_student_profile() {
        let test_db = TestDbBuilder::new()
            .student("teaching_assistant", "S777", "Teaching", "Assistant")
            .build()
            .await
            .expect("Failed to build test database");
        let pool = &test_db.pool;
        let user_id = test_db.user_id("teaching_assistant").unwrap();

        add_user_to_group(pool, user_id, Group::Teacher)
            .await
            .expect("Failed to add group");
        // Adding the same membership again is a no-op.
        add_user_to_group(pool, user_id, Group::Teacher)
            .await
            .expect("Failed to add group twice");

        let user = get_identity(pool, user_id).await.unwrap();
        assert_eq!(user.role, Role::Teacher);
    }

    #[tokio::test]
    async fn test_duplicate_learning_outcome_code() {
        let test_db = create_standard_test_db().await;
        let pool = &test_db.pool;
        let cse101 = test_db.course_id("CSE101").unwrap();
        let cse202 = test_db.course_id("CSE202").unwrap();

        let result = create_learning_outcome(pool, cse101, "LO1", "Duplicate").await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        // The same code in another course is fine.
        let id = create_learning_outcome(pool, cse202, "LO2", "Second")
            .await
            .expect("Failed to create learning outcome");
        let outcome = get_learning_outcome(pool, id).await.unwrap();
        assert_eq!(outcome.course_code, "CSE202");
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_conflicts() {
        let test_db = create_standard_test_db().await;

        let result = enroll_student(
            &test_db.pool,
            test_db.student_id("student_user").unwrap(),
            test_db.course_id("CSE101").unwrap(),
        )
        .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_score() {
        let test_db = create_standard_test_db().await;
        let pool = &test_db.pool;
        let student = test_db.student_id("student_user").unwrap();
        let midterm = test_db.assessment_id("CSE101", "Midterm").unwrap();

        upsert_scores(pool, midterm, &[(student, 77.5)])
            .await
            .expect("Failed to save score");

        let scores = get_student_scores(pool, student).await.unwrap();
        let midterm_scores: Vec<f64> = scores
            .iter()
            .filter(|s| s.assessment_id == midterm)
            .map(|s| s.score)
            .collect();

        assert_eq!(midterm_scores, vec![77.5]);
        assert_eq!(test_db.score_count(midterm).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_course_cascades() {
        let test_db = create_standard_test_db().await;
        let pool = &test_db.pool;
        let course_id = test_db.course_id("CSE101").unwrap();
        let midterm = test_db.assessment_id("CSE101", "Midterm").unwrap();
        let lo_id = test_db.learning_outcome_id("CSE101", "LO1").unwrap();

        delete_course(pool, course_id)
            .await
            .expect("Failed to delete course");

        assert!(matches!(
            get_course(pool, course_id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            get_learning_outcome(pool, lo_id).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(test_db.score_count(midterm).await.unwrap(), 0);

        let (mappings,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM outcome_mappings")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(mappings, 0);

        assert!(matches!(
            delete_course(pool, course_id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_department_keeps_students() {
        let test_db = create_standard_test_db().await;
        let pool = &test_db.pool;
        let department_id = test_db.department_ids["Computer Engineering"];

        delete_department(pool, department_id)
            .await
            .expect("Failed to delete department");

        let student = get_student(pool, test_db.student_id("student_user").unwrap())
            .await
            .expect("Student should survive department deletion");
        assert_eq!(student.department_id, None);
        assert_eq!(student.department_name, None);
    }

    #[tokio::test]
    async fn test_scope_counts() {
        let test_db = create_standard_test_db().await;
        let pool = &test_db.pool;
        let teacher = test_db.user_id("teacher_user").unwrap();
        let other = test_db.user_id("other_teacher").unwrap();

        let all = get_scope_counts(pool, CourseScope::All).await.unwrap();
        assert_eq!((all.courses, all.students, all.assessments), (2, 2, 3));

        let own = get_scope_counts(pool, CourseScope::OwnedBy(teacher))
            .await
            .unwrap();
        assert_eq!((own.courses, own.students, own.assessments), (1, 2, 2));

        let other = get_scope_counts(pool, CourseScope::OwnedBy(other))
            .await
            .unwrap();
        assert_eq!((other.courses, other.students, other.assessments), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_program_outcome_rows_follow_enrollments() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher_user", "Teacher User")
            .student("student_user", "S001", "Student", "User")
            .course("CSE101", "Intro to Programming", Some("teacher_user"))
            .course("CSE202", "Data Structures", Some("teacher_user"))
            .learning_outcome("CSE101", "LO1")
            .learning_outcome("CSE202", "LO1")
            .program_outcome("PO1")
            .program_outcome("PO2")
            .mapping("CSE101", "LO1", "PO1", 1.0)
            .mapping("CSE202", "LO1", "PO2", 1.0)
            .assessment("CSE101", "Midterm", 100)
            .assessment("CSE202", "Quiz", 100)
            .assessment_weight("CSE101", "Midterm", "LO1", 100.0)
            .assessment_weight("CSE202", "Quiz", "LO1", 100.0)
            .enroll("student_user", "CSE101")
            .build()
            .await
            .expect("Failed to build test database");

        let rows = get_program_outcome_rows(
            &test_db.pool,
            test_db.student_id("student_user").unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(rows.learning_outcomes.len(), 1);
        assert_eq!(rows.learning_outcomes[0].course_code, "CSE101");
        assert_eq!(rows.assessment_weights.len(), 1);
        assert_eq!(rows.mappings.len(), 1);
        assert_eq!(rows.mappings[0].program_outcome_code, "PO1");
        assert_eq!(rows.program_outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_apply_schema_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        assert!(apply_schema(&pool).await.expect("First apply failed"));
        assert!(!apply_schema(&pool).await.expect("Second apply failed"));

        let (version,) = sqlx::query_as::<_, (i64,)>("PRAGMA user_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_apply_schema_refuses_newer_database() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        sqlx::raw_sql(&format!("PRAGMA user_version = {}", SCHEMA_VERSION + 1))
            .execute(&pool)
            .await
            .unwrap();

        assert!(matches!(
            apply_schema(&pool).await,
            Err(AppError::Internal(_))
        ));
    }
}
