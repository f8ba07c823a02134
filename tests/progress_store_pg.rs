//! PgStore progress-upsert tests against a live Postgres.
//!
//! The first-completion semantics of `complete_lesson`/`complete_exercise`
//! live in `ON CONFLICT ... DO NOTHING` SQL and cannot be covered in-memory,
//! so these run against a real database. Run with:
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test --test progress_store_pg -- --ignored
//! ```

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use coursecert::store::PgStore;

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for live-database tests")
}

async fn setup() -> (PgPool, PgStore) {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url())
        .await
        .expect("failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");
    (pool.clone(), PgStore::new(pool))
}

/// Inserts a fresh student plus one course/module/lesson/exercise chain.
/// Returns (user_id, lesson_id, exercise_id).
async fn seed_world(pool: &PgPool) -> (Uuid, Uuid, Uuid) {
    let user = Uuid::new_v4();
    let course = Uuid::new_v4();
    let module = Uuid::new_v4();
    let lesson = Uuid::new_v4();
    let exercise = Uuid::new_v4();

    sqlx::query("INSERT INTO profiles (id, full_name) VALUES ($1, 'Test Student')")
        .bind(user)
        .execute(pool)
        .await
        .expect("seed profile");
    sqlx::query("INSERT INTO courses (id, title) VALUES ($1, 'Test Course')")
        .bind(course)
        .execute(pool)
        .await
        .expect("seed course");
    sqlx::query("INSERT INTO modules (id, course_id, title) VALUES ($1, $2, 'Test Module')")
        .bind(module)
        .bind(course)
        .execute(pool)
        .await
        .expect("seed module");
    sqlx::query(
        "INSERT INTO lessons (id, module_id, title, xp_reward) VALUES ($1, $2, 'Test Lesson', 10)",
    )
    .bind(lesson)
    .bind(module)
    .execute(pool)
    .await
    .expect("seed lesson");
    sqlx::query(
        r#"
        INSERT INTO exercises (id, lesson_id, title, content, xp_reward)
        VALUES ($1, $2, 'Test Exercise', $3, 20)
        "#,
    )
    .bind(exercise)
    .bind(lesson)
    .bind(serde_json::json!({
        "kind": "multiple_choice",
        "question": "?",
        "options": ["a", "b"],
        "correct_option": 0
    }))
    .execute(pool)
    .await
    .expect("seed exercise");

    (user, lesson, exercise)
}

async fn progress_rows(pool: &PgPool, user: Uuid) -> i64 {
    sqlx::query_scalar("SELECT count(*) FROM student_progress WHERE user_id = $1")
        .bind(user)
        .fetch_one(pool)
        .await
        .expect("count progress rows")
}

#[tokio::test]
#[ignore]
async fn lesson_completion_is_recorded_once() {
    let (pool, store) = setup().await;
    let (user, lesson, _) = seed_world(&pool).await;

    assert!(store.complete_lesson(user, lesson).await.unwrap());
    assert!(!store.complete_lesson(user, lesson).await.unwrap());
    assert_eq!(progress_rows(&pool, user).await, 1);
}

#[tokio::test]
#[ignore]
async fn repeat_exercise_completion_updates_score_in_place() {
    let (pool, store) = setup().await;
    let (user, _, exercise) = seed_world(&pool).await;

    assert!(store.complete_exercise(user, exercise, Some(60)).await.unwrap());
    assert!(!store.complete_exercise(user, exercise, Some(90)).await.unwrap());
    // a repeat without a score keeps the recorded one
    assert!(!store.complete_exercise(user, exercise, None).await.unwrap());

    let score: Option<i32> = sqlx::query_scalar(
        "SELECT score FROM student_progress WHERE user_id = $1 AND exercise_id = $2",
    )
    .bind(user)
    .bind(exercise)
    .fetch_one(&pool)
    .await
    .expect("fetch score");
    assert_eq!(score, Some(90));
    assert_eq!(progress_rows(&pool, user).await, 1);
}

#[tokio::test]
#[ignore]
async fn xp_is_awarded_only_for_the_first_completion() {
    let (pool, store) = setup().await;
    let (user, lesson, _) = seed_world(&pool).await;

    // same award rule as the completion handlers
    for _ in 0..2 {
        if store.complete_lesson(user, lesson).await.unwrap() {
            store.award_xp(user, 10).await.unwrap();
        }
    }
    assert_eq!(store.xp_total(user).await.unwrap(), Some(10));
}
