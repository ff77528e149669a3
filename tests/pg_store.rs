//! `PgStore` against a live database. Each test seeds its own course under a
//! fresh slug; all of them return early when `DATABASE_URL` is unset.

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use course_gate::config::DatabaseConfig;
use course_gate::db::{self, Db};
use course_gate::models::*;
use course_gate::store::{PgStore, Store, StoreError};

async fn pool() -> Option<Db> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    Some(db::connect(&DatabaseConfig { url, max_connections: 5 }).await.unwrap())
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
}

struct Seeded {
    course_id: Uuid,
    lesson_id: Uuid,
    quiz_id: Uuid,
    homework_id: Uuid,
}

/// One course with a single lesson carrying both a quiz and a homework.
async fn seed(db: &Db) -> Seeded {
    let course_id: Uuid = sqlx::query_scalar(
        "INSERT INTO courses (slug, title, status) VALUES ($1, 'Store contract', 'PUBLISHED') RETURNING id",
    )
    .bind(format!("store-{}", Uuid::new_v4()))
    .fetch_one(db)
    .await
    .unwrap();
    let lesson_id: Uuid =
        sqlx::query_scalar("INSERT INTO lessons (course_id, title) VALUES ($1, 'only') RETURNING id")
            .bind(course_id)
            .fetch_one(db)
            .await
            .unwrap();
    let quiz_id: Uuid = sqlx::query_scalar("INSERT INTO quizzes (lesson_id) VALUES ($1) RETURNING id")
        .bind(lesson_id)
        .fetch_one(db)
        .await
        .unwrap();
    let homework_id: Uuid =
        sqlx::query_scalar("INSERT INTO homeworks (lesson_id, prompt) VALUES ($1, 'write it up') RETURNING id")
            .bind(lesson_id)
            .fetch_one(db)
            .await
            .unwrap();
    Seeded { course_id, lesson_id, quiz_id, homework_id }
}

fn text_submission(user_id: Uuid, homework_id: Uuid, created_at: DateTime<Utc>) -> NewSubmission {
    NewSubmission { user_id, homework_id, content_text: Some("answer".into()), file_url: None, created_at }
}

#[tokio::test]
async fn repeated_completion_keeps_the_first_timestamp() {
    let Some(db) = pool().await else { return };
    let s = seed(&db).await;
    let store = PgStore::new(db);
    let user = Uuid::new_v4();

    let first = store.mark_completed(Completion { user_id: user, lesson_id: s.lesson_id, at: at(9) }).await.unwrap();
    let again = store.mark_completed(Completion { user_id: user, lesson_id: s.lesson_id, at: at(11) }).await.unwrap();

    assert!(first.completed && again.completed);
    assert_eq!(again.completed_at, Some(at(9)));
    assert!(store.completed_lessons(user, s.course_id).await.unwrap().contains(&s.lesson_id));
}

#[tokio::test]
async fn second_pending_submission_is_refused() {
    let Some(db) = pool().await else { return };
    let s = seed(&db).await;
    let store = PgStore::new(db);
    let user = Uuid::new_v4();

    store.create_submission(text_submission(user, s.homework_id, at(9))).await.unwrap();
    assert!(matches!(
        store.create_submission(text_submission(user, s.homework_id, at(10))).await,
        Err(StoreError::PendingSubmission)
    ));
}

#[tokio::test]
async fn concurrent_pending_submissions_admit_exactly_one() {
    let Some(db) = pool().await else { return };
    let s = seed(&db).await;
    let store = PgStore::new(db);
    let user = Uuid::new_v4();

    let (a, b) = tokio::join!(
        store.create_submission(text_submission(user, s.homework_id, at(9))),
        store.create_submission(text_submission(user, s.homework_id, at(9))),
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(r, Err(StoreError::PendingSubmission))));
}

#[tokio::test]
async fn grading_only_applies_to_pending_submissions() {
    let Some(db) = pool().await else { return };
    let s = seed(&db).await;
    let store = PgStore::new(db);
    let user = Uuid::new_v4();
    let sub = store.create_submission(text_submission(user, s.homework_id, at(9))).await.unwrap();
    let completion = Completion { user_id: user, lesson_id: s.lesson_id, at: at(12) };

    let graded = store
        .grade_submission(sub.id, SubmissionStatus::Passed, Some("good".into()), completion)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(graded.status, SubmissionStatus::Passed);
    assert_eq!(graded.graded_at, Some(at(12)));

    let late = Completion { at: at(13), ..completion };
    assert!(store
        .grade_submission(sub.id, SubmissionStatus::Rejected, None, late)
        .await
        .unwrap()
        .is_none());
    let stored = store.submission(sub.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Passed);
    assert_eq!(stored.feedback.as_deref(), Some("good"));

    let progress = store.progress(user, s.lesson_id).await.unwrap().unwrap();
    assert_eq!(progress.completed_at, Some(at(12)));
}

#[tokio::test]
async fn rejected_grade_leaves_progress_untouched() {
    let Some(db) = pool().await else { return };
    let s = seed(&db).await;
    let store = PgStore::new(db);
    let user = Uuid::new_v4();
    let sub = store.create_submission(text_submission(user, s.homework_id, at(9))).await.unwrap();

    store
        .grade_submission(
            sub.id,
            SubmissionStatus::Rejected,
            Some("redo".into()),
            Completion { user_id: user, lesson_id: s.lesson_id, at: at(10) },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(store.progress(user, s.lesson_id).await.unwrap().is_none());
    // a rejected submission no longer blocks a resubmission
    store.create_submission(text_submission(user, s.homework_id, at(11))).await.unwrap();
}

#[tokio::test]
async fn review_queue_lists_pending_first() {
    let Some(db) = pool().await else { return };
    let s = seed(&db).await;
    let store = PgStore::new(db);
    let (old, new) = (Uuid::new_v4(), Uuid::new_v4());

    let graded = store.create_submission(text_submission(old, s.homework_id, at(8))).await.unwrap();
    store
        .grade_submission(
            graded.id,
            SubmissionStatus::Rejected,
            None,
            Completion { user_id: old, lesson_id: s.lesson_id, at: at(14) },
        )
        .await
        .unwrap();
    let early = store.create_submission(text_submission(new, s.homework_id, at(9))).await.unwrap();
    let late = store.create_submission(text_submission(old, s.homework_id, at(10))).await.unwrap();

    let queue = store
        .list_submissions(&SubmissionFilter { status: None, course_id: Some(s.course_id) })
        .await
        .unwrap();
    assert_eq!(queue.iter().map(|x| x.id).collect::<Vec<_>>(), vec![late.id, early.id, graded.id]);

    let pending = store
        .list_submissions(&SubmissionFilter { status: Some(SubmissionStatus::Pending), course_id: Some(s.course_id) })
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn revoking_an_enrollment_clears_course_state() {
    let Some(db) = pool().await else { return };
    let s = seed(&db).await;
    let user = Uuid::new_v4();
    sqlx::query("INSERT INTO enrollments (user_id, course_id, created_at) VALUES ($1, $2, $3)")
        .bind(user)
        .bind(s.course_id)
        .bind(at(8))
        .execute(&db)
        .await
        .unwrap();
    let store = PgStore::new(db);

    let completion = Completion { user_id: user, lesson_id: s.lesson_id, at: at(9) };
    store
        .record_attempt(
            NewAttempt {
                user_id: user,
                quiz_id: s.quiz_id,
                score: 100,
                passed: true,
                answers: vec![],
                created_at: at(9),
            },
            Some(completion),
        )
        .await
        .unwrap();
    assert_eq!(store.enrollments_of(user).await.unwrap().len(), 1);

    assert!(store.delete_enrollment(user, s.course_id).await.unwrap());
    assert!(store.enrollment(user, s.course_id).await.unwrap().is_none());
    assert!(store.completed_lessons(user, s.course_id).await.unwrap().is_empty());
    assert_eq!(store.count_attempts(user, s.quiz_id).await.unwrap(), 0);

    assert!(!store.delete_enrollment(user, s.course_id).await.unwrap());
}

#[tokio::test]
async fn enrollments_are_listed_newest_first() {
    let Some(db) = pool().await else { return };
    let (a, b) = (seed(&db).await, seed(&db).await);
    let user = Uuid::new_v4();
    for (course_id, when) in [(a.course_id, at(8)), (b.course_id, at(8) + Duration::days(2))] {
        sqlx::query("INSERT INTO enrollments (user_id, course_id, created_at) VALUES ($1, $2, $3)")
            .bind(user)
            .bind(course_id)
            .bind(when)
            .execute(&db)
            .await
            .unwrap();
    }
    let store = PgStore::new(db);

    let rows = store.enrollments_of(user).await.unwrap();
    assert_eq!(rows.iter().map(|e| e.course_id).collect::<Vec<_>>(), vec![b.course_id, a.course_id]);
    assert_eq!(store.course(b.course_id).await.unwrap().map(|c| c.id), Some(b.course_id));
}
