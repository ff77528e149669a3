use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, PgConnection};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::{db::Db, models::*};

const LESSON_COLUMNS: &str = "id, course_id, module_id, title, content_html, video_url, video_iframe, \
     attachments, sort_order, drip_days, created_at";

const SUBMISSION_COLUMNS: &str =
    "id, user_id, homework_id, content_text, file_url, status, feedback, graded_at, created_at";

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

async fn upsert_completion(conn: &mut PgConnection, c: Completion) -> StoreResult<Progress> {
    // completed_at keeps the first completion; completed never goes back to false
    let p = query_as::<_, Progress>(
        r#"
        INSERT INTO progress (user_id, lesson_id, completed, completed_at)
        VALUES ($1, $2, TRUE, $3)
        ON CONFLICT (user_id, lesson_id)
        DO UPDATE SET completed = TRUE,
                      completed_at = COALESCE(progress.completed_at, EXCLUDED.completed_at)
        RETURNING user_id, lesson_id, completed, completed_at
        "#,
    )
    .bind(c.user_id)
    .bind(c.lesson_id)
    .bind(c.at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(p)
}

#[async_trait]
impl Store for PgStore {
    async fn course_by_slug(&self, slug: &str) -> StoreResult<Option<Course>> {
        let c = query_as::<_, Course>(
            "SELECT id, slug, title, structure_mode, enforce_sequential, status FROM courses WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.db)
        .await?;
        Ok(c)
    }

    async fn course(&self, course_id: Uuid) -> StoreResult<Option<Course>> {
        let c = query_as::<_, Course>(
            "SELECT id, slug, title, structure_mode, enforce_sequential, status FROM courses WHERE id = $1",
        )
        .bind(course_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(c)
    }

    async fn modules(&self, course_id: Uuid) -> StoreResult<Vec<Module>> {
        let rows = query_as::<_, Module>(
            "SELECT id, course_id, title, sort_order, created_at FROM modules WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn lessons(&self, course_id: Uuid) -> StoreResult<Vec<Lesson>> {
        let sql = format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE course_id = $1");
        let rows = query_as::<_, Lesson>(&sql)
            .bind(course_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }

    async fn enrollment(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<Option<Enrollment>> {
        let e = query_as::<_, Enrollment>(
            "SELECT id, user_id, course_id, created_at FROM enrollments WHERE user_id = $1 AND course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(e)
    }

    async fn enrollments_of(&self, user_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let rows = query_as::<_, Enrollment>(
            "SELECT id, user_id, course_id, created_at FROM enrollments WHERE user_id = $1 ORDER BY created_at DESC, id",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn completed_lessons(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<HashSet<Uuid>> {
        let ids: Vec<Uuid> = query_scalar(
            r#"
            SELECT p.lesson_id
            FROM progress p
            JOIN lessons l ON l.id = p.lesson_id
            WHERE p.user_id = $1 AND l.course_id = $2 AND p.completed
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn progress(&self, user_id: Uuid, lesson_id: Uuid) -> StoreResult<Option<Progress>> {
        let p = query_as::<_, Progress>(
            "SELECT user_id, lesson_id, completed, completed_at FROM progress WHERE user_id = $1 AND lesson_id = $2",
        )
        .bind(user_id)
        .bind(lesson_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(p)
    }

    async fn mark_completed(&self, completion: Completion) -> StoreResult<Progress> {
        let mut conn = self.db.acquire().await?;
        upsert_completion(&mut conn, completion).await
    }

    async fn quiz_for_lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Quiz>> {
        let q = query_as::<_, Quiz>(
            "SELECT id, lesson_id, passing_score, max_retries FROM quizzes WHERE lesson_id = $1",
        )
        .bind(lesson_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(q)
    }

    async fn questions(&self, quiz_id: Uuid) -> StoreResult<Vec<Question>> {
        let rows = query_as::<_, Question>(
            r#"
            SELECT id, quiz_id, question_text, options, correct_option, sort_order
            FROM questions
            WHERE quiz_id = $1
            ORDER BY sort_order ASC, id ASC
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn attempts(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<Vec<QuizAttempt>> {
        let rows = query_as::<_, QuizAttempt>(
            r#"
            SELECT id, user_id, quiz_id, score, passed, answers, created_at
            FROM quiz_attempts
            WHERE user_id = $1 AND quiz_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn count_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<i64> {
        let n: i64 = query_scalar("SELECT COUNT(*) FROM quiz_attempts WHERE user_id = $1 AND quiz_id = $2")
            .bind(user_id)
            .bind(quiz_id)
            .fetch_one(&self.db)
            .await?;
        Ok(n)
    }

    async fn record_attempt(
        &self,
        attempt: NewAttempt,
        completion: Option<Completion>,
    ) -> StoreResult<QuizAttempt> {
        let mut tx = self.db.begin().await?;
        let rec = query_as::<_, QuizAttempt>(
            r#"
            INSERT INTO quiz_attempts (id, user_id, quiz_id, score, passed, answers, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, quiz_id, score, passed, answers, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attempt.user_id)
        .bind(attempt.quiz_id)
        .bind(attempt.score)
        .bind(attempt.passed)
        .bind(&attempt.answers)
        .bind(attempt.created_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(c) = completion {
            upsert_completion(&mut tx, c).await?;
        }
        tx.commit().await?;
        Ok(rec)
    }

    async fn homework_for_lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Homework>> {
        let h = query_as::<_, Homework>(
            "SELECT id, lesson_id, prompt, allow_file, allow_text FROM homeworks WHERE lesson_id = $1",
        )
        .bind(lesson_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(h)
    }

    async fn homework(&self, homework_id: Uuid) -> StoreResult<Option<Homework>> {
        let h = query_as::<_, Homework>(
            "SELECT id, lesson_id, prompt, allow_file, allow_text FROM homeworks WHERE id = $1",
        )
        .bind(homework_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(h)
    }

    async fn latest_submission(&self, user_id: Uuid, homework_id: Uuid) -> StoreResult<Option<Submission>> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions \
             WHERE user_id = $1 AND homework_id = $2 \
             ORDER BY created_at DESC LIMIT 1"
        );
        let s = query_as::<_, Submission>(&sql)
            .bind(user_id)
            .bind(homework_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(s)
    }

    async fn has_pending_submission(&self, user_id: Uuid, homework_id: Uuid) -> StoreResult<bool> {
        let exists: bool = query_scalar(
            "SELECT EXISTS (SELECT 1 FROM submissions WHERE user_id = $1 AND homework_id = $2 AND status = 'PENDING')",
        )
        .bind(user_id)
        .bind(homework_id)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn create_submission(&self, new: NewSubmission) -> StoreResult<Submission> {
        let mut tx = self.db.begin().await?;

        let pending: Option<Uuid> = query_scalar(
            "SELECT id FROM submissions WHERE user_id = $1 AND homework_id = $2 AND status = 'PENDING' FOR UPDATE",
        )
        .bind(new.user_id)
        .bind(new.homework_id)
        .fetch_optional(&mut *tx)
        .await?;
        if pending.is_some() {
            return Err(StoreError::PendingSubmission);
        }

        let sql = format!(
            "INSERT INTO submissions (id, user_id, homework_id, content_text, file_url, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'PENDING', $6) \
             RETURNING {SUBMISSION_COLUMNS}"
        );
        let rec = query_as::<_, Submission>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.user_id)
            .bind(new.homework_id)
            .bind(&new.content_text)
            .bind(&new.file_url)
            .bind(new.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                // submissions_one_pending partial index lost a race with a concurrent insert
                sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::PendingSubmission,
                other => StoreError::Database(other),
            })?;

        tx.commit().await?;
        Ok(rec)
    }

    async fn submission(&self, submission_id: Uuid) -> StoreResult<Option<Submission>> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1");
        let s = query_as::<_, Submission>(&sql)
            .bind(submission_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(s)
    }

    async fn grade_submission(
        &self,
        submission_id: Uuid,
        status: SubmissionStatus,
        feedback: Option<String>,
        completion: Completion,
    ) -> StoreResult<Option<Submission>> {
        let mut tx = self.db.begin().await?;
        let sql = format!(
            "UPDATE submissions SET status = $2, feedback = $3, graded_at = $4 \
             WHERE id = $1 AND status = 'PENDING' \
             RETURNING {SUBMISSION_COLUMNS}"
        );
        let updated = query_as::<_, Submission>(&sql)
            .bind(submission_id)
            .bind(status)
            .bind(feedback)
            .bind(completion.at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };
        if status == SubmissionStatus::Passed {
            upsert_completion(&mut tx, completion).await?;
        }
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn list_submissions(&self, filter: &SubmissionFilter) -> StoreResult<Vec<Submission>> {
        let rows = query_as::<_, Submission>(
            r#"
            SELECT s.id, s.user_id, s.homework_id, s.content_text, s.file_url,
                   s.status, s.feedback, s.graded_at, s.created_at
            FROM submissions s
            JOIN homeworks h ON h.id = s.homework_id
            JOIN lessons l ON l.id = h.lesson_id
            WHERE ($1::submission_status IS NULL OR s.status = $1)
              AND ($2::uuid IS NULL OR l.course_id = $2)
            ORDER BY (s.status = 'PENDING') DESC, s.created_at DESC
            "#,
        )
        .bind(filter.status)
        .bind(filter.course_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.db.begin().await?;

        let deleted = query("DELETE FROM enrollments WHERE user_id = $1 AND course_id = $2")
            .bind(user_id)
            .bind(course_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        query(
            r#"
            DELETE FROM progress
            WHERE user_id = $1
              AND lesson_id IN (SELECT id FROM lessons WHERE course_id = $2)
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await?;

        query(
            r#"
            DELETE FROM quiz_attempts
            WHERE user_id = $1
              AND quiz_id IN (
                  SELECT q.id FROM quizzes q JOIN lessons l ON l.id = q.lesson_id
                  WHERE l.course_id = $2
              )
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}
