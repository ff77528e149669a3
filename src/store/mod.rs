//! Persistence seam for the engine.
//!
//! Every method is one short transaction against the backing store. Writes
//! that combine an event row with a progress upsert take the [`Completion`]
//! so both land atomically.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("a pending submission already exists for this homework")]
    PendingSubmission,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn course_by_slug(&self, slug: &str) -> StoreResult<Option<Course>>;

    async fn course(&self, course_id: Uuid) -> StoreResult<Option<Course>>;

    /// Modules of a course, unordered.
    async fn modules(&self, course_id: Uuid) -> StoreResult<Vec<Module>>;

    /// Every lesson of a course (module lessons and standalone), unordered.
    async fn lessons(&self, course_id: Uuid) -> StoreResult<Vec<Lesson>>;

    async fn enrollment(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<Option<Enrollment>>;

    /// Every enrollment of a user, newest first.
    async fn enrollments_of(&self, user_id: Uuid) -> StoreResult<Vec<Enrollment>>;

    /// Lessons of `course_id` the user has completed.
    async fn completed_lessons(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<HashSet<Uuid>>;

    async fn progress(&self, user_id: Uuid, lesson_id: Uuid) -> StoreResult<Option<Progress>>;

    /// Idempotent upsert to `completed = true`. An existing `completed_at`
    /// is kept.
    async fn mark_completed(&self, completion: Completion) -> StoreResult<Progress>;

    async fn quiz_for_lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Quiz>>;

    /// Questions of a quiz sorted by their order.
    async fn questions(&self, quiz_id: Uuid) -> StoreResult<Vec<Question>>;

    /// Attempts of a user on a quiz, newest first.
    async fn attempts(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<Vec<QuizAttempt>>;

    async fn count_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<i64>;

    async fn record_attempt(
        &self,
        attempt: NewAttempt,
        completion: Option<Completion>,
    ) -> StoreResult<QuizAttempt>;

    async fn homework_for_lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Homework>>;

    async fn homework(&self, homework_id: Uuid) -> StoreResult<Option<Homework>>;

    async fn latest_submission(&self, user_id: Uuid, homework_id: Uuid) -> StoreResult<Option<Submission>>;

    async fn has_pending_submission(&self, user_id: Uuid, homework_id: Uuid) -> StoreResult<bool>;

    /// Fails with [`StoreError::PendingSubmission`] when the user already has
    /// a pending submission for the homework.
    async fn create_submission(&self, submission: NewSubmission) -> StoreResult<Submission>;

    async fn submission(&self, submission_id: Uuid) -> StoreResult<Option<Submission>>;

    /// Moves a pending submission to a terminal status with
    /// `graded_at = completion.at`; a PASSED verdict also writes the
    /// completion. Returns `None` when the submission is no longer pending.
    async fn grade_submission(
        &self,
        submission_id: Uuid,
        status: SubmissionStatus,
        feedback: Option<String>,
        completion: Completion,
    ) -> StoreResult<Option<Submission>>;

    /// Pending first, then newest first.
    async fn list_submissions(&self, filter: &SubmissionFilter) -> StoreResult<Vec<Submission>>;

    /// Deletes the enrollment together with the user's progress and quiz
    /// attempts for that course. Returns `false` if there was no enrollment.
    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<bool>;
}
