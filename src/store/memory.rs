use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::models::*;

#[derive(Default)]
struct Tables {
    courses: Vec<Course>,
    modules: Vec<Module>,
    lessons: Vec<Lesson>,
    enrollments: Vec<Enrollment>,
    progress: HashMap<(Uuid, Uuid), Progress>,
    quizzes: Vec<Quiz>,
    questions: Vec<Question>,
    attempts: Vec<QuizAttempt>,
    homeworks: Vec<Homework>,
    submissions: Vec<Submission>,
}

impl Tables {
    fn upsert_completion(&mut self, c: Completion) -> Progress {
        let p = self
            .progress
            .entry((c.user_id, c.lesson_id))
            .or_insert_with(|| Progress {
                user_id: c.user_id,
                lesson_id: c.lesson_id,
                completed: false,
                completed_at: None,
            });
        p.completed = true;
        if p.completed_at.is_none() {
            p.completed_at = Some(c.at);
        }
        p.clone()
    }

    fn lesson_course(&self, lesson_id: Uuid) -> Option<Uuid> {
        self.lessons.iter().find(|l| l.id == lesson_id).map(|l| l.course_id)
    }
}

/// In-process store behind a single lock. Every trait call holds the lock
/// for its whole duration, which gives the same atomicity as a transaction.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_course(&self, course: Course) {
        self.tables.lock().await.courses.push(course);
    }

    pub async fn insert_module(&self, module: Module) {
        self.tables.lock().await.modules.push(module);
    }

    pub async fn insert_lesson(&self, lesson: Lesson) {
        self.tables.lock().await.lessons.push(lesson);
    }

    pub async fn insert_enrollment(&self, enrollment: Enrollment) {
        self.tables.lock().await.enrollments.push(enrollment);
    }

    pub async fn insert_quiz(&self, quiz: Quiz, questions: Vec<Question>) {
        let mut t = self.tables.lock().await;
        t.quizzes.push(quiz);
        t.questions.extend(questions);
    }

    pub async fn insert_homework(&self, homework: Homework) {
        self.tables.lock().await.homeworks.push(homework);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn course_by_slug(&self, slug: &str) -> StoreResult<Option<Course>> {
        let t = self.tables.lock().await;
        Ok(t.courses.iter().find(|c| c.slug == slug).cloned())
    }

    async fn course(&self, course_id: Uuid) -> StoreResult<Option<Course>> {
        let t = self.tables.lock().await;
        Ok(t.courses.iter().find(|c| c.id == course_id).cloned())
    }

    async fn modules(&self, course_id: Uuid) -> StoreResult<Vec<Module>> {
        let t = self.tables.lock().await;
        Ok(t.modules.iter().filter(|m| m.course_id == course_id).cloned().collect())
    }

    async fn lessons(&self, course_id: Uuid) -> StoreResult<Vec<Lesson>> {
        let t = self.tables.lock().await;
        Ok(t.lessons.iter().filter(|l| l.course_id == course_id).cloned().collect())
    }

    async fn enrollment(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<Option<Enrollment>> {
        let t = self.tables.lock().await;
        Ok(t.enrollments
            .iter()
            .find(|e| e.user_id == user_id && e.course_id == course_id)
            .cloned())
    }

    async fn enrollments_of(&self, user_id: Uuid) -> StoreResult<Vec<Enrollment>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<Enrollment> = t.enrollments.iter().filter(|e| e.user_id == user_id).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn completed_lessons(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<HashSet<Uuid>> {
        let t = self.tables.lock().await;
        Ok(t.progress
            .values()
            .filter(|p| p.user_id == user_id && p.completed)
            .filter(|p| t.lesson_course(p.lesson_id) == Some(course_id))
            .map(|p| p.lesson_id)
            .collect())
    }

    async fn progress(&self, user_id: Uuid, lesson_id: Uuid) -> StoreResult<Option<Progress>> {
        let t = self.tables.lock().await;
        Ok(t.progress.get(&(user_id, lesson_id)).cloned())
    }

    async fn mark_completed(&self, completion: Completion) -> StoreResult<Progress> {
        Ok(self.tables.lock().await.upsert_completion(completion))
    }

    async fn quiz_for_lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Quiz>> {
        let t = self.tables.lock().await;
        Ok(t.quizzes.iter().find(|q| q.lesson_id == lesson_id).cloned())
    }

    async fn questions(&self, quiz_id: Uuid) -> StoreResult<Vec<Question>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<Question> = t.questions.iter().filter(|q| q.quiz_id == quiz_id).cloned().collect();
        rows.sort_by_key(|q| (q.order, q.id));
        Ok(rows)
    }

    async fn attempts(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<Vec<QuizAttempt>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<QuizAttempt> = t
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.quiz_id == quiz_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn count_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> StoreResult<i64> {
        let t = self.tables.lock().await;
        Ok(t.attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.quiz_id == quiz_id)
            .count() as i64)
    }

    async fn record_attempt(
        &self,
        attempt: NewAttempt,
        completion: Option<Completion>,
    ) -> StoreResult<QuizAttempt> {
        let mut t = self.tables.lock().await;
        let rec = QuizAttempt {
            id: Uuid::new_v4(),
            user_id: attempt.user_id,
            quiz_id: attempt.quiz_id,
            score: attempt.score,
            passed: attempt.passed,
            answers: attempt.answers,
            created_at: attempt.created_at,
        };
        t.attempts.push(rec.clone());
        if let Some(c) = completion {
            t.upsert_completion(c);
        }
        Ok(rec)
    }

    async fn homework_for_lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Homework>> {
        let t = self.tables.lock().await;
        Ok(t.homeworks.iter().find(|h| h.lesson_id == lesson_id).cloned())
    }

    async fn homework(&self, homework_id: Uuid) -> StoreResult<Option<Homework>> {
        let t = self.tables.lock().await;
        Ok(t.homeworks.iter().find(|h| h.id == homework_id).cloned())
    }

    async fn latest_submission(&self, user_id: Uuid, homework_id: Uuid) -> StoreResult<Option<Submission>> {
        let t = self.tables.lock().await;
        // later pushes win ties on created_at
        Ok(t.submissions
            .iter()
            .filter(|s| s.user_id == user_id && s.homework_id == homework_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn has_pending_submission(&self, user_id: Uuid, homework_id: Uuid) -> StoreResult<bool> {
        let t = self.tables.lock().await;
        Ok(t.submissions.iter().any(|s| {
            s.user_id == user_id && s.homework_id == homework_id && s.status == SubmissionStatus::Pending
        }))
    }

    async fn create_submission(&self, new: NewSubmission) -> StoreResult<Submission> {
        let mut t = self.tables.lock().await;
        let pending = t.submissions.iter().any(|s| {
            s.user_id == new.user_id
                && s.homework_id == new.homework_id
                && s.status == SubmissionStatus::Pending
        });
        if pending {
            return Err(StoreError::PendingSubmission);
        }
        let rec = Submission {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            homework_id: new.homework_id,
            content_text: new.content_text,
            file_url: new.file_url,
            status: SubmissionStatus::Pending,
            feedback: None,
            graded_at: None,
            created_at: new.created_at,
        };
        t.submissions.push(rec.clone());
        Ok(rec)
    }

    async fn submission(&self, submission_id: Uuid) -> StoreResult<Option<Submission>> {
        let t = self.tables.lock().await;
        Ok(t.submissions.iter().find(|s| s.id == submission_id).cloned())
    }

    async fn grade_submission(
        &self,
        submission_id: Uuid,
        status: SubmissionStatus,
        feedback: Option<String>,
        completion: Completion,
    ) -> StoreResult<Option<Submission>> {
        let mut t = self.tables.lock().await;
        let Some(s) = t
            .submissions
            .iter_mut()
            .find(|s| s.id == submission_id && s.status == SubmissionStatus::Pending)
        else {
            return Ok(None);
        };
        s.status = status;
        s.feedback = feedback;
        s.graded_at = Some(completion.at);
        let updated = s.clone();
        if status == SubmissionStatus::Passed {
            t.upsert_completion(completion);
        }
        Ok(Some(updated))
    }

    async fn list_submissions(&self, filter: &SubmissionFilter) -> StoreResult<Vec<Submission>> {
        let t = self.tables.lock().await;
        let course_of = |s: &Submission| {
            t.homeworks
                .iter()
                .find(|h| h.id == s.homework_id)
                .and_then(|h| t.lesson_course(h.lesson_id))
        };
        let mut rows: Vec<Submission> = t
            .submissions
            .iter()
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .filter(|s| filter.course_id.map_or(true, |c| course_of(s) == Some(c)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let a_pending = a.status == SubmissionStatus::Pending;
            let b_pending = b.status == SubmissionStatus::Pending;
            b_pending.cmp(&a_pending).then(b.created_at.cmp(&a.created_at))
        });
        Ok(rows)
    }

    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        let before = t.enrollments.len();
        t.enrollments
            .retain(|e| !(e.user_id == user_id && e.course_id == course_id));
        if t.enrollments.len() == before {
            return Ok(false);
        }

        let lesson_ids: HashSet<Uuid> = t
            .lessons
            .iter()
            .filter(|l| l.course_id == course_id)
            .map(|l| l.id)
            .collect();
        let quiz_ids: HashSet<Uuid> = t
            .quizzes
            .iter()
            .filter(|q| lesson_ids.contains(&q.lesson_id))
            .map(|q| q.id)
            .collect();

        t.progress
            .retain(|(u, l), _| !(*u == user_id && lesson_ids.contains(l)));
        t.attempts
            .retain(|a| !(a.user_id == user_id && quiz_ids.contains(&a.quiz_id)));
        Ok(true)
    }
}
