//! Course access and progress engine.
//!
//! Every operation takes the caller's [`Identity`] explicitly, re-reads what
//! it needs from the [`Store`] and evaluates gates through the same
//! [`canonical_order`] + [`resolve_gates`] pair, so curriculum, lesson reads
//! and completion writes can never disagree about what is locked.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult, LockReason};
use crate::identity::Identity;
use crate::models::*;
use crate::notify::{self, GradedEvent, Notifier};
use crate::store::{Store, StoreError};
use crate::uploads::{homework_key, FileStore, UploadedFile};

pub mod aggregate;
pub mod drip;
pub mod homework;
pub mod order;
pub mod quiz;
pub mod unlock;

pub use aggregate::CourseProgress;
pub use homework::Verdict;
pub use order::{canonical_order, LessonOrdering};
pub use quiz::{AttemptSummary, QuestionResult, QuizView};
pub use unlock::{resolve_gates, GateContext, LessonGate};

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub ordering: LessonOrdering,
    pub max_upload_bytes: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { ordering: LessonOrdering::default(), max_upload_bytes: 10 * 1024 * 1024 }
    }
}

// ---- response types ----

#[derive(Serialize, Debug, Clone)]
pub struct CourseRef {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct CourseSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub structure_mode: StructureMode,
    pub enforce_sequential: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct LessonStatus {
    pub id: Uuid,
    pub title: String,
    pub order: i32,
    pub completed: bool,
    pub unlocked: bool,
    pub drip_locked: bool,
    pub unlock_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ModuleOutline {
    pub id: Uuid,
    pub title: String,
    pub order: i32,
    pub lessons: Vec<LessonStatus>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Curriculum {
    pub course: CourseSummary,
    pub modules: Vec<ModuleOutline>,
    pub standalone_lessons: Vec<LessonStatus>,
    pub progress: CourseProgress,
}

#[derive(Serialize, Debug, Clone)]
pub struct LessonRef {
    pub id: Uuid,
    pub title: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct LessonContent {
    pub id: Uuid,
    pub title: String,
    pub content_html: Option<String>,
    pub video_url: Option<String>,
    pub video_iframe: Option<String>,
    pub attachments: serde_json::Value,
    pub module: Option<LessonRef>,
    pub is_completed: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct Navigation {
    pub prev: Option<LessonRef>,
    pub next: Option<LessonRef>,
    /// 1-based position in canonical order.
    pub current_index: usize,
    pub total_lessons: usize,
}

#[derive(Serialize, Debug, Clone)]
pub struct LessonPage {
    pub lesson: LessonContent,
    pub navigation: Navigation,
    pub course: CourseRef,
}

#[derive(Serialize, Debug, Clone)]
pub struct CompletionOutcome {
    pub lesson: Progress,
    pub progress: CourseProgress,
}

#[derive(Serialize, Debug, Clone)]
pub struct QuizOverview {
    pub quiz: QuizView,
    pub attempts: AttemptSummary,
}

#[derive(Serialize, Debug, Clone)]
pub struct AttemptOutcome {
    pub attempt_id: Uuid,
    pub score: i32,
    pub passed: bool,
    pub results: Vec<QuestionResult>,
    pub can_retry: bool,
    pub remaining: Option<i64>,
}

#[derive(Serialize, Debug, Clone)]
pub struct HomeworkOverview {
    pub homework: Homework,
    pub submission: Option<Submission>,
}

/// One row of the learner dashboard.
#[derive(Serialize, Debug, Clone)]
pub struct EnrollmentProgress {
    pub id: Uuid,
    pub enrolled_at: chrono::DateTime<chrono::Utc>,
    pub course: CourseRef,
    pub course_status: CourseStatus,
    pub progress: CourseProgress,
}

// ---- internal request scope ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    /// Reading content; admins preview without gates.
    Read,
    /// Producing a completion; requires an enrollment and applies gates to
    /// everyone.
    Write,
}

struct Scope {
    course: Course,
    enrollment: Option<Enrollment>,
    identity: Identity,
    modules: Vec<Module>,
    lessons: Vec<Lesson>,
}

impl Scope {
    fn lesson(&self, lesson_id: Uuid) -> EngineResult<&Lesson> {
        self.lessons
            .iter()
            .find(|l| l.id == lesson_id)
            .ok_or(EngineError::NotFound("lesson"))
    }

    fn lesson_ids(&self) -> impl Iterator<Item = &Uuid> {
        self.lessons.iter().map(|l| &l.id)
    }
}

pub struct Engine<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    files: Arc<dyn FileStore>,
    settings: EngineSettings,
}

impl<S: Store> Engine<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        files: Arc<dyn FileStore>,
        settings: EngineSettings,
    ) -> Self {
        Self { store, clock, notifier, files, settings }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Loads the course and checks visibility and enrollment. Unpublished
    /// courses are invisible to non-admins.
    async fn scope(&self, slug: &str, identity: Identity, access: Access) -> EngineResult<Scope> {
        let course = self
            .store
            .course_by_slug(slug)
            .await?
            .filter(|c| c.status == CourseStatus::Published || identity.is_admin())
            .ok_or(EngineError::NotFound("course"))?;

        let enrollment = self.store.enrollment(identity.user_id, course.id).await?;
        let allowed = match access {
            Access::Read => enrollment.is_some() || identity.is_admin(),
            Access::Write => enrollment.is_some(),
        };
        if !allowed {
            return Err(EngineError::Forbidden("enrollment in this course is required".into()));
        }

        let modules = self.store.modules(course.id).await?;
        let lessons = self.store.lessons(course.id).await?;
        Ok(Scope { course, enrollment, identity, modules, lessons })
    }

    fn gate_context(&self, scope: &Scope, access: Access) -> GateContext {
        let bypass = access == Access::Read && scope.identity.is_admin();
        GateContext {
            enforce_sequential: scope.course.enforce_sequential,
            enrolled_at: scope.enrollment.as_ref().map(|e| e.created_at),
            now: self.clock.now(),
            bypass,
        }
    }

    fn gates(&self, scope: &Scope, access: Access, completed: &HashSet<Uuid>) -> Vec<LessonGate> {
        let order = canonical_order(self.settings.ordering, &scope.modules, &scope.lessons);
        resolve_gates(&self.gate_context(scope, access), &order, completed)
    }

    /// Rejects with [`EngineError::LockedContent`] if `lesson_id` is not
    /// unlocked for this access.
    fn ensure_unlocked(
        &self,
        scope: &Scope,
        access: Access,
        completed: &HashSet<Uuid>,
        lesson_id: Uuid,
    ) -> EngineResult<()> {
        let gates = self.gates(scope, access, completed);
        let gate = gates
            .iter()
            .find(|g| g.lesson_id == lesson_id)
            .ok_or(EngineError::NotFound("lesson"))?;
        if gate.unlocked {
            return Ok(());
        }
        let reason = if gate.drip.locked {
            LockReason::Drip { unlock_at: gate.drip.unlock_at }
        } else {
            LockReason::Sequential
        };
        Err(EngineError::LockedContent(reason))
    }

    async fn completed(&self, scope: &Scope) -> EngineResult<HashSet<Uuid>> {
        Ok(self.store.completed_lessons(scope.identity.user_id, scope.course.id).await?)
    }

    /// Ordered modules and standalone lessons with per-lesson gate state and
    /// the learner's aggregate progress.
    pub async fn curriculum(&self, slug: &str, identity: Identity) -> EngineResult<Curriculum> {
        let scope = self.scope(slug, identity, Access::Read).await?;
        let completed = self.completed(&scope).await?;
        let gates = self.gates(&scope, Access::Read, &completed);

        let status_of = |lesson: &Lesson| {
            let gate = gates.iter().find(|g| g.lesson_id == lesson.id);
            LessonStatus {
                id: lesson.id,
                title: lesson.title.clone(),
                order: lesson.order,
                completed: completed.contains(&lesson.id),
                unlocked: gate.map_or(false, |g| g.unlocked),
                drip_locked: gate.map_or(false, |g| g.drip.locked),
                unlock_date: gate.and_then(|g| g.drip.unlock_at),
            }
        };

        // canonical order already groups module lessons in module order
        let order = canonical_order(self.settings.ordering, &scope.modules, &scope.lessons);
        let mut modules: Vec<&Module> = scope.modules.iter().collect();
        modules.sort_by_key(|m| (m.order, m.created_at, m.id));

        let module_outlines = modules
            .into_iter()
            .map(|m| ModuleOutline {
                id: m.id,
                title: m.title.clone(),
                order: m.order,
                lessons: order
                    .iter()
                    .filter(|l| l.module_id == Some(m.id))
                    .map(|l| status_of(*l))
                    .collect(),
            })
            .collect();
        let standalone_lessons = order
            .iter()
            .filter(|l| !l.module_id.map_or(false, |mid| scope.modules.iter().any(|m| m.id == mid)))
            .map(|l| status_of(*l))
            .collect();

        Ok(Curriculum {
            course: CourseSummary {
                id: scope.course.id,
                title: scope.course.title.clone(),
                slug: scope.course.slug.clone(),
                structure_mode: scope.course.structure_mode,
                enforce_sequential: scope.course.enforce_sequential,
            },
            modules: module_outlines,
            standalone_lessons,
            progress: aggregate::aggregate(scope.lesson_ids(), &completed),
        })
    }

    /// Lesson content with prev/next navigation. Learners must pass the
    /// sequential and drip gates; admins preview freely.
    pub async fn lesson(&self, slug: &str, lesson_id: Uuid, identity: Identity) -> EngineResult<LessonPage> {
        let scope = self.scope(slug, identity, Access::Read).await?;
        let lesson = scope.lesson(lesson_id)?;
        let completed = self.completed(&scope).await?;
        self.ensure_unlocked(&scope, Access::Read, &completed, lesson_id)?;

        let order = canonical_order(self.settings.ordering, &scope.modules, &scope.lessons);
        let index = order::position_of(&order, lesson_id).ok_or(EngineError::NotFound("lesson"))?;
        let as_ref = |l: &Lesson| LessonRef { id: l.id, title: l.title.clone() };

        let module = lesson
            .module_id
            .and_then(|mid| scope.modules.iter().find(|m| m.id == mid))
            .map(|m| LessonRef { id: m.id, title: m.title.clone() });

        Ok(LessonPage {
            lesson: LessonContent {
                id: lesson.id,
                title: lesson.title.clone(),
                content_html: lesson.content_html.clone(),
                video_url: lesson.video_url.clone(),
                video_iframe: lesson.video_iframe.clone(),
                attachments: lesson.attachments.clone(),
                module,
                is_completed: completed.contains(&lesson.id),
            },
            navigation: Navigation {
                prev: index.checked_sub(1).and_then(|i| order.get(i)).map(|l| as_ref(*l)),
                next: order.get(index + 1).map(|l| as_ref(*l)),
                current_index: index + 1,
                total_lessons: order.len(),
            },
            course: CourseRef {
                id: scope.course.id,
                title: scope.course.title.clone(),
                slug: scope.course.slug.clone(),
            },
        })
    }

    /// Explicit mark-complete. Idempotent; a lesson already completed keeps
    /// its first `completed_at`.
    pub async fn complete_lesson(
        &self,
        slug: &str,
        lesson_id: Uuid,
        identity: Identity,
    ) -> EngineResult<CompletionOutcome> {
        let scope = self.scope(slug, identity, Access::Write).await?;
        scope.lesson(lesson_id)?;
        let mut completed = self.completed(&scope).await?;
        self.ensure_unlocked(&scope, Access::Write, &completed, lesson_id)?;

        let progress = self
            .store
            .mark_completed(Completion { user_id: identity.user_id, lesson_id, at: self.clock.now() })
            .await?;
        completed.insert(lesson_id);
        tracing::info!(user_id = %identity.user_id, %lesson_id, course = %scope.course.slug, "lesson completed");

        Ok(CompletionOutcome {
            lesson: progress,
            progress: aggregate::aggregate(scope.lesson_ids(), &completed),
        })
    }

    /// Course-level progress of the caller.
    pub async fn progress(&self, slug: &str, identity: Identity) -> EngineResult<CourseProgress> {
        let scope = self.scope(slug, identity, Access::Read).await?;
        let completed = self.completed(&scope).await?;
        Ok(aggregate::aggregate(scope.lesson_ids(), &completed))
    }

    /// The caller's enrollments, newest first, each with its course
    /// progress.
    pub async fn enrollments(&self, identity: Identity) -> EngineResult<Vec<EnrollmentProgress>> {
        let enrollments = self.store.enrollments_of(identity.user_id).await?;
        let mut rows = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            let Some(course) = self.store.course(enrollment.course_id).await? else {
                continue;
            };
            let lessons = self.store.lessons(course.id).await?;
            let completed = self.store.completed_lessons(identity.user_id, course.id).await?;
            rows.push(EnrollmentProgress {
                id: enrollment.id,
                enrolled_at: enrollment.created_at,
                course: CourseRef { id: course.id, title: course.title, slug: course.slug },
                course_status: course.status,
                progress: aggregate::aggregate(lessons.iter().map(|l| &l.id), &completed),
            });
        }
        Ok(rows)
    }

    async fn quiz_of(&self, lesson_id: Uuid) -> EngineResult<(Quiz, Vec<Question>)> {
        let quiz = self
            .store
            .quiz_for_lesson(lesson_id)
            .await?
            .ok_or(EngineError::NotFound("quiz"))?;
        let questions = self.store.questions(quiz.id).await?;
        Ok((quiz, questions))
    }

    /// Quiz without correct answers plus the caller's attempt summary.
    pub async fn quiz(&self, slug: &str, lesson_id: Uuid, identity: Identity) -> EngineResult<QuizOverview> {
        let scope = self.scope(slug, identity, Access::Read).await?;
        scope.lesson(lesson_id)?;
        let completed = self.completed(&scope).await?;
        self.ensure_unlocked(&scope, Access::Read, &completed, lesson_id)?;

        let (quiz, questions) = self.quiz_of(lesson_id).await?;
        let attempts = self.store.attempts(identity.user_id, quiz.id).await?;
        Ok(QuizOverview {
            attempts: quiz::summarize(&quiz, &attempts),
            quiz: QuizView::new(&quiz, &questions),
        })
    }

    /// Grades and records an attempt. A passing attempt completes the lesson
    /// in the same transaction.
    ///
    /// The attempt limit is a count-then-insert check: two concurrent
    /// submissions may both pass it, so the limit can be overshot by one.
    pub async fn submit_quiz_attempt(
        &self,
        slug: &str,
        lesson_id: Uuid,
        identity: Identity,
        answers: Vec<i32>,
    ) -> EngineResult<AttemptOutcome> {
        let scope = self.scope(slug, identity, Access::Write).await?;
        scope.lesson(lesson_id)?;
        let completed = self.completed(&scope).await?;
        self.ensure_unlocked(&scope, Access::Write, &completed, lesson_id)?;

        let (quiz, questions) = self.quiz_of(lesson_id).await?;
        let attempts_so_far = self.store.count_attempts(identity.user_id, quiz.id).await?;
        quiz::ensure_attempt_allowed(&quiz, attempts_so_far)?;
        let grade = quiz::grade(&quiz, &questions, &answers)?;

        let now = self.clock.now();
        let completion = grade
            .passed
            .then_some(Completion { user_id: identity.user_id, lesson_id, at: now });
        let attempt = self
            .store
            .record_attempt(
                NewAttempt {
                    user_id: identity.user_id,
                    quiz_id: quiz.id,
                    score: grade.score,
                    passed: grade.passed,
                    answers,
                    created_at: now,
                },
                completion,
            )
            .await?;
        tracing::info!(
            user_id = %identity.user_id,
            quiz_id = %quiz.id,
            score = grade.score,
            passed = grade.passed,
            "quiz attempt recorded"
        );

        let (can_retry, remaining) = quiz::retry_allowance(&quiz, attempts_so_far + 1);
        Ok(AttemptOutcome {
            attempt_id: attempt.id,
            score: grade.score,
            passed: grade.passed,
            results: grade.results,
            can_retry,
            remaining,
        })
    }

    /// Homework prompt and the caller's most recent submission.
    pub async fn homework(&self, slug: &str, lesson_id: Uuid, identity: Identity) -> EngineResult<HomeworkOverview> {
        let scope = self.scope(slug, identity, Access::Read).await?;
        scope.lesson(lesson_id)?;
        let completed = self.completed(&scope).await?;
        self.ensure_unlocked(&scope, Access::Read, &completed, lesson_id)?;

        let homework = self
            .store
            .homework_for_lesson(lesson_id)
            .await?
            .ok_or(EngineError::NotFound("homework"))?;
        let submission = self.store.latest_submission(identity.user_id, homework.id).await?;
        Ok(HomeworkOverview { homework, submission })
    }

    /// Creates a PENDING submission. At most one PENDING submission exists
    /// per learner and homework.
    pub async fn submit_homework(
        &self,
        slug: &str,
        lesson_id: Uuid,
        identity: Identity,
        content_text: Option<String>,
        file: Option<UploadedFile>,
    ) -> EngineResult<Submission> {
        let scope = self.scope(slug, identity, Access::Write).await?;
        scope.lesson(lesson_id)?;
        let completed = self.completed(&scope).await?;
        self.ensure_unlocked(&scope, Access::Write, &completed, lesson_id)?;

        let homework = self
            .store
            .homework_for_lesson(lesson_id)
            .await?
            .ok_or(EngineError::NotFound("homework"))?;

        // checked before any upload so a rejected submission leaves no file behind
        if self.store.has_pending_submission(identity.user_id, homework.id).await? {
            return Err(pending_exists());
        }
        let file = file.filter(|f| !f.bytes.is_empty());
        let content_text = homework::validate_modality(&homework, content_text, file.is_some())?;

        let now = self.clock.now();
        let (file_key, file_url) = match &file {
            Some(f) if f.bytes.len() > self.settings.max_upload_bytes => {
                return Err(EngineError::ValidationFailed(format!(
                    "file exceeds the {} byte limit",
                    self.settings.max_upload_bytes
                )));
            }
            Some(f) => {
                let key = homework_key(identity.user_id, f, now);
                let url = self.files.put(&key, f).await?;
                (Some(key), Some(url))
            }
            None => (None, None),
        };

        let created = self
            .store
            .create_submission(NewSubmission {
                user_id: identity.user_id,
                homework_id: homework.id,
                content_text,
                file_url,
                created_at: now,
            })
            .await;
        let submission = match created {
            Ok(s) => s,
            Err(e) => {
                // the row never landed, so the upload has no owner
                if let Some(key) = &file_key {
                    if let Err(rm) = self.files.remove(key).await {
                        tracing::warn!(error = %rm, key = %key, "failed to remove orphaned upload");
                    }
                }
                return Err(match e {
                    StoreError::PendingSubmission => pending_exists(),
                    other => other.into(),
                });
            }
        };
        tracing::info!(
            user_id = %identity.user_id,
            homework_id = %homework.id,
            submission_id = %submission.id,
            "homework submitted"
        );
        Ok(submission)
    }

    /// Admin verdict on a pending submission. A PASSED verdict completes the
    /// homework's lesson for the submitter. The learner is notified after the
    /// commit; notification failures are logged and ignored.
    pub async fn grade_submission(
        &self,
        submission_id: Uuid,
        identity: Identity,
        verdict: Verdict,
        feedback: Option<String>,
    ) -> EngineResult<Submission> {
        require_admin(identity)?;

        let submission = self
            .store
            .submission(submission_id)
            .await?
            .ok_or(EngineError::NotFound("submission"))?;
        homework::ensure_gradable(&submission)?;
        let homework = self
            .store
            .homework(submission.homework_id)
            .await?
            .ok_or(EngineError::NotFound("homework"))?;

        let feedback = feedback.filter(|f| !f.trim().is_empty());
        let completion = Completion {
            user_id: submission.user_id,
            lesson_id: homework.lesson_id,
            at: self.clock.now(),
        };
        let graded = self
            .store
            .grade_submission(submission_id, verdict.into(), feedback, completion)
            .await?
            // another admin graded it between our read and the update
            .ok_or_else(|| EngineError::ValidationFailed("submission was already graded".into()))?;
        tracing::info!(
            submission_id = %graded.id,
            grader = %identity.user_id,
            status = ?graded.status,
            "submission graded"
        );

        let event = GradedEvent {
            submission_id: graded.id,
            user_id: graded.user_id,
            homework_id: graded.homework_id,
            lesson_id: homework.lesson_id,
            status: graded.status,
            feedback: graded.feedback.clone(),
            graded_at: completion.at,
        };
        notify::deliver(self.notifier.as_ref(), &event).await;
        Ok(graded)
    }

    /// Admin review queue.
    pub async fn list_submissions(
        &self,
        identity: Identity,
        filter: &SubmissionFilter,
    ) -> EngineResult<Vec<Submission>> {
        require_admin(identity)?;
        Ok(self.store.list_submissions(filter).await?)
    }

    /// Admin removal of an enrollment; the learner's progress and quiz
    /// attempts in that course go with it.
    pub async fn revoke_enrollment(&self, identity: Identity, user_id: Uuid, course_id: Uuid) -> EngineResult<()> {
        require_admin(identity)?;
        if !self.store.delete_enrollment(user_id, course_id).await? {
            return Err(EngineError::NotFound("enrollment"));
        }
        tracing::info!(%user_id, %course_id, revoked_by = %identity.user_id, "enrollment revoked");
        Ok(())
    }
}

fn require_admin(identity: Identity) -> EngineResult<()> {
    if !identity.is_admin() {
        return Err(EngineError::Forbidden("admin role required".into()));
    }
    Ok(())
}

fn pending_exists() -> EngineError {
    EngineError::LimitExceeded("a submission for this homework is already awaiting review".into())
}
