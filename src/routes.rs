use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, Multipart, Path, Query, Request, State,
    },
    http::{header, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::{
    AttemptOutcome, CompletionOutcome, CourseProgress, Curriculum, Engine, EnrollmentProgress, HomeworkOverview,
    LessonPage, QuizOverview, Verdict,
};
use crate::error::{EngineError, EngineResult};
use crate::identity::Identity;
use crate::models::{Submission, SubmissionFilter};
use crate::ratelimit::RateLimiter;
use crate::store::Store;
use crate::uploads::UploadedFile;

pub struct AppState<S> {
    pub engine: Arc<Engine<S>>,
    pub limiter: Arc<RateLimiter>,
}

// manual impl: `S` itself need not be Clone
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), limiter: self.limiter.clone() }
    }
}

pub fn router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // learner surface
        .route("/api/account/enrollments", get(enrollments::<S>))
        .route("/api/courses/:slug/curriculum", get(curriculum::<S>))
        .route("/api/courses/:slug/progress", get(progress::<S>))
        .route("/api/courses/:slug/lessons/:lesson_id", get(lesson::<S>))
        .route("/api/courses/:slug/lessons/:lesson_id/complete", post(complete::<S>))
        .route("/api/courses/:slug/lessons/:lesson_id/quiz", get(quiz::<S>))
        .route("/api/courses/:slug/lessons/:lesson_id/quiz/submit", post(submit_quiz::<S>))
        .route("/api/courses/:slug/lessons/:lesson_id/homework", get(homework::<S>))
        .route("/api/courses/:slug/lessons/:lesson_id/homework/submit", post(submit_homework::<S>))
        // admin surface
        .route("/api/admin/submissions", get(list_submissions::<S>))
        .route("/api/admin/submissions/:id", put(grade_submission::<S>))
        .route("/api/admin/users/:user_id/enrollments/:course_id", delete(revoke_enrollment::<S>))
        .with_state(state)
}

async fn enrollments<S: Store>(
    State(st): State<AppState<S>>,
    identity: Identity,
) -> EngineResult<Json<Vec<EnrollmentProgress>>> {
    Ok(Json(st.engine.enrollments(identity).await?))
}

async fn curriculum<S: Store>(
    State(st): State<AppState<S>>,
    Path(slug): Path<String>,
    identity: Identity,
) -> EngineResult<Json<Curriculum>> {
    Ok(Json(st.engine.curriculum(&slug, identity).await?))
}

async fn progress<S: Store>(
    State(st): State<AppState<S>>,
    Path(slug): Path<String>,
    identity: Identity,
) -> EngineResult<Json<CourseProgress>> {
    Ok(Json(st.engine.progress(&slug, identity).await?))
}

async fn lesson<S: Store>(
    State(st): State<AppState<S>>,
    Path((slug, lesson_id)): Path<(String, Uuid)>,
    identity: Identity,
) -> EngineResult<Json<LessonPage>> {
    Ok(Json(st.engine.lesson(&slug, lesson_id, identity).await?))
}

async fn complete<S: Store>(
    State(st): State<AppState<S>>,
    Path((slug, lesson_id)): Path<(String, Uuid)>,
    identity: Identity,
) -> EngineResult<Json<CompletionOutcome>> {
    Ok(Json(st.engine.complete_lesson(&slug, lesson_id, identity).await?))
}

async fn quiz<S: Store>(
    State(st): State<AppState<S>>,
    Path((slug, lesson_id)): Path<(String, Uuid)>,
    identity: Identity,
) -> EngineResult<Json<QuizOverview>> {
    Ok(Json(st.engine.quiz(&slug, lesson_id, identity).await?))
}

#[derive(Deserialize)]
struct QuizAnswers {
    answers: Vec<i32>,
}

async fn submit_quiz<S: Store>(
    State(st): State<AppState<S>>,
    Path((slug, lesson_id)): Path<(String, Uuid)>,
    identity: Identity,
    body: Result<Json<QuizAnswers>, JsonRejection>,
) -> EngineResult<Json<AttemptOutcome>> {
    let Json(body) = body.map_err(bad_body)?;
    st.limiter.check("quiz_submit", identity.user_id).await?;
    Ok(Json(
        st.engine
            .submit_quiz_attempt(&slug, lesson_id, identity, body.answers)
            .await?,
    ))
}

async fn homework<S: Store>(
    State(st): State<AppState<S>>,
    Path((slug, lesson_id)): Path<(String, Uuid)>,
    identity: Identity,
) -> EngineResult<Json<HomeworkOverview>> {
    Ok(Json(st.engine.homework(&slug, lesson_id, identity).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HomeworkText {
    #[serde(alias = "content_text")]
    content_text: Option<String>,
}

/// Accepts `multipart/form-data` (`contentText` and/or `file` fields) or a
/// JSON body with text only.
async fn submit_homework<S: Store>(
    State(st): State<AppState<S>>,
    Path((slug, lesson_id)): Path<(String, Uuid)>,
    identity: Identity,
    req: Request,
) -> EngineResult<(StatusCode, Json<Submission>)> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.starts_with("multipart/form-data"));

    let (content_text, file) = if is_multipart {
        let mp = Multipart::from_request(req, &())
            .await
            .map_err(|e| EngineError::ValidationFailed(e.body_text()))?;
        read_homework_form(mp).await?
    } else {
        let Json(body) = Json::<HomeworkText>::from_request(req, &()).await.map_err(bad_body)?;
        (body.content_text, None)
    };

    st.limiter.check("homework_submit", identity.user_id).await?;
    let submission = st
        .engine
        .submit_homework(&slug, lesson_id, identity, content_text, file)
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn read_homework_form(mut mp: Multipart) -> EngineResult<(Option<String>, Option<UploadedFile>)> {
    let mut content_text = None;
    let mut file = None;

    while let Some(field) = mp.next_field().await.map_err(e400)? {
        let name = field.name().unwrap_or("").to_string();
        if name == "contentText" || name == "content_text" {
            content_text = Some(field.text().await.map_err(e400)?);
        } else if name == "file" {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(e400)?.to_vec();
            file = Some(UploadedFile { file_name, content_type, bytes });
        }
    }
    Ok((content_text, file))
}

async fn list_submissions<S: Store>(
    State(st): State<AppState<S>>,
    identity: Identity,
    filter: Result<Query<SubmissionFilter>, QueryRejection>,
) -> EngineResult<Json<Vec<Submission>>> {
    let Query(filter) = filter.map_err(|e| EngineError::ValidationFailed(e.body_text()))?;
    Ok(Json(st.engine.list_submissions(identity, &filter).await?))
}

#[derive(Deserialize)]
struct GradeBody {
    status: Verdict,
    feedback: Option<String>,
}

async fn grade_submission<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<Uuid>,
    identity: Identity,
    body: Result<Json<GradeBody>, JsonRejection>,
) -> EngineResult<Json<Submission>> {
    let Json(body) = body.map_err(bad_body)?;
    Ok(Json(
        st.engine
            .grade_submission(id, identity, body.status, body.feedback)
            .await?,
    ))
}

async fn revoke_enrollment<S: Store>(
    State(st): State<AppState<S>>,
    Path((user_id, course_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
) -> EngineResult<StatusCode> {
    st.engine.revoke_enrollment(identity, user_id, course_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- helpers ---
fn bad_body(e: JsonRejection) -> EngineError {
    EngineError::ValidationFailed(e.body_text())
}

fn e400<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::ValidationFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::Utc;
    use tower::ServiceExt;

    use crate::clock::SystemClock;
    use crate::engine::EngineSettings;
    use crate::identity::{USER_ID_HEADER, USER_ROLE_HEADER};
    use crate::models::*;
    use crate::notify::LogNotifier;
    use crate::ratelimit::MemoryRateLimitStore;
    use crate::store::MemoryStore;
    use crate::uploads::LocalFileStore;

    struct Seeded {
        app: Router,
        learner: Uuid,
        lessons: [Uuid; 2],
    }

    async fn seeded(rate_limit: u32) -> Seeded {
        let store = Arc::new(MemoryStore::new());
        let course = Course {
            id: Uuid::new_v4(),
            slug: "intro".into(),
            title: "Intro".into(),
            structure_mode: StructureMode::Flat,
            enforce_sequential: true,
            status: CourseStatus::Published,
        };
        store.insert_course(course.clone()).await;

        let mut lessons = [Uuid::nil(); 2];
        for (i, id) in lessons.iter_mut().enumerate() {
            *id = Uuid::new_v4();
            store
                .insert_lesson(Lesson {
                    id: *id,
                    course_id: course.id,
                    module_id: None,
                    title: format!("Lesson {i}"),
                    content_html: None,
                    video_url: None,
                    video_iframe: None,
                    attachments: serde_json::json!([]),
                    order: i as i32,
                    drip_days: None,
                    created_at: Utc::now(),
                })
                .await;
        }
        store
            .insert_quiz(
                Quiz { id: Uuid::new_v4(), lesson_id: lessons[0], passing_score: 100, max_retries: 0 },
                vec![],
            )
            .await;

        let learner = Uuid::new_v4();
        store
            .insert_enrollment(Enrollment {
                id: Uuid::new_v4(),
                user_id: learner,
                course_id: course.id,
                created_at: Utc::now(),
            })
            .await;

        let clock = Arc::new(SystemClock);
        let engine = Engine::new(
            store,
            clock.clone(),
            Arc::new(LogNotifier),
            Arc::new(LocalFileStore::new(std::env::temp_dir(), "/files")),
            EngineSettings::default(),
        );
        let limiter = RateLimiter::new(
            Arc::new(MemoryRateLimitStore::new()),
            clock,
            rate_limit,
            chrono::Duration::seconds(60),
        );
        let app = router(AppState { engine: Arc::new(engine), limiter: Arc::new(limiter) });
        Seeded { app, learner, lessons }
    }

    fn get(uri: &str, user: Option<Uuid>) -> Request {
        let mut req = axum::http::Request::builder().uri(uri);
        if let Some(user) = user {
            req = req.header(USER_ID_HEADER, user.to_string());
        }
        req.body(Body::empty()).unwrap()
    }

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let s = seeded(5).await;
        let res = s.app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_identity_is_unauthenticated() {
        let s = seeded(5).await;
        let res = s.app.oneshot(get("/api/courses/intro/curriculum", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"]["kind"], "unauthenticated");
    }

    #[tokio::test]
    async fn unknown_role_is_unauthenticated() {
        let s = seeded(5).await;
        let req = axum::http::Request::builder()
            .uri("/api/courses/intro/curriculum")
            .header(USER_ID_HEADER, s.learner.to_string())
            .header(USER_ROLE_HEADER, "superuser")
            .body(Body::empty())
            .unwrap();
        let res = s.app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn curriculum_over_http() {
        let s = seeded(5).await;
        let res = s
            .app
            .oneshot(get("/api/courses/intro/curriculum", Some(s.learner)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let lessons = body["standalone_lessons"].as_array().unwrap();
        assert_eq!(lessons.len(), 2);
        assert_eq!(lessons[0]["unlocked"], true);
        assert_eq!(lessons[1]["unlocked"], false);
        assert_eq!(body["progress"]["percentage"], 0);
    }

    #[tokio::test]
    async fn locked_lesson_maps_to_423() {
        let s = seeded(5).await;
        let uri = format!("/api/courses/intro/lessons/{}", s.lessons[1]);
        let res = s.app.oneshot(get(&uri, Some(s.learner))).await.unwrap();
        assert_eq!(res.status(), StatusCode::LOCKED);
        assert_eq!(json_body(res).await["error"]["kind"], "locked_content");
    }

    #[tokio::test]
    async fn stranger_is_forbidden_and_unknown_course_not_found() {
        let s = seeded(5).await;
        let res = s
            .app
            .clone()
            .oneshot(get("/api/courses/intro/curriculum", Some(Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = s.app.oneshot(get("/api/courses/nope/curriculum", Some(s.learner))).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn quiz_submissions_are_rate_limited() {
        let s = seeded(1).await;
        let uri = format!("/api/courses/intro/lessons/{}/quiz/submit", s.lessons[0]);
        let submit = || {
            axum::http::Request::builder()
                .method("POST")
                .uri(&uri)
                .header(USER_ID_HEADER, s.learner.to_string())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"answers":[]}"#))
                .unwrap()
        };

        // the seeded quiz has no questions, so the first call is a validation failure
        let res = s.app.clone().oneshot(submit()).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = s.app.oneshot(submit()).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_failure() {
        let s = seeded(5).await;
        let req = axum::http::Request::builder()
            .method("POST")
            .uri(format!("/api/courses/intro/lessons/{}/quiz/submit", s.lessons[0]))
            .header(USER_ID_HEADER, s.learner.to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{"))
            .unwrap();
        let res = s.app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"]["kind"], "validation_failed");
    }

    #[tokio::test]
    async fn dashboard_lists_own_enrollments() {
        let s = seeded(5).await;
        let res = s.app.clone().oneshot(get("/api/account/enrollments", Some(s.learner))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["course"]["slug"], "intro");
        assert_eq!(rows[0]["progress"]["total"], 2);

        let res = s.app.oneshot(get("/api/account/enrollments", Some(Uuid::new_v4()))).await.unwrap();
        assert_eq!(json_body(res).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn admin_routes_reject_learners() {
        let s = seeded(5).await;
        let res = s.app.oneshot(get("/api/admin/submissions", Some(s.learner))).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}
