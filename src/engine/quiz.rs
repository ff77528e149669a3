//! Quiz scoring and retry accounting.

use serde::Serialize;
use uuid::Uuid;

use super::aggregate::percentage;
use crate::error::{EngineError, EngineResult};
use crate::models::{Question, Quiz, QuizAttempt};

/// Learner-facing question. Has no field for the correct option, so a
/// pre-submission read cannot leak it.
#[derive(Serialize, Debug, Clone)]
pub struct QuestionView {
    pub id: Uuid,
    pub question_text: String,
    pub options: Vec<String>,
    pub order: i32,
}

#[derive(Serialize, Debug, Clone)]
pub struct QuizView {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub passing_score: i32,
    pub max_retries: i32,
    pub questions: Vec<QuestionView>,
}

impl QuizView {
    pub fn new(quiz: &Quiz, questions: &[Question]) -> Self {
        QuizView {
            id: quiz.id,
            lesson_id: quiz.lesson_id,
            passing_score: quiz.passing_score,
            max_retries: quiz.max_retries,
            questions: questions
                .iter()
                .map(|q| QuestionView {
                    id: q.id,
                    question_text: q.question_text.clone(),
                    options: q.options.clone(),
                    order: q.order,
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct QuestionResult {
    pub question_id: Uuid,
    pub selected: i32,
    pub correct_option: i32,
    pub is_correct: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Grade {
    pub score: i32,
    pub passed: bool,
    pub results: Vec<QuestionResult>,
}

/// Scores `answers` positionally against `questions` (already in quiz
/// order). An index outside the options simply counts as wrong.
pub fn grade(quiz: &Quiz, questions: &[Question], answers: &[i32]) -> EngineResult<Grade> {
    if questions.is_empty() {
        return Err(EngineError::ValidationFailed("quiz has no questions".into()));
    }
    if answers.len() != questions.len() {
        return Err(EngineError::ValidationFailed(format!(
            "expected {} answers, got {}",
            questions.len(),
            answers.len()
        )));
    }

    let results: Vec<QuestionResult> = questions
        .iter()
        .zip(answers)
        .map(|(q, &selected)| QuestionResult {
            question_id: q.id,
            selected,
            correct_option: q.correct_option,
            is_correct: selected == q.correct_option,
        })
        .collect();

    let correct = results.iter().filter(|r| r.is_correct).count();
    let score = percentage(correct, questions.len());
    Ok(Grade { score, passed: score >= quiz.passing_score, results })
}

/// Rejects a new attempt once `max_retries` attempts exist. Zero means
/// unlimited.
pub fn ensure_attempt_allowed(quiz: &Quiz, attempts_so_far: i64) -> EngineResult<()> {
    if quiz.max_retries > 0 && attempts_so_far >= i64::from(quiz.max_retries) {
        return Err(EngineError::LimitExceeded(format!(
            "all {} quiz attempts have been used",
            quiz.max_retries
        )));
    }
    Ok(())
}

/// `(can_retry, remaining)` after `attempts` attempts; `remaining` is
/// `None` for unlimited quizzes and never negative.
pub fn retry_allowance(quiz: &Quiz, attempts: i64) -> (bool, Option<i64>) {
    if quiz.max_retries <= 0 {
        return (true, None);
    }
    let remaining = (i64::from(quiz.max_retries) - attempts).max(0);
    (remaining > 0, Some(remaining))
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AttemptSummary {
    pub count: i64,
    pub best_score: Option<i32>,
    pub has_passed: bool,
    pub can_retry: bool,
    pub remaining: Option<i64>,
}

pub fn summarize(quiz: &Quiz, attempts: &[QuizAttempt]) -> AttemptSummary {
    let count = attempts.len() as i64;
    let (can_retry, remaining) = retry_allowance(quiz, count);
    AttemptSummary {
        count,
        best_score: attempts.iter().map(|a| a.score).max(),
        has_passed: attempts.iter().any(|a| a.passed),
        can_retry,
        remaining,
    }
}
