//! Homework submission rules.
//!
//! Per (learner, homework) the workflow is `NONE -> PENDING -> PASSED |
//! REJECTED`, and a terminal status admits a fresh submission.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{Homework, Submission, SubmissionStatus};

/// Admin verdict on a pending submission.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Passed,
    Rejected,
}

impl From<Verdict> for SubmissionStatus {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Passed => SubmissionStatus::Passed,
            Verdict::Rejected => SubmissionStatus::Rejected,
        }
    }
}

/// Checks the supplied modalities against the homework settings and
/// returns the normalised text. Blank text counts as absent.
pub fn validate_modality(
    homework: &Homework,
    content_text: Option<String>,
    has_file: bool,
) -> EngineResult<Option<String>> {
    let text = content_text.filter(|t| !t.trim().is_empty());

    if text.is_some() && !homework.allow_text {
        return Err(EngineError::ValidationFailed(
            "text answers are disabled for this homework".into(),
        ));
    }
    if has_file && !homework.allow_file {
        return Err(EngineError::ValidationFailed(
            "file uploads are disabled for this homework".into(),
        ));
    }
    if text.is_none() && !has_file {
        return Err(EngineError::ValidationFailed(
            "a text answer or a file is required".into(),
        ));
    }
    Ok(text)
}

/// Only a pending submission can be graded.
pub fn ensure_gradable(submission: &Submission) -> EngineResult<()> {
    if submission.status.is_terminal() {
        return Err(EngineError::ValidationFailed(format!(
            "submission was already graded as {:?}",
            submission.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn homework(allow_text: bool, allow_file: bool) -> Homework {
        Homework {
            id: Uuid::new_v4(),
            lesson_id: Uuid::new_v4(),
            prompt: "write".into(),
            allow_file,
            allow_text,
        }
    }

    #[test]
    fn text_only_homework() {
        let hw = homework(true, false);
        assert_eq!(validate_modality(&hw, Some("answer".into()), false).unwrap(), Some("answer".into()));
        assert!(matches!(
            validate_modality(&hw, Some("answer".into()), true),
            Err(EngineError::ValidationFailed(_))
        ));
    }

    #[test]
    fn file_only_homework_rejects_text() {
        let hw = homework(false, true);
        assert_eq!(validate_modality(&hw, None, true).unwrap(), None);
        assert!(matches!(
            validate_modality(&hw, Some("x".into()), true),
            Err(EngineError::ValidationFailed(_))
        ));
    }

    #[test]
    fn blank_text_without_file_is_missing_content() {
        let hw = homework(true, true);
        assert!(matches!(
            validate_modality(&hw, Some("   ".into()), false),
            Err(EngineError::ValidationFailed(_))
        ));
        assert!(matches!(validate_modality(&hw, None, false), Err(EngineError::ValidationFailed(_))));
    }

    #[test]
    fn only_pending_is_gradable() {
        let mut s = Submission {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            homework_id: Uuid::new_v4(),
            content_text: Some("a".into()),
            file_url: None,
            status: SubmissionStatus::Pending,
            feedback: None,
            graded_at: None,
            created_at: Utc::now(),
        };
        assert!(ensure_gradable(&s).is_ok());
        s.status = SubmissionStatus::Rejected;
        assert!(ensure_gradable(&s).is_err());
        s.status = SubmissionStatus::Passed;
        assert!(ensure_gradable(&s).is_err());
    }
}
