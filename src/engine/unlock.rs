//! Per-lesson unlock state from canonical order, completion and drip.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::drip::{drip_status, DripStatus};
use crate::models::Lesson;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonGate {
    pub lesson_id: Uuid,
    pub completed: bool,
    pub unlocked: bool,
    pub drip: DripStatus,
}

/// Inputs shared by every lesson of one gate evaluation.
#[derive(Debug, Clone, Copy)]
pub struct GateContext {
    pub enforce_sequential: bool,
    /// Drip anchor; `None` disables the drip gate (no enrollment, or an
    /// admin previewing).
    pub enrolled_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    /// Admin preview: everything readable.
    pub bypass: bool,
}

pub fn resolve_gates(ctx: &GateContext, order: &[&Lesson], completed: &HashSet<Uuid>) -> Vec<LessonGate> {
    let mut gates = Vec::with_capacity(order.len());
    let mut previous_completed = true;

    for lesson in order {
        let done = completed.contains(&lesson.id);
        let drip = match (ctx.bypass, ctx.enrolled_at) {
            (false, Some(anchor)) => drip_status(lesson.drip_days, anchor, ctx.now),
            _ => DripStatus::OPEN,
        };

        let unlocked = if ctx.bypass {
            true
        } else if ctx.enforce_sequential {
            previous_completed && !drip.locked
        } else {
            !drip.locked
        };

        gates.push(LessonGate { lesson_id: lesson.id, completed: done, unlocked, drip });
        // every earlier lesson must be completed; a drip lock on an earlier
        // lesson does not by itself block later ones
        previous_completed = previous_completed && done;
    }
    gates
}
