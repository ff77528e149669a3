//! Canonical lesson order of a course.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Lesson, Module};

/// Where standalone lessons (no module) land relative to module lessons.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LessonOrdering {
    /// Every module's lessons, then all standalone lessons.
    #[default]
    ModulesFirst,
    /// Modules and standalone lessons share one order space; a module wins a
    /// tie on `order`.
    Interleaved,
}

impl FromStr for LessonOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "modules_first" | "modules-first" => Ok(LessonOrdering::ModulesFirst),
            "interleaved" => Ok(LessonOrdering::Interleaved),
            other => Err(format!("unknown lesson ordering: {other}")),
        }
    }
}

fn by_module(a: &&Module, b: &&Module) -> Ordering {
    (a.order, a.created_at, a.id).cmp(&(b.order, b.created_at, b.id))
}

fn by_lesson(a: &&Lesson, b: &&Lesson) -> Ordering {
    (a.order, a.created_at, a.id).cmp(&(b.order, b.created_at, b.id))
}

enum Slot<'a> {
    Module(&'a Module),
    Lesson(&'a Lesson),
}

impl Slot<'_> {
    fn key(&self) -> (i32, u8, chrono::DateTime<chrono::Utc>, Uuid) {
        match self {
            Slot::Module(m) => (m.order, 0, m.created_at, m.id),
            Slot::Lesson(l) => (l.order, 1, l.created_at, l.id),
        }
    }
}

/// Orders every lesson of a course. Lessons pointing at a module that is
/// not part of `modules` are treated as standalone.
pub fn canonical_order<'a>(
    ordering: LessonOrdering,
    modules: &'a [Module],
    lessons: &'a [Lesson],
) -> Vec<&'a Lesson> {
    let mut by_container: HashMap<Uuid, Vec<&Lesson>> = HashMap::new();
    let mut standalone: Vec<&Lesson> = Vec::new();
    for lesson in lessons {
        match lesson.module_id {
            Some(mid) if modules.iter().any(|m| m.id == mid) => {
                by_container.entry(mid).or_default().push(lesson)
            }
            _ => standalone.push(lesson),
        }
    }
    for list in by_container.values_mut() {
        list.sort_by(by_lesson);
    }
    standalone.sort_by(by_lesson);

    let mut sorted_modules: Vec<&Module> = modules.iter().collect();
    sorted_modules.sort_by(by_module);

    let mut out = Vec::with_capacity(lessons.len());
    match ordering {
        LessonOrdering::ModulesFirst => {
            for m in sorted_modules {
                if let Some(list) = by_container.remove(&m.id) {
                    out.extend(list);
                }
            }
            out.extend(standalone);
        }
        LessonOrdering::Interleaved => {
            let mut slots: Vec<Slot> = sorted_modules
                .into_iter()
                .map(Slot::Module)
                .chain(standalone.into_iter().map(Slot::Lesson))
                .collect();
            slots.sort_by_key(|s| s.key());
            for slot in slots {
                match slot {
                    Slot::Module(m) => {
                        if let Some(list) = by_container.remove(&m.id) {
                            out.extend(list);
                        }
                    }
                    Slot::Lesson(l) => out.push(l),
                }
            }
        }
    }
    out
}

/// Position of a lesson in an ordered list.
pub fn position_of(order: &[&Lesson], lesson_id: Uuid) -> Option<usize> {
    order.iter().position(|l| l.id == lesson_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn module(order: i32, secs: i64) -> Module {
        Module {
            id: Uuid::new_v4(),
            course_id: Uuid::nil(),
            title: format!("m{order}"),
            order,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn lesson(module_id: Option<Uuid>, order: i32, title: &str) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            course_id: Uuid::nil(),
            module_id,
            title: title.into(),
            content_html: None,
            video_url: None,
            video_iframe: None,
            attachments: serde_json::json!([]),
            order,
            drip_days: None,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    fn titles(order: &[&Lesson]) -> Vec<String> {
        order.iter().map(|l| l.title.clone()).collect()
    }

    #[test]
    fn modules_first_puts_standalone_lessons_last() {
        let m1 = module(1, 0);
        let m0 = module(0, 0);
        let lessons = vec![
            lesson(None, 0, "s0"),
            lesson(Some(m1.id), 1, "m1-b"),
            lesson(Some(m0.id), 0, "m0-a"),
            lesson(Some(m1.id), 0, "m1-a"),
        ];
        let modules = vec![m1, m0];
        let order = canonical_order(LessonOrdering::ModulesFirst, &modules, &lessons);
        assert_eq!(titles(&order), vec!["m0-a", "m1-a", "m1-b", "s0"]);
    }

    #[test]
    fn interleaved_merges_by_shared_order() {
        let m0 = module(0, 0);
        let m2 = module(2, 0);
        let lessons = vec![
            lesson(Some(m2.id), 0, "m2-a"),
            lesson(None, 1, "s1"),
            lesson(Some(m0.id), 0, "m0-a"),
            lesson(None, 2, "s2"),
        ];
        let modules = vec![m0, m2];
        let order = canonical_order(LessonOrdering::Interleaved, &modules, &lessons);
        // module 2 wins the tie with standalone lesson order 2
        assert_eq!(titles(&order), vec!["m0-a", "s1", "m2-a", "s2"]);
    }

    #[test]
    fn module_order_ties_fall_back_to_creation_time() {
        let later = module(0, 100);
        let earlier = module(0, 10);
        let lessons = vec![lesson(Some(later.id), 0, "later"), lesson(Some(earlier.id), 0, "earlier")];
        let modules = vec![later, earlier];
        let order = canonical_order(LessonOrdering::ModulesFirst, &modules, &lessons);
        assert_eq!(titles(&order), vec!["earlier", "later"]);
    }

    #[test]
    fn orphaned_module_lessons_count_as_standalone() {
        let lessons = vec![lesson(Some(Uuid::new_v4()), 0, "orphan")];
        let order = canonical_order(LessonOrdering::ModulesFirst, &[], &lessons);
        assert_eq!(titles(&order), vec!["orphan"]);
        assert_eq!(position_of(&order, lessons[0].id), Some(0));
    }
}
