use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: i32,
}

/// `round(100 * part / whole)` with halves rounded up; 0 when `whole == 0`.
pub fn percentage(part: usize, whole: usize) -> i32 {
    if whole == 0 {
        return 0;
    }
    let (part, whole) = (part as u64, whole as u64);
    ((200 * part + whole) / (2 * whole)) as i32
}

/// Rolls completion up over the course's lessons. Completed ids outside
/// `lesson_ids` are ignored.
pub fn aggregate<'a, I>(lesson_ids: I, completed: &HashSet<Uuid>) -> CourseProgress
where
    I: IntoIterator<Item = &'a Uuid>,
{
    let mut total = 0;
    let mut done = 0;
    for id in lesson_ids {
        total += 1;
        if completed.contains(id) {
            done += 1;
        }
    }
    CourseProgress { completed: done, total, percentage: percentage(done, total) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_of_ten_is_forty_percent() {
        let ids: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        let completed: HashSet<Uuid> = ids[..4].iter().copied().collect();
        let p = aggregate(&ids, &completed);
        assert_eq!(p, CourseProgress { completed: 4, total: 10, percentage: 40 });
    }

    #[test]
    fn empty_course_is_zero_percent() {
        let p = aggregate(&Vec::<Uuid>::new(), &HashSet::new());
        assert_eq!(p.percentage, 0);
        assert_eq!(p.total, 0);
    }

    #[test]
    fn stray_progress_rows_are_ignored() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let completed: HashSet<Uuid> = [ids[0], Uuid::new_v4()].into_iter().collect();
        assert_eq!(aggregate(&ids, &completed).completed, 1);
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13); // 12.5
        assert_eq!(percentage(3, 4), 75);
        assert_eq!(percentage(5, 5), 100);
    }
}
