use itertools::Itertools;
use log::debug;
use std::collections::VecDeque;

use crate::model::{ClassId, Problem, SlotId, StaffId, SubjectId};

/// A value a (class, slot) variable can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub staff: StaffId,
    pub subject: SubjectId,
}

/// Read-only lookup tables derived once per request.
#[derive(Debug, Clone)]
pub struct ConstraintIndex {
    /// Qualified subjects per staff member, in input order.
    pub staff_subjects: Vec<Vec<SubjectId>>,
    /// `blocked[slot]` is true for break slots.
    pub blocked: Vec<bool>,
    /// Non-break slots ordered by (day, period).
    pub available_slots: Vec<SlotId>,
    /// `adjacent_to_previous[i]` is true when `available_slots[i]` directly
    /// follows `available_slots[i - 1]` in the full day-major sequence.
    pub adjacent_to_previous: Vec<bool>,
    /// Candidate domain of every variable of a class, staff-major.
    pub class_candidates: Vec<Vec<Candidate>>,
    /// Staff qualified for each subject, in input order.
    pub qualified_staff: Vec<Vec<StaffId>>,
    /// Distinct staff able to teach each class, in input order.
    pub class_staff: Vec<Vec<StaffId>>,
}

impl ConstraintIndex {
    pub fn build(problem: &Problem) -> ConstraintIndex {
        let staff_subjects: Vec<Vec<SubjectId>> =
            problem.staff.iter().map(|s| s.subjects.clone()).collect();
        let blocked: Vec<bool> = problem.slots.iter().map(|s| s.is_break).collect();

        let mut ordered: Vec<SlotId> = (0..problem.slots.len()).collect();
        ordered.sort_by_key(|&slot| problem.slots[slot].key);

        let mut available_slots = Vec::with_capacity(ordered.len());
        let mut adjacent_to_previous = Vec::with_capacity(ordered.len());
        let mut previous_was_available = false;
        for &slot in &ordered {
            if blocked[slot] {
                previous_was_available = false;
                continue;
            }
            adjacent_to_previous.push(previous_was_available);
            available_slots.push(slot);
            previous_was_available = true;
        }

        let mut qualified_staff = vec![Vec::new(); problem.subjects.len()];
        for (staff, subjects) in staff_subjects.iter().enumerate() {
            for &subject in subjects {
                qualified_staff[subject].push(staff);
            }
        }

        let class_candidates: Vec<Vec<Candidate>> = (0..problem.classes.len())
            .map(|class| candidates_for(problem, &staff_subjects, class))
            .collect();
        let class_staff = class_candidates
            .iter()
            .map(|candidates| candidates.iter().map(|c| c.staff).dedup().collect())
            .collect();

        debug!(
            "Constraint index: {} of {} slots available, {} subjects",
            available_slots.len(),
            problem.slots.len(),
            qualified_staff.len()
        );

        ConstraintIndex {
            staff_subjects,
            blocked,
            available_slots,
            adjacent_to_previous,
            class_candidates,
            qualified_staff,
            class_staff,
        }
    }

    /// Size of a maximum matching between `classes` and distinct staff,
    /// skipping staff marked in `unavailable`.
    pub fn coverable_classes(&self, classes: &[ClassId], unavailable: &[bool]) -> usize {
        let (_, mate) = self.matching(classes, unavailable);
        mate.iter().flatten().count()
    }

    /// Maximum matching between `classes` and the staff not marked in
    /// `unavailable`, as (owner per staff, staff per class).
    pub fn matching(
        &self,
        classes: &[ClassId],
        unavailable: &[bool],
    ) -> (Vec<Option<ClassId>>, Vec<Option<StaffId>>) {
        let mut owner: Vec<Option<ClassId>> = vec![None; unavailable.len()];
        let mut mate: Vec<Option<StaffId>> = vec![None; self.class_staff.len()];
        for &class in classes {
            let mut visited = unavailable.to_vec();
            self.augment(class, &mut owner, &mut mate, &mut visited);
        }
        (owner, mate)
    }

    /// Finds an augmenting path from the unmatched `start` class by
    /// breadth-first search and flips it. Staff marked in `visited` are never
    /// taken or re-routed.
    pub fn augment(
        &self,
        start: ClassId,
        owner: &mut [Option<ClassId>],
        mate: &mut [Option<StaffId>],
        visited: &mut [bool],
    ) -> bool {
        let mut via: Vec<Option<ClassId>> = vec![None; owner.len()];
        let mut queue = VecDeque::from([start]);
        while let Some(class) = queue.pop_front() {
            for &staff in &self.class_staff[class] {
                if visited[staff] {
                    continue;
                }
                visited[staff] = true;
                via[staff] = Some(class);
                if let Some(next) = owner[staff] {
                    queue.push_back(next);
                    continue;
                }
                let mut free = staff;
                while let Some(class) = via[free] {
                    let previous = mate[class];
                    owner[free] = Some(class);
                    mate[class] = Some(free);
                    match previous {
                        Some(staff) => free = staff,
                        None => return true,
                    }
                }
                return false;
            }
        }
        false
    }

    pub fn is_blocked(&self, slot: SlotId) -> bool {
        self.blocked[slot]
    }

    pub fn is_qualified(&self, staff: StaffId, subject: SubjectId) -> bool {
        self.staff_subjects[staff].contains(&subject)
    }

    pub fn variable_count(&self) -> usize {
        self.class_candidates.len() * self.available_slots.len()
    }
}

fn candidates_for(
    problem: &Problem,
    staff_subjects: &[Vec<SubjectId>],
    class: ClassId,
) -> Vec<Candidate> {
    let required = problem.classes[class].required_subjects.as_deref();
    staff_subjects
        .iter()
        .enumerate()
        .flat_map(|(staff, subjects)| {
            subjects
                .iter()
                .map(move |&subject| Candidate { staff, subject })
        })
        .filter(|c| required.is_none_or(|req| req.contains(&c.subject)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProblemOptions;
    use crate::model::tests::request;

    #[test]
    fn test_available_slots_sorted_and_breaks_removed() {
        let req = request(
            &["C"],
            &[
                "Day_2_Period_1",
                "Day_1_Period_2",
                "Day_1_Period_1",
                "Day_1_Period_3",
            ],
            &[("A", &["Math"])],
            &["Day_1_Period_2"],
        );
        let problem = Problem::from_request(&req, &ProblemOptions::default()).unwrap();
        let index = ConstraintIndex::build(&problem);

        let names: Vec<&str> = index
            .available_slots
            .iter()
            .map(|&s| problem.slots[s].name.as_str())
            .collect();
        assert_eq!(names, vec!["Day_1_Period_1", "Day_1_Period_3", "Day_2_Period_1"]);
        assert_eq!(index.adjacent_to_previous, vec![false, false, true]);
        assert!(index.is_blocked(1));
        assert_eq!(index.variable_count(), 3);
    }

    #[test]
    fn test_candidates_follow_input_order() {
        let mut req = request(
            &["C1", "C2"],
            &["Day_1_Period_1"],
            &[("A", &["Math", "Art"]), ("B", &["Science", "Math"])],
            &[],
        );
        req.class_subjects.insert("C2".into(), vec!["Math".into()]);
        let problem = Problem::from_request(&req, &ProblemOptions::default()).unwrap();
        let index = ConstraintIndex::build(&problem);

        let pairs = |class: usize| -> Vec<(usize, usize)> {
            index.class_candidates[class]
                .iter()
                .map(|c| (c.staff, c.subject))
                .collect()
        };
        // subjects: Math=0, Art=1, Science=2
        assert_eq!(pairs(0), vec![(0, 0), (0, 1), (1, 2), (1, 0)]);
        assert_eq!(pairs(1), vec![(0, 0), (1, 0)]);
        assert_eq!(index.qualified_staff[0], vec![0, 1]);
        assert!(index.is_qualified(1, 2));
        assert!(!index.is_qualified(0, 2));
    }

    #[test]
    fn test_coverable_classes_respects_unavailable_staff() {
        let mut req = request(
            &["C1", "C2", "C3"],
            &["Day_1_Period_1"],
            &[("A", &["Math"]), ("B", &["Art"]), ("C", &["Math", "Art"])],
            &[],
        );
        req.class_subjects.insert("C1".into(), vec!["Math".into()]);
        req.class_subjects.insert("C2".into(), vec!["Math".into()]);
        let problem = Problem::from_request(&req, &ProblemOptions::default()).unwrap();
        let index = ConstraintIndex::build(&problem);

        assert_eq!(index.class_staff[0], vec![0, 2]);
        assert_eq!(index.coverable_classes(&[0, 1, 2], &[false, false, false]), 3);
        // Without C, both Math classes compete for A.
        assert_eq!(index.coverable_classes(&[0, 1, 2], &[false, false, true]), 2);
        assert_eq!(index.coverable_classes(&[2], &[true, false, true]), 1);
    }

    #[test]
    fn test_matching_reroutes_earlier_classes() {
        // C1 takes A first; C2 can only use A, so C1 has to move to B.
        let mut req = request(
            &["C1", "C2"],
            &["Day_1_Period_1"],
            &[("A", &["Math", "Art"]), ("B", &["Science"])],
            &[],
        );
        req.class_subjects.insert("C2".into(), vec!["Art".into()]);
        let problem = Problem::from_request(&req, &ProblemOptions::default()).unwrap();
        let index = ConstraintIndex::build(&problem);

        let (owner, mate) = index.matching(&[0, 1], &[false, false]);
        assert_eq!(mate, vec![Some(1), Some(0)]);
        assert_eq!(owner, vec![Some(1), Some(0)]);
    }
}
