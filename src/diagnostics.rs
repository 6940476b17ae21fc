//! Explanations for timetables that cannot exist.
//!
//! [`analyze`] runs before the search and proves infeasibility in the common
//! cases without exploring the assignment space. Every slot carries the same
//! class and staff sets, so if the classes cannot be matched to distinct
//! qualified staff within a single slot, no slot can be filled at all.

use log::debug;
use std::fmt;

use crate::index::ConstraintIndex;
use crate::model::{ClassId, Problem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Infeasibility {
    /// Every slot is a break period.
    NoAvailableSlots,
    /// A class requires a subject nobody is qualified to teach.
    UnqualifiedSubject { subject: String, class: String },
    /// Fewer classes can be staffed at once than there are classes.
    InsufficientStaff { classes: usize, coverable: usize },
    /// The consecutive-repeat rule forbids the only pairing a class has.
    RepeatForced { class: String },
    /// The search exhausted every branch. `repeat_rule` records whether the
    /// consecutive-repeat rule was part of the constraints.
    Exhausted { repeat_rule: bool },
}

impl fmt::Display for Infeasibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Infeasibility::NoAvailableSlots => {
                write!(f, "no available slots: every slot is a break period")
            }
            Infeasibility::UnqualifiedSubject { subject, class } => write!(
                f,
                "insufficient qualified staff for subject {subject} (required by {class})"
            ),
            Infeasibility::InsufficientStaff {
                classes,
                coverable,
            } => write!(
                f,
                "insufficient staff: {classes} classes must be taught in every slot \
                 but at most {coverable} can be covered at once"
            ),
            Infeasibility::RepeatForced { class } => write!(
                f,
                "class {class} has a single staff and subject pairing, \
                 which cannot repeat in adjacent slots"
            ),
            Infeasibility::Exhausted { repeat_rule } => {
                write!(
                    f,
                    "no conflict-free timetable exists for the given staff and slots"
                )?;
                if *repeat_rule {
                    write!(
                        f,
                        " while consecutive repeats are forbidden; \
                         setting avoid_consecutive_repeats to false may make it solvable"
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Looks for a reason the request cannot be solved. `None` means the search
/// has to decide.
pub fn analyze(problem: &Problem, index: &ConstraintIndex) -> Option<Infeasibility> {
    if index.available_slots.is_empty() {
        return Some(Infeasibility::NoAvailableSlots);
    }

    for class in &problem.classes {
        let Some(required) = &class.required_subjects else {
            continue;
        };
        if let Some(&subject) = required
            .iter()
            .find(|&&subject| index.qualified_staff[subject].is_empty())
        {
            return Some(Infeasibility::UnqualifiedSubject {
                subject: problem.subject_name(subject).to_string(),
                class: class.name.clone(),
            });
        }
    }

    let classes: Vec<ClassId> = (0..problem.classes.len()).collect();
    let coverable = index.coverable_classes(&classes, &vec![false; problem.staff.len()]);
    debug!(
        "Per-slot matching covers {} of {} classes",
        coverable,
        problem.classes.len()
    );
    if coverable < problem.classes.len() {
        return Some(Infeasibility::InsufficientStaff {
            classes: problem.classes.len(),
            coverable,
        });
    }

    if problem.avoid_consecutive_repeats && index.adjacent_to_previous.contains(&true) {
        if let Some(class) = index
            .class_candidates
            .iter()
            .position(|candidates| candidates.len() == 1)
        {
            return Some(Infeasibility::RepeatForced {
                class: problem.classes[class].name.clone(),
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProblemOptions;
    use crate::model::tests::request;

    fn diagnose(req: &crate::data::TimetableRequest) -> Option<Infeasibility> {
        let problem = Problem::from_request(req, &ProblemOptions::default()).unwrap();
        let index = ConstraintIndex::build(&problem);
        analyze(&problem, &index)
    }

    #[test]
    fn test_all_breaks() {
        let req = request(
            &["C"],
            &["Day_1_Period_1", "Day_1_Period_2"],
            &[("A", &["Math"])],
            &["Day_1_Period_1", "Day_1_Period_2"],
        );
        let found = diagnose(&req).unwrap();
        assert_eq!(found, Infeasibility::NoAvailableSlots);
        assert!(found.to_string().starts_with("no available slots"));
    }

    #[test]
    fn test_unqualified_subject_named() {
        let mut req = request(&["C1"], &["Day_1_Period_1"], &[("A", &["Math"])], &[]);
        req.class_subjects.insert("C1".into(), vec!["Math".into(), "Latin".into()]);
        let found = diagnose(&req).unwrap();
        assert!(
            found
                .to_string()
                .contains("insufficient qualified staff for subject Latin")
        );
    }

    #[test]
    fn test_one_staff_two_classes() {
        let req = request(
            &["Class_1", "Class_2"],
            &["Day_1_Period_1", "Day_1_Period_2"],
            &[("A", &["Math", "Science"])],
            &[],
        );
        assert_eq!(
            diagnose(&req),
            Some(Infeasibility::InsufficientStaff {
                classes: 2,
                coverable: 1
            })
        );
    }

    #[test]
    fn test_matching_needs_reassignment() {
        // C1 can take A or B, C2 only A: greedy would give A to C1.
        let mut req = request(
            &["C1", "C2"],
            &["Day_1_Period_1"],
            &[("A", &["Math", "Art"]), ("B", &["Math"])],
            &[],
        );
        req.class_subjects.insert("C2".into(), vec!["Art".into()]);
        assert_eq!(diagnose(&req), None);
    }

    #[test]
    fn test_repeat_forced() {
        let mut req = request(
            &["C"],
            &["Day_1_Period_1", "Day_1_Period_2"],
            &[("A", &["Math"])],
            &[],
        );
        req.avoid_consecutive_repeats = Some(true);
        assert_eq!(
            diagnose(&req),
            Some(Infeasibility::RepeatForced { class: "C".into() })
        );

        // A break between the two slots removes the adjacency.
        let mut req = request(
            &["C"],
            &["Day_1_Period_1", "Day_1_Period_2", "Day_1_Period_3"],
            &[("A", &["Math"])],
            &["Day_1_Period_2"],
        );
        req.avoid_consecutive_repeats = Some(true);
        assert_eq!(diagnose(&req), None);
    }

    #[test]
    fn test_exhausted_message_mentions_repeat_rule() {
        let plain = Infeasibility::Exhausted { repeat_rule: false }.to_string();
        assert_eq!(
            plain,
            "no conflict-free timetable exists for the given staff and slots"
        );

        let ruled = Infeasibility::Exhausted { repeat_rule: true }.to_string();
        assert!(ruled.starts_with(&plain));
        assert!(ruled.contains("avoid_consecutive_repeats to false"), "{ruled}");
    }
}
