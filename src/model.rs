//! Typed domain model built from a [`TimetableRequest`].
//!
//! Names are interned into dense indices so the search can work on plain
//! vectors. Every entity keeps the order it had in the request; that order is
//! what the search uses for its deterministic tie-breaks.

use itertools::Itertools;
use log::trace;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::data::TimetableRequest;
use crate::error::TimetableError;

pub type ClassId = usize;
pub type StaffId = usize;
pub type SubjectId = usize;
pub type SlotId = usize;

/// A (day, period) pair, both 1-based. Orders day-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub day: u32,
    pub period: u32,
}

impl SlotKey {
    /// Parses the canonical `Day_<d>_Period_<p>` form.
    pub fn parse(raw: &str) -> Option<SlotKey> {
        let rest = raw.trim().strip_prefix("Day_")?;
        let (day, period) = rest.split_once("_Period_")?;
        let day: u32 = day.parse().ok()?;
        let period: u32 = period.parse().ok()?;
        if day == 0 || period == 0 {
            return None;
        }
        Some(SlotKey { day, period })
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Day_{}_Period_{}", self.day, self.period)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub key: SlotKey,
    /// The identifier as the caller sent it, echoed back in the output.
    pub name: String,
    pub is_break: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staff {
    pub name: String,
    /// Qualified subjects, in the order the caller listed them.
    pub subjects: Vec<SubjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    pub name: String,
    /// `None` means the class accepts any subject.
    pub required_subjects: Option<Vec<SubjectId>>,
}

/// Default upper bound on the size of the search, see [`ProblemOptions`].
pub const DEFAULT_MAX_VARIABLES: usize = 250_000;

/// Limits and defaults applied while building a [`Problem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemOptions {
    /// Largest accepted classes x slots and staff x slots product. Compact
    /// counts are checked against it before any name is generated.
    pub max_variables: usize,
    /// Applies when the request does not choose the consecutive-repeat rule.
    pub avoid_consecutive_repeats: bool,
}

impl Default for ProblemOptions {
    fn default() -> Self {
        ProblemOptions {
            max_variables: DEFAULT_MAX_VARIABLES,
            avoid_consecutive_repeats: false,
        }
    }
}

/// The validated, immutable input of one generation request.
#[derive(Debug, Clone)]
pub struct Problem {
    pub classes: Vec<Class>,
    pub staff: Vec<Staff>,
    pub subjects: Vec<String>,
    pub slots: Vec<Slot>,
    pub avoid_consecutive_repeats: bool,
}

impl Problem {
    /// Validates the payload and builds the model.
    pub fn from_request(
        request: &TimetableRequest,
        options: &ProblemOptions,
    ) -> Result<Problem, TimetableError> {
        let limit = options.max_variables;
        let class_names = class_names(request, limit)?;
        let slot_names = slot_names(request, limit)?;
        let staff_names = names("staff", &request.staff)?;
        within_limit("classes x slots", product(class_names.len(), slot_names.len()), limit)?;
        within_limit("staff x slots", product(staff_names.len(), slot_names.len()), limit)?;

        let mut subjects = SubjectTable::default();

        let staff_subjects = trimmed_keys("staff_subjects", &request.staff_subjects)?;
        let staff_set: HashSet<&str> = staff_names.iter().map(String::as_str).collect();
        if let Some(unknown) = staff_subjects.keys().find(|k| !staff_set.contains(*k)) {
            return Err(TimetableError::validation(format!(
                "staff_subjects names unknown staff member '{unknown}'"
            )));
        }

        let mut staff = Vec::with_capacity(staff_names.len());
        for name in staff_names {
            let listed = staff_subjects.get(name.as_str()).ok_or_else(|| {
                TimetableError::validation(format!(
                    "staff member '{name}' has no entry in staff_subjects"
                ))
            })?;
            let qualified: Vec<SubjectId> = trimmed_entries(listed)
                .map(|s| subjects.intern(s))
                .unique()
                .collect();
            if qualified.is_empty() {
                return Err(TimetableError::validation(format!(
                    "staff member '{name}' has an empty subject list"
                )));
            }
            staff.push(Staff {
                name,
                subjects: qualified,
            });
        }

        let class_subjects = trimmed_keys("class_subjects", &request.class_subjects)?;
        let class_set: HashSet<&str> = class_names.iter().map(String::as_str).collect();
        if let Some(unknown) = class_subjects.keys().find(|k| !class_set.contains(*k)) {
            return Err(TimetableError::validation(format!(
                "class_subjects names unknown class '{unknown}'"
            )));
        }

        let mut classes = Vec::with_capacity(class_names.len());
        for name in class_names {
            let required_subjects = match class_subjects.get(name.as_str()) {
                None => None,
                Some(listed) => {
                    let required: Vec<SubjectId> = trimmed_entries(listed)
                        .map(|s| subjects.intern(s))
                        .unique()
                        .collect();
                    if required.is_empty() {
                        return Err(TimetableError::validation(format!(
                            "class '{name}' has an empty subject requirement list"
                        )));
                    }
                    Some(required)
                }
            };
            classes.push(Class {
                name,
                required_subjects,
            });
        }

        let mut slots = Vec::with_capacity(slot_names.len());
        let mut seen = HashSet::new();
        for name in slot_names {
            let key = SlotKey::parse(&name).ok_or_else(|| {
                TimetableError::validation(format!(
                    "slot '{name}' is not of the form Day_<d>_Period_<p> with d, p >= 1"
                ))
            })?;
            if !seen.insert(key) {
                return Err(TimetableError::validation(format!(
                    "slot '{name}' appears more than once"
                )));
            }
            slots.push(Slot {
                key,
                name,
                is_break: false,
            });
        }

        let positions: HashMap<SlotKey, SlotId> =
            slots.iter().enumerate().map(|(i, s)| (s.key, i)).collect();
        for raw in trimmed_entries(&request.break_periods) {
            let slot = SlotKey::parse(raw)
                .and_then(|key| positions.get(&key).copied())
                .ok_or_else(|| {
                    TimetableError::validation(format!(
                        "break period '{raw}' does not name a slot in the timetable"
                    ))
                })?;
            slots[slot].is_break = true;
        }

        let problem = Problem {
            classes,
            staff,
            subjects: subjects.names,
            slots,
            avoid_consecutive_repeats: request
                .avoid_consecutive_repeats
                .unwrap_or(options.avoid_consecutive_repeats),
        };
        trace!(
            "Parsed {} classes, {} staff, {} subjects, {} slots ({} breaks)",
            problem.classes.len(),
            problem.staff.len(),
            problem.subjects.len(),
            problem.slots.len(),
            problem.slots.iter().filter(|s| s.is_break).count()
        );
        Ok(problem)
    }

    pub fn subject_name(&self, subject: SubjectId) -> &str {
        &self.subjects[subject]
    }
}

/// Interns subject names in first-seen order.
#[derive(Default)]
struct SubjectTable {
    names: Vec<String>,
    ids: HashMap<String, SubjectId>,
}

impl SubjectTable {
    fn intern(&mut self, name: &str) -> SubjectId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }
}

fn class_names(request: &TimetableRequest, limit: usize) -> Result<Vec<String>, TimetableError> {
    match (&request.classes, request.class_count) {
        (Some(list), _) => names("class", list),
        (None, Some(count)) => {
            let count = positive("class_count", count)?;
            within_limit("class_count", u64::from(count), limit)?;
            Ok((1..=count).map(|i| format!("Class_{i}")).collect())
        }
        (None, None) => Err(TimetableError::validation(
            "either classes or class_count must be provided",
        )),
    }
}

fn slot_names(request: &TimetableRequest, limit: usize) -> Result<Vec<String>, TimetableError> {
    match (&request.slots, request.days, request.periods_per_day) {
        (Some(list), _, _) => names("slot", list),
        (None, Some(days), Some(periods)) => {
            let days = positive("days", days)?;
            let periods = positive("periods_per_day", periods)?;
            within_limit("days x periods_per_day", u64::from(days) * u64::from(periods), limit)?;
            Ok((1..=days)
                .cartesian_product(1..=periods)
                .map(|(day, period)| SlotKey { day, period }.to_string())
                .collect())
        }
        _ => Err(TimetableError::validation(
            "either slots or both days and periods_per_day must be provided",
        )),
    }
}

fn positive(field: &str, value: i64) -> Result<u32, TimetableError> {
    if value <= 0 {
        return Err(TimetableError::validation(format!(
            "{field} must be positive, got {value}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| TimetableError::validation(format!("{field} is too large: {value}")))
}

fn product(a: usize, b: usize) -> u64 {
    (a as u64).saturating_mul(b as u64)
}

fn within_limit(what: &str, size: u64, limit: usize) -> Result<(), TimetableError> {
    if size > u64::try_from(limit).unwrap_or(u64::MAX) {
        return Err(TimetableError::validation(format!(
            "{what} is {size}, above the limit of {limit}"
        )));
    }
    Ok(())
}

/// Trims a list of names, rejecting empty lists, blank names and duplicates.
fn names(what: &str, raw: &[String]) -> Result<Vec<String>, TimetableError> {
    if raw.is_empty() {
        return Err(TimetableError::validation(format!("{what} list is empty")));
    }
    let trimmed: Vec<String> = raw.iter().map(|s| s.trim().to_string()).collect();
    if trimmed.iter().any(String::is_empty) {
        return Err(TimetableError::validation(format!(
            "{what} list contains a blank name"
        )));
    }
    if let Some(dup) = trimmed.iter().duplicates().next() {
        return Err(TimetableError::validation(format!(
            "{what} '{dup}' appears more than once"
        )));
    }
    Ok(trimmed)
}

fn trimmed_entries(raw: &[String]) -> impl Iterator<Item = &str> {
    raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Trims map keys. Two keys that only differ in surrounding whitespace are
/// rejected rather than merged.
fn trimmed_keys<'a>(
    field: &str,
    map: &'a BTreeMap<String, Vec<String>>,
) -> Result<BTreeMap<&'a str, &'a [String]>, TimetableError> {
    let mut keys = BTreeMap::new();
    for (key, value) in map {
        let name = key.trim();
        if keys.insert(name, value.as_slice()).is_some() {
            return Err(TimetableError::validation(format!(
                "{field} lists '{name}' more than once"
            )));
        }
    }
    Ok(keys)
}
