use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The payload posted by the timetable form.
///
/// Either the explicit lists (`classes`, `slots`) or the compact counts
/// (`class_count`, `days`, `periods_per_day`) describe the week; explicit
/// lists win when both are present.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TimetableRequest {
    #[serde(default)]
    pub classes: Option<Vec<String>>,
    #[serde(default)]
    pub slots: Option<Vec<String>>,
    pub staff: Vec<String>,
    pub staff_subjects: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub break_periods: Vec<String>,

    #[serde(default)]
    pub class_count: Option<i64>,
    #[serde(default)]
    pub days: Option<i64>,
    #[serde(default)]
    pub periods_per_day: Option<i64>,

    /// Optional per-class subject requirements. Classes not listed take any subject.
    #[serde(default)]
    pub class_subjects: BTreeMap<String, Vec<String>>,
    /// Overrides the server default for the consecutive-repeat rule.
    #[serde(default)]
    pub avoid_consecutive_repeats: Option<bool>,
}

/// One row of the rendered timetable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    #[serde(rename = "Class")]
    pub class: String,
    #[serde(rename = "Staff")]
    pub staff: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Slot")]
    pub slot: String,
}

/// Body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}
