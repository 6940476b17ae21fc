use log::{debug, error, info, trace, warn};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::data::{AssignmentRecord, TimetableRequest};
use crate::diagnostics::{self, Infeasibility};
use crate::error::TimetableError;
use crate::format;
use crate::index::{Candidate, ConstraintIndex};
use crate::model::{ClassId, Problem, ProblemOptions, SlotId, StaffId, SubjectId};

/// Steps between budget and cancel checks on paths without dead ends.
const BUDGET_CHECK_INTERVAL: u64 = 64;

/// Limits that turn an exponential search into a `SchedulingTimeout`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Budget {
    pub time_limit: Option<Duration>,
    pub max_backtracks: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SolveSettings {
    pub budget: Budget,
    pub problem: ProblemOptions,
}

/// Shared stop signal, checked by the search between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of one generation request. No phase is entered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialized,
    Indexing,
    Searching,
    Solved,
    Infeasible,
    TimedOut,
    Cancelled,
    Failed,
}

impl Phase {
    fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Initialized, Indexing)
                | (Initialized, Failed)
                | (Indexing, Searching)
                | (Indexing, Infeasible)
                | (Searching, Solved)
                | (Searching, Infeasible)
                | (Searching, TimedOut)
                | (Searching, Cancelled)
                | (Searching, Failed)
        )
    }

    #[must_use = "the returned phase replaces the current one"]
    fn advance(self, next: Phase) -> Phase {
        debug_assert!(
            self.can_advance_to(next),
            "illegal transition {self:?} -> {next:?}"
        );
        trace!("Generation phase {:?} -> {:?}", self, next);
        next
    }

    /// The phase a request ends in for the given outcome.
    fn terminal<T>(outcome: &Result<T, TimetableError>) -> Phase {
        match outcome {
            Ok(_) => Phase::Solved,
            Err(TimetableError::Infeasible(_)) => Phase::Infeasible,
            Err(TimetableError::Timeout { .. }) => Phase::TimedOut,
            Err(TimetableError::Cancelled) => Phase::Cancelled,
            Err(TimetableError::Validation(_) | TimetableError::Internal(_)) => Phase::Failed,
        }
    }
}

/// "This staff member teaches this subject to this class in this slot."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lesson {
    pub class: ClassId,
    pub staff: StaffId,
    pub subject: SubjectId,
    pub slot: SlotId,
}

/// A complete timetable, ordered by class and then by available slot.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    pub steps: u64,
    pub backtracks: u64,
    pub elapsed: Duration,
}

/// Generates a timetable for one request.
///
/// Validation, indexing, diagnostics and search all run on the caller's
/// thread; nothing is kept once this returns.
pub fn solve(
    request: &TimetableRequest,
    settings: &SolveSettings,
    cancel: &CancelFlag,
) -> Result<Vec<AssignmentRecord>, TimetableError> {
    let mut phase = Phase::Initialized;
    let outcome = generate(request, settings, cancel, &mut phase);
    let phase = phase.advance(Phase::terminal(&outcome));
    debug!("Generation ended in phase {phase:?}");
    outcome
}

fn generate(
    request: &TimetableRequest,
    settings: &SolveSettings,
    cancel: &CancelFlag,
    phase: &mut Phase,
) -> Result<Vec<AssignmentRecord>, TimetableError> {
    let start_time = Instant::now();

    let problem = Problem::from_request(request, &settings.problem).inspect_err(|e| {
        debug!("Rejected request: {e}");
    })?;

    *phase = phase.advance(Phase::Indexing);
    let index = ConstraintIndex::build(&problem);
    info!(
        "Generating timetable for {} classes, {} staff, {} available slots ({} variables)...",
        problem.classes.len(),
        problem.staff.len(),
        index.available_slots.len(),
        index.variable_count()
    );

    if let Some(reason) = diagnostics::analyze(&problem, &index) {
        warn!("Infeasible before search: {reason}");
        return Err(TimetableError::Infeasible(reason));
    }

    *phase = phase.advance(Phase::Searching);
    let mut search = Search::new(&problem, &index, settings.budget, cancel);
    let outcome = search.run();
    let stats = search.stats();

    let schedule = outcome.inspect_err(|e| match e {
        TimetableError::Infeasible(reason) => warn!(
            "Search exhausted after {} backtracks in {:.2?}: {reason}",
            stats.backtracks, stats.elapsed
        ),
        other => warn!(
            "Search aborted after {} steps, {} backtracks: {other}",
            stats.steps, stats.backtracks
        ),
    })?;

    if let Err(violation) = verify(&problem, &index, &schedule) {
        error!("Search produced an invalid timetable: {violation}");
        return Err(TimetableError::Internal(violation));
    }

    info!(
        "Solution found in {:.2?} ({} steps, {} backtracks, {} lessons)",
        start_time.elapsed(),
        stats.steps,
        stats.backtracks,
        schedule.lessons.len()
    );
    Ok(format::records(&problem, &index, &schedule))
}

/// Depth-first search over (class, slot) variables with conflict-directed
/// backjumping.
///
/// Variables are numbered class-major: variable `d` is class
/// `d / slots` at available slot position `d % slots`. Frames live in
/// `assigned`/`cursor` instead of the call stack so the budget and the
/// cancel flag can be checked between frames.
///
/// Every position keeps a perfect matching of all classes to distinct
/// staff in which each assigned class holds its assigned staff member. A
/// candidate is only accepted if the matching can be repaired around it,
/// so later classes at that position are always staffable.
pub struct Search<'a> {
    problem: &'a Problem,
    index: &'a ConstraintIndex,
    budget: Budget,
    cancel: &'a CancelFlag,
    started: Instant,
    slot_count: usize,
    staff_count: usize,
    class_count: usize,
    /// Classes the initial matching staffs at every position.
    coverable: usize,
    /// `busy[pos * staff_count + staff]`: staff already teaching at that position.
    busy: Vec<bool>,
    /// `owner[pos * staff_count + staff]`: class matched to that staff member.
    owner: Vec<Option<ClassId>>,
    /// `mate[pos * class_count + class]`: staff matched to that class.
    mate: Vec<Option<StaffId>>,
    assigned: Vec<Option<Candidate>>,
    /// Next candidate index to try per variable.
    cursor: Vec<usize>,
    /// Blame handed back to a variable by dead ends further down.
    conflicts: Vec<BTreeSet<usize>>,
    stats: SearchStats,
}

impl<'a> Search<'a> {
    pub fn new(
        problem: &'a Problem,
        index: &'a ConstraintIndex,
        budget: Budget,
        cancel: &'a CancelFlag,
    ) -> Self {
        let started = Instant::now();
        let slot_count = index.available_slots.len();
        let staff_count = problem.staff.len();
        let class_count = problem.classes.len();
        let variables = index.variable_count();

        let classes: Vec<ClassId> = (0..class_count).collect();
        let (owner, mate) = index.matching(&classes, &vec![false; staff_count]);
        let coverable = mate.iter().flatten().count();

        Search {
            problem,
            index,
            budget,
            cancel,
            started,
            slot_count,
            staff_count,
            class_count,
            coverable,
            busy: vec![false; slot_count * staff_count],
            owner: owner.repeat(slot_count),
            mate: mate.repeat(slot_count),
            assigned: vec![None; variables],
            cursor: vec![0; variables],
            conflicts: vec![BTreeSet::new(); variables],
            stats: SearchStats::default(),
        }
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            elapsed: self.started.elapsed(),
            ..self.stats
        }
    }

    pub fn run(&mut self) -> Result<Schedule, TimetableError> {
        self.started = Instant::now();
        self.check_budget()?;
        let total = self.index.variable_count();
        if total > 0 && self.coverable < self.class_count {
            return Err(TimetableError::Infeasible(Infeasibility::InsufficientStaff {
                classes: self.class_count,
                coverable: self.coverable,
            }));
        }

        let mut depth = 0;
        while depth < total {
            self.stats.steps += 1;
            if self.stats.steps % BUDGET_CHECK_INTERVAL == 0 {
                self.check_budget()?;
            }
            match self.next_candidate(depth) {
                Some(candidate) => {
                    self.commit(depth, candidate);
                    depth += 1;
                }
                None => {
                    depth = self.backjump(depth)?;
                    self.stats.backtracks += 1;
                    self.check_budget()?;
                }
            }
        }
        self.schedule()
    }

    /// Advances the variable's cursor to the next candidate that survives
    /// forward checking.
    fn next_candidate(&mut self, depth: usize) -> Option<Candidate> {
        let class = depth / self.slot_count;
        let pos = depth % self.slot_count;
        let index = self.index;
        let candidates = &index.class_candidates[class];

        for k in self.cursor[depth]..candidates.len() {
            let candidate = candidates[k];
            if self.is_busy(pos, candidate.staff) {
                continue;
            }
            if self.repeats_previous(depth, pos, candidate) {
                continue;
            }
            if !self.reserve(class, pos, candidate.staff) {
                trace!(
                    "Pruned staff {} for class {} at position {}",
                    candidate.staff, class, pos
                );
                continue;
            }
            self.cursor[depth] = k + 1;
            return Some(candidate);
        }
        self.cursor[depth] = candidates.len();
        None
    }

    fn repeats_previous(&self, depth: usize, pos: usize, candidate: Candidate) -> bool {
        self.problem.avoid_consecutive_repeats
            && pos > 0
            && self.index.adjacent_to_previous[pos]
            && self.assigned[depth - 1] == Some(candidate)
    }

    /// Moves `class` onto `staff` in the matching at `pos`, re-routing the
    /// unassigned class that held `staff`. Leaves the matching untouched and
    /// returns false when no re-routing exists.
    fn reserve(&mut self, class: ClassId, pos: usize, staff: StaffId) -> bool {
        let owners = pos * self.staff_count..(pos + 1) * self.staff_count;
        let mates = pos * self.class_count..(pos + 1) * self.class_count;
        let current = self.mate[mates.start + class];
        if current == Some(staff) {
            return true;
        }

        let displaced = self.owner[owners.start + staff];
        let saved = displaced.map(|_| {
            (
                self.owner[owners.clone()].to_vec(),
                self.mate[mates.clone()].to_vec(),
            )
        });
        if let Some(previous) = current {
            self.owner[owners.start + previous] = None;
        }
        self.owner[owners.start + staff] = Some(class);
        self.mate[mates.start + class] = Some(staff);

        let (Some(other), Some((owner, mate))) = (displaced, saved) else {
            return true;
        };
        self.mate[mates.start + other] = None;
        let mut visited = self.busy[owners.clone()].to_vec();
        visited[staff] = true;
        let index = self.index;
        let rerouted = index.augment(
            other,
            &mut self.owner[owners.clone()],
            &mut self.mate[mates.clone()],
            &mut visited,
        );
        if !rerouted {
            self.owner[owners].copy_from_slice(&owner);
            self.mate[mates].copy_from_slice(&mate);
        }
        rerouted
    }

    /// Earlier variables that rule out the candidates of the variable at
    /// `depth`, as things stand now.
    fn blame(&self, depth: usize) -> BTreeSet<usize> {
        let class = depth / self.slot_count;
        let pos = depth % self.slot_count;
        let same_position = |c: ClassId| c * self.slot_count + pos;
        let mut culprits = BTreeSet::new();
        let mut whole_position = false;

        for &candidate in &self.index.class_candidates[class] {
            if self.is_busy(pos, candidate.staff) {
                match self.owner[pos * self.staff_count + candidate.staff] {
                    Some(holder) => {
                        culprits.insert(same_position(holder));
                    }
                    None => whole_position = true,
                }
            } else if self.repeats_previous(depth, pos, candidate) {
                culprits.insert(depth - 1);
            } else {
                // Pruned by the matching, which depends on every earlier
                // class at this position.
                whole_position = true;
            }
        }
        if whole_position {
            culprits.extend((0..class).map(same_position));
        }
        culprits
    }

    /// Jumps back from the dead end at `depth` to the latest variable it
    /// blames, handing that variable the rest of the blame. Everything in
    /// between is reset.
    fn backjump(&mut self, depth: usize) -> Result<usize, TimetableError> {
        let mut blame = self.blame(depth);
        blame.append(&mut self.conflicts[depth]);
        let Some(target) = blame.pop_last() else {
            return Err(TimetableError::Infeasible(Infeasibility::Exhausted {
                repeat_rule: self.problem.avoid_consecutive_repeats,
            }));
        };

        self.cursor[depth] = 0;
        for var in (target + 1..depth).rev() {
            self.retract(var);
            self.cursor[var] = 0;
            self.conflicts[var].clear();
        }
        self.retract(target);
        self.conflicts[target].append(&mut blame);
        trace!("Dead end at variable {depth}, jumping back to {target}");
        Ok(target)
    }

    fn is_busy(&self, pos: usize, staff: StaffId) -> bool {
        self.busy[pos * self.staff_count + staff]
    }

    fn commit(&mut self, depth: usize, candidate: Candidate) {
        let pos = depth % self.slot_count;
        self.busy[pos * self.staff_count + candidate.staff] = true;
        self.assigned[depth] = Some(candidate);
    }

    /// Frees the variable's staff. The matching keeps the class on that
    /// staff member, which stays a valid perfect matching.
    fn retract(&mut self, depth: usize) {
        let pos = depth % self.slot_count;
        if let Some(candidate) = self.assigned[depth].take() {
            self.busy[pos * self.staff_count + candidate.staff] = false;
        }
    }

    fn check_budget(&self) -> Result<(), TimetableError> {
        if self.cancel.is_cancelled() {
            return Err(TimetableError::Cancelled);
        }
        let elapsed = self.started.elapsed();
        let out_of_time = self.budget.time_limit.is_some_and(|limit| elapsed >= limit);
        let out_of_backtracks = self
            .budget
            .max_backtracks
            .is_some_and(|max| self.stats.backtracks > max);
        if out_of_time || out_of_backtracks {
            return Err(TimetableError::Timeout {
                backtracks: self.stats.backtracks,
                elapsed,
            });
        }
        Ok(())
    }

    fn schedule(&self) -> Result<Schedule, TimetableError> {
        let lessons = self
            .assigned
            .iter()
            .enumerate()
            .map(|(depth, assigned)| {
                let candidate = assigned.ok_or_else(|| {
                    TimetableError::Internal(format!("variable {depth} left unassigned"))
                })?;
                Ok(Lesson {
                    class: depth / self.slot_count,
                    staff: candidate.staff,
                    subject: candidate.subject,
                    slot: self.index.available_slots[depth % self.slot_count],
                })
            })
            .collect::<Result<Vec<_>, TimetableError>>()?;
        Ok(Schedule { lessons })
    }
}

/// Re-checks a finished schedule against every hard constraint.
pub fn verify(
    problem: &Problem,
    index: &ConstraintIndex,
    schedule: &Schedule,
) -> Result<(), String> {
    let mut staff_slots = HashSet::new();
    let mut class_slots = HashSet::new();

    for lesson in &schedule.lessons {
        let class = &problem.classes[lesson.class].name;
        let staff = &problem.staff[lesson.staff].name;
        let slot = &problem.slots[lesson.slot].name;
        if index.is_blocked(lesson.slot) {
            return Err(format!("{class} is scheduled in break slot {slot}"));
        }
        if !index.is_qualified(lesson.staff, lesson.subject) {
            return Err(format!(
                "{staff} is not qualified for {}",
                problem.subject_name(lesson.subject)
            ));
        }
        if let Some(required) = &problem.classes[lesson.class].required_subjects {
            if !required.contains(&lesson.subject) {
                return Err(format!(
                    "{class} does not take {}",
                    problem.subject_name(lesson.subject)
                ));
            }
        }
        if !staff_slots.insert((lesson.staff, lesson.slot)) {
            return Err(format!("{staff} is double-booked in {slot}"));
        }
        if !class_slots.insert((lesson.class, lesson.slot)) {
            return Err(format!("{class} is double-booked in {slot}"));
        }
    }

    let expected = problem.classes.len() * index.available_slots.len();
    if class_slots.len() != expected {
        return Err(format!(
            "{} of {} class slots are covered",
            class_slots.len(),
            expected
        ));
    }

    if problem.avoid_consecutive_repeats {
        for pair in schedule.lessons.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let adjacent = index
                .available_slots
                .iter()
                .position(|&s| s == b.slot)
                .is_some_and(|pos| pos > 0 && index.adjacent_to_previous[pos]);
            if a.class == b.class
                && adjacent
                && a.staff == b.staff
                && a.subject == b.subject
            {
                return Err(format!(
                    "{} repeats {} with {} in adjacent slots",
                    problem.classes[a.class].name,
                    problem.subject_name(a.subject),
                    problem.staff[a.staff].name
                ));
            }
        }
    }

    Ok(())
}
