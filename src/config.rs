use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::model::{DEFAULT_MAX_VARIABLES, ProblemOptions};
use crate::solver::{Budget, SolveSettings};

/// Timetable generation service.
#[derive(Debug, Clone, Parser)]
#[command(name = "timetable_solver")]
#[command(about = "Generates conflict-free weekly class timetables over HTTP")]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "TIMETABLE_BIND", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// Wall-clock limit per request in milliseconds (0 disables it)
    #[arg(long, env = "TIMETABLE_TIME_LIMIT_MS", default_value_t = 10_000)]
    pub time_limit_ms: u64,

    /// Backtrack limit per request (0 disables it)
    #[arg(long, env = "TIMETABLE_MAX_BACKTRACKS", default_value_t = 5_000_000)]
    pub max_backtracks: u64,

    /// Largest accepted classes x slots (and staff x slots) per request
    /// (0 disables it)
    #[arg(long, env = "TIMETABLE_MAX_VARIABLES", default_value_t = DEFAULT_MAX_VARIABLES)]
    pub max_variables: usize,

    /// Forbid the same staff and subject teaching a class in adjacent slots
    /// unless the request decides otherwise
    #[arg(long, env = "TIMETABLE_AVOID_CONSECUTIVE_REPEATS")]
    pub avoid_consecutive_repeats: bool,
}

impl Config {
    pub fn solve_settings(&self) -> SolveSettings {
        SolveSettings {
            budget: Budget {
                time_limit: (self.time_limit_ms > 0)
                    .then(|| Duration::from_millis(self.time_limit_ms)),
                max_backtracks: (self.max_backtracks > 0).then_some(self.max_backtracks),
            },
            problem: ProblemOptions {
                max_variables: match self.max_variables {
                    0 => usize::MAX,
                    limit => limit,
                },
                avoid_consecutive_repeats: self.avoid_consecutive_repeats,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["timetable_solver"]).unwrap();
        assert_eq!(config.bind.port(), 5000);
        let settings = config.solve_settings();
        assert_eq!(settings.budget.time_limit, Some(Duration::from_secs(10)));
        assert_eq!(settings.budget.max_backtracks, Some(5_000_000));
        assert_eq!(settings.problem, ProblemOptions::default());
    }

    #[test]
    fn test_zero_disables_limits() {
        let config = Config::try_parse_from([
            "timetable_solver",
            "--time-limit-ms",
            "0",
            "--max-backtracks",
            "0",
            "--max-variables",
            "0",
            "--avoid-consecutive-repeats",
        ])
        .unwrap();
        let settings = config.solve_settings();
        assert_eq!(settings.budget.time_limit, None);
        assert_eq!(settings.budget.max_backtracks, None);
        assert_eq!(settings.problem.max_variables, usize::MAX);
        assert!(settings.problem.avoid_consecutive_repeats);
    }

    #[test]
    fn test_max_variables_flag() {
        let config =
            Config::try_parse_from(["timetable_solver", "--max-variables", "1200"]).unwrap();
        assert_eq!(config.solve_settings().problem.max_variables, 1_200);
    }
}
