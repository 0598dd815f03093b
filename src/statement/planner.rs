//! Chooses how one execution is sent to the server.

use std::fmt;

/// Execution strategy for one call to `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Placeholders replaced by quoted literals, sent as a simple query.
    Literal,
    /// `$N` text plus parameters, executed without a named statement.
    Unnamed,
    /// Execute a named server-side prepared statement.
    Named,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Literal => "literal",
            Strategy::Unnamed => "unnamed",
            Strategy::Named => "named",
        })
    }
}

/// Everything the planner looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanInput {
    pub is_dml: bool,
    pub direct: bool,
    /// A placeholder is bound to `DEFAULT`.
    pub has_default: bool,
    /// A placeholder is bound to `CURRENT_TIMESTAMP`.
    pub has_current: bool,
    pub placeholder_count: usize,
    pub server_prepare: bool,
    pub switch_prepared: u32,
    /// 1-based count of executions, including this one.
    pub iteration: u32,
    /// An earlier server-side prepare of this statement failed.
    pub prepare_failed: bool,
}

/// Pick the strategy for one execution.
pub fn plan(input: &PlanInput) -> Strategy {
    if !input.is_dml
        || input.direct
        || input.has_default
        || input.has_current
        || input.placeholder_count == 0
        || !input.server_prepare
    {
        return Strategy::Literal;
    }
    if input.prepare_failed || below_switch_threshold(input.switch_prepared, input.iteration) {
        return Strategy::Unnamed;
    }
    Strategy::Named
}

/// Executions before `threshold` stay unnamed; 0 names from the start.
pub fn below_switch_threshold(threshold: u32, iteration: u32) -> bool {
    threshold > 0 && iteration < threshold
}
