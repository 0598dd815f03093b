//! Driver and statement configuration.
//!
//! `DriverOptions` holds connection-wide defaults; `StatementOptions`
//! overrides a subset of them for one prepared statement. Both can be
//! built fluently or deserialized from JSON.

use serde::Deserialize;

use crate::error::{DriverError, Result};

/// How a new command treats an asynchronous query still pending on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OldQueryPolicy {
    /// Wait for the pending query and discard its result set.
    Wait,
    /// Ask the server to cancel the pending query.
    Cancel,
}

/// Connection-wide driver options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Commit after every statement (no implicit BEGIN).
    pub autocommit: bool,
    /// Issue `SET TRANSACTION READ ONLY` after every implicit BEGIN.
    pub read_only: bool,
    /// Allow server-side prepared statements.
    pub server_prepare: bool,
    /// Execution count at which a statement switches to a named
    /// server-side prepare. 0 prepares on first execution.
    pub switch_prepared: u32,
    /// Return booleans as `'t'`/`'f'` text instead of native booleans.
    pub bool_as_text: bool,
    /// Trim trailing blanks from fixed-width character columns.
    pub chop_blanks: bool,
    /// Convert array columns into `Value::Array`.
    pub expand_array: bool,
    /// A backslash before `?`, `:` or `$` makes it literal text.
    pub escape_placeholders: bool,
    /// Only `$N` placeholders are recognized.
    pub dollar_only: bool,
    /// `:name` placeholders are not recognized.
    pub no_colons: bool,
    /// Capacity of the parsed-template cache used by `prepare_cached`.
    pub template_cache_capacity: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            autocommit: true,
            read_only: false,
            server_prepare: true,
            switch_prepared: 2,
            bool_as_text: false,
            chop_blanks: false,
            expand_array: true,
            escape_placeholders: true,
            dollar_only: false,
            no_colons: false,
            template_cache_capacity: 100,
        }
    }
}

impl DriverOptions {
    /// Load options from a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DriverError::Config(e.to_string()))
    }

    pub fn autocommit(mut self, on: bool) -> Self {
        self.autocommit = on;
        self
    }

    pub fn read_only(mut self, on: bool) -> Self {
        self.read_only = on;
        self
    }

    pub fn server_prepare(mut self, on: bool) -> Self {
        self.server_prepare = on;
        self
    }

    pub fn switch_prepared(mut self, threshold: u32) -> Self {
        self.switch_prepared = threshold;
        self
    }

    pub fn bool_as_text(mut self, on: bool) -> Self {
        self.bool_as_text = on;
        self
    }

    pub fn chop_blanks(mut self, on: bool) -> Self {
        self.chop_blanks = on;
        self
    }

    pub fn expand_array(mut self, on: bool) -> Self {
        self.expand_array = on;
        self
    }

    pub fn escape_placeholders(mut self, on: bool) -> Self {
        self.escape_placeholders = on;
        self
    }

    pub fn dollar_only(mut self, on: bool) -> Self {
        self.dollar_only = on;
        self
    }

    pub fn no_colons(mut self, on: bool) -> Self {
        self.no_colons = on;
        self
    }

    pub fn template_cache_capacity(mut self, capacity: usize) -> Self {
        self.template_cache_capacity = capacity;
        self
    }
}

/// Per-statement overrides. `None` falls back to the connection's options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatementOptions {
    pub server_prepare: Option<bool>,
    pub switch_prepared: Option<u32>,
    /// Send the text as-is: no placeholder parsing, literal execution only.
    pub direct: bool,
    pub dollar_only: Option<bool>,
    pub no_colons: Option<bool>,
    pub old_query: Option<OldQueryPolicy>,
}

impl StatementOptions {
    pub fn server_prepare(mut self, on: bool) -> Self {
        self.server_prepare = Some(on);
        self
    }

    pub fn switch_prepared(mut self, threshold: u32) -> Self {
        self.switch_prepared = Some(threshold);
        self
    }

    pub fn direct(mut self, on: bool) -> Self {
        self.direct = on;
        self
    }

    pub fn dollar_only(mut self, on: bool) -> Self {
        self.dollar_only = Some(on);
        self
    }

    pub fn no_colons(mut self, on: bool) -> Self {
        self.no_colons = Some(on);
        self
    }

    pub fn old_query(mut self, policy: OldQueryPolicy) -> Self {
        self.old_query = Some(policy);
        self
    }
}
