//! Placeholder registry: what each distinct placeholder is bound to.
//!
//! One entry per distinct placeholder of a template, in order of first
//! appearance. Values are lowered to their text (or raw bytea) form at bind
//! time; the quoted literal is computed lazily and cached until the next bind.

use std::fmt;

use crate::error::BindError;
use crate::pg::{Format, Param};
use crate::sql::{Dialect, PlaceholderId, Template};
use crate::types::{self, array, Oid, SqlType, TypeContext, TypeInfo, TypeKind};
use crate::value::{BindValue, Value};

/// How a caller names a placeholder when binding.
///
/// Ordinals are 1-based and valid for every dialect: the n-th distinct
/// placeholder in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaceholderKey {
    Ordinal(usize),
    Named(String),
}

impl From<usize> for PlaceholderKey {
    fn from(n: usize) -> Self {
        PlaceholderKey::Ordinal(n)
    }
}

impl From<i32> for PlaceholderKey {
    fn from(n: i32) -> Self {
        PlaceholderKey::Ordinal(usize::try_from(n).unwrap_or(0))
    }
}

/// `":name"`, `"name"` and `"$2"` are all accepted.
impl From<&str> for PlaceholderKey {
    fn from(s: &str) -> Self {
        if let Some(digits) = s.strip_prefix('$') {
            if let Ok(n) = digits.parse::<usize>() {
                return PlaceholderKey::Ordinal(n);
            }
        }
        PlaceholderKey::Named(s.strip_prefix(':').unwrap_or(s).to_string())
    }
}

impl From<String> for PlaceholderKey {
    fn from(s: String) -> Self {
        PlaceholderKey::from(s.as_str())
    }
}

impl fmt::Display for PlaceholderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderKey::Ordinal(n) => write!(f, "${}", n),
            PlaceholderKey::Named(name) => write!(f, ":{}", name),
        }
    }
}

/// Type hint supplied with a bind. At most one of the two may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindType {
    pub sql_type: Option<SqlType>,
    pub pg_type: Option<Oid>,
}

impl BindType {
    pub fn sql(sql_type: SqlType) -> Self {
        Self {
            sql_type: Some(sql_type),
            pg_type: None,
        }
    }

    pub fn pg(oid: Oid) -> Self {
        Self {
            sql_type: None,
            pg_type: Some(oid),
        }
    }

    fn is_empty(&self) -> bool {
        self.sql_type.is_none() && self.pg_type.is_none()
    }

    fn resolve(&self) -> Result<Option<&'static TypeInfo>, BindError> {
        let oid = match (self.sql_type, self.pg_type) {
            (Some(_), Some(_)) => return Err(BindError::ConflictingTypeHints),
            (Some(sql), None) => sql.pg_oid(),
            (None, Some(oid)) => oid,
            (None, None) => return Ok(None),
        };
        types::lookup(oid)
            .map(Some)
            .ok_or(BindError::UnknownType(oid.as_i32()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bound {
    Unbound,
    Null,
    /// Text form of the value, or raw bytes for bytea.
    Raw {
        bytes: Vec<u8>,
        implied: Option<&'static TypeInfo>,
    },
    Default,
    CurrentTimestamp,
}

#[derive(Debug, Clone)]
struct Placeholder {
    id: PlaceholderId,
    bound: Bound,
    value: Option<Value>,
    explicit_type: Option<&'static TypeInfo>,
    server_type: Option<&'static TypeInfo>,
    inout: bool,
    /// `(standard_strings, literal)` from the last quoting.
    quoted: Option<(bool, String)>,
}

impl Placeholder {
    fn new(id: PlaceholderId) -> Self {
        Self {
            id,
            bound: Bound::Unbound,
            value: None,
            explicit_type: None,
            server_type: None,
            inout: false,
            quoted: None,
        }
    }

    fn label(&self) -> String {
        self.id.to_string()
    }

    /// Explicit type, then the type the server inferred, then whatever the
    /// bound value implies.
    fn effective_type(&self) -> Option<&'static TypeInfo> {
        self.explicit_type.or(self.server_type).or(match &self.bound {
            Bound::Raw { implied, .. } => *implied,
            _ => None,
        })
    }

    fn is_binary(&self) -> bool {
        self.effective_type().is_some_and(TypeInfo::is_binary)
    }
}

#[derive(Debug, Clone)]
pub struct PlaceholderRegistry {
    dialect: Option<Dialect>,
    entries: Vec<Placeholder>,
}

impl PlaceholderRegistry {
    pub fn new(template: &Template) -> Self {
        Self {
            dialect: template.dialect(),
            entries: template
                .placeholders()
                .iter()
                .cloned()
                .map(Placeholder::new)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of(&self, key: &PlaceholderKey) -> Result<usize, BindError> {
        if self.entries.is_empty() {
            return Err(BindError::NoPlaceholders);
        }
        match key {
            PlaceholderKey::Ordinal(n) if (1..=self.entries.len()).contains(n) => Ok(n - 1),
            PlaceholderKey::Named(name) if self.dialect == Some(Dialect::Named) => self
                .entries
                .iter()
                .position(|p| matches!(&p.id, PlaceholderId::Named(n) if n == name))
                .ok_or_else(|| BindError::UnknownPlaceholder(key.to_string())),
            _ => Err(BindError::UnknownPlaceholder(key.to_string())),
        }
    }

    /// Attach `value` to the placeholder named by `key`.
    ///
    /// Returns true when the explicit type changed, which invalidates any
    /// server-side prepared statement built from the old types.
    pub fn bind(
        &mut self,
        key: &PlaceholderKey,
        value: BindValue,
        hint: BindType,
    ) -> Result<bool, BindError> {
        let index = self.index_of(key)?;
        let hinted = hint.resolve()?;
        let entry = &self.entries[index];
        let explicit = if hint.is_empty() {
            entry.explicit_type
        } else {
            hinted
        };
        let label = entry.label();

        let (bound, value, inout) = match value {
            BindValue::Default => (Bound::Default, None, false),
            BindValue::CurrentTimestamp => (Bound::CurrentTimestamp, None, false),
            BindValue::InOut(v) => (lower(&v, explicit, &label)?, Some(v), true),
            BindValue::Value(v) => (lower(&v, explicit, &label)?, Some(v), false),
        };

        let entry = &mut self.entries[index];
        entry.bound = bound;
        entry.value = value;
        entry.inout |= inout;
        entry.quoted = None;
        let changed = entry.explicit_type != explicit;
        entry.explicit_type = explicit;
        Ok(changed)
    }

    /// Mark a placeholder so fetched rows overwrite its value.
    pub fn mark_inout(&mut self, key: &PlaceholderKey) -> Result<(), BindError> {
        let index = self.index_of(key)?;
        self.entries[index].inout = true;
        Ok(())
    }

    /// The value last bound (or mirrored back) for `key`.
    pub fn value(&self, key: &PlaceholderKey) -> Result<Option<&Value>, BindError> {
        let index = self.index_of(key)?;
        Ok(self.entries[index].value.as_ref())
    }

    /// Labels of placeholders that have never been bound.
    pub fn unbound(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|p| p.bound == Bound::Unbound)
            .map(Placeholder::label)
            .collect()
    }

    pub fn check_bound(&self) -> Result<(), BindError> {
        match self.unbound().into_iter().next() {
            Some(label) => Err(BindError::Unbound(label)),
            None => Ok(()),
        }
    }

    pub fn has_default(&self) -> bool {
        self.entries.iter().any(|p| p.bound == Bound::Default)
    }

    pub fn has_current(&self) -> bool {
        self.entries
            .iter()
            .any(|p| p.bound == Bound::CurrentTimestamp)
    }

    /// True when any parameter travels in binary format.
    pub fn has_binary(&self) -> bool {
        self.entries.iter().any(Placeholder::is_binary)
    }

    /// Types sent with a server-side prepare; unspecified lets the server infer.
    pub fn declared_types(&self) -> Vec<Oid> {
        self.entries
            .iter()
            .map(|p| {
                p.explicit_type
                    .map(|t| t.oid)
                    .or_else(|| p.is_binary().then_some(Oid::BYTEA))
                    .unwrap_or(Oid::UNSPECIFIED)
            })
            .collect()
    }

    /// Positional parameters for parameterized and prepared execution.
    pub fn params(&self) -> Vec<Param> {
        self.entries
            .iter()
            .map(|p| match &p.bound {
                Bound::Raw { bytes, .. } => Param {
                    value: Some(bytes.clone()),
                    format: if p.is_binary() {
                        Format::Binary
                    } else {
                        Format::Text
                    },
                    type_oid: p.explicit_type.map_or(Oid::UNSPECIFIED, |t| t.oid),
                },
                _ => Param::null(),
            })
            .collect()
    }

    /// SQL literal for every placeholder, in placeholder order.
    pub fn literals(&mut self, ctx: &TypeContext) -> Result<Vec<String>, BindError> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &mut self.entries {
            if let Some((standard, literal)) = &entry.quoted {
                if *standard == ctx.standard_strings {
                    out.push(literal.clone());
                    continue;
                }
            }
            let literal = match &entry.bound {
                Bound::Unbound => return Err(BindError::Unbound(entry.label())),
                Bound::Null => "NULL".to_string(),
                Bound::Default => "DEFAULT".to_string(),
                Bound::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
                Bound::Raw { bytes, .. } => {
                    let handler = entry
                        .effective_type()
                        .map_or(&types::TextHandler as &dyn types::TypeHandler, |t| {
                            t.handler()
                        });
                    handler
                        .quote(bytes, ctx)
                        .map_err(|reason| BindError::InvalidValue {
                            placeholder: entry.label(),
                            reason,
                        })?
                }
            };
            entry.quoted = Some((ctx.standard_strings, literal.clone()));
            out.push(literal);
        }
        Ok(out)
    }

    /// Record the parameter types the server inferred during prepare.
    pub fn absorb_server_types(&mut self, oids: &[Oid]) {
        for (entry, oid) in self.entries.iter_mut().zip(oids) {
            entry.server_type = types::lookup(*oid);
        }
    }

    /// Copy result columns into inout placeholders. Each takes the column
    /// at its own position: the n-th distinct placeholder reads column n.
    pub fn mirror_inout(&mut self, row: &[Value]) {
        for (entry, value) in self.entries.iter_mut().zip(row) {
            if !entry.inout {
                continue;
            }
            let label = entry.label();
            if let Ok(bound) = lower(value, entry.explicit_type, &label) {
                entry.bound = bound;
                entry.quoted = None;
            }
            entry.value = Some(value.clone());
        }
    }

    pub fn has_inout(&self) -> bool {
        self.entries.iter().any(|p| p.inout)
    }
}

/// Lower a caller value into the text (or bytea) form sent to the server.
pub(crate) fn lower(
    value: &Value,
    explicit: Option<&'static TypeInfo>,
    label: &str,
) -> Result<Bound, BindError> {
    let is_json = explicit.is_some_and(|t| t.kind == TypeKind::Json);
    let raw = |bytes: Vec<u8>, implied: Option<Oid>| Bound::Raw {
        bytes,
        implied: implied.and_then(types::lookup),
    };
    Ok(match value {
        Value::Null => Bound::Null,
        Value::Bool(b) => raw(if *b { b"t".to_vec() } else { b"f".to_vec() }, Some(Oid::BOOL)),
        Value::Int(n) => raw(n.to_string().into_bytes(), Some(Oid::INT8)),
        Value::Float(v) => raw(float_text(*v).into_bytes(), Some(Oid::FLOAT8)),
        Value::Text(s) => raw(s.clone().into_bytes(), None),
        Value::Bytes(b) => raw(b.clone(), Some(Oid::BYTEA)),
        Value::Array(items) => {
            let delimiter = explicit.map_or(b',', |t| t.delimiter);
            raw(array::stringify(items, delimiter).into_bytes(), None)
        }
        Value::Json(json) if is_json => raw(json.to_string().into_bytes(), None),
        Value::Json(serde_json::Value::Object(_)) | Value::Json(serde_json::Value::Array(_)) => {
            return Err(BindError::NonScalar(label.to_string()))
        }
        Value::Json(serde_json::Value::Null) => Bound::Null,
        Value::Json(serde_json::Value::Bool(b)) => return lower(&Value::Bool(*b), explicit, label),
        Value::Json(serde_json::Value::String(s)) => raw(s.clone().into_bytes(), None),
        Value::Json(serde_json::Value::Number(n)) => raw(n.to_string().into_bytes(), None),
    })
}

fn float_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        let text = if v > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else {
        v.to_string()
    }
}
