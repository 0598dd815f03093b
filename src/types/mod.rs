//! Type metadata and per-type literal conversion.
//!
//! Every result column and typed placeholder resolves to a static
//! `TypeInfo`. Conversion is delegated to one of a closed set of
//! `TypeHandler` implementations selected by `TypeKind`:
//! - `quote` renders a bound value as an SQL literal for the literal strategy
//! - `dequote` converts a text-format result value into a `Value`
//!
//! Reference: https://www.postgresql.org/docs/current/datatype.html

pub mod array;

use std::fmt::Write as _;

use crate::value::Value;

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Oid(pub i32);

impl Oid {
    /// Lets the server infer the parameter type.
    pub const UNSPECIFIED: Oid = Oid(0);

    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const OID_TYPE: Oid = Oid(26);
    pub const JSON: Oid = Oid(114);
    pub const XML: Oid = Oid(142);
    pub const POINT: Oid = Oid(600);
    pub const BOX: Oid = Oid(603);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    pub const UNKNOWN: Oid = Oid(705);
    pub const MONEY: Oid = Oid(790);
    pub const INET: Oid = Oid(869);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const INTERVAL: Oid = Oid(1186);
    pub const TIMETZ: Oid = Oid(1266);
    pub const NUMERIC: Oid = Oid(1700);
    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);

    // Array types
    pub const JSON_ARRAY: Oid = Oid(199);
    pub const BOOL_ARRAY: Oid = Oid(1000);
    pub const BYTEA_ARRAY: Oid = Oid(1001);
    pub const INT2_ARRAY: Oid = Oid(1005);
    pub const INT4_ARRAY: Oid = Oid(1007);
    pub const TEXT_ARRAY: Oid = Oid(1009);
    pub const BPCHAR_ARRAY: Oid = Oid(1014);
    pub const VARCHAR_ARRAY: Oid = Oid(1015);
    pub const INT8_ARRAY: Oid = Oid(1016);
    pub const BOX_ARRAY: Oid = Oid(1020);
    pub const FLOAT4_ARRAY: Oid = Oid(1021);
    pub const FLOAT8_ARRAY: Oid = Oid(1022);
    pub const TIMESTAMP_ARRAY: Oid = Oid(1115);
    pub const DATE_ARRAY: Oid = Oid(1182);
    pub const TIMESTAMPTZ_ARRAY: Oid = Oid(1185);
    pub const NUMERIC_ARRAY: Oid = Oid(1231);
    pub const UUID_ARRAY: Oid = Oid(2951);
    pub const JSONB_ARRAY: Oid = Oid(3807);

    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn is_unspecified(self) -> bool {
        self.0 == 0
    }
}

// ============================================================================
// Type metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Bool,
    Int,
    Float,
    Numeric,
    Text,
    /// Blank-padded `character(n)`.
    Bpchar,
    Bytea,
    Json,
    DateTime,
    Uuid,
    Array,
    Other,
}

#[derive(Debug, PartialEq, Eq)]
pub struct TypeInfo {
    pub oid: Oid,
    pub name: &'static str,
    pub kind: TypeKind,
    /// Element type for arrays.
    pub array_element: Option<Oid>,
    /// Array element delimiter; `;` for box, `,` for everything else.
    pub delimiter: u8,
}

impl TypeInfo {
    const fn scalar(oid: Oid, name: &'static str, kind: TypeKind) -> Self {
        Self {
            oid,
            name,
            kind,
            array_element: None,
            delimiter: b',',
        }
    }

    const fn array(oid: Oid, name: &'static str, element: Oid) -> Self {
        Self {
            oid,
            name,
            kind: TypeKind::Array,
            array_element: Some(element),
            delimiter: b',',
        }
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.array_element.is_some()
    }

    #[inline]
    pub fn is_binary(&self) -> bool {
        self.kind == TypeKind::Bytea
    }

    /// Conversion routines for this type.
    pub fn handler(&self) -> &'static dyn TypeHandler {
        match self.kind {
            TypeKind::Bool => &BoolHandler,
            TypeKind::Int => &IntHandler,
            TypeKind::Float => &FloatHandler,
            TypeKind::Numeric => &NumericHandler,
            TypeKind::Bpchar => &BpcharHandler,
            TypeKind::Bytea => &ByteaHandler,
            TypeKind::Json => &JsonHandler,
            TypeKind::Array => &ArrayHandler,
            TypeKind::Text | TypeKind::DateTime | TypeKind::Uuid | TypeKind::Other => {
                &TextHandler
            }
        }
    }
}

static TYPES: &[TypeInfo] = &[
    TypeInfo::scalar(Oid::BOOL, "bool", TypeKind::Bool),
    TypeInfo::scalar(Oid::BYTEA, "bytea", TypeKind::Bytea),
    TypeInfo::scalar(Oid::CHAR, "char", TypeKind::Text),
    TypeInfo::scalar(Oid::NAME, "name", TypeKind::Text),
    TypeInfo::scalar(Oid::INT8, "int8", TypeKind::Int),
    TypeInfo::scalar(Oid::INT2, "int2", TypeKind::Int),
    TypeInfo::scalar(Oid::INT4, "int4", TypeKind::Int),
    TypeInfo::scalar(Oid::TEXT, "text", TypeKind::Text),
    TypeInfo::scalar(Oid::OID_TYPE, "oid", TypeKind::Int),
    TypeInfo::scalar(Oid::JSON, "json", TypeKind::Json),
    TypeInfo::scalar(Oid::XML, "xml", TypeKind::Text),
    TypeInfo::scalar(Oid::POINT, "point", TypeKind::Other),
    TypeInfo::scalar(Oid::BOX, "box", TypeKind::Other),
    TypeInfo::scalar(Oid::FLOAT4, "float4", TypeKind::Float),
    TypeInfo::scalar(Oid::FLOAT8, "float8", TypeKind::Float),
    TypeInfo::scalar(Oid::UNKNOWN, "unknown", TypeKind::Text),
    TypeInfo::scalar(Oid::MONEY, "money", TypeKind::Other),
    TypeInfo::scalar(Oid::INET, "inet", TypeKind::Other),
    TypeInfo::scalar(Oid::BPCHAR, "bpchar", TypeKind::Bpchar),
    TypeInfo::scalar(Oid::VARCHAR, "varchar", TypeKind::Text),
    TypeInfo::scalar(Oid::DATE, "date", TypeKind::DateTime),
    TypeInfo::scalar(Oid::TIME, "time", TypeKind::DateTime),
    TypeInfo::scalar(Oid::TIMESTAMP, "timestamp", TypeKind::DateTime),
    TypeInfo::scalar(Oid::TIMESTAMPTZ, "timestamptz", TypeKind::DateTime),
    TypeInfo::scalar(Oid::INTERVAL, "interval", TypeKind::DateTime),
    TypeInfo::scalar(Oid::TIMETZ, "timetz", TypeKind::DateTime),
    TypeInfo::scalar(Oid::NUMERIC, "numeric", TypeKind::Numeric),
    TypeInfo::scalar(Oid::UUID, "uuid", TypeKind::Uuid),
    TypeInfo::scalar(Oid::JSONB, "jsonb", TypeKind::Json),
    TypeInfo::array(Oid::JSON_ARRAY, "_json", Oid::JSON),
    TypeInfo::array(Oid::BOOL_ARRAY, "_bool", Oid::BOOL),
    TypeInfo::array(Oid::BYTEA_ARRAY, "_bytea", Oid::BYTEA),
    TypeInfo::array(Oid::INT2_ARRAY, "_int2", Oid::INT2),
    TypeInfo::array(Oid::INT4_ARRAY, "_int4", Oid::INT4),
    TypeInfo::array(Oid::TEXT_ARRAY, "_text", Oid::TEXT),
    TypeInfo::array(Oid::BPCHAR_ARRAY, "_bpchar", Oid::BPCHAR),
    TypeInfo::array(Oid::VARCHAR_ARRAY, "_varchar", Oid::VARCHAR),
    TypeInfo::array(Oid::INT8_ARRAY, "_int8", Oid::INT8),
    TypeInfo {
        oid: Oid::BOX_ARRAY,
        name: "_box",
        kind: TypeKind::Array,
        array_element: Some(Oid::BOX),
        delimiter: b';',
    },
    TypeInfo::array(Oid::FLOAT4_ARRAY, "_float4", Oid::FLOAT4),
    TypeInfo::array(Oid::FLOAT8_ARRAY, "_float8", Oid::FLOAT8),
    TypeInfo::array(Oid::TIMESTAMP_ARRAY, "_timestamp", Oid::TIMESTAMP),
    TypeInfo::array(Oid::DATE_ARRAY, "_date", Oid::DATE),
    TypeInfo::array(Oid::TIMESTAMPTZ_ARRAY, "_timestamptz", Oid::TIMESTAMPTZ),
    TypeInfo::array(Oid::NUMERIC_ARRAY, "_numeric", Oid::NUMERIC),
    TypeInfo::array(Oid::UUID_ARRAY, "_uuid", Oid::UUID),
    TypeInfo::array(Oid::JSONB_ARRAY, "_jsonb", Oid::JSONB),
];

/// Metadata for a known type OID.
pub fn lookup(oid: Oid) -> Option<&'static TypeInfo> {
    TYPES.iter().find(|t| t.oid == oid)
}

/// Metadata for a type name as PostgreSQL spells it (`int4`, `_text`, ...).
pub fn lookup_name(name: &str) -> Option<&'static TypeInfo> {
    TYPES.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Generic SQL type codes a caller may use instead of a native OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Char,
    Varchar,
    LongVarchar,
    Smallint,
    Integer,
    Bigint,
    Real,
    Double,
    Numeric,
    Decimal,
    Boolean,
    Date,
    Time,
    Timestamp,
    Binary,
    Varbinary,
    Blob,
}

impl SqlType {
    /// The native type an SQL type code maps to.
    pub fn pg_oid(self) -> Oid {
        match self {
            SqlType::Char => Oid::BPCHAR,
            SqlType::Varchar => Oid::VARCHAR,
            SqlType::LongVarchar => Oid::TEXT,
            SqlType::Smallint => Oid::INT2,
            SqlType::Integer => Oid::INT4,
            SqlType::Bigint => Oid::INT8,
            SqlType::Real => Oid::FLOAT4,
            SqlType::Double => Oid::FLOAT8,
            SqlType::Numeric | SqlType::Decimal => Oid::NUMERIC,
            SqlType::Boolean => Oid::BOOL,
            SqlType::Date => Oid::DATE,
            SqlType::Time => Oid::TIME,
            SqlType::Timestamp => Oid::TIMESTAMP,
            SqlType::Binary | SqlType::Varbinary | SqlType::Blob => Oid::BYTEA,
        }
    }
}

// ============================================================================
// Type handlers
// ============================================================================

/// Session settings that affect conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeContext {
    pub standard_strings: bool,
    pub bool_as_text: bool,
    pub chop_blanks: bool,
    pub expand_array: bool,
}

impl Default for TypeContext {
    fn default() -> Self {
        Self {
            standard_strings: true,
            bool_as_text: false,
            chop_blanks: false,
            expand_array: true,
        }
    }
}

/// Literal rendering and result conversion for one family of types.
pub trait TypeHandler: Sync {
    /// Render `raw` (the bound text, or bytes for bytea) as an SQL literal.
    fn quote(&self, raw: &[u8], ctx: &TypeContext) -> Result<String, String>;

    /// Convert a text-format result value.
    fn dequote(&self, raw: &[u8], info: &TypeInfo, ctx: &TypeContext) -> Value;
}

fn utf8(raw: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(raw).map_err(|e| format!("invalid UTF-8: {}", e))
}

fn lossy(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Quote `s` as a string literal.
///
/// With `standard_conforming_strings` off, backslashes are escapes inside
/// plain literals, so any backslash switches to the `E''` form.
pub fn quote_string(s: &str, standard_strings: bool) -> Result<String, String> {
    if s.contains('\0') {
        return Err("string contains a NUL byte".to_string());
    }
    let escape_backslashes = !standard_strings && s.contains('\\');
    let mut out = String::with_capacity(s.len() + 3);
    if escape_backslashes {
        out.push('E');
    }
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if escape_backslashes => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    Ok(out)
}

/// Quote an identifier (savepoint names and the like).
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for c in name.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

pub struct TextHandler;

impl TypeHandler for TextHandler {
    fn quote(&self, raw: &[u8], ctx: &TypeContext) -> Result<String, String> {
        quote_string(utf8(raw)?, ctx.standard_strings)
    }

    fn dequote(&self, raw: &[u8], _info: &TypeInfo, _ctx: &TypeContext) -> Value {
        Value::Text(lossy(raw))
    }
}

pub struct BpcharHandler;

impl TypeHandler for BpcharHandler {
    fn quote(&self, raw: &[u8], ctx: &TypeContext) -> Result<String, String> {
        quote_string(utf8(raw)?, ctx.standard_strings)
    }

    fn dequote(&self, raw: &[u8], _info: &TypeInfo, ctx: &TypeContext) -> Value {
        let text = lossy(raw);
        if ctx.chop_blanks {
            Value::Text(text.trim_end_matches(' ').to_string())
        } else {
            Value::Text(text)
        }
    }
}

pub struct BoolHandler;

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "on" | "y" | "yes" => Some(true),
        "f" | "false" | "0" | "off" | "n" | "no" => Some(false),
        _ => None,
    }
}

impl TypeHandler for BoolHandler {
    fn quote(&self, raw: &[u8], _ctx: &TypeContext) -> Result<String, String> {
        let text = utf8(raw)?;
        match parse_bool(text) {
            Some(true) => Ok("TRUE".to_string()),
            Some(false) => Ok("FALSE".to_string()),
            None => Err(format!("\"{}\" is not a boolean", text)),
        }
    }

    fn dequote(&self, raw: &[u8], _info: &TypeInfo, ctx: &TypeContext) -> Value {
        let text = lossy(raw);
        if ctx.bool_as_text {
            return Value::Text(text);
        }
        match text.as_str() {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            _ => Value::Text(text),
        }
    }
}

pub struct IntHandler;

impl TypeHandler for IntHandler {
    fn quote(&self, raw: &[u8], _ctx: &TypeContext) -> Result<String, String> {
        let text = utf8(raw)?.trim();
        text.parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| format!("\"{}\" is not an integer", text))
    }

    fn dequote(&self, raw: &[u8], _info: &TypeInfo, _ctx: &TypeContext) -> Value {
        let text = lossy(raw);
        match text.parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) => Value::Text(text),
        }
    }
}

pub struct FloatHandler;

impl TypeHandler for FloatHandler {
    fn quote(&self, raw: &[u8], _ctx: &TypeContext) -> Result<String, String> {
        let text = utf8(raw)?.trim();
        match text.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(text.to_string()),
            Ok(v) if v.is_nan() => Ok("'NaN'".to_string()),
            Ok(v) if v > 0.0 => Ok("'Infinity'".to_string()),
            Ok(_) => Ok("'-Infinity'".to_string()),
            Err(_) => Err(format!("\"{}\" is not a number", text)),
        }
    }

    fn dequote(&self, raw: &[u8], _info: &TypeInfo, _ctx: &TypeContext) -> Value {
        let text = lossy(raw);
        match text.parse::<f64>() {
            Ok(v) => Value::Float(v),
            Err(_) => Value::Text(text),
        }
    }
}

/// Numeric keeps its exact decimal text on the way out.
pub struct NumericHandler;

impl TypeHandler for NumericHandler {
    fn quote(&self, raw: &[u8], _ctx: &TypeContext) -> Result<String, String> {
        let text = utf8(raw)?.trim();
        if text.eq_ignore_ascii_case("nan") {
            return Ok("'NaN'".to_string());
        }
        let well_formed = text.bytes().any(|c| c.is_ascii_digit())
            && text
                .bytes()
                .all(|c| c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-'))
            && text.parse::<f64>().is_ok();
        if well_formed {
            Ok(text.to_string())
        } else {
            Err(format!("\"{}\" is not a numeric value", text))
        }
    }

    fn dequote(&self, raw: &[u8], _info: &TypeInfo, _ctx: &TypeContext) -> Value {
        Value::Text(lossy(raw))
    }
}

pub struct ByteaHandler;

pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Decode bytea output in either hex (`\x0102`) or escape format.
pub(crate) fn decode_bytea_text(text: &[u8]) -> Option<Vec<u8>> {
    if let Some(hex) = text.strip_prefix(b"\\x") {
        if hex.len() % 2 != 0 {
            return None;
        }
        return hex
            .chunks(2)
            .map(|pair| {
                let s = std::str::from_utf8(pair).ok()?;
                u8::from_str_radix(s, 16).ok()
            })
            .collect();
    }

    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'\\' if text.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            b'\\' => {
                let octal = text.get(i + 1..i + 4)?;
                let s = std::str::from_utf8(octal).ok()?;
                out.push(u8::from_str_radix(s, 8).ok()?);
                i += 4;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(out)
}

impl TypeHandler for ByteaHandler {
    fn quote(&self, raw: &[u8], ctx: &TypeContext) -> Result<String, String> {
        let hex = encode_hex(raw);
        if ctx.standard_strings {
            Ok(format!("'\\x{}'", hex))
        } else {
            Ok(format!("E'\\\\x{}'", hex))
        }
    }

    fn dequote(&self, raw: &[u8], _info: &TypeInfo, _ctx: &TypeContext) -> Value {
        match decode_bytea_text(raw) {
            Some(bytes) => Value::Bytes(bytes),
            None => Value::Text(lossy(raw)),
        }
    }
}

pub struct JsonHandler;

impl TypeHandler for JsonHandler {
    fn quote(&self, raw: &[u8], ctx: &TypeContext) -> Result<String, String> {
        quote_string(utf8(raw)?, ctx.standard_strings)
    }

    fn dequote(&self, raw: &[u8], _info: &TypeInfo, _ctx: &TypeContext) -> Value {
        match serde_json::from_slice(raw) {
            Ok(json) => Value::Json(json),
            Err(_) => Value::Text(lossy(raw)),
        }
    }
}

/// Arrays travel as their `{...}` text form.
pub struct ArrayHandler;

impl TypeHandler for ArrayHandler {
    fn quote(&self, raw: &[u8], ctx: &TypeContext) -> Result<String, String> {
        quote_string(utf8(raw)?, ctx.standard_strings)
    }

    fn dequote(&self, raw: &[u8], info: &TypeInfo, ctx: &TypeContext) -> Value {
        let text = lossy(raw);
        if !ctx.expand_array {
            return Value::Text(text);
        }
        let element = info.array_element.and_then(lookup);
        let convert = |item: &str| match element {
            Some(elem) => elem.handler().dequote(item.as_bytes(), elem, ctx),
            None => Value::Text(item.to_string()),
        };
        match array::destringify(&text, info.delimiter, convert) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("could not expand {} value: {}", info.name, e);
                Value::Text(text)
            }
        }
    }
}

/// Convert one text-format result cell; unknown OIDs come back as text.
pub fn dequote(oid: Oid, raw: &[u8], ctx: &TypeContext) -> Value {
    match lookup(oid) {
        Some(info) => info.handler().dequote(raw, info, ctx),
        None => Value::Text(lossy(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TypeContext {
        TypeContext::default()
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(Oid::INT4).map(|t| t.name), Some("int4"));
        assert_eq!(lookup(Oid(999_999)), None);
        assert_eq!(lookup_name("_TEXT").map(|t| t.oid), Some(Oid::TEXT_ARRAY));
        assert!(lookup(Oid::INT4_ARRAY).unwrap().is_array());
        assert_eq!(lookup(Oid::BOX_ARRAY).unwrap().delimiter, b';');
        assert!(lookup(Oid::BYTEA).unwrap().is_binary());
    }

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(SqlType::Integer.pg_oid(), Oid::INT4);
        assert_eq!(SqlType::Blob.pg_oid(), Oid::BYTEA);
        assert_eq!(SqlType::Char.pg_oid(), Oid::BPCHAR);
    }

    #[test]
    fn test_quote_string_forms() {
        assert_eq!(quote_string("it's", true).unwrap(), "'it''s'");
        assert_eq!(quote_string("a\\b", true).unwrap(), "'a\\b'");
        assert_eq!(quote_string("a\\b", false).unwrap(), "E'a\\\\b'");
        assert!(quote_string("nul\0", true).is_err());
        assert_eq!(quote_ident("sp\"1"), "\"sp\"\"1\"");
    }

    #[test]
    fn test_scalar_quoting() {
        let int = lookup(Oid::INT4).unwrap().handler();
        assert_eq!(int.quote(b" 42 ", &ctx()).unwrap(), "42");
        assert!(int.quote(b"1; DROP TABLE t", &ctx()).is_err());

        let float = lookup(Oid::FLOAT8).unwrap().handler();
        assert_eq!(float.quote(b"1.5e3", &ctx()).unwrap(), "1.5e3");
        assert_eq!(float.quote(b"NaN", &ctx()).unwrap(), "'NaN'");

        let boolean = lookup(Oid::BOOL).unwrap().handler();
        assert_eq!(boolean.quote(b"t", &ctx()).unwrap(), "TRUE");
        assert_eq!(boolean.quote(b"0", &ctx()).unwrap(), "FALSE");

        let numeric = lookup(Oid::NUMERIC).unwrap().handler();
        assert_eq!(numeric.quote(b"-12.50", &ctx()).unwrap(), "-12.50");
        assert!(numeric.quote(b"12 OR 1=1", &ctx()).is_err());
    }

    #[test]
    fn test_bytea_quote_and_dequote() {
        let bytea = lookup(Oid::BYTEA).unwrap();
        assert_eq!(bytea.handler().quote(&[0, 0xff], &ctx()).unwrap(), "'\\x00ff'");
        assert_eq!(
            bytea.handler().dequote(b"\\x00ff", bytea, &ctx()),
            Value::Bytes(vec![0, 0xff])
        );
        assert_eq!(
            bytea.handler().dequote(b"a\\\\b\\001", bytea, &ctx()),
            Value::Bytes(vec![b'a', b'\\', b'b', 1])
        );
    }

    #[test]
    fn test_dequote_options() {
        assert_eq!(dequote(Oid::BOOL, b"t", &ctx()), Value::Bool(true));
        let as_text = TypeContext {
            bool_as_text: true,
            ..ctx()
        };
        assert_eq!(dequote(Oid::BOOL, b"f", &as_text), Value::Text("f".to_string()));

        let chop = TypeContext {
            chop_blanks: true,
            ..ctx()
        };
        assert_eq!(dequote(Oid::BPCHAR, b"ab   ", &chop), Value::Text("ab".to_string()));
        assert_eq!(dequote(Oid::BPCHAR, b"ab   ", &ctx()), Value::Text("ab   ".to_string()));
        // varchar is never chopped
        assert_eq!(dequote(Oid::VARCHAR, b"ab  ", &chop), Value::Text("ab  ".to_string()));
    }

    #[test]
    fn test_dequote_numbers_and_json() {
        assert_eq!(dequote(Oid::INT8, b"-7", &ctx()), Value::Int(-7));
        assert_eq!(dequote(Oid::FLOAT8, b"2.5", &ctx()), Value::Float(2.5));
        assert_eq!(
            dequote(Oid::NUMERIC, b"3.14159265358979", &ctx()),
            Value::Text("3.14159265358979".to_string())
        );
        assert_eq!(
            dequote(Oid::JSONB, br#"{"a": 1}"#, &ctx()),
            Value::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(dequote(Oid(424_242), b"x", &ctx()), Value::Text("x".to_string()));
    }

    #[test]
    fn test_dequote_arrays() {
        assert_eq!(
            dequote(Oid::INT4_ARRAY, b"{1,2,NULL}", &ctx()),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Null])
        );
        let flat = TypeContext {
            expand_array: false,
            ..ctx()
        };
        assert_eq!(
            dequote(Oid::INT4_ARRAY, b"{1,2}", &flat),
            Value::Text("{1,2}".to_string())
        );
    }
}
