//! PostgreSQL array text form: `{1,2,"a b",NULL,{3,4}}`.

use std::fmt::Write as _;

use super::encode_hex;
use crate::value::Value;

fn needs_quotes(s: &str, delimiter: char) -> bool {
    s.is_empty()
        || s.eq_ignore_ascii_case("NULL")
        || s.chars().any(|c| {
            c == delimiter || matches!(c, '{' | '}' | '"' | '\\') || c.is_ascii_whitespace()
        })
}

fn push_element(out: &mut String, s: &str, delimiter: char) {
    if !needs_quotes(s, delimiter) {
        out.push_str(s);
        return;
    }
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Render values as array text. Nested `Value::Array`s become sub-arrays.
pub fn stringify(values: &[Value], delimiter: u8) -> String {
    let delimiter = delimiter as char;
    let mut out = String::from("{");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        match value {
            Value::Null => out.push_str("NULL"),
            Value::Bool(b) => out.push(if *b { 't' } else { 'f' }),
            Value::Int(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Float(f) => {
                let _ = write!(out, "{}", f);
            }
            Value::Text(s) => push_element(&mut out, s, delimiter),
            Value::Bytes(b) => push_element(&mut out, &format!("\\x{}", encode_hex(b)), delimiter),
            Value::Json(j) => push_element(&mut out, &j.to_string(), delimiter),
            Value::Array(items) => out.push_str(&stringify(items, delimiter as u8)),
        }
    }
    out.push('}');
    out
}

struct Parser<'a, F> {
    bytes: &'a [u8],
    pos: usize,
    delimiter: u8,
    convert: F,
}

impl<F: Fn(&str) -> Value> Parser<'_, F> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: u8) -> Result<(), String> {
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(format!(
                "expected '{}' at byte {}, found '{}'",
                want as char, self.pos, c as char
            )),
            None => Err(format!("expected '{}', found end of input", want as char)),
        }
    }

    fn array(&mut self) -> Result<Vec<Value>, String> {
        self.expect(b'{')?;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(items);
        }

        loop {
            self.skip_whitespace();
            let item = match self.peek() {
                Some(b'{') => Value::Array(self.array()?),
                Some(b'"') => {
                    let text = self.quoted()?;
                    (self.convert)(&text)
                }
                Some(_) => {
                    let (text, was_escaped) = self.bare();
                    if !was_escaped && text.eq_ignore_ascii_case("NULL") {
                        Value::Null
                    } else {
                        (self.convert)(&text)
                    }
                }
                None => return Err("unexpected end of array".to_string()),
            };
            items.push(item);

            self.skip_whitespace();
            match self.peek() {
                Some(c) if c == self.delimiter => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(c) => return Err(format!("unexpected '{}' at byte {}", c as char, self.pos)),
                None => return Err("unterminated array".to_string()),
            }
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        self.expect(b'"')?;
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                Some(b'\\') => {
                    let escaped = self
                        .bytes
                        .get(self.pos + 1)
                        .copied()
                        .ok_or_else(|| "dangling backslash".to_string())?;
                    buf.push(escaped);
                    self.pos += 2;
                }
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(String::from_utf8_lossy(&buf).into_owned());
                }
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                }
                None => return Err("unterminated quoted element".to_string()),
            }
        }
    }

    fn bare(&mut self) -> (String, bool) {
        let mut buf = Vec::new();
        let mut escaped = false;
        while let Some(c) = self.peek() {
            if c == self.delimiter || c == b'}' {
                break;
            }
            if c == b'\\' {
                if let Some(next) = self.bytes.get(self.pos + 1).copied() {
                    buf.push(next);
                    escaped = true;
                    self.pos += 2;
                    continue;
                }
            }
            buf.push(c);
            self.pos += 1;
        }
        while buf.last().is_some_and(|c| c.is_ascii_whitespace()) {
            buf.pop();
        }
        (String::from_utf8_lossy(&buf).into_owned(), escaped)
    }
}

/// Parse array text, converting each non-NULL element with `convert`.
///
/// An explicit dimension prefix such as `[0:1]=` is accepted and ignored.
pub fn destringify<F>(text: &str, delimiter: u8, convert: F) -> Result<Value, String>
where
    F: Fn(&str) -> Value,
{
    let body = match text.trim_start().strip_prefix('[') {
        Some(_) => match text.find('=') {
            Some(eq) => &text[eq + 1..],
            None => return Err("malformed dimension prefix".to_string()),
        },
        None => text,
    };

    let mut parser = Parser {
        bytes: body.as_bytes(),
        pos: 0,
        delimiter,
        convert,
    };
    parser.skip_whitespace();
    let items = parser.array()?;
    parser.skip_whitespace();
    if parser.pos != parser.bytes.len() {
        return Err(format!("trailing characters after array at byte {}", parser.pos));
    }
    Ok(Value::Array(items))
}
