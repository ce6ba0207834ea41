//! Data-field updates on `addObject(...)` call sites.
//!
//! A small Python tokenizer finds the `addObject` call whose `name=` keyword
//! is a given string literal, then replaces or appends one keyword argument.
//! Everything outside that argument span is left byte-for-byte intact.

use serde_json::Value;

/// Lexical problems reported as scene syntax errors.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxIssue(pub String);

/// Where a field update landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEdit {
    Replaced,
    Inserted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated { source: String, edit: FieldEdit },
    ObjectNotFound,
    NoArguments,
}

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Ident,
    Str,
    Open(u8),
    Close(u8),
    Comma,
    Assign,
    Other,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: Kind,
    start: usize,
    end: usize,
}

fn line_of(src: &[u8], pos: usize) -> usize {
    src[..pos.min(src.len())].iter().filter(|b| **b == b'\n').count() + 1
}

fn is_ident_start(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphabetic() || b >= 0x80
}

fn is_ident_char(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

fn is_string_prefix(word: &[u8]) -> bool {
    let lower: Vec<u8> = word.iter().map(u8::to_ascii_lowercase).collect();
    matches!(
        lower.as_slice(),
        b"r" | b"b" | b"f" | b"u" | b"rb" | b"br" | b"fr" | b"rf"
    )
}

/// Skip a string literal whose opening quote is at `i`; returns the index
/// just past the closing quote.
fn skip_string(src: &[u8], start: usize, i: usize) -> Result<usize, SyntaxIssue> {
    let quote = src[i];
    let triple = src.len() >= i + 3 && src[i + 1] == quote && src[i + 2] == quote;
    let mut j = if triple { i + 3 } else { i + 1 };
    while j < src.len() {
        let b = src[j];
        if b == b'\\' {
            j += 2;
            continue;
        }
        if triple {
            if b == quote && src.get(j + 1) == Some(&quote) && src.get(j + 2) == Some(&quote) {
                return Ok(j + 3);
            }
        } else if b == quote {
            return Ok(j + 1);
        } else if b == b'\n' {
            break;
        }
        j += 1;
    }
    let what = if triple { "unterminated triple-quoted string literal" } else { "unterminated string literal" };
    Err(SyntaxIssue(format!("{what} (detected at line {})", line_of(src, start))))
}

fn tokenize(src: &[u8]) -> Result<Vec<Token>, SyntaxIssue> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < src.len() {
        let b = src[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' => i += 1,
            b'\\' => i += 1,
            b'#' => {
                while i < src.len() && src[i] != b'\n' {
                    i += 1;
                }
            }
            b'"' | b'\'' => {
                let end = skip_string(src, i, i)?;
                tokens.push(Token { kind: Kind::Str, start: i, end });
                i = end;
            }
            b'(' | b'[' | b'{' => {
                tokens.push(Token { kind: Kind::Open(b), start: i, end: i + 1 });
                i += 1;
            }
            b')' | b']' | b'}' => {
                tokens.push(Token { kind: Kind::Close(b), start: i, end: i + 1 });
                i += 1;
            }
            b',' => {
                tokens.push(Token { kind: Kind::Comma, start: i, end: i + 1 });
                i += 1;
            }
            b'=' if src.get(i + 1) == Some(&b'=') => {
                tokens.push(Token { kind: Kind::Other, start: i, end: i + 2 });
                i += 2;
            }
            b'=' => {
                tokens.push(Token { kind: Kind::Assign, start: i, end: i + 1 });
                i += 1;
            }
            b'<' | b'>' | b'!' | b':' | b'+' | b'-' | b'*' | b'/' | b'%' | b'&' | b'|' | b'^' | b'@'
                if src.get(i + 1) == Some(&b'=') =>
            {
                tokens.push(Token { kind: Kind::Other, start: i, end: i + 2 });
                i += 2;
            }
            _ if is_ident_start(b) => {
                let start = i;
                while i < src.len() && is_ident_char(src[i]) {
                    i += 1;
                }
                if i < src.len() && (src[i] == b'"' || src[i] == b'\'') && is_string_prefix(&src[start..i]) {
                    let end = skip_string(src, start, i)?;
                    tokens.push(Token { kind: Kind::Str, start, end });
                    i = end;
                } else {
                    tokens.push(Token { kind: Kind::Ident, start, end: i });
                }
            }
            _ => {
                tokens.push(Token { kind: Kind::Other, start: i, end: i + 1 });
                i += 1;
            }
        }
    }
    Ok(tokens)
}

fn check_brackets(src: &[u8], tokens: &[Token]) -> Result<(), SyntaxIssue> {
    let mut stack: Vec<(u8, usize)> = Vec::new();
    for t in tokens {
        match t.kind {
            Kind::Open(b) => stack.push((b, t.start)),
            Kind::Close(b) => {
                let want = match b {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                match stack.pop() {
                    Some((open, _)) if open == want => {}
                    Some((open, pos)) => {
                        return Err(SyntaxIssue(format!(
                            "closing parenthesis '{}' does not match opening parenthesis '{}' on line {}",
                            b as char,
                            open as char,
                            line_of(src, pos)
                        )));
                    }
                    None => {
                        return Err(SyntaxIssue(format!(
                            "unmatched '{}' (line {})",
                            b as char,
                            line_of(src, t.start)
                        )));
                    }
                }
            }
            _ => {}
        }
    }
    match stack.pop() {
        Some((open, pos)) => Err(SyntaxIssue(format!(
            "'{}' was never closed (line {})",
            open as char,
            line_of(src, pos)
        ))),
        None => Ok(()),
    }
}

// ── Call-site scanning ────────────────────────────────────────────────────────

struct Arg {
    /// Keyword name token, when the argument is `name=value`.
    keyword: Option<Token>,
    /// Span of the value expression (the whole argument for positional ones).
    value_start: usize,
    value_end: usize,
}

struct Call {
    args: Vec<Arg>,
    /// Token index of the closing parenthesis.
    close: usize,
}

/// Split the call starting at `tokens[open]` (an opening parenthesis).
fn parse_call(tokens: &[Token], open: usize) -> Option<Call> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut seg_start = open + 1;
    let mut i = open + 1;
    while i < tokens.len() {
        match tokens[i].kind {
            Kind::Open(_) => depth += 1,
            Kind::Close(_) if depth > 0 => depth -= 1,
            Kind::Close(_) => {
                push_arg(tokens, seg_start, i, &mut args);
                return Some(Call { args, close: i });
            }
            Kind::Comma if depth == 0 => {
                push_arg(tokens, seg_start, i, &mut args);
                seg_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn push_arg(tokens: &[Token], from: usize, to: usize, args: &mut Vec<Arg>) {
    if from >= to {
        return;
    }
    let seg = &tokens[from..to];
    let keyword = (seg.len() >= 3 && seg[0].kind == Kind::Ident && seg[1].kind == Kind::Assign).then_some(seg[0]);
    let value_first = if keyword.is_some() { &seg[2] } else { &seg[0] };
    args.push(Arg {
        keyword,
        value_start: value_first.start,
        value_end: seg[seg.len() - 1].end,
    });
}

/// Decode a plain (non-f, non-bytes) string literal.
fn string_literal_value(text: &str) -> Option<String> {
    let prefix_len = text.find(['"', '\'']).unwrap_or(0);
    let prefix = text[..prefix_len].to_ascii_lowercase();
    if prefix.contains('f') || prefix.contains('b') {
        return None;
    }
    let body = &text[prefix_len..];
    let inner = if body.len() >= 6 && (body.starts_with("\"\"\"") || body.starts_with("'''")) {
        &body[3..body.len() - 3]
    } else if body.len() >= 2 {
        &body[1..body.len() - 1]
    } else {
        return None;
    };
    if prefix.contains('r') {
        return Some(inner.to_string());
    }
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\n') => {}
            Some(other @ ('\\' | '\'' | '"')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Some(out)
}

/// Check the file lexically, then update `field` on the `addObject` call
/// named `object_name`.
pub fn update_field(
    source: &str,
    object_name: &str,
    field: &str,
    rendered_value: &str,
) -> Result<UpdateOutcome, SyntaxIssue> {
    let src = source.as_bytes();
    let tokens = tokenize(src)?;
    check_brackets(src, &tokens)?;

    for (idx, tok) in tokens.iter().enumerate() {
        if tok.kind != Kind::Ident || &source[tok.start..tok.end] != "addObject" {
            continue;
        }
        if !matches!(tokens.get(idx + 1).map(|t| t.kind), Some(Kind::Open(b'('))) {
            continue;
        }
        if idx > 0 && tokens[idx - 1].kind == Kind::Ident && &source[tokens[idx - 1].start..tokens[idx - 1].end] == "def" {
            continue;
        }
        let Some(call) = parse_call(&tokens, idx + 1) else {
            continue;
        };

        let named = call.args.iter().any(|a| {
            a.keyword.is_some_and(|k| &source[k.start..k.end] == "name")
                && string_literal_value(&source[a.value_start..a.value_end]).as_deref() == Some(object_name)
        });
        if !named {
            continue;
        }

        if let Some(arg) = call
            .args
            .iter()
            .find(|a| a.keyword.is_some_and(|k| &source[k.start..k.end] == field))
        {
            let updated = format!(
                "{}{}{}",
                &source[..arg.value_start],
                rendered_value,
                &source[arg.value_end..]
            );
            return Ok(UpdateOutcome::Updated { source: updated, edit: FieldEdit::Replaced });
        }

        let Some(last) = call.args.last() else {
            return Ok(UpdateOutcome::NoArguments);
        };

        // Reuse a trailing comma when the argument list already has one.
        let after_last = tokens[idx + 2..call.close]
            .iter()
            .find(|t| t.start >= last.value_end);
        let (insert_at, prefix) = match after_last {
            Some(t) if t.kind == Kind::Comma => (t.end, " "),
            _ => (last.value_end, ", "),
        };
        let updated = format!(
            "{}{prefix}{field}={rendered_value}{}",
            &source[..insert_at],
            &source[insert_at..]
        );
        return Ok(UpdateOutcome::Updated { source: updated, edit: FieldEdit::Inserted });
    }

    Ok(UpdateOutcome::ObjectNotFound)
}

// ── Python literal rendering ──────────────────────────────────────────────────

/// Render a JSON value the way Python's `repr` would print the equivalent
/// Python object.
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            (_, _, Some(f)) => python_float(f),
            _ => n.to_string(),
        },
        Value::String(s) => python_str(s),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", python_str(k), python_literal(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

fn python_float(f: f64) -> String {
    if !f.is_finite() {
        return if f.is_nan() {
            "float('nan')".to_string()
        } else if f > 0.0 {
            "float('inf')".to_string()
        } else {
            "float('-inf')".to_string()
        };
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{f:e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp:0>2}"),
            Some((mantissa, exp)) => format!("{mantissa}e-{:0>2}", &exp[1..]),
            None => s,
        };
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn python_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}
