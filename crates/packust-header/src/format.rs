//! The header query format language.
//!
//! A format string is compiled once into a token vector and then
//! evaluated against a header into a single growable output buffer.
//! The language supports `%{TAG}` value references with optional width
//! and alternative formatters, `[...]` array iteration, `%|TAG?{A}:{B}|`
//! conditionals, and a `*` pseudo-tag that walks every user-visible tag.

use std::collections::HashMap;

use chrono::TimeZone;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while,
    character::complete::char,
    combinator::opt,
};
use packust_common::{Error, ErrorKind, Result};

use crate::entry::TagData;
use crate::header::Header;
use crate::tags::{self, Tag, TagType};

fn ferr(msg: &str) -> Error {
    Error::new(ErrorKind::FormatError).with_detail(msg)
}

/// Width request attached to a value reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct Padding {
    /// Minimum field width.
    pub width: usize,
    /// Left-align instead of the default right alignment.
    pub left: bool,
}

impl Padding {
    /// Applies this padding to a rendered value.
    #[must_use]
    pub fn apply(self, value: &str) -> String {
        if self.width == 0 {
            value.to_owned()
        } else if self.left {
            format!("{value:<width$}", width = self.width)
        } else {
            format!("{value:>width$}", width = self.width)
        }
    }
}

/// A single element handed to a value formatter.
#[derive(Debug, Clone, Copy)]
pub enum FormatValue<'a> {
    /// String element.
    Str(&'a str),
    /// Integer element promoted to 32 bits.
    Int(u32),
    /// 64-bit integer element.
    Int64(u64),
    /// Opaque bytes of a binary tag.
    Bin(&'a [u8]),
}

/// An alternative value formatter, selected by `%{TAG:name}`.
pub type FormatFn = fn(&FormatValue<'_>, Padding) -> String;

/// Registry of value formatters available to a format evaluation.
#[derive(Debug, Clone)]
pub struct Formatters {
    map: HashMap<String, FormatFn>,
}

impl Default for Formatters {
    fn default() -> Self {
        let mut map: HashMap<String, FormatFn> = HashMap::new();
        let _ = map.insert("octal".to_owned(), octal_format as FormatFn);
        let _ = map.insert("hex".to_owned(), hex_format as FormatFn);
        let _ = map.insert("date".to_owned(), date_format as FormatFn);
        let _ = map.insert("day".to_owned(), day_format as FormatFn);
        let _ = map.insert("shescape".to_owned(), shescape_format as FormatFn);
        Self { map }
    }
}

impl Formatters {
    /// Registers a custom formatter under `name`, replacing any builtin
    /// of the same name.
    pub fn register(&mut self, name: impl Into<String>, f: FormatFn) {
        let _ = self.map.insert(name.into(), f);
    }

    fn get(&self, name: &str) -> Option<FormatFn> {
        self.map.get(name).copied()
    }
}

// ── Builtin formatters ───────────────────────────────────────────────

#[allow(clippy::trivially_copy_pass_by_ref)]
fn octal_format(value: &FormatValue<'_>, pad: Padding) -> String {
    match value {
        FormatValue::Int(v) => pad.apply(&format!("{v:o}")),
        FormatValue::Int64(v) => pad.apply(&format!("{v:o}")),
        _ => "(not a number)".to_owned(),
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn hex_format(value: &FormatValue<'_>, pad: Padding) -> String {
    match value {
        FormatValue::Int(v) => pad.apply(&format!("{v:x}")),
        FormatValue::Int64(v) => pad.apply(&format!("{v:x}")),
        _ => "(not a number)".to_owned(),
    }
}

fn render_time(value: &FormatValue<'_>, pad: Padding, time_format: &str) -> String {
    let secs = match value {
        FormatValue::Int(v) => i64::from(*v),
        FormatValue::Int64(v) => i64::try_from(*v).unwrap_or(0),
        _ => return "(not a number)".to_owned(),
    };
    chrono::Local.timestamp_opt(secs, 0).single().map_or_else(
        || pad.apply(""),
        |when| pad.apply(&when.format(time_format).to_string()),
    )
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn date_format(value: &FormatValue<'_>, pad: Padding) -> String {
    render_time(value, pad, "%c")
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn day_format(value: &FormatValue<'_>, pad: Padding) -> String {
    render_time(value, pad, "%a %b %d %Y")
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn shescape_format(value: &FormatValue<'_>, pad: Padding) -> String {
    match value {
        FormatValue::Int(v) => pad.apply(&format!("{}", *v as i32)),
        FormatValue::Int64(v) => pad.apply(&v.to_string()),
        FormatValue::Str(s) => {
            let padded = pad.apply(s);
            let mut out = String::with_capacity(padded.len() + 2);
            out.push('\'');
            for c in padded.chars() {
                if c == '\'' {
                    out.push_str("'\\''");
                } else {
                    out.push(c);
                }
            }
            out.push('\'');
            out
        }
        FormatValue::Bin(_) => "(not a number)".to_owned(),
    }
}

// ── Compiler ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagRef {
    /// The `*` pseudo-tag iterating all user-visible tags.
    All,
    Known(Tag),
}

#[derive(Debug, Clone)]
struct TagSpec {
    tag: TagRef,
    pad: Padding,
    just_one: bool,
    array_count: bool,
    format: Option<String>,
}

#[derive(Debug, Clone)]
enum Token {
    Literal(String),
    Tag(TagSpec),
    Array(Vec<Token>),
    Cond {
        tag: Option<Tag>,
        then: Vec<Token>,
        els: Vec<Token>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Top,
    InArray,
    InExpr,
}

fn spec_prefix(input: &str) -> IResult<&str, Padding> {
    let (input, dash) = opt(char('-')).parse(input)?;
    let (input, digits) = take_while(|c: char| c.is_ascii_digit())(input)?;
    Ok((
        input,
        Padding {
            width: digits.parse().unwrap_or(0),
            left: dash.is_some(),
        },
    ))
}

fn spec_select(input: &str) -> IResult<&str, Option<char>> {
    opt(alt((char('='), char('#')))).parse(input)
}

fn resolve_name(name: &str) -> Result<TagRef> {
    if name == "*" {
        return Ok(TagRef::All);
    }
    tags::tag_by_name(name)
        .map(|entry| TagRef::Known(entry.tag))
        .ok_or_else(|| ferr("unknown tag"))
}

/// Parses the `pad select? { NAME (:TYPE)? }` part following a `%`.
fn parse_spec(input: &str) -> Result<(TagSpec, &str)> {
    let (rest, pad) = spec_prefix(input).map_err(|_| ferr("missing { after %"))?;
    let (rest, select) = spec_select(rest).map_err(|_| ferr("missing { after %"))?;
    let Some(rest) = rest.strip_prefix('{') else {
        return Err(ferr("missing { after %"));
    };
    let Some(end) = rest.find('}') else {
        return Err(ferr("missing } after %{"));
    };
    let body = &rest[..end];
    let after = &rest[end + 1..];
    let (name, format) = match body.split_once(':') {
        Some((_, "")) => return Err(ferr("empty tag format")),
        Some((name, format)) => (name, Some(format.to_owned())),
        None => (body, None),
    };
    if name.is_empty() {
        return Err(ferr("empty tag name"));
    }
    let spec = TagSpec {
        tag: resolve_name(name)?,
        pad,
        just_one: select.is_some(),
        array_count: select == Some('#'),
        format,
    };
    Ok((spec, after))
}

/// Parses a `TAG?{A}(:{B})?|` conditional following a `%|`.
fn parse_expression(input: &str) -> Result<(Token, &str)> {
    let Some(question) = input.find('?') else {
        return Err(ferr("? expected in expression"));
    };
    let name = &input[..question];
    let rest = &input[question + 1..];
    let Some(rest) = rest.strip_prefix('{') else {
        return Err(ferr("{ expected after ? in expression"));
    };
    let (then, rest) = parse_tokens(rest, ParseState::InExpr)?;

    let (els, rest) = if let Some(rest) = rest.strip_prefix('|') {
        (Vec::new(), rest)
    } else if let Some(rest) = rest.strip_prefix(':') {
        let Some(rest) = rest.strip_prefix('{') else {
            return Err(ferr("{ expected after : in expression"));
        };
        let (els, rest) = parse_tokens(rest, ParseState::InExpr)?;
        let Some(rest) = rest.strip_prefix('|') else {
            return Err(ferr("| expected at end of expression"));
        };
        (els, rest)
    } else {
        return Err(ferr(": expected following ? subexpression"));
    };

    // An unknown or pseudo tag in a conditional simply tests as absent.
    let tag = match resolve_name(name) {
        Ok(TagRef::Known(tag)) => Some(tag),
        _ => None,
    };
    Ok((Token::Cond { tag, then, els }, rest))
}

fn escaped_char(c: char) -> char {
    match c {
        'a' => '\u{07}',
        'b' => '\u{08}',
        'f' => '\u{0C}',
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'v' => '\u{0B}',
        other => other,
    }
}

fn parse_tokens(mut input: &str, state: ParseState) -> Result<(Vec<Token>, &str)> {
    let mut tokens = Vec::new();
    let mut literal = String::new();

    macro_rules! flush {
        () => {
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
        };
    }

    while let Some(c) = input.chars().next() {
        match c {
            '%' => {
                if let Some(rest) = input.strip_prefix("%%") {
                    literal.push('%');
                    input = rest;
                } else if let Some(rest) = input.strip_prefix("%|") {
                    flush!();
                    let (token, rest) = parse_expression(rest)?;
                    tokens.push(token);
                    input = rest;
                } else {
                    flush!();
                    let (spec, rest) = parse_spec(&input[1..])?;
                    tokens.push(Token::Tag(spec));
                    input = rest;
                }
            }
            '[' => {
                flush!();
                let (inner, rest) = parse_tokens(&input[1..], ParseState::InArray)?;
                tokens.push(Token::Array(inner));
                input = rest;
            }
            ']' => {
                if state != ParseState::InArray {
                    return Err(ferr("unexpected ]"));
                }
                flush!();
                return Ok((tokens, &input[1..]));
            }
            '}' => {
                if state != ParseState::InExpr {
                    return Err(ferr("unexpected }"));
                }
                flush!();
                return Ok((tokens, &input[1..]));
            }
            '\\' => {
                let mut chars = input[1..].chars();
                match chars.next() {
                    Some(escaped) => {
                        literal.push(escaped_char(escaped));
                        input = &input[1 + escaped.len_utf8()..];
                    }
                    None => {
                        literal.push('\\');
                        input = "";
                    }
                }
            }
            _ => {
                literal.push(c);
                input = &input[c.len_utf8()..];
            }
        }
    }

    match state {
        ParseState::InArray => Err(ferr("] expected at end of array")),
        ParseState::InExpr => Err(ferr("} expected in expression")),
        ParseState::Top => {
            flush!();
            Ok((tokens, ""))
        }
    }
}

fn compile(fmt: &str) -> Result<Vec<Token>> {
    let (tokens, rest) = parse_tokens(fmt, ParseState::Top)?;
    debug_assert!(rest.is_empty());
    Ok(tokens)
}

// ── Evaluator ────────────────────────────────────────────────────────

struct Eval<'h> {
    h: &'h Header,
    formatters: &'h Formatters,
    out: String,
}

impl Eval<'_> {
    fn resolve(&self, tag: TagRef, star: Option<Tag>) -> Option<Tag> {
        match tag {
            TagRef::Known(tag) => Some(tag),
            TagRef::All => star,
        }
    }

    fn eval_tokens(&mut self, tokens: &[Token], element: usize, star: Option<Tag>) -> Result<()> {
        for token in tokens {
            self.eval_token(token, element, star)?;
        }
        Ok(())
    }

    fn eval_token(&mut self, token: &Token, element: usize, star: Option<Tag>) -> Result<()> {
        match token {
            Token::Literal(text) => {
                self.out.push_str(text);
                Ok(())
            }
            Token::Tag(spec) => {
                let element = if spec.just_one { 0 } else { element };
                self.eval_value(spec, element, star)
            }
            Token::Cond { tag, then, els } => {
                let present = tag.is_some_and(|t| self.h.is_entry(t));
                let branch = if present { then } else { els };
                self.eval_tokens(branch, element, star)
            }
            Token::Array(inner) => self.eval_array(inner, star),
        }
    }

    /// Element count an array iteration runs for, across the direct
    /// child value references.
    fn array_elements(&self, inner: &[Token], star: Option<Tag>) -> Result<Option<usize>> {
        let mut elements: Option<usize> = None;
        for token in inner {
            let Token::Tag(spec) = token else { continue };
            if spec.just_one || spec.array_count {
                continue;
            }
            let Some(tag) = self.resolve(spec.tag, star) else {
                continue;
            };
            let Some(entry) = self.h.get_raw(tag) else {
                continue;
            };
            let ty = entry.data.ty();
            let count = if ty == TagType::Bin {
                1
            } else {
                entry.data.count() as usize
            };
            if let Some(n) = elements {
                if n > 1
                    && count != n
                    && !matches!(ty, TagType::Bin | TagType::String)
                {
                    return Err(ferr("array iterator used with different sized arrays"));
                }
            }
            if elements.is_none_or(|n| count > n) {
                elements = Some(count);
            }
        }
        Ok(elements)
    }

    fn eval_array(&mut self, inner: &[Token], star: Option<Tag>) -> Result<()> {
        let Some(elements) = self.array_elements(inner, star)? else {
            self.out.push_str("(none)");
            return Ok(());
        };

        let xml_tag = match inner.first() {
            Some(Token::Tag(spec)) if spec.format.as_deref() == Some("xml") => {
                self.resolve(spec.tag, star)
            }
            _ => None,
        };
        if let Some(tag) = xml_tag {
            self.out.push_str("  <rpmTag name=\"");
            if let Some(name) = tags::display_name(tag) {
                self.out.push_str(&name);
            }
            self.out.push_str("\">\n");
        }
        for element in 0..elements {
            self.eval_tokens(inner, element, star)?;
        }
        if xml_tag.is_some() {
            self.out.push_str("  </rpmTag>\n");
        }
        Ok(())
    }

    fn render(&mut self, spec: &TagSpec, value: &FormatValue<'_>) {
        let custom = spec
            .format
            .as_deref()
            .and_then(|name| self.formatters.get(name));
        let rendered = match custom {
            Some(f) => f(value, spec.pad),
            None => match value {
                FormatValue::Str(s) => spec.pad.apply(s),
                FormatValue::Int(v) => spec.pad.apply(&format!("{}", *v as i32)),
                FormatValue::Int64(v) => spec.pad.apply(&v.to_string()),
                FormatValue::Bin(bytes) => spec.pad.apply(&hex::encode(bytes)),
            },
        };
        self.out.push_str(&rendered);
    }

    fn eval_value(&mut self, spec: &TagSpec, element: usize, star: Option<Tag>) -> Result<()> {
        let data = self
            .resolve(spec.tag, star)
            .and_then(|tag| self.h.get(tag));
        let Some(data) = data else {
            self.render(spec, &FormatValue::Str("(none)"));
            return Ok(());
        };

        if spec.array_count {
            self.render(spec, &FormatValue::Int(data.count()));
            return Ok(());
        }

        let count = data.count() as usize;
        if element >= count && !matches!(data.ty(), TagType::String | TagType::Bin) {
            return Err(ferr("(index out of range)"));
        }

        match &data {
            TagData::String(s) => self.render(spec, &FormatValue::Str(s)),
            TagData::StringArray(v) | TagData::I18nString(v) => {
                self.render(spec, &FormatValue::Str(&v[element]));
            }
            TagData::Char(v) => self.render(spec, &FormatValue::Int(u32::from(v[element]))),
            #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
            TagData::Int8(v) => {
                self.render(spec, &FormatValue::Int(i32::from(v[element] as i8) as u32));
            }
            TagData::Int16(v) => self.render(spec, &FormatValue::Int(u32::from(v[element]))),
            TagData::Int32(v) => self.render(spec, &FormatValue::Int(v[element])),
            TagData::Int64(v) => self.render(spec, &FormatValue::Int64(v[element])),
            TagData::Bin(v) => self.render(spec, &FormatValue::Bin(v)),
        }
        Ok(())
    }
}

fn star_spec(tokens: &[Token]) -> Option<&TagSpec> {
    match tokens.first() {
        Some(Token::Tag(spec)) if spec.tag == TagRef::All => Some(spec),
        Some(Token::Array(inner)) => match inner.first() {
            Some(Token::Tag(spec)) if spec.tag == TagRef::All => Some(spec),
            _ => None,
        },
        _ => None,
    }
}

/// Renders `fmt` against a header with the default formatters.
///
/// # Errors
///
/// Returns `FormatError` with a human-readable message on compile or
/// evaluation failure.
pub fn format(h: &Header, fmt: &str) -> Result<String> {
    format_with(h, fmt, &Formatters::default())
}

/// Renders `fmt` against a header with a caller-supplied formatter
/// registry.
///
/// # Errors
///
/// Returns `FormatError` with a human-readable message on compile or
/// evaluation failure.
pub fn format_with(h: &Header, fmt: &str, formatters: &Formatters) -> Result<String> {
    let tokens = compile(fmt)?;
    let mut eval = Eval {
        h,
        formatters,
        out: String::new(),
    };

    if let Some(spec) = star_spec(&tokens) {
        let xml = spec.format.as_deref() == Some("xml");
        if xml {
            eval.out.push_str("<rpmHeader>\n");
        }
        if let Some(first) = tokens.first() {
            for entry in h.iter() {
                eval.eval_token(first, 0, Some(entry.tag))?;
            }
        }
        if xml {
            eval.out.push_str("</rpmHeader>\n");
        }
    } else {
        eval.eval_tokens(&tokens, 0, None)?;
    }
    Ok(eval.out)
}
