use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0, multispace1, not_line_ending},
    combinator::{recognize, value},
    error::ErrorKind,
    multi::many0,
    sequence::pair,
};

use crate::MAX_PARSE_DEPTH;
use crate::ast::{NumberType, QUOTE, Term};
use crate::{Error, ParseError, ParseErrorKind};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Skip `;`, `//` and `/* */` comments between tokens
    pub handle_comments: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
        }
    }
}

type ParseResult<'a, T> = IResult<&'a str, T>;

/// Unrecoverable error: stops `alt` and `many0` from trying other branches
fn failure<T>(input: &str, code: ErrorKind) -> ParseResult<'_, T> {
    Err(nom::Err::Failure(nom::error::Error::new(input, code)))
}

fn cut_error<E>(error: nom::Err<E>) -> nom::Err<E> {
    match error {
        nom::Err::Error(e) => nom::Err::Failure(e),
        other => other,
    }
}

/// Convert nom parsing errors to structured parse errors.
/// Anything that failed at the very end of the input is reported as
/// incomplete, so a line-oriented driver can ask for more text.
fn convert_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> Error {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ),
                _ if e.input.is_empty() => {
                    (ParseErrorKind::Incomplete, "Unexpected end of input".into())
                }
                ErrorKind::Escaped => (
                    ParseErrorKind::InvalidSyntax,
                    format!("Unknown escape sequence at position {position}"),
                ),
                _ => {
                    let remaining_chars: String = e.input.chars().take(10).collect();
                    (
                        ParseErrorKind::InvalidSyntax,
                        format!("Invalid syntax near '{remaining_chars}'"),
                    )
                }
            };
            let char_offset = input[..position].chars().count();
            ParseError::with_context(kind, message, input, char_offset).into()
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input").into()
        }
    }
}

/// `;` or `//` up to the end of the line
fn line_comment(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(alt((tag(";"), tag("//"))), not_line_ending)).parse(input)
}

/// `/* ... */`, not nested
fn block_comment(input: &str) -> ParseResult<'_, &str> {
    let (body, _) = tag("/*").parse(input)?;
    match body.find("*/") {
        Some(end) => {
            let consumed = input.len() - body.len() + end + 2;
            Ok((&input[consumed..], &input[..consumed]))
        }
        None => failure(&body[body.len()..], ErrorKind::TakeUntil),
    }
}

/// Skip whitespace and, when enabled, comments
fn skip_ws(input: &str, config: ParseConfig) -> ParseResult<'_, ()> {
    if config.handle_comments {
        value((), many0(alt((multispace1, line_comment, block_comment)))).parse(input)
    } else {
        value((), multispace0).parse(input)
    }
}

fn is_atom_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '"')
}

/// A digit first, or a sign or point followed by a digit
fn looks_numeric(text: &str) -> bool {
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let digits = unsigned.strip_prefix('.').unwrap_or(unsigned);
    digits.starts_with(|c: char| c.is_ascii_digit())
}

fn atom_term(text: &str) -> Term {
    if text == "nil" {
        return Term::Nil;
    }
    if looks_numeric(text)
        && let Ok(n) = text.parse::<NumberType>()
    {
        return Term::Number(n);
    }
    Term::symbol(text)
}

/// Parse a number, `nil` or a symbol
fn parse_atom(input: &str) -> ParseResult<'_, Term> {
    let (remaining, text) = take_while1(is_atom_char).parse(input)?;
    Ok((remaining, atom_term(text)))
}

/// Parse a string literal
fn parse_string(input: &str) -> ParseResult<'_, Term> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => {
                return Ok((char_iter.as_str(), Term::String(chars.into())));
            }
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    Some(_) => return failure(remaining, ErrorKind::Escaped),
                    // Backslash at end of input
                    None => return failure(char_iter.as_str(), ErrorKind::Char),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            None => return failure(remaining, ErrorKind::Char),
        }
    }
}

/// Parse a list. Elements need no separator beyond the tokens themselves,
/// so `(f(g))` reads as `(f (g))`.
fn parse_list(input: &str, config: ParseConfig, depth: usize) -> ParseResult<'_, Term> {
    let (mut remaining, _) = char('(').parse(input)?;
    let mut items = Vec::new();

    loop {
        let (after_ws, ()) = skip_ws(remaining, config)?;
        if let Some(after) = after_ws.strip_prefix(')') {
            return Ok((after, Term::list(items)));
        }
        if after_ws.is_empty() {
            return failure(after_ws, ErrorKind::Char);
        }
        let (after, item) = parse_sexpr(after_ws, config, depth + 1).map_err(cut_error)?;
        items.push(item);
        remaining = after;
    }
}

/// Parse `'expr` as `(quote expr)`
fn parse_quote(input: &str, config: ParseConfig, depth: usize) -> ParseResult<'_, Term> {
    let (remaining, _) = char('\'').parse(input)?;
    let (remaining, ()) = skip_ws(remaining, config)?;
    if remaining.is_empty() || remaining.starts_with(')') {
        return failure(remaining, ErrorKind::Char);
    }
    let (remaining, quoted) = parse_sexpr(remaining, config, depth + 1).map_err(cut_error)?;
    Ok((
        remaining,
        Term::list([Term::Symbol(QUOTE.clone()), quoted]),
    ))
}

/// Parse one S-expression starting exactly at `input`
fn parse_sexpr(input: &str, config: ParseConfig, depth: usize) -> ParseResult<'_, Term> {
    if depth >= MAX_PARSE_DEPTH {
        return failure(input, ErrorKind::TooLarge);
    }

    alt((
        |i| parse_quote(i, config, depth),
        |i| parse_list(i, config, depth),
        parse_string,
        parse_atom,
    ))
    .parse(input)
}

/// Parse every top-level expression in `input`
pub fn parse(input: &str) -> Result<Vec<Term>, Error> {
    parse_with_config(input, ParseConfig::default())
}

/// Parse every top-level expression in `input` with explicit reader options
pub fn parse_with_config(input: &str, config: ParseConfig) -> Result<Vec<Term>, Error> {
    let mut forms = Vec::new();
    let mut remaining = input;

    loop {
        let (after_ws, ()) = skip_ws(remaining, config).map_err(|e| convert_error(input, e))?;
        if after_ws.is_empty() {
            return Ok(forms);
        }
        if after_ws.starts_with(')') {
            let position = input.len() - after_ws.len();
            return Err(ParseError::with_context(
                ParseErrorKind::InvalidSyntax,
                format!("Unexpected ')' at position {position}"),
                input,
                input[..position].chars().count(),
            )
            .into());
        }
        let (after, form) =
            parse_sexpr(after_ws, config, 0).map_err(|e| convert_error(input, e))?;
        forms.push(form);
        remaining = after;
    }
}
