//! Placeholder compiler: printf-style reply templates to regex + ordered parsers.
//!
//! A reply template such as `"A%d B%fC"` is turned into a regular expression with one
//! capture group per placeholder, plus a list of [`Parser`]s aligned with those groups.
//!
//! Placeholder kinds are substituted in a fixed priority order (`%Nc` before `%c`), but the
//! parser list is ordered by the character offset of each placeholder in the original
//! template, so it always lines up with the left-to-right capture groups.
//!
//! Literal template text is *not* escaped. Regex syntax outside the recognised placeholders
//! keeps its regex meaning, so `"P=(\w+)"` with an explicit parser works, and so does a
//! literal `.` matching any character. Escape metacharacters yourself when they must match
//! literally.
//!
//! Detected parsers must line up with the regex's capture groups. A template that adds its
//! own groups next to placeholders (`"%d=(X|Y)"`) is rejected; use `(?:X|Y)` or pass an
//! explicit parser list covering every group.
//!
//! Compiled regexes are cached per template and flags. The cache holds up to 1024 entries
//! and is emptied when full, so templates built on the fly cannot grow it without bound.
//!
//! | Placeholder | Regex fragment | Parser |
//! |---|---|---|
//! | `%Nc` | `.{N}` | [`Parser::Text`] |
//! | `%c` | `.` | [`Parser::Text`] |
//! | `%d` | `[-+]?\d+` | [`Parser::Int`] |
//! | `%e %E %f %g` | float with optional exponent | [`Parser::Float`] |
//! | `%i` | hex, octal or decimal | [`Parser::AutoInt`] |
//! | `%o` | `[-+]?[0-7]+` | [`Parser::Octal`] |
//! | `%s` | `\S+` | [`Parser::Text`] |
//! | `%u` | `\d+` | [`Parser::Uint`] |
//! | `%x %X` | hex with optional `0x` | [`Parser::Hex`] |

use crate::error::{BusError, BusResult, ConversionFailure, ParseError};
use crate::value::{Parsed, Value};
use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Custom conversion function used by [`Parser::Custom`].
pub type ParseFn = Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

/// Converts the text of one capture group into a [`Value`].
#[derive(Clone)]
pub enum Parser {
    /// Keep the captured text as-is
    Text,
    /// Signed base-10 integer
    Int,
    /// Integer whose base comes from its prefix (`0x` hex, leading `0` octal)
    AutoInt,
    /// Base-8 integer
    Octal,
    /// Base-16 integer, `0x` prefix optional
    Hex,
    /// Unsigned base-10 integer
    Uint,
    /// Floating point with optional exponent
    Float,
    /// Caller-supplied conversion
    Custom {
        /// Name reported in parse errors
        name: String,
        /// Conversion function
        func: ParseFn,
    },
}

impl Parser {
    /// Build a named custom parser.
    pub fn custom(
        name: impl Into<String>,
        func: impl Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Parser::Custom {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Identity reported in parse errors.
    pub fn name(&self) -> &str {
        match self {
            Parser::Text => "text",
            Parser::Int => "int",
            Parser::AutoInt => "auto-base int",
            Parser::Octal => "octal",
            Parser::Hex => "hex",
            Parser::Uint => "uint",
            Parser::Float => "float",
            Parser::Custom { name, .. } => name,
        }
    }

    /// Convert captured text.
    pub fn parse(&self, text: &str) -> Result<Value, String> {
        match self {
            Parser::Text => Ok(Value::Text(text.to_string())),
            Parser::Int => parse_radix(text, 10).map(Value::Int),
            Parser::AutoInt => parse_auto_radix(text).map(Value::Int),
            Parser::Octal => parse_radix(text, 8).map(Value::Int),
            Parser::Hex => parse_radix(text, 16).map(Value::Int),
            Parser::Uint => text
                .parse::<u64>()
                .map(Value::Uint)
                .map_err(|e| e.to_string()),
            Parser::Float => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| e.to_string()),
            Parser::Custom { func, .. } => func(text),
        }
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parser::Custom { name, .. } => write!(f, "Custom({name})"),
            other => f.write_str(other.name()),
        }
    }
}

impl PartialEq for Parser {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Parser::Custom { name: a, func: fa }, Parser::Custom { name: b, func: fb }) => {
                a == b && Arc::ptr_eq(fa, fb)
            }
            (Parser::Custom { .. }, _) | (_, Parser::Custom { .. }) => false,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

fn split_sign(text: &str) -> (bool, &str) {
    if let Some(rest) = text.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = text.strip_prefix('+') {
        (false, rest)
    } else {
        (false, text)
    }
}

fn apply_sign(negative: bool, digits: &str, radix: u32) -> Result<i64, String> {
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(format!("invalid base-{radix} integer"));
    }
    let magnitude = i128::from_str_radix(digits, radix).map_err(|e| e.to_string())?;
    let signed = if negative { -magnitude } else { magnitude };
    i64::try_from(signed).map_err(|_| "number too large to fit in target type".to_string())
}

fn strip_hex_prefix(digits: &str) -> Option<&str> {
    digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
}

fn parse_radix(text: &str, radix: u32) -> Result<i64, String> {
    let (negative, digits) = split_sign(text.trim());
    let digits = if radix == 16 {
        strip_hex_prefix(digits).unwrap_or(digits)
    } else {
        digits
    };
    apply_sign(negative, digits, radix)
}

fn parse_auto_radix(text: &str) -> Result<i64, String> {
    let (negative, digits) = split_sign(text.trim());
    if let Some(hex) = strip_hex_prefix(digits) {
        apply_sign(negative, hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        apply_sign(negative, &digits[1..], 8)
    } else {
        apply_sign(negative, digits, 10)
    }
}

/// Explicit parser choice replacing the auto-detected list.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserOverride {
    /// One parser, for a template with exactly one capture group
    Single(Parser),
    /// One parser per capture group, in group order
    List(Vec<Parser>),
}

impl ParserOverride {
    fn into_list(self) -> Vec<Parser> {
        match self {
            ParserOverride::Single(parser) => vec![parser],
            ParserOverride::List(parsers) => parsers,
        }
    }
}

impl From<Parser> for ParserOverride {
    fn from(value: Parser) -> Self {
        ParserOverride::Single(value)
    }
}

impl From<Vec<Parser>> for ParserOverride {
    fn from(value: Vec<Parser>) -> Self {
        ParserOverride::List(value)
    }
}

/// Regex flags applied to a compiled template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegexFlags {
    /// `(?i)`
    pub case_insensitive: bool,
    /// `(?m)`: `^`/`$` match at line boundaries
    pub multi_line: bool,
    /// `(?s)`: `.` matches `\n`
    pub dot_matches_new_line: bool,
    /// `(?x)`
    pub ignore_whitespace: bool,
}

impl RegexFlags {
    /// Flags suited to multiline replies: `^`/`$` per line and `.` across lines.
    pub fn multiline() -> Self {
        Self {
            multi_line: true,
            dot_matches_new_line: true,
            ..Self::default()
        }
    }
}

struct PlaceholderKind {
    matcher: Regex,
    replacement: &'static str,
    parser: Parser,
}

fn kind(matcher: &str, replacement: &'static str, parser: Parser) -> PlaceholderKind {
    PlaceholderKind {
        matcher: Regex::new(matcher).expect("Invalid placeholder regex"),
        replacement,
        parser,
    }
}

/// Placeholder kinds in substitution priority order. Longer forms come first.
static PLACEHOLDERS: LazyLock<Vec<PlaceholderKind>> = LazyLock::new(|| {
    vec![
        kind(r"%(\d+)c", r"(.{${1}})", Parser::Text),
        kind(r"%c", r"(.)", Parser::Text),
        kind(r"%d", r"([-+]?\d+)", Parser::Int),
        kind(
            r"%[eEfg]",
            r"([-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?)",
            Parser::Float,
        ),
        kind(
            r"%i",
            r"([-+]?(?:0[xX][\dA-Fa-f]+|0[0-7]*|\d+))",
            Parser::AutoInt,
        ),
        kind(r"%o", r"([-+]?[0-7]+)", Parser::Octal),
        kind(r"%s", r"(\S+)", Parser::Text),
        kind(r"%u", r"(\d+)", Parser::Uint),
        kind(r"%[xX]", r"([-+]?(?:0[xX])?[\dA-Fa-f]+)", Parser::Hex),
    ]
});

#[derive(Clone)]
struct Detected {
    regex: Regex,
    parsers: Vec<Parser>,
}

/// Templates kept in [`COMPILED`] before it is emptied and refilled.
const CACHE_CAPACITY: usize = 1024;

/// Compiled templates keyed by source text and flags.
static COMPILED: LazyLock<DashMap<(String, RegexFlags), Detected>> = LazyLock::new(DashMap::new);

fn detect(template: &str, flags: RegexFlags) -> BusResult<Detected> {
    let key = (template.to_string(), flags);
    if let Some(hit) = COMPILED.get(&key) {
        return Ok(hit.clone());
    }

    let mut working = template.to_string();
    let mut located: Vec<(usize, Parser)> = Vec::new();
    for placeholder in PLACEHOLDERS.iter() {
        working = placeholder
            .matcher
            .replace_all(&working, placeholder.replacement)
            .into_owned();
        located.extend(
            placeholder
                .matcher
                .find_iter(template)
                .map(|m| (m.start(), placeholder.parser.clone())),
        );
    }
    located.sort_by_key(|(offset, _)| *offset);

    let regex = RegexBuilder::new(&working)
        .case_insensitive(flags.case_insensitive)
        .multi_line(flags.multi_line)
        .dot_matches_new_line(flags.dot_matches_new_line)
        .ignore_whitespace(flags.ignore_whitespace)
        .build()
        .map_err(|e| {
            BusError::Template(format!(
                "template /{template}/ produced an invalid regex /{working}/: {e}"
            ))
        })?;

    let detected = Detected {
        regex,
        parsers: located.into_iter().map(|(_, parser)| parser).collect(),
    };
    if COMPILED.len() >= CACHE_CAPACITY {
        debug!(entries = COMPILED.len(), "Template cache full, clearing");
        COMPILED.clear();
    }
    COMPILED.insert(key, detected.clone());
    Ok(detected)
}

/// A reply template compiled to a regex and an ordered parser list.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    template: String,
    regex: Regex,
    parsers: Vec<Parser>,
}

impl PartialEq for CompiledTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
            && self.regex.as_str() == other.regex.as_str()
            && self.parsers == other.parsers
    }
}

impl CompiledTemplate {
    /// Compile with default flags and auto-detected parsers.
    pub fn compile(template: &str) -> BusResult<Self> {
        Self::compile_with(template, RegexFlags::default(), None)
    }

    /// Compile with explicit flags and an optional parser override.
    ///
    /// The override replaces the detected parsers entirely. Either way the number of
    /// parsers must equal the number of capture groups in the generated regex.
    pub fn compile_with(
        template: &str,
        flags: RegexFlags,
        parser: Option<ParserOverride>,
    ) -> BusResult<Self> {
        let detected = detect(template, flags)?;
        let parsers = match parser {
            Some(explicit) => explicit.into_list(),
            None => detected.parsers,
        };
        let groups = detected.regex.captures_len() - 1;
        if parsers.len() != groups {
            return Err(BusError::Template(format!(
                "template /{template}/ has {groups} capture group(s) but {} parser(s)",
                parsers.len()
            )));
        }
        Ok(Self {
            template: template.to_string(),
            regex: detected.regex,
            parsers,
        })
    }

    /// Source template.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Generated regex.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Parsers in capture-group order.
    pub fn parsers(&self) -> &[Parser] {
        &self.parsers
    }

    /// Number of capture groups, equal to the number of parsers.
    pub fn group_count(&self) -> usize {
        self.parsers.len()
    }

    /// Match `reply` and convert every capture group.
    ///
    /// `command` is only used to describe failures.
    pub fn parse(&self, command: &str, reply: &str) -> Result<Parsed, ParseError> {
        let captures = self
            .regex
            .captures(reply)
            .ok_or_else(|| self.error(command, reply, None))?;

        let mut values = Vec::with_capacity(self.parsers.len());
        for (index, parser) in self.parsers.iter().enumerate() {
            let Some(group) = captures.get(index + 1) else {
                return Err(self.error(
                    command,
                    reply,
                    Some(ConversionFailure {
                        group: String::new(),
                        parser: parser.name().to_string(),
                        reason: format!("group {} did not participate in the match", index + 1),
                    }),
                ));
            };
            let value = parser.parse(group.as_str()).map_err(|reason| {
                self.error(
                    command,
                    reply,
                    Some(ConversionFailure {
                        group: group.as_str().to_string(),
                        parser: parser.name().to_string(),
                        reason,
                    }),
                )
            })?;
            values.push(value);
        }
        Ok(Parsed::from_values(values))
    }

    fn error(&self, command: &str, reply: &str, conversion: Option<ConversionFailure>) -> ParseError {
        ParseError {
            command: command.to_string(),
            reply: reply.to_string(),
            template: self.template.clone(),
            pattern: self.regex.as_str().to_string(),
            conversion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(template: &str, reply: &str) -> Parsed {
        CompiledTemplate::compile(template)
            .unwrap()
            .parse("Q", reply)
            .unwrap()
    }

    #[test]
    fn parsers_follow_placeholder_position() {
        let compiled = CompiledTemplate::compile("A%d B%fC").unwrap();
        assert_eq!(compiled.parsers(), &[Parser::Int, Parser::Float]);
        assert_eq!(
            parse("A%d B%fC", "A12 B3.5C"),
            Parsed::Tuple(vec![Value::Int(12), Value::Float(3.5)])
        );
    }

    #[test]
    fn order_is_positional_not_by_kind() {
        // %x is substituted last but sits first in the template
        let compiled = CompiledTemplate::compile("%x:%s:%c").unwrap();
        assert_eq!(
            compiled.parsers(),
            &[Parser::Hex, Parser::Text, Parser::Text]
        );
        assert_eq!(
            compiled.parse("Q", "ff:abc:Z").unwrap(),
            Parsed::Tuple(vec![
                Value::Int(255),
                Value::Text("abc".into()),
                Value::Text("Z".into())
            ])
        );
    }

    #[test]
    fn counted_chars_take_precedence_over_single_char() {
        let compiled = CompiledTemplate::compile("%3cX").unwrap();
        assert_eq!(compiled.pattern(), "(.{3})X");
        assert_eq!(parse("%3cX", "abcX"), Parsed::Scalar(Value::Text("abc".into())));
    }

    #[test]
    fn compiling_twice_is_identical() {
        let a = CompiledTemplate::compile("P %d,%d,%e").unwrap();
        let b = CompiledTemplate::compile("P %d,%d,%e").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.pattern(), b.pattern());
    }

    #[test]
    fn auto_base_integers() {
        assert_eq!(parse("%i", "0x1F").as_i64(), Some(31));
        assert_eq!(parse("%i", "017").as_i64(), Some(15));
        assert_eq!(parse("%i", "19").as_i64(), Some(19));
        assert_eq!(parse("%i", "-0X10").as_i64(), Some(-16));
        assert_eq!(parse("%i", "0").as_i64(), Some(0));
    }

    #[test]
    fn forced_bases() {
        assert_eq!(parse("%o", "17").as_i64(), Some(15));
        assert_eq!(parse("%x", "0x1f").as_i64(), Some(31));
        assert_eq!(parse("%X", "FF").as_i64(), Some(255));
        assert_eq!(parse("%d", "-42").as_i64(), Some(-42));
        assert_eq!(parse("%u", "42"), Parsed::Scalar(Value::Uint(42)));
    }

    #[test]
    fn float_grammar() {
        assert_eq!(parse("%f", "+3.5").as_f64(), Some(3.5));
        assert_eq!(parse("%e", "1.5e-3").as_f64(), Some(1.5e-3));
        assert_eq!(parse("%g", ".25").as_f64(), Some(0.25));
        assert_eq!(parse("%E", "2.E2").as_f64(), Some(200.0));
    }

    #[test]
    fn literal_template_is_a_presence_check() {
        let compiled = CompiledTemplate::compile("OK").unwrap();
        assert_eq!(compiled.group_count(), 0);
        assert!(compiled.parse("Q", "all OK").unwrap().is_empty());
        assert!(compiled.parse("Q", "FAIL").is_err());
    }

    #[test]
    fn mismatch_reports_reply_and_command() {
        let compiled = CompiledTemplate::compile("%d").unwrap();
        let err = compiled.parse("VERSION", "abc").unwrap_err();
        assert_eq!(err.reply, "abc");
        assert_eq!(err.command, "VERSION");
        assert_eq!(err.template, "%d");
        assert_eq!(err.pattern, r"([-+]?\d+)");
        assert!(err.conversion.is_none());
    }

    #[test]
    fn conversion_failure_names_parser() {
        let compiled = CompiledTemplate::compile("%d").unwrap();
        let err = compiled
            .parse("N", "99999999999999999999999")
            .unwrap_err();
        let failure = err.conversion.unwrap();
        assert_eq!(failure.parser, "int");
        assert_eq!(failure.group, "99999999999999999999999");
    }

    #[test]
    fn override_replaces_detected_parsers() {
        let compiled = CompiledTemplate::compile_with(
            r"ID=(\w+)",
            RegexFlags::default(),
            Some(Parser::custom("upper", |s| Ok(Value::Text(s.to_uppercase()))).into()),
        )
        .unwrap();
        assert_eq!(
            compiled.parse("ID?", "ID=abc").unwrap(),
            Parsed::Scalar(Value::Text("ABC".into()))
        );
    }

    #[test]
    fn override_list_must_match_group_count() {
        let err = CompiledTemplate::compile_with(
            "%d,%d",
            RegexFlags::default(),
            Some(ParserOverride::List(vec![Parser::Float])),
        )
        .unwrap_err();
        assert!(matches!(err, BusError::Template(_)));
    }

    #[test]
    fn user_groups_without_parsers_are_rejected() {
        let err = CompiledTemplate::compile(r"(\w+)=%d").unwrap_err();
        assert!(matches!(err, BusError::Template(_)));
        assert!(CompiledTemplate::compile("%d=(?:X|Y)").is_ok());
    }

    #[test]
    fn invalid_regex_is_a_template_error() {
        let err = CompiledTemplate::compile("(%d").unwrap_err();
        assert!(matches!(err, BusError::Template(_)));
    }

    #[test]
    fn flags_are_applied() {
        let compiled = CompiledTemplate::compile_with(
            "power=%f",
            RegexFlags {
                case_insensitive: true,
                ..RegexFlags::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(compiled.parse("P?", "POWER=1.5").unwrap().as_f64(), Some(1.5));
    }

    #[test]
    fn cache_stays_bounded() {
        for n in 0..CACHE_CAPACITY + 50 {
            CompiledTemplate::compile(&format!("BOUNDED{n}=%d")).unwrap();
        }
        // Other tests may insert concurrently between the check and the insert.
        assert!(COMPILED.len() <= CACHE_CAPACITY + 32);
        assert_eq!(
            parse("BOUNDED7=%d", "BOUNDED7=3").as_i64(),
            Some(3)
        );
    }

    #[test]
    fn search_is_unanchored() {
        assert_eq!(parse("MICROSTEPS/MICRON = %d", "STAGE\nMICROSTEPS/MICRON = 25\nEND").as_i64(), Some(25));
    }
}
