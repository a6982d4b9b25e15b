//! Parser for FT8 decode lines.
//!
//! Upstream feeds are not uniform, so a line is tried against an ordered list
//! of grammars and the first one that matches wins. Lines neither grammar
//! accepts are kept as raw fallback records rather than dropped.
//!
//! # Line Formats
//!
//! Timed report, as printed by WSJT-X style decoders:
//! ```text
//! HHMMSS  SNR  DT  FREQ  [~]  MESSAGE
//! 134500  -12  0.3 1234   ~   CQ K1ABC FN42
//! ```
//!
//! Compact report:
//! ```text
//! CALLSIGN GRID SNR
//! K1ABC    FN42 -5
//! ```

use chrono::NaiveTime;
use nom::{
    IResult, Parser,
    bytes::complete::{take_while_m_n, take_while1},
    character::complete::{char, digit1, one_of, satisfy, space0, space1},
    combinator::{all_consuming, map_res, opt, recognize, rest, verify},
    sequence::preceded,
};
use thiserror::Error;

use crate::decode::DecodeRecord;

/// Callsign reported for lines no grammar understood.
pub const UNKNOWN_CALLSIGN: &str = "UNKNOWN";

/// Message tokens that are never a callsign.
const CALLSIGN_SKIP_LIST: [&str; 4] = ["CQ", "DE", "TNX", "73"];

/// Errors returned when a grammar rejects a line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Blank line")]
    Blank,

    #[error("Not a timed report: {0}")]
    NotTimedReport(String),

    #[error("Not a compact report: {0}")]
    NotCompact(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Fields of a timed report line.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedReport<'a> {
    /// UTC time of the decode period; `None` when the digits are not a
    /// valid time of day.
    pub time: Option<NaiveTime>,
    pub snr: i32,
    /// Time offset in seconds. Parsed for validation only.
    pub dt: f64,
    /// Audio frequency offset in Hz.
    pub frequency: u32,
    pub message: &'a str,
}

/// Fields of a compact report line.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactReport<'a> {
    pub callsign: &'a str,
    pub grid: &'a str,
    pub snr: i32,
}

/// Parser behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Pull the callsign and grid out of a timed report's message. When
    /// disabled, timed reports carry an empty callsign and grid.
    pub extract_fields: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            extract_fields: true,
        }
    }
}

fn is_field_letter(c: char) -> bool {
    ('A'..='R').contains(&c)
}

fn is_subsquare_letter(c: char) -> bool {
    ('A'..='X').contains(&c)
}

fn is_upper_alnum(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse a signed integer such as `-12` or `+5`.
fn parse_signed(input: &str) -> IResult<&str, i32> {
    map_res(recognize((opt(one_of("+-")), digit1)), |s: &str| {
        s.parse::<i32>()
    })
    .parse(input)
}

/// Parse a signed decimal such as `0.3` or `-1.2`.
fn parse_signed_decimal(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize((opt(one_of("+-")), digit1, char('.'), digit1)),
        |s: &str| s.parse::<f64>(),
    )
    .parse(input)
}

/// Parse the six-digit `HHMMSS` decode time.
fn parse_hhmmss(input: &str) -> IResult<&str, Option<NaiveTime>> {
    let (input, digits) = take_while_m_n(6, 6, |c: char| c.is_ascii_digit()).parse(input)?;
    // Digits were checked above, so these parses cannot fail.
    let field = |range: std::ops::Range<usize>| digits[range].parse::<u32>().unwrap_or(u32::MAX);
    Ok((
        input,
        NaiveTime::from_hms_opt(field(0..2), field(2..4), field(4..6)),
    ))
}

/// Parse a four-character locator (field and square only).
fn parse_square(input: &str) -> IResult<&str, &str> {
    recognize((
        satisfy(is_field_letter),
        satisfy(is_field_letter),
        satisfy(|c| c.is_ascii_digit()),
        satisfy(|c| c.is_ascii_digit()),
    ))
    .parse(input)
}

/// Parse a four- or six-character locator.
fn parse_locator(input: &str) -> IResult<&str, &str> {
    recognize((
        parse_square,
        opt((satisfy(is_subsquare_letter), satisfy(is_subsquare_letter))),
    ))
    .parse(input)
}

/// Parse a timed report line.
///
/// # Example
///
/// ```
/// use ft8_feed::parser::parse_timed_report;
///
/// let report = parse_timed_report("134500 -12 0.3 1234 ~ CQ K1ABC FN42").unwrap();
/// assert_eq!(report.snr, -12);
/// assert_eq!(report.frequency, 1234);
/// assert_eq!(report.message, "CQ K1ABC FN42");
/// ```
pub fn parse_timed_report(input: &str) -> ParseResult<TimedReport<'_>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Blank);
    }

    let result: IResult<&str, TimedReport> = (|input| {
        let (input, time) = parse_hhmmss(input)?;
        let (input, _) = space1(input)?;
        let (input, snr) = parse_signed(input)?;
        let (input, _) = space1(input)?;
        let (input, dt) = parse_signed_decimal(input)?;
        let (input, _) = space1(input)?;
        let (input, frequency) = map_res(digit1, |s: &str| s.parse::<u32>()).parse(input)?;
        let (input, _) = space1(input)?;
        let (input, _) = opt((char('~'), space0)).parse(input)?;
        let (input, message) = verify(rest, |s: &str| !s.trim().is_empty()).parse(input)?;

        Ok((
            input,
            TimedReport {
                time,
                snr,
                dt,
                frequency,
                message: message.trim(),
            },
        ))
    })(input);

    match result {
        Ok((_, report)) => Ok(report),
        Err(e) => Err(ParseError::NotTimedReport(format!("{:?}", e))),
    }
}

/// Parse a compact `CALLSIGN GRID SNR` line.
///
/// ```
/// use ft8_feed::parser::parse_compact;
///
/// let report = parse_compact("K1ABC FN42 -5").unwrap();
/// assert_eq!(report.callsign, "K1ABC");
/// assert_eq!(report.grid, "FN42");
/// assert_eq!(report.snr, -5);
/// ```
pub fn parse_compact(input: &str) -> ParseResult<CompactReport<'_>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Blank);
    }

    let result: IResult<&str, CompactReport> = all_consuming(
        (
            take_while1(|c: char| is_upper_alnum(c) || c == '/'),
            space1,
            parse_square,
            space1,
            parse_signed,
        )
            .map(|(callsign, _, grid, _, snr)| CompactReport {
                callsign,
                grid,
                snr,
            }),
    )
    .parse(input);

    match result {
        Ok((_, report)) => Ok(report),
        Err(e) => Err(ParseError::NotCompact(format!("{:?}", e))),
    }
}

/// Whether `token` is shaped like a callsign: one to three characters, a
/// digit, up to three more characters, then an optional `/SUFFIX`.
pub fn is_callsign(token: &str) -> bool {
    let parsed: IResult<&str, &str> = all_consuming(recognize((
        take_while_m_n(2, 7, is_upper_alnum),
        opt(preceded(char('/'), take_while1(is_upper_alnum))),
    )))
    .parse(token);

    let Ok((_, matched)) = parsed else {
        return false;
    };
    let base = matched.split('/').next().unwrap_or_default().as_bytes();

    // The separating digit sits after 1-3 leading characters and before at
    // most 3 trailing ones.
    let first = base.len().saturating_sub(4).max(1);
    let last = base.len().saturating_sub(1).min(3);
    (first..=last).any(|i| base[i].is_ascii_digit())
}

/// First callsign-shaped token of `message`, skipping `CQ`, `DE`, `TNX`
/// and `73`.
pub fn extract_callsign(message: &str) -> Option<&str> {
    message
        .split_whitespace()
        .filter(|word| !CALLSIGN_SKIP_LIST.contains(word))
        .find(|word| is_callsign(word))
}

/// First whole word of `message` shaped like a 4- or 6-character locator.
pub fn extract_grid(message: &str) -> Option<&str> {
    message
        .split(|c: char| !is_word_char(c))
        .find(|word| all_consuming(parse_locator).parse(*word).is_ok())
}

/// Parse one decode line with the default options.
///
/// Blank input (or `None`) yields `None`. Every other line produces a record:
/// when no grammar matches, the trimmed line is kept as the message of an
/// `UNKNOWN` record.
///
/// ```
/// use ft8_feed::parser::parse_decode;
///
/// let record = parse_decode("134500 -12 0.3 1234 ~ CQ K1ABC FN42").unwrap();
/// assert_eq!(record.callsign(), "K1ABC");
/// assert_eq!(record.grid(), "FN42");
///
/// assert!(parse_decode("   ").is_none());
/// assert!(parse_decode(None).is_none());
/// ```
pub fn parse_decode<'a>(line: impl Into<Option<&'a str>>) -> Option<DecodeRecord> {
    parse_decode_with(line, ParseOptions::default())
}

/// Parse one decode line.
pub fn parse_decode_with<'a>(
    line: impl Into<Option<&'a str>>,
    options: ParseOptions,
) -> Option<DecodeRecord> {
    let line = line.into()?.trim();
    if line.is_empty() {
        return None;
    }

    if let Ok(report) = parse_timed_report(line) {
        let (callsign, grid) = if options.extract_fields {
            (
                extract_callsign(report.message).unwrap_or_default(),
                extract_grid(report.message).unwrap_or_default(),
            )
        } else {
            ("", "")
        };
        return Some(DecodeRecord::new(
            callsign,
            grid,
            report.snr,
            report.frequency,
            report.message,
        ));
    }

    if let Ok(report) = parse_compact(line) {
        return Some(DecodeRecord::new(
            report.callsign,
            report.grid,
            report.snr,
            0,
            line,
        ));
    }

    Some(DecodeRecord::new(UNKNOWN_CALLSIGN, "", 0, 0, line))
}
