//! Incremental byte-level parsers for the POP3 wire protocol (§4.4, §4.5).
//!
//! Both parsers are fed one byte at a time so they can sit directly on
//! top of a [`crate::buffer::Buffer`] without needing a complete line
//! to already be in memory — the CAPA-terminator-split-across-two-recvs
//! boundary case (§8) falls out of this for free.

use crate::proto::{Command, Request, Status};
use anyhow::Result;
use std::str::FromStr;

/// Errors the request parser can report to the session FSM (§4.6,
/// REQUEST state): each maps to one of the three wire-visible `-ERR`
/// texts in §6.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RequestError {
    /// Verb exceeded [`crate::proto::MAX_VERB_LEN`].
    CommandTooLong,
    /// Argument string exceeded [`crate::proto::MAX_ARG_LEN`].
    ParamTooLong,
    /// Verb unrecognized, or recognized but malformed (wrong arity,
    /// non-numeric message id, ...).
    UnknownCommand,
}

impl RequestError {
    pub fn wire_message(&self) -> &'static str {
        match self {
            RequestError::CommandTooLong => "Command too long.",
            RequestError::ParamTooLong => "Parameter too long.",
            RequestError::UnknownCommand => "Unknown command. (POPG)",
        }
    }
}

pub enum ParseOutcome {
    NeedMore,
    Done(Request),
    Error(RequestError),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum RState {
    Verb,
    Sp,
    Arg,
    Cr,
    ErrorCmdTooLong,
    ErrorParamTooLong,
}

/// States: `verb`, `sp`, `arg`, `cr`, `error`/`error_cmd_too_long`/
/// `error_param_too_long` (the generic `error` and `done` states of
/// §4.4 are folded into [`ParseOutcome::Error`]/[`ParseOutcome::Done`],
/// produced by [`RequestParser::feed`] rather than held as a variant).
pub struct RequestParser {
    state: RState,
    verb: String,
    args: String,
}

impl RequestParser {
    pub fn new() -> Self {
        RequestParser {
            state: RState::Verb,
            verb: String::new(),
            args: String::new(),
        }
    }

    fn reset(&mut self) {
        self.state = RState::Verb;
        self.verb.clear();
        self.args.clear();
    }

    fn finish(&mut self) -> ParseOutcome {
        let outcome = match self.state {
            RState::ErrorCmdTooLong => ParseOutcome::Error(RequestError::CommandTooLong),
            RState::ErrorParamTooLong => ParseOutcome::Error(RequestError::ParamTooLong),
            _ if self.verb.is_empty() => ParseOutcome::Error(RequestError::UnknownCommand),
            _ => {
                let cmd = Command::from_str(&self.verb).unwrap_or(Command::Unknown);
                let args: Vec<&str> = self.args.split(' ').filter(|s| !s.is_empty()).collect();
                match Request::from_parts(cmd, &args) {
                    Ok(req) => ParseOutcome::Done(req),
                    Err(_) => ParseOutcome::Error(RequestError::UnknownCommand),
                }
            }
        };
        self.reset();
        outcome
    }

    /// Feeds a single byte; returns `NeedMore` until a full line (`\r\n`
    /// or a bare `\n`) has been consumed.
    pub fn feed(&mut self, b: u8) -> ParseOutcome {
        match self.state {
            RState::Verb => match b {
                b' ' if self.verb.is_empty() => ParseOutcome::NeedMore,
                b' ' => {
                    self.state = RState::Sp;
                    ParseOutcome::NeedMore
                }
                b'\r' => {
                    self.state = RState::Cr;
                    ParseOutcome::NeedMore
                }
                b'\n' => self.finish(),
                _ => {
                    if self.verb.len() >= crate::proto::MAX_VERB_LEN {
                        self.state = RState::ErrorCmdTooLong;
                    } else {
                        self.verb.push(b as char);
                    }
                    ParseOutcome::NeedMore
                }
            },
            RState::Sp => match b {
                b' ' => ParseOutcome::NeedMore,
                b'\r' => {
                    self.state = RState::Cr;
                    ParseOutcome::NeedMore
                }
                b'\n' => self.finish(),
                _ => {
                    self.state = RState::Arg;
                    self.args.push(b as char);
                    ParseOutcome::NeedMore
                }
            },
            RState::Arg => match b {
                b'\r' => {
                    self.state = RState::Cr;
                    ParseOutcome::NeedMore
                }
                b'\n' => self.finish(),
                _ => {
                    if self.args.len() >= crate::proto::MAX_ARG_LEN {
                        self.state = RState::ErrorParamTooLong;
                    } else {
                        self.args.push(b as char);
                    }
                    ParseOutcome::NeedMore
                }
            },
            RState::Cr => match b {
                b'\n' => self.finish(),
                _ => {
                    // Stray bare CR: treat it as ordinary argument content
                    // rather than rejecting the whole line.
                    self.state = RState::Arg;
                    self.args.push('\r');
                    self.args.push(b as char);
                    ParseOutcome::NeedMore
                }
            },
            RState::ErrorCmdTooLong | RState::ErrorParamTooLong => match b {
                b'\n' => self.finish(),
                _ => ParseOutcome::NeedMore,
            },
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum RespPhase {
    FirstLine,
    Body,
    Done,
}

/// Two-phase response parser (§4.5): a status line, then — for
/// multi-line verbs — a body phase that unstuffs `\r\n..` back to
/// `\r\n.` and recognizes the bare `\r\n.\r\n` terminator.
pub struct ResponseParser {
    phase: RespPhase,
    line_buf: Vec<u8>,
    first_line: String,
    body: Vec<u8>,
    expect_multiline: bool,
}

impl ResponseParser {
    pub fn new(expect_multiline: bool) -> Self {
        ResponseParser {
            phase: RespPhase::FirstLine,
            line_buf: Vec::new(),
            first_line: String::new(),
            body: Vec::new(),
            expect_multiline,
        }
    }

    pub fn first_line_done(&self) -> bool {
        self.phase != RespPhase::FirstLine
    }

    pub fn is_done(&self) -> bool {
        self.phase == RespPhase::Done
    }

    pub fn status(&self) -> Option<Status> {
        if !self.first_line_done() {
            return None;
        }
        Some(if self.first_line.starts_with("+OK") {
            Status::Ok
        } else {
            Status::Err
        })
    }

    pub fn first_line(&self) -> &str {
        &self.first_line
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Feeds one byte of the origin's reply. Returns `Ok(true)` once the
    /// full response (status line, plus body if any) is complete.
    pub fn feed(&mut self, b: u8) -> Result<bool> {
        match self.phase {
            RespPhase::FirstLine => {
                if b == b'\r' {
                    return Ok(false);
                }
                if b == b'\n' {
                    self.first_line = String::from_utf8_lossy(&self.line_buf).to_string();
                    self.line_buf.clear();
                    let multiline = self.expect_multiline && self.first_line.starts_with("+OK");
                    self.phase = if multiline {
                        RespPhase::Body
                    } else {
                        RespPhase::Done
                    };
                    return Ok(self.phase == RespPhase::Done);
                }
                self.line_buf.push(b);
                Ok(false)
            }
            RespPhase::Body => {
                if b == b'\r' {
                    return Ok(false);
                }
                if b == b'\n' {
                    if self.line_buf == b"." {
                        self.line_buf.clear();
                        self.phase = RespPhase::Done;
                        return Ok(true);
                    }
                    if self.line_buf.first() == Some(&b'.') {
                        self.body.extend_from_slice(&self.line_buf[1..]);
                    } else {
                        self.body.extend_from_slice(&self.line_buf);
                    }
                    self.body.extend_from_slice(b"\r\n");
                    self.line_buf.clear();
                    return Ok(false);
                }
                self.line_buf.push(b);
                Ok(false)
            }
            RespPhase::Done => Ok(true),
        }
    }
}

/// Stateless helper the ET pipeline (§4.7) and the response parser above
/// both need: detects the `\r\n.\r\n` multi-line terminator as a
/// sliding window over a byte stream, without buffering the whole body.
/// Used when relaying origin bytes into the filter child's stdin, where
/// the terminator itself must be recognized and dropped but the rest of
/// the stream passed through untouched (no dot-unstuffing there — the
/// filter sees exactly the stuffed wire bytes minus the terminator).
pub struct TerminatorScanner {
    window: [u8; 5],
    filled: usize,
}

impl TerminatorScanner {
    const TERM: &'static [u8; 5] = b"\r\n.\r\n";

    pub fn new() -> Self {
        TerminatorScanner {
            window: [0; 5],
            filled: 0,
        }
    }

    /// Feeds one byte; returns `true` the instant the trailing window
    /// of bytes fed so far equals `\r\n.\r\n`.
    pub fn feed(&mut self, b: u8) -> bool {
        if self.filled < self.window.len() {
            self.window[self.filled] = b;
            self.filled += 1;
        } else {
            self.window.copy_within(1.., 0);
            *self.window.last_mut().unwrap() = b;
        }
        self.filled == self.window.len() && &self.window == Self::TERM
    }
}

impl Default for TerminatorScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(parser: &mut RequestParser, data: &[u8]) -> Vec<ParseOutcome> {
        let mut out = Vec::new();
        for &b in data {
            match parser.feed(b) {
                ParseOutcome::NeedMore => {}
                other => out.push(other),
            }
        }
        out
    }

    #[test]
    fn parses_simple_command() {
        let mut p = RequestParser::new();
        let out = parse_all(&mut p, b"USER alice\r\n");
        assert_eq!(out.len(), 1);
        match &out[0] {
            ParseOutcome::Done(Request::User(u)) => assert_eq!(u, "alice"),
            _ => panic!("expected Done(User)"),
        }
    }

    #[test]
    fn parses_pipelined_commands_in_one_feed_pass() {
        let mut p = RequestParser::new();
        let out = parse_all(&mut p, b"USER a\r\nPASS b\r\nQUIT\r\n");
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn bare_lf_is_accepted() {
        let mut p = RequestParser::new();
        let out = parse_all(&mut p, b"NOOP\n");
        assert!(matches!(out[0], ParseOutcome::Done(Request::Noop)));
    }

    #[test]
    fn verb_over_cap_is_command_too_long() {
        let mut p = RequestParser::new();
        let out = parse_all(&mut p, b"TOOLONGVERB arg\r\n");
        assert!(matches!(
            out[0],
            ParseOutcome::Error(RequestError::CommandTooLong)
        ));
    }

    #[test]
    fn arg_over_cap_is_param_too_long() {
        let mut p = RequestParser::new();
        let long_arg = "a".repeat(crate::proto::MAX_ARG_LEN + 10);
        let line = format!("USER {}\r\n", long_arg);
        let out = parse_all(&mut p, line.as_bytes());
        assert!(matches!(
            out[0],
            ParseOutcome::Error(RequestError::ParamTooLong)
        ));
    }

    #[test]
    fn unknown_verb_is_unknown_command() {
        let mut p = RequestParser::new();
        let out = parse_all(&mut p, b"@@@\r\n");
        assert!(matches!(
            out[0],
            ParseOutcome::Error(RequestError::UnknownCommand)
        ));
    }

    #[test]
    fn parser_recovers_after_an_error_and_parses_the_next_line() {
        let mut p = RequestParser::new();
        let out = parse_all(&mut p, b"@@@\r\nQUIT\r\n");
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[0],
            ParseOutcome::Error(RequestError::UnknownCommand)
        ));
        assert!(matches!(out[1], ParseOutcome::Done(Request::Quit)));
    }

    fn feed_response(parser: &mut ResponseParser, data: &[u8]) -> bool {
        let mut done = false;
        for &b in data {
            done = parser.feed(b).unwrap();
        }
        done
    }

    #[test]
    fn single_line_response_completes_on_first_line() {
        let mut p = ResponseParser::new(false);
        assert!(feed_response(&mut p, b"+OK\r\n"));
        assert!(p.body().is_empty());
    }

    #[test]
    fn multiline_response_unstuffs_dots() {
        let mut p = ResponseParser::new(true);
        assert!(feed_response(&mut p, b"+OK 2 octets\r\nhello\r\n..dot\r\n.\r\n"));
        assert_eq!(p.body(), b"hello\r\n.dot\r\n");
    }

    #[test]
    fn terminator_split_across_two_feeds_parses_identically() {
        let whole = b"+OK\r\nhello\r\n.\r\n";
        let mut one_shot = ResponseParser::new(true);
        assert!(feed_response(&mut one_shot, whole));

        let mut split = ResponseParser::new(true);
        let mid = whole.len() / 2;
        let mut done = false;
        for &b in &whole[..mid] {
            done = split.feed(b).unwrap();
        }
        assert!(!done);
        for &b in &whole[mid..] {
            done = split.feed(b).unwrap();
        }
        assert!(done);
        assert_eq!(split.body(), one_shot.body());
    }

    #[test]
    fn terminator_scanner_fires_exactly_on_full_sequence() {
        let mut s = TerminatorScanner::new();
        let mut fired = false;
        for &b in b"hello\r\n.\r\n" {
            if s.feed(b) {
                fired = true;
            }
        }
        assert!(fired);
    }

    #[test]
    fn terminator_scanner_does_not_fire_on_partial_sequence() {
        let mut s = TerminatorScanner::new();
        let mut fired = false;
        for &b in b"hello\r\n.x" {
            if s.feed(b) {
                fired = true;
            }
        }
        assert!(!fired);
    }

    #[test]
    fn err_status_with_multiline_verb_is_single_line() {
        let mut p = ResponseParser::new(true);
        assert!(feed_response(&mut p, b"-ERR no such message\r\n"));
        assert!(p.body().is_empty());
        assert_eq!(p.status(), Some(Status::Err));
    }
}
