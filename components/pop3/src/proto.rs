use std::fmt::{Display, Formatter, Write};
use std::str::FromStr;

use anyhow::Result;

/// Maximum verb length the request parser will accept (§4.4).
pub const MAX_VERB_LEN: usize = 4;

/// Maximum argument-string length the request parser will accept (§4.4).
pub const MAX_ARG_LEN: usize = 255;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// CAPA returns the list of capabilities supported by the origin server.
    ///
    /// Available in both the AUTHORIZATION and TRANSACTION states. The proxy
    /// always issues `CAPA\r\n` to the origin right after the greeting
    /// (§4.6, state CAPA), independent of whether the client ever asks.
    CAPA,
    /// DELE marks a message as deleted; the origin removes it on UPDATE.
    DELE,
    /// LIST reports scan listings for one message or the whole maildrop.
    LIST,
    /// NOOP does nothing; used as a heartbeat.
    NOOP,
    /// PASS completes USER/PASS authentication.
    ///
    /// Only valid in AUTHORIZATION, immediately after a successful USER.
    PASS,
    /// RETR fetches a whole message; its body is the one the ET pipeline
    /// (§4.7) may intercept and rewrite.
    ///
    /// ```text
    /// C: RETR 1
    /// S: +OK 120 octets
    /// S: <entire message, byte-stuffed>
    /// S: .
    /// ```
    RETR,
    /// RSET unmarks messages deleted during the current session.
    RSET,
    /// STAT reports message count and total octets in the maildrop.
    STAT,
    /// TOP sends headers plus the first N body lines of a message.
    TOP,
    /// UIDL reports persistent unique-ids for one message or all of them.
    UIDL,
    /// USER begins USER/PASS authentication.
    USER,
    /// QUIT ends the session; from TRANSACTION it also enters UPDATE.
    QUIT,
    /// Anything the parser could not map to a known verb.
    Unknown,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "USER" => Command::USER,
            "PASS" => Command::PASS,
            "STAT" => Command::STAT,
            "UIDL" => Command::UIDL,
            "LIST" => Command::LIST,
            "RETR" => Command::RETR,
            "DELE" => Command::DELE,
            "NOOP" => Command::NOOP,
            "RSET" => Command::RSET,
            "QUIT" => Command::QUIT,
            "TOP" => Command::TOP,
            "CAPA" => Command::CAPA,
            _ => Command::Unknown,
        })
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let v = match self {
            Command::USER => "USER",
            Command::PASS => "PASS",
            Command::STAT => "STAT",
            Command::UIDL => "UIDL",
            Command::LIST => "LIST",
            Command::RETR => "RETR",
            Command::DELE => "DELE",
            Command::NOOP => "NOOP",
            Command::RSET => "RSET",
            Command::QUIT => "QUIT",
            Command::TOP => "TOP",
            Command::CAPA => "CAPA",
            Command::Unknown => "UNKNOWN",
        };

        write!(f, "{}", v)
    }
}

impl From<&Request> for Command {
    fn from(v: &Request) -> Self {
        match v {
            Request::Capa => Command::CAPA,
            Request::Dele(_) => Command::DELE,
            Request::List(_) => Command::LIST,
            Request::Noop => Command::NOOP,
            Request::Pass(_) => Command::PASS,
            Request::Quit => Command::QUIT,
            Request::Retr(_) => Command::RETR,
            Request::Rset => Command::RSET,
            Request::Stat => Command::STAT,
            Request::Top { .. } => Command::TOP,
            Request::Uidl(_) => Command::UIDL,
            Request::User(_) => Command::USER,
        }
    }
}

/// A parsed POP3 command, produced by the request parser (§4.4) and
/// enqueued on the session's request queue until its matching
/// [`Response`] arrives.
#[derive(Debug, Clone)]
pub enum Request {
    Capa,
    Dele(usize),
    List(Option<usize>),
    Noop,
    Pass(String),
    Quit,
    Retr(usize),
    Rset,
    Stat,
    Top { id: usize, lines: usize },
    Uidl(Option<usize>),
    User(String),
}

impl Request {
    /// Whether the origin's reply to this request is multi-line
    /// (CAPA, bodiless LIST, RETR, TOP, bodiless UIDL) per §3.
    pub fn expects_multiline_response(&self) -> bool {
        matches!(
            self,
            Request::Capa
                | Request::List(None)
                | Request::Retr(_)
                | Request::Top { .. }
                | Request::Uidl(None)
        )
    }

    /// Builds the concrete [`Request`] from a verb plus its already-split
    /// argument list. The incremental byte parser in [`crate::parser`]
    /// collects the raw verb/args; this function applies the same
    /// per-verb arity checks the teacher library used for its `from_str`.
    pub fn from_parts(cmd: Command, args: &[&str]) -> Result<Request> {
        let req = match cmd {
            Command::USER => {
                if args.len() != 1 {
                    return Err(anyhow::anyhow!("USER takes exactly one argument"));
                }
                Request::User(args[0].to_string())
            }
            Command::PASS => {
                if args.len() != 1 {
                    return Err(anyhow::anyhow!("PASS takes exactly one argument"));
                }
                Request::Pass(args[0].to_string())
            }
            Command::STAT => {
                if !args.is_empty() {
                    return Err(anyhow::anyhow!("STAT takes no arguments"));
                }
                Request::Stat
            }
            Command::UIDL => match args.len() {
                0 => Request::Uidl(None),
                1 => Request::Uidl(Some(usize::from_str(args[0])?)),
                _ => return Err(anyhow::anyhow!("UIDL takes zero or one argument")),
            },
            Command::LIST => match args.len() {
                0 => Request::List(None),
                1 => Request::List(Some(usize::from_str(args[0])?)),
                _ => return Err(anyhow::anyhow!("LIST takes zero or one argument")),
            },
            Command::RETR => {
                if args.len() != 1 {
                    return Err(anyhow::anyhow!("RETR takes exactly one argument"));
                }
                Request::Retr(usize::from_str(args[0])?)
            }
            Command::DELE => {
                if args.len() != 1 {
                    return Err(anyhow::anyhow!("DELE takes exactly one argument"));
                }
                Request::Dele(usize::from_str(args[0])?)
            }
            Command::NOOP => {
                if !args.is_empty() {
                    return Err(anyhow::anyhow!("NOOP takes no arguments"));
                }
                Request::Noop
            }
            Command::RSET => {
                if !args.is_empty() {
                    return Err(anyhow::anyhow!("RSET takes no arguments"));
                }
                Request::Rset
            }
            Command::QUIT => {
                if !args.is_empty() {
                    return Err(anyhow::anyhow!("QUIT takes no arguments"));
                }
                Request::Quit
            }
            Command::TOP => {
                if args.len() != 2 {
                    return Err(anyhow::anyhow!("TOP takes exactly two arguments"));
                }
                Request::Top {
                    id: usize::from_str(args[0])?,
                    lines: usize::from_str(args[1])?,
                }
            }
            Command::CAPA => {
                if !args.is_empty() {
                    return Err(anyhow::anyhow!("CAPA takes no arguments"));
                }
                Request::Capa
            }
            Command::Unknown => return Err(anyhow::anyhow!("unknown command")),
        };

        Ok(req)
    }

    pub fn to_wire(&self) -> String {
        let mut f = String::new();

        match self {
            Request::Capa | Request::Noop | Request::Quit | Request::Rset | Request::Stat => {
                write!(&mut f, "{}\r\n", Command::from(self)).unwrap()
            }
            Request::Dele(v) => write!(&mut f, "{} {}\r\n", Command::from(self), v).unwrap(),
            Request::Pass(v) => write!(&mut f, "{} {}\r\n", Command::from(self), v).unwrap(),
            Request::Retr(v) => write!(&mut f, "{} {}\r\n", Command::from(self), v).unwrap(),
            Request::User(v) => write!(&mut f, "{} {}\r\n", Command::from(self), v).unwrap(),
            Request::List(v) => match v {
                None => write!(&mut f, "{}\r\n", Command::from(self)).unwrap(),
                Some(v) => write!(&mut f, "{} {}\r\n", Command::from(self), v).unwrap(),
            },
            Request::Uidl(v) => match v {
                None => write!(&mut f, "{}\r\n", Command::from(self)).unwrap(),
                Some(v) => write!(&mut f, "{} {}\r\n", Command::from(self), v).unwrap(),
            },
            Request::Top { id, lines } => {
                write!(&mut f, "{} {} {}\r\n", Command::from(self), id, lines).unwrap()
            }
        }

        f
    }
}

/// Status line of a [`Response`] (§3).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Ok,
    Err,
}

#[derive(Debug, Copy, Clone)]
pub struct MessageMeta {
    pub id: usize,
    pub size: usize,
}

/// A response as seen on the origin-facing wire: a status plus a single
/// reply line, and for multi-line verbs, a raw body (already
/// dot-unstuffed by [`crate::parser::ResponseParser`]).
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub line: String,
    pub body: Option<Vec<u8>>,
}

impl Response {
    pub fn first_line_done(line: &str, multiline: bool) -> Response {
        let status = if line.starts_with("+OK") {
            Status::Ok
        } else {
            Status::Err
        };
        Response {
            status,
            line: line.to_string(),
            body: if multiline && status == Status::Ok {
                Some(Vec::new())
            } else {
                None
            },
        }
    }

    /// Parses the CAPA body's raw lines into an ordered capability list,
    /// one entry per line, terminator line excluded.
    pub fn capa_entries(body: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(body)
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect()
    }

    /// True iff `entries` (as produced by [`Response::capa_entries`])
    /// advertises PIPELINING, case-insensitively (§4.6, state CAPA).
    pub fn has_pipelining(entries: &[String]) -> bool {
        entries
            .iter()
            .any(|l| l.split_whitespace().next().unwrap_or("").eq_ignore_ascii_case("PIPELINING"))
    }
}

/// Re-applies POP3 byte-stuffing to an already-unstuffed body: any line
/// beginning with `.` gets one extra leading `.` (the exact inverse of
/// what [`crate::parser::ResponseParser`] does on the way in). `body` is
/// a sequence of `\r\n`-terminated lines with no trailing terminator
/// octet.
pub fn stuff_body(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    let mut start = 0;
    while start < body.len() {
        let rel_end = body[start..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|p| start + p)
            .unwrap_or(body.len());
        let line = &body[start..rel_end];
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
        start = rel_end + 2;
    }
    out
}

/// Appends a `PIPELINING` capability line to an unstuffed CAPA body
/// (§4.6 RESPONSE: "rewrites the body to inject PIPELINING before the
/// terminating `.\r\n`").
pub fn inject_pipelining(body: &[u8]) -> Vec<u8> {
    let mut out = body.to_vec();
    out.extend_from_slice(b"PIPELINING\r\n");
    out
}

/// Formats a complete multi-line response for the wire: status line,
/// re-stuffed body, and the `.\r\n` terminator.
pub fn format_multiline(first_line: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(first_line.len() + body.len() + 8);
    out.extend_from_slice(first_line.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&stuff_body(body));
    out.extend_from_slice(b".\r\n");
    out
}
