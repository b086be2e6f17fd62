//! popg-pop3: the transparent POP3 proxy engine.
//!
//! # Example session, as seen by the client
//!
//! ```text
//! S: <wait for connection on TCP port 1100>
//! C: <open connection>
//! S:    +OK Proxy server POP3 ready.
//! S:    +OK dewey POP3 server ready
//! C:    USER mrose
//! S:    +OK
//! C:    PASS secret
//! S:    +OK mrose's maildrop has 2 messages (320 octets)
//! C:    RETR 1
//! S:    +OK sending mail.
//! S:    <the filtered message>
//! S:    .
//! C:    QUIT
//! S:    +OK dewey POP3 server signing off
//! C:  <close connection>
//! ```
//!
//! Module map (§2):
//!
//! - [`buffer`] — fixed-capacity read/write buffer (A)
//! - [`driver`] — generic state-machine driver (B)
//! - [`block`] — DNS resolution off the session task (C/§5)
//! - [`parser`] — request/response byte parsers and terminator scanner (D)
//! - [`mime`] — `Content-Type` header scanning, used for ET observability
//! - [`proto`] — wire types: verbs, requests, responses, byte-stuffing
//! - [`session`] — session model and the per-connection FSM (E/F)
//! - [`et`] — external-transformation subprocess pipeline (G)
//! - [`mgmt`] — management channel (H)
//! - [`metrics`] — process-wide counters (I)
//! - [`pool`] — bounded buffer free-list (§4.8)
//! - [`config`] — shared, mutable process configuration (§3)
//! - [`io`] — socket <-> buffer glue

pub mod block;
pub mod buffer;
pub mod config;
pub mod driver;
pub mod et;
pub mod io;
pub mod metrics;
pub mod mgmt;
pub mod mime;
pub mod parser;
pub mod pool;
pub mod proto;
pub mod session;

pub use config::{Config, SharedConfig};
pub use metrics::Metrics;
pub use proto::*;
