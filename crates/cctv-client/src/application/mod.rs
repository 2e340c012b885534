//! Application layer use cases for the CCTV client.
//!
//! # What use cases does the client have?
//!
//! - **`commands`** – Builds the typed requests the operator issues (image
//!   range queries, line submissions, login and OTP, bounding-box toggles)
//!   and writes them through a `MessageSink`.  The sink is the connection in
//!   production and a test double in unit tests.
//!
//! - **`line_catalog`** – Keeps the last road and detection line listings the
//!   server sent, indexed by their 1-based line numbers.

pub mod commands;
pub mod line_catalog;
