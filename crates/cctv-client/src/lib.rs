//! cctv-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does cctv-client do? (for beginners)
//!
//! The monitoring server stores camera images, line configuration and user
//! accounts, and streams live detection results.  The client:
//!
//! 1. Opens a TCP connection to the server and keeps it open, reconnecting
//!    on its own (a bounded number of times) when the link drops.
//! 2. Sends requests (image ranges, line submissions, login, bounding-box
//!    streaming on/off), each tagged with a numeric type code.
//! 3. Splits the incoming byte stream into messages, decodes them with
//!    `cctv_core`, and turns each one into a typed event.
//! 4. Keeps a local copy of the configured lines and writes received images
//!    to disk.
//!
//! A second, optional connection can carry raw image bytes with no framing
//! at all; the client salvages whole images out of that stream once it goes
//! quiet.

/// Application layer: request builders and the line catalog.
pub mod application;

/// Infrastructure layer: TCP connection and on-disk storage.
pub mod infrastructure;
