//! # cctv-core
//!
//! Shared library for the CCTV monitor client containing the stream framing,
//! the JSON message codec, the numeric message-type table, the dispatcher and
//! the best-effort image salvage path.
//!
//! It has zero dependencies on sockets, timers or async runtimes.  Everything
//! here is a pure function of the bytes it is given, which is what lets the
//! client crate drive it from a single event-loop task.
//!
//! # Architecture overview (for beginners)
//!
//! The monitoring server speaks JSON over a single long-lived TCP connection.
//! TCP is a *stream*: it guarantees byte order, but one `read()` may return
//! half a message or three messages glued together.  This crate turns that
//! stream back into messages in three stages:
//!
//! - **`protocol`** – Locating message boundaries (`framing`), turning a
//!   frame's bytes into a [`DecodedMessage`] (`codec`), and the typed payload
//!   shapes behind every numeric `request_id` (`messages`).
//!
//! - **`dispatch`** – Mapping a decoded message's type code to a typed
//!   [`Event`] the application layer can match on.
//!
//! - **`reassembly`** – A degraded fallback for channels where the server
//!   pushes raw image bytes with no framing at all.  It carves JPEGs out of
//!   the blob by scanning for start/end markers.

pub mod dispatch;
pub mod protocol;
pub mod reassembly;

// Re-export the most-used types at the crate root so callers can write
// `cctv_core::FrameDecoder` instead of `cctv_core::protocol::framing::FrameDecoder`.
pub use dispatch::{Dispatcher, Event};
pub use protocol::codec::{decode_frame, encode_message, MessageStream};
pub use protocol::framing::{encode_frame, Frame, FrameDecoder, FramingMode, ResyncStrategy};
pub use protocol::messages::{DecodedMessage, MessageType};
pub use protocol::sequence::CorrelationCounter;
pub use protocol::ProtocolError;
pub use reassembly::{ImageReassembler, ReassemblyBuffer, ReassemblyError, SalvagedImage};
