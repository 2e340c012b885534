//! Infrastructure layer for the CCTV client.
//!
//! **Dependency rule**: this layer may depend on `application` and `cctv_core`,
//! but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – The TCP connection to the monitoring server: connect
//!   with timeout, framed reads through `cctv_core`, writes with timeout,
//!   and automatic reconnection with a bounded number of attempts.
//!
//! - **`storage`** – The TOML configuration file and the on-disk image store.

pub mod network;
pub mod storage;
