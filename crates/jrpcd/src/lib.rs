//! Server-side pieces of `jrpcd`: the HTTP front and logging bootstrap.
//!
//! The binary in `main.rs` wires these together with the core library.

pub mod http;
pub mod logging;
