//! HTTP surface for the sluice service.
//!
//! Serves transcoded HLS fragments from the hot tier and registers
//! demand for streams that are not transcoded yet. Everything else
//! (admission, eviction, transcoding) happens in the background loops of
//! `sluice-core`; the handlers here only read the library and feed the
//! popularity counters.

pub mod handlers;
pub mod server;

pub use server::{run_server, AppState};
