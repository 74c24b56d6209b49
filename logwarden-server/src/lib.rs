//! Library surface of the Logwarden server: the CRLF frame codec and the
//! TCP ingest layer. The binary in `main.rs` wires these to the processing
//! pipeline; integration tests drive them directly.

pub mod codec;
pub mod ingest;
