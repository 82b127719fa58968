//! CockroachDB support: an HTTP server that stands in for the
//! `userfile`/cloud-storage endpoint CockroachDB's `BACKUP`/`RESTORE`
//! SQL normally talks to, plus the [`engine::CockroachEngine`] that
//! drives the SQL session and flips the bridge between writer and
//! reader mode.

mod bridge;
mod engine;
mod reader;
mod writer;

pub use bridge::Bridge;
pub use engine::CockroachEngine;
