//! Feeds Firebird trace manager output into a slow query log table.
//!
//! `fbtracemgr` is kept running by the [`supervisor`], its stdout is cut into one block per
//! trace event by the [`segmenter`], the [`extractor`] keeps the blocks that describe a
//! finished statement with a duration and the [`persister`] stores each of them as a row.

pub mod config;
pub mod extractor;
pub mod persister;
pub mod pipeline;
pub mod segmenter;
pub mod supervisor;
