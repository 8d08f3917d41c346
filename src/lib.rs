//! Ciclo - Perfetto GPU trace cycle detector and kernel comparator
//!
//! This library ingests Chrome/Perfetto `traceEvents` JSON traces, isolates
//! GPU kernel completion events, discovers the repeating structural units
//! in the stream (transformer layers, prefill/decode phases), aggregates
//! per-kernel timing statistics across repetitions, and compares two such
//! analyses kernel by kernel.

pub mod batch;
pub mod cli;
pub mod compare;
pub mod csv_output;
pub mod cycle;
pub mod error;
pub mod parser;
pub mod signature;
pub mod stats;
pub mod xlsx_output;
