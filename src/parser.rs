//! Streaming Perfetto trace parser
//!
//! Traces are a single JSON object whose `traceEvents` member holds an
//! array that routinely runs to hundreds of millions of entries. The parser
//! streams that array with a serde visitor instead of building a DOM,
//! decompresses transparently when the path ends in `.gz`, and keeps only
//! GPU kernel completion samples (`cat == "kernel"`, `ph == "X"`).
//! Malformed array elements are skipped so a truncated trace stays usable.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::Value;

use crate::cycle;
use crate::error::{CicloError, Result};

/// Read buffer size. Large traces are dominated by sequential scan cost, so
/// the reader uses a big buffer up front.
const READ_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// How often the early-stop path re-probes the accumulated events.
const EARLY_STOP_CHECK_INTERVAL: usize = 10_000;

/// A single GPU kernel completion event from the trace.
///
/// Events arrive in stream order, which for well-formed traces equals
/// execution order on the emitting device. Timestamps and durations are in
/// microseconds. Process and thread ids are retained but not interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelEvent {
    pub name: String,
    pub ts: f64,
    pub dur: f64,
    pub pid: i64,
    pub tid: i64,
}

impl KernelEvent {
    /// Convenience constructor for synthetic event streams in tests.
    pub fn named(name: &str, dur: f64) -> Self {
        KernelEvent {
            name: name.to_string(),
            ts: 0.0,
            dur,
            pid: 0,
            tid: 0,
        }
    }
}

/// Extract a retained kernel event from one decoded array element.
///
/// Returns `None` both for events that are not kernel completions and for
/// elements that are structurally unusable; either way the stream continues.
fn kernel_event_from_value(value: &Value) -> Option<KernelEvent> {
    let obj = value.as_object()?;
    if obj.get("cat")?.as_str()? != "kernel" {
        return None;
    }
    if obj.get("ph")?.as_str()? != "X" {
        return None;
    }
    let name = obj.get("name")?.as_str()?.to_string();
    Some(KernelEvent {
        name,
        ts: obj.get("ts").and_then(Value::as_f64).unwrap_or(0.0),
        dur: obj.get("dur").and_then(Value::as_f64).unwrap_or(0.0),
        pid: obj.get("pid").and_then(Value::as_i64).unwrap_or(0),
        tid: obj.get("tid").and_then(Value::as_i64).unwrap_or(0),
    })
}

/// Shared state threaded through the streaming visitors.
struct ParseState<'a> {
    callback: &'a mut dyn FnMut(KernelEvent) -> bool,
    found_trace_events: bool,
    stopped: bool,
    events_seen: u64,
    kernels_seen: u64,
}

struct TraceObjectSeed<'a, 'b>(&'b mut ParseState<'a>);

impl<'de> DeserializeSeed<'de> for TraceObjectSeed<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for TraceObjectSeed<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object with a traceEvents array")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let state = self.0;
        while let Some(key) = map.next_key::<String>()? {
            if key == "traceEvents" {
                state.found_trace_events = true;
                map.next_value_seed(EventArraySeed(&mut *state))?;
            } else {
                // Skip other top-level members by reading and discarding.
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

struct EventArraySeed<'a, 'b>(&'b mut ParseState<'a>);

impl<'de> DeserializeSeed<'de> for EventArraySeed<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for EventArraySeed<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a traceEvents array")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        let state = self.0;
        while let Some(value) = seq.next_element::<Value>()? {
            state.events_seen += 1;

            if let Some(event) = kernel_event_from_value(&value) {
                state.kernels_seen += 1;
                if !(state.callback)(event) {
                    state.stopped = true;
                    // Abort the stream; the caller treats this as success.
                    return Err(de::Error::custom("consumer requested stop"));
                }
            }

            if state.events_seen % 500_000 == 0 {
                eprint!(
                    "\rProcessed {} events, found {} kernels...",
                    state.events_seen, state.kernels_seen
                );
            }
        }
        if state.events_seen >= 500_000 {
            eprintln!(
                "\rProcessed {} events, found {} kernels. Done.",
                state.events_seen, state.kernels_seen
            );
        }
        Ok(())
    }
}

fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)
        .map_err(|e| CicloError::InputUnreadable(format!("{}: {e}", path.display())))?;

    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Stream the trace at `path`, invoking `callback` for every retained
/// kernel event. The callback returns `false` to stop parsing early.
pub fn parse_kernel_events_with_callback<F>(path: &Path, mut callback: F) -> Result<()>
where
    F: FnMut(KernelEvent) -> bool,
{
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, open_reader(path)?);
    let mut deserializer = serde_json::Deserializer::from_reader(reader);

    let mut state = ParseState {
        callback: &mut callback,
        found_trace_events: false,
        stopped: false,
        events_seen: 0,
        kernels_seen: 0,
    };

    match TraceObjectSeed(&mut state).deserialize(&mut deserializer) {
        Ok(()) => {}
        Err(_) if state.stopped => {}
        // EOF inside or right after the array: a truncated trace; keep what
        // was collected.
        Err(e) if e.is_eof() && state.found_trace_events => {
            tracing::warn!("trace truncated after {} events", state.events_seen);
        }
        Err(e) => {
            return Err(CicloError::InputUnreadable(format!(
                "{}: {e}",
                path.display()
            )));
        }
    }

    if !state.found_trace_events {
        return Err(CicloError::InputUnreadable(format!(
            "{}: no traceEvents array found",
            path.display()
        )));
    }

    Ok(())
}

/// Parse the whole trace into an in-memory event vector.
pub fn parse_kernel_events(path: &Path) -> Result<Vec<KernelEvent>> {
    let mut events = Vec::new();
    parse_kernel_events_with_callback(path, |event| {
        events.push(event);
        true
    })?;
    Ok(events)
}

/// Parse the trace, stopping early once a confident repeating cycle shows
/// up in the accumulated events.
///
/// Every [`EARLY_STOP_CHECK_INTERVAL`] retained kernels a cheap periodicity
/// probe runs against the buffer; ten consecutive matching repetitions end
/// the parse. This is purely an optimization for very large traces: the
/// returned prefix feeds the same detector as a full parse.
pub fn parse_with_early_stop(
    path: &Path,
    min_cycle: usize,
    max_cycle: usize,
) -> Result<Vec<KernelEvent>> {
    let mut events: Vec<KernelEvent> = Vec::new();
    let min_events_for_detection = (min_cycle * 5).max(1000);

    parse_kernel_events_with_callback(path, |event| {
        events.push(event);
        let count = events.len();

        if count % 50_000 == 0 {
            eprint!("\rCollected {count} kernels, checking for cycles...");
        }

        if count >= min_events_for_detection && count % EARLY_STOP_CHECK_INTERVAL == 0 {
            let max = max_cycle.min(count / 3);
            if let Some(info) = cycle::quick_probe(&events, min_cycle, max) {
                if info.num_cycles >= 10 {
                    eprintln!(
                        "\rEarly stop: detected cycle of length {} with {} repetitions (at {} kernels)",
                        info.cycle_length, info.num_cycles, count
                    );
                    return false;
                }
            }
        }

        true
    })?;

    if events.len() >= 50_000 {
        eprintln!("\rCollected {} kernels. Done.", events.len());
    }

    Ok(events)
}
