//! Execution tracing hooks.
//!
//! The interpreter is parameterized over a [`Tracer`]; with [`NoopTracer`]
//! every hook monomorphizes to nothing. [`RingTracer`] keeps a bounded
//! buffer of recent events so the CLI can dump "what just happened" next to
//! a fatal diagnostic, and [`StderrTracer`] streams everything for
//! debugging sessions.

use std::collections::VecDeque;

/// A recorded execution event.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    /// A statement began executing at the given source line.
    Stmt { line: u32 },
    /// A call pushed a frame.
    Call { name: String, depth: usize },
    /// A call popped a frame.
    Return { depth: usize },
    /// The event loop switched to a coroutine.
    Task { name: String },
    /// An exception was raised.
    Raise { exc: &'static str, message: String },
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stmt { line } => write!(f, "stmt line {line}"),
            Self::Call { name, depth } => write!(f, "call {name} (depth {depth})"),
            Self::Return { depth } => write!(f, "return (depth {depth})"),
            Self::Task { name } => write!(f, "task {name}"),
            Self::Raise { exc, message } => write!(f, "raise {exc}: {message}"),
        }
    }
}

/// Hook points for execution tracing. All methods default to no-ops.
pub trait Tracer {
    fn event(&mut self, event: TraceEvent) {
        let _ = event;
    }
}

/// Zero-cost default: every hook compiles away.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Streams every event to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn event(&mut self, event: TraceEvent) {
        eprintln!("[trace] {event}");
    }
}

/// Keeps the most recent events in a circular buffer.
#[derive(Debug)]
pub struct RingTracer {
    events: VecDeque<TraceEvent>,
    capacity: usize,
}

impl RingTracer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Recent events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }
}

impl Default for RingTracer {
    fn default() -> Self {
        Self::new(128)
    }
}

impl Tracer for RingTracer {
    fn event(&mut self, event: TraceEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_tracer_drops_oldest() {
        let mut tracer = RingTracer::new(2);
        tracer.event(TraceEvent::Stmt { line: 1 });
        tracer.event(TraceEvent::Stmt { line: 2 });
        tracer.event(TraceEvent::Stmt { line: 3 });
        let lines: Vec<u32> = tracer
            .events()
            .map(|e| match e {
                TraceEvent::Stmt { line } => *line,
                _ => panic!("unexpected event"),
            })
            .collect();
        assert_eq!(lines, vec![2, 3]);
    }
}
