//! Coroutines and the cooperative scheduler queues.
//!
//! A coroutine is a stackless suspendable frame. Suspension saves a
//! structural resume path (which statement of which nested block was in
//! flight) instead of machine state; the evaluator re-enters the suspended
//! statement and the pending `value_from_await` is consumed at the await
//! site, so nothing before the suspension point re-runs.
//!
//! The scheduler keeps two queues: a FIFO ready queue and a sleep queue
//! ordered by wakeup deadline (ties keep insertion order). Every id sitting
//! in a queue owns one heap reference on its coroutine.

use std::{collections::VecDeque, time::Instant};

use crate::{
    blueprint::BlueprintId,
    exception::Raised,
    expressions::FunctionId,
    heap::HeapId,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoroutineState {
    /// Created but never scheduled.
    New,
    /// In the ready queue (or being stepped right now).
    Runnable,
    /// Parked on another coroutine's waiter list.
    SuspendedAwait,
    /// Parked in the sleep queue.
    SuspendedSleep,
    /// Finished; exactly one of `result` / `exception` is set.
    Done,
}

/// What a coroutine does when stepped.
#[derive(Debug)]
pub(crate) enum CoroutineKind {
    /// An async function body. `scope` is the execution scope, released when
    /// the coroutine completes. `defining` carries the blueprint an async
    /// method was found on, for `super` resolution inside the body.
    Body {
        func: FunctionId,
        scope: Option<HeapId>,
        defining: Option<BlueprintId>,
    },
    /// `async_sleep(seconds)`: parks itself until the deadline, then
    /// completes with null. The deadline is fixed on the first step.
    Sleep {
        duration_sec: f64,
        deadline: Option<Instant>,
    },
    /// `gather(tasks)`: completes when all children have settled. Results
    /// are kept in input order; the first exception (by child index) wins.
    Gather {
        children: Vec<HeapId>,
        results: Vec<Option<Value>>,
        pending: usize,
        first_exception: Option<(usize, Raised)>,
        started: bool,
    },
}

#[derive(Debug)]
pub(crate) struct Coroutine {
    pub name: String,
    pub kind: CoroutineKind,
    pub state: CoroutineState,
    /// Saved structural position, root step last; consumed on resume.
    pub resume_path: Vec<ResumeStep>,
    /// Injected result of the awaited coroutine, consumed by the await
    /// expression on re-entry. `Some` doubles as the resumed-from-await flag.
    pub value_from_await: Option<Result<Value, Raised>>,
    /// The coroutine this one is suspended on; owns one reference.
    pub awaiting_on: Option<HeapId>,
    /// Coroutines suspended on this one, resumed in registration order.
    /// Each entry owns one reference on the waiter.
    pub waiters: Vec<HeapId>,
    /// Set when this coroutine is a gather child; owns one reference on the
    /// gather, released when this coroutine settles and reports.
    pub parent_gather: Option<(HeapId, usize)>,
    pub cancelled: bool,
    /// True once the body has run at least once; a cancelled coroutine that
    /// never started completes without entering its body.
    pub started: bool,
    pub result: Option<Value>,
    pub exception: Option<Raised>,
}

impl Coroutine {
    fn new(name: String, kind: CoroutineKind) -> Self {
        Self {
            name,
            kind,
            state: CoroutineState::New,
            resume_path: Vec::new(),
            value_from_await: None,
            awaiting_on: None,
            waiters: Vec::new(),
            parent_gather: None,
            cancelled: false,
            started: false,
            result: None,
            exception: None,
        }
    }

    pub fn new_body(name: String, func: FunctionId, scope: HeapId, defining: Option<BlueprintId>) -> Self {
        Self::new(
            name,
            CoroutineKind::Body {
                func,
                scope: Some(scope),
                defining,
            },
        )
    }

    pub fn new_sleep(duration_sec: f64) -> Self {
        Self::new(
            "async_sleep".to_owned(),
            CoroutineKind::Sleep {
                duration_sec,
                deadline: None,
            },
        )
    }

    pub fn new_gather(children: Vec<HeapId>) -> Self {
        let count = children.len();
        Self::new(
            "gather".to_owned(),
            CoroutineKind::Gather {
                children,
                results: (0..count).map(|_| None).collect(),
                pending: count,
                first_exception: None,
                started: false,
            },
        )
    }

    pub fn is_done(&self) -> bool {
        self.state == CoroutineState::Done
    }

    pub(crate) fn collect_refs(&self, out: &mut Vec<HeapId>) {
        match &self.kind {
            CoroutineKind::Body { scope, .. } => {
                if let Some(scope) = scope {
                    out.push(*scope);
                }
            }
            CoroutineKind::Sleep { .. } => {}
            CoroutineKind::Gather {
                children,
                results,
                first_exception,
                ..
            } => {
                out.extend(children.iter().copied());
                for result in results.iter().flatten() {
                    if let Some(id) = result.ref_id() {
                        out.push(id);
                    }
                }
                if let Some((_, raised)) = first_exception
                    && let Some(id) = raised.payload.as_ref().and_then(Value::ref_id)
                {
                    out.push(id);
                }
            }
        }
        for step in &self.resume_path {
            step.collect_refs(out);
        }
        match &self.value_from_await {
            Some(Ok(value)) => {
                if let Some(id) = value.ref_id() {
                    out.push(id);
                }
            }
            Some(Err(raised)) => {
                if let Some(id) = raised.payload.as_ref().and_then(Value::ref_id) {
                    out.push(id);
                }
            }
            None => {}
        }
        if let Some(id) = self.awaiting_on {
            out.push(id);
        }
        out.extend(self.waiters.iter().copied());
        if let Some((gather, _)) = self.parent_gather {
            out.push(gather);
        }
        if let Some(id) = self.result.as_ref().and_then(Value::ref_id) {
            out.push(id);
        }
        if let Some(id) = self
            .exception
            .as_ref()
            .and_then(|raised| raised.payload.as_ref())
            .and_then(Value::ref_id)
        {
            out.push(id);
        }
    }
}

/// One level of a suspended coroutine's structural position.
#[derive(Debug)]
pub(crate) enum ResumeStep {
    /// Index of the in-flight statement in a block.
    Stmt(usize),
    IfThen,
    IfElse,
    WhileBody,
    /// Remaining loop items plus the index of the next one; consumed slots
    /// are nulled out.
    ForBody { items: Vec<Value>, index: usize },
    TryBody,
    TryCatch,
    /// Suspended inside a `finally` block; the pre-finally disposition is
    /// parked here and re-applied when the block completes.
    TryFinally { pending: SavedFlow },
}

impl ResumeStep {
    pub(crate) fn collect_refs(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::ForBody { items, .. } => {
                for item in items {
                    if let Some(id) = item.ref_id() {
                        out.push(id);
                    }
                }
            }
            Self::TryFinally { pending } => pending.collect_refs(out),
            _ => {}
        }
    }
}

/// A control-flow disposition parked while a `finally` block runs.
#[derive(Debug)]
pub(crate) enum SavedFlow {
    Normal,
    Break,
    Continue,
    Return(Value),
    Raise(Raised),
}

impl SavedFlow {
    pub(crate) fn collect_refs(&self, out: &mut Vec<HeapId>) {
        let value = match self {
            Self::Return(value) => Some(value),
            Self::Raise(raised) => raised.payload.as_ref(),
            _ => None,
        };
        if let Some(id) = value.and_then(Value::ref_id) {
            out.push(id);
        }
    }
}

/// The two scheduler queues.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    ready: VecDeque<HeapId>,
    sleeping: Vec<(Instant, HeapId)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ready(&mut self, id: HeapId) {
        debug_assert!(!self.ready.contains(&id), "coroutine enqueued twice");
        self.ready.push_back(id);
    }

    pub fn pop_ready(&mut self) -> Option<HeapId> {
        self.ready.pop_front()
    }

    #[cfg(test)]
    pub fn sleeping_is_empty(&self) -> bool {
        self.sleeping.is_empty()
    }

    /// Inserts keeping the queue sorted by deadline; equal deadlines keep
    /// insertion order.
    pub fn add_sleeper(&mut self, deadline: Instant, id: HeapId) {
        let at = self.sleeping.partition_point(|(d, _)| *d <= deadline);
        self.sleeping.insert(at, (deadline, id));
    }

    /// Removes a parked sleeper (used by `cancel`); returns true when found.
    pub fn remove_sleeper(&mut self, id: HeapId) -> bool {
        if let Some(at) = self.sleeping.iter().position(|(_, s)| *s == id) {
            self.sleeping.remove(at);
            true
        } else {
            false
        }
    }

    /// Pops every sleeper whose deadline has passed, in wakeup order.
    pub fn take_due(&mut self, now: Instant) -> Vec<HeapId> {
        let due = self.sleeping.partition_point(|(d, _)| *d <= now);
        self.sleeping.drain(..due).map(|(_, id)| id).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.sleeping.first().map(|(d, _)| *d)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::heap::{Heap, HeapData};

    fn dummy_id(heap: &mut Heap, tag: &str) -> HeapId {
        heap.allocate(HeapData::Str(tag.to_owned()))
    }

    #[test]
    fn ready_queue_is_fifo() {
        let mut heap = Heap::new();
        let a = dummy_id(&mut heap, "a");
        let b = dummy_id(&mut heap, "b");
        let mut sched = Scheduler::new();
        sched.push_ready(a);
        sched.push_ready(b);
        assert_eq!(sched.pop_ready(), Some(a));
        assert_eq!(sched.pop_ready(), Some(b));
        assert_eq!(sched.pop_ready(), None);
    }

    #[test]
    fn sleepers_wake_in_deadline_order() {
        let mut heap = Heap::new();
        let a = dummy_id(&mut heap, "a");
        let b = dummy_id(&mut heap, "b");
        let c = dummy_id(&mut heap, "c");
        let base = Instant::now();
        let mut sched = Scheduler::new();
        sched.add_sleeper(base + Duration::from_millis(30), a);
        sched.add_sleeper(base + Duration::from_millis(10), b);
        sched.add_sleeper(base + Duration::from_millis(20), c);
        let due = sched.take_due(base + Duration::from_millis(25));
        assert_eq!(due, vec![b, c]);
        assert_eq!(sched.next_deadline(), Some(base + Duration::from_millis(30)));
    }

    #[test]
    fn equal_deadlines_keep_insertion_order() {
        let mut heap = Heap::new();
        let a = dummy_id(&mut heap, "a");
        let b = dummy_id(&mut heap, "b");
        let base = Instant::now();
        let deadline = base + Duration::from_millis(5);
        let mut sched = Scheduler::new();
        sched.add_sleeper(deadline, a);
        sched.add_sleeper(deadline, b);
        assert_eq!(sched.take_due(deadline), vec![a, b]);
    }

    #[test]
    fn cancel_can_remove_a_sleeper() {
        let mut heap = Heap::new();
        let a = dummy_id(&mut heap, "a");
        let mut sched = Scheduler::new();
        sched.add_sleeper(Instant::now(), a);
        assert!(sched.remove_sleeper(a));
        assert!(!sched.remove_sleeper(a));
        assert!(sched.sleeping_is_empty());
    }
}
