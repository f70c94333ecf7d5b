//! The evaluation engine.
//!
//! `Vm` owns the heap, the blueprint registry, and the scheduler queues, and
//! executes statements by walking the AST. Expression evaluation, operator
//! semantics, attribute access, and the call machinery live in the sibling
//! modules; this one holds statement execution, the suspend/resume
//! bookkeeping, and the event loop.
//!
//! # Suspension
//!
//! `await` unwinds with `Signal::Suspend`. On the way out, every block and
//! branching statement pushes a [`ResumeStep`] describing where execution
//! was, leaf first; the finished path is stored on the coroutine. Resumption
//! replays the path from the root: blocks jump to the saved statement index,
//! branch statements re-enter the saved branch without re-evaluating their
//! condition, and the one statement that suspended is re-executed with the
//! awaited result injected, which the await expression consumes instead of
//! re-evaluating its operand.

mod attrs;
mod binary;
mod call;
mod eval;

use std::{
    mem,
    rc::Rc,
    time::{Duration, Instant},
};

use crate::{
    blueprint::{Blueprint, BlueprintId, Blueprints, Closure},
    exception::{ExcType, Raised, RunError, RunResult, Signal},
    expressions::{
        AccessSeg, AssignTarget, Block, CatchClause, ExprLoc, FunctionDef, FunctionId, Stmt,
    },
    heap::{Heap, HeapData, HeapId},
    io::PrintWriter,
    object::Object,
    scope::{self, Scope},
    sched::{Coroutine, CoroutineKind, CoroutineState, ResumeStep, SavedFlow, Scheduler},
    tracer::{TraceEvent, Tracer},
    value::{ReprCtx, Value, drop_values},
};

pub(crate) type Exec<T> = Result<T, Signal>;

/// Statement-level control flow.
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// One entry of the synchronous call stack.
#[derive(Debug)]
struct Frame {
    scope: HeapId,
    /// Blueprint the running method was found on; anchors `super`.
    defining_class: Option<BlueprintId>,
    name: String,
}

const MAX_CALL_DEPTH: usize = 200;

pub(crate) struct Vm<'a, P: PrintWriter, Tr: Tracer> {
    pub(super) heap: Heap,
    pub(super) functions: &'a [Rc<FunctionDef>],
    pub(super) blueprints: Blueprints,
    pub(super) sched: Scheduler,
    pub(super) print: &'a mut P,
    pub(super) tracer: &'a mut Tr,
    globals: HeapId,
    /// Coroutine currently being stepped by the event loop.
    current_task: Option<HeapId>,
    /// Saved path being consumed while descending back to a suspension
    /// point; root entry at the end.
    resume_cursor: Vec<ResumeStep>,
    /// Path being built while unwinding out of a suspension, leaf first.
    suspend_path: Vec<ResumeStep>,
    /// Result injected into the resumed coroutine, consumed by the await
    /// expression at the suspension point.
    pub(super) injected: Option<Result<Value, Raised>>,
    frames: Vec<Frame>,
    main_task: Option<HeapId>,
    /// Value of the last top-level expression statement; becomes the
    /// program result when `<main>` falls off its body.
    main_last_value: Option<Value>,
}

impl<'a, P: PrintWriter, Tr: Tracer> Vm<'a, P, Tr> {
    pub fn new(functions: &'a [Rc<FunctionDef>], print: &'a mut P, tracer: &'a mut Tr) -> Self {
        let mut heap = Heap::new();
        let globals = heap.allocate(HeapData::Scope(Scope::new(None)));
        Self {
            heap,
            functions,
            blueprints: Blueprints::new(),
            sched: Scheduler::new(),
            print,
            tracer,
            globals,
            current_task: None,
            resume_cursor: Vec::new(),
            suspend_path: Vec::new(),
            injected: None,
            frames: Vec::new(),
            main_task: None,
            main_last_value: None,
        }
    }

    /// Runs the program to completion: spawns the main coroutine and drives
    /// the event loop until both queues drain.
    pub fn run_program(&mut self, main: FunctionId) -> Result<Value, RunError> {
        self.heap.inc_ref(self.globals);
        let main_co = self.heap.allocate(HeapData::Coroutine(Coroutine::new_body(
            "<main>".to_owned(),
            main,
            self.globals,
            None,
        )));
        self.main_task = Some(main_co);
        self.coro_mut(main_co).state = CoroutineState::Runnable;
        self.heap.inc_ref(main_co);
        self.sched.push_ready(main_co);

        self.run_loop();

        let (result, exception) = {
            let c = self.coro_mut(main_co);
            debug_assert!(c.is_done(), "event loop exited with main unfinished");
            (c.result.take(), c.exception.take())
        };
        self.heap.dec_ref(main_co);
        match exception {
            Some(raised) => {
                let error = raised.error.clone();
                raised.drop_with_heap(&mut self.heap);
                Err(error)
            }
            None => Ok(result.unwrap_or(Value::Null)),
        }
    }

    /// Converts a runtime value into the public object form.
    pub fn to_object(&self, value: &Value) -> Object {
        Object::from_value(value, &self.repr_ctx())
    }

    /// Releases the references owned by the registry and the global scope.
    /// Remaining heap entries (reference cycles included) die with the arena.
    pub fn shutdown(&mut self) {
        let mut blueprints = mem::take(&mut self.blueprints);
        blueprints.free_all(&mut self.heap);
        if let Some(last) = self.main_last_value.take() {
            last.drop_with_heap(&mut self.heap);
        }
        self.heap.dec_ref(self.globals);
    }

    pub(super) fn repr_ctx(&self) -> ReprCtx<'_> {
        ReprCtx {
            heap: &self.heap,
            blueprints: &self.blueprints,
            functions: self.functions,
        }
    }

    pub(super) fn scope_id(&self) -> HeapId {
        self.frames.last().map_or(self.globals, |f| f.scope)
    }

    pub(super) fn current_task(&self) -> Option<HeapId> {
        self.current_task
    }

    pub(super) fn defining_class(&self) -> Option<BlueprintId> {
        self.frames.last().and_then(|f| f.defining_class)
    }

    pub(super) fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub(super) fn push_frame(&mut self, scope: HeapId, defining_class: Option<BlueprintId>, name: String) {
        self.tracer.event(TraceEvent::Call {
            name: name.clone(),
            depth: self.frames.len() + 1,
        });
        self.frames.push(Frame {
            scope,
            defining_class,
            name,
        });
    }

    pub(super) fn pop_frame(&mut self) {
        self.frames.pop();
        self.tracer.event(TraceEvent::Return {
            depth: self.frames.len(),
        });
    }

    pub(super) fn coro(&self, id: HeapId) -> &Coroutine {
        match self.heap.get(id) {
            HeapData::Coroutine(c) => c,
            other => panic!("expected coroutine on heap, found {}", other.type_name()),
        }
    }

    pub(super) fn coro_mut(&mut self, id: HeapId) -> &mut Coroutine {
        match self.heap.get_mut(id) {
            HeapData::Coroutine(c) => c,
            other => panic!("expected coroutine on heap, found {}", other.type_name()),
        }
    }

    // === event loop ===

    /// One tick: promote due sleepers, then run the head of the ready queue.
    /// Exits once both queues are empty.
    fn run_loop(&mut self) {
        loop {
            for id in self.sched.take_due(Instant::now()) {
                self.coro_mut(id).state = CoroutineState::Runnable;
                self.sched.push_ready(id);
            }
            let Some(id) = self.sched.pop_ready() else {
                if let Some(deadline) = self.sched.next_deadline() {
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    }
                    continue;
                }
                return;
            };
            self.step(id);
            self.heap.dec_ref(id);
        }
    }

    fn step(&mut self, id: HeapId) {
        let name = self.coro(id).name.clone();
        self.tracer.event(TraceEvent::Task { name });
        match &self.coro(id).kind {
            CoroutineKind::Sleep { .. } => self.step_sleep(id),
            CoroutineKind::Gather { .. } => self.step_gather(id),
            CoroutineKind::Body { .. } => self.step_body(id),
        }
    }

    fn step_sleep(&mut self, id: HeapId) {
        let (cancelled, armed, duration) = {
            let c = self.coro(id);
            let CoroutineKind::Sleep {
                duration_sec,
                deadline,
            } = &c.kind
            else {
                unreachable!("step_sleep on non-sleep coroutine");
            };
            (c.cancelled, deadline.is_some(), *duration_sec)
        };
        if cancelled {
            self.complete(id, Err(RunError::cancelled().into()));
            return;
        }
        if armed {
            // woken by the sleep queue: the deadline has passed
            self.complete(id, Ok(Value::Null));
            return;
        }
        let wake_at = Instant::now() + Duration::from_secs_f64(duration.max(0.0));
        {
            let c = self.coro_mut(id);
            let CoroutineKind::Sleep { deadline, .. } = &mut c.kind else {
                unreachable!("step_sleep on non-sleep coroutine");
            };
            *deadline = Some(wake_at);
            c.state = CoroutineState::SuspendedSleep;
        }
        self.heap.inc_ref(id);
        self.sched.add_sleeper(wake_at, id);
    }

    fn step_gather(&mut self, id: HeapId) {
        let (started, cancelled, children) = {
            let c = self.coro(id);
            let CoroutineKind::Gather {
                children, started, ..
            } = &c.kind
            else {
                unreachable!("step_gather on non-gather coroutine");
            };
            (*started, c.cancelled, children.clone())
        };
        if started {
            // nothing to do on a spurious wake; completion comes from the children
            self.try_finalize_gather(id);
            return;
        }
        {
            let c = self.coro_mut(id);
            let CoroutineKind::Gather { started, .. } = &mut c.kind else {
                unreachable!("step_gather on non-gather coroutine");
            };
            *started = true;
            c.state = CoroutineState::SuspendedAwait;
        }
        for (index, child) in children.iter().copied().enumerate() {
            let done_outcome = {
                let c = self.coro(child);
                if c.is_done() {
                    Some(match (&c.result, &c.exception) {
                        (Some(value), _) => Ok(value.shallow()),
                        (None, Some(raised)) => Err(raised.clone_with_heap(&self.heap)),
                        (None, None) => Ok(Value::Null),
                    })
                } else {
                    None
                }
            };
            if let Some(outcome) = done_outcome {
                let outcome = match outcome {
                    Ok(shallow) => Ok(shallow.copy_for_read(&mut self.heap)),
                    Err(raised) => Err(raised),
                };
                self.record_child_result(id, index, outcome);
                continue;
            }
            self.heap.inc_ref(id);
            let schedule = {
                let c = self.coro_mut(child);
                c.parent_gather = Some((id, index));
                if c.state == CoroutineState::New {
                    c.state = CoroutineState::Runnable;
                    true
                } else {
                    false
                }
            };
            if schedule {
                self.heap.inc_ref(child);
                self.sched.push_ready(child);
            }
        }
        if cancelled {
            for child in children {
                self.cancel_coroutine(child);
            }
        }
        self.try_finalize_gather(id);
    }

    /// Records one settled child and finalizes the gather when it was the
    /// last one pending.
    fn record_child_result(&mut self, gather: HeapId, index: usize, outcome: Result<Value, Raised>) {
        let mut dropped: Option<Raised> = None;
        let finalize = {
            let c = self.coro_mut(gather);
            let CoroutineKind::Gather {
                results,
                pending,
                first_exception,
                ..
            } = &mut c.kind
            else {
                unreachable!("gather child reported to non-gather coroutine");
            };
            match outcome {
                Ok(value) => {
                    debug_assert!(results[index].is_none(), "gather child settled twice");
                    results[index] = Some(value);
                }
                Err(raised) => {
                    if first_exception.as_ref().is_none_or(|(i, _)| index < *i) {
                        dropped = first_exception.replace((index, raised)).map(|(_, r)| r);
                    } else {
                        dropped = Some(raised);
                    }
                }
            }
            *pending -= 1;
            *pending == 0
        };
        if let Some(raised) = dropped {
            raised.drop_with_heap(&mut self.heap);
        }
        if finalize {
            self.finalize_gather(gather);
        }
    }

    fn try_finalize_gather(&mut self, gather: HeapId) {
        let ready = {
            let c = self.coro(gather);
            let CoroutineKind::Gather { pending, .. } = &c.kind else {
                unreachable!("try_finalize_gather on non-gather coroutine");
            };
            !c.is_done() && *pending == 0
        };
        if ready {
            self.finalize_gather(gather);
        }
    }

    /// All children have settled: complete with the ordered result array, or
    /// with the first exception by child index.
    fn finalize_gather(&mut self, gather: HeapId) {
        let (children, results, first_exception) = {
            let c = self.coro_mut(gather);
            let CoroutineKind::Gather {
                children,
                results,
                first_exception,
                ..
            } = &mut c.kind
            else {
                unreachable!("finalize_gather on non-gather coroutine");
            };
            (mem::take(children), mem::take(results), first_exception.take())
        };
        for child in children {
            self.heap.dec_ref(child);
        }
        let outcome = if let Some((_, raised)) = first_exception {
            drop_values(results.into_iter().flatten().collect(), &mut self.heap);
            Err(raised)
        } else {
            let values: Vec<Value> = results
                .into_iter()
                .map(|slot| slot.expect("gather finalized with a missing result"))
                .collect();
            Ok(Value::Ref(self.heap.allocate(HeapData::Array(values))))
        };
        self.complete(gather, outcome);
    }

    fn step_body(&mut self, id: HeapId) {
        let (func, scope, defining, cancelled, body_started, resume, mut injected) = {
            let c = self.coro_mut(id);
            let resume = mem::take(&mut c.resume_path);
            let injected = c.value_from_await.take();
            let CoroutineKind::Body {
                func,
                scope,
                defining,
            } = &c.kind
            else {
                unreachable!("step_body on non-body coroutine");
            };
            (
                *func,
                scope.expect("body coroutine stepped after completion"),
                *defining,
                c.cancelled,
                c.started,
                resume,
                injected,
            )
        };
        if cancelled {
            if !body_started {
                self.drop_injected(injected);
                self.complete(id, Err(RunError::cancelled().into()));
                return;
            }
            // deliver cancellation at the suspension point
            self.drop_injected(injected.take());
            injected = Some(Err(RunError::cancelled().into()));
        }
        self.coro_mut(id).started = true;

        let prev_task = self.current_task.replace(id);
        debug_assert!(prev_task.is_none(), "nested coroutine stepping");
        self.resume_cursor = resume;
        self.injected = injected;
        self.suspend_path.clear();

        let def = self.functions[func.index()].clone();
        self.push_frame(scope, defining, def.name.clone());
        let result = self.exec_block(&def.body);
        self.pop_frame();
        self.current_task = None;
        debug_assert!(self.resume_cursor.is_empty(), "resume path not fully consumed");
        let leftover = self.injected.take();
        self.drop_injected(leftover);

        match result {
            Ok(Flow::Return(value)) => self.complete(id, Ok(value)),
            Ok(Flow::Normal) => {
                let value = if Some(id) == self.main_task {
                    self.main_last_value.take().unwrap_or(Value::Null)
                } else {
                    Value::Null
                };
                self.complete(id, Ok(value));
            }
            Ok(Flow::Break | Flow::Continue) => {
                unreachable!("break/continue escaped a function body");
            }
            Err(Signal::Raise(raised)) => {
                self.tracer.event(TraceEvent::Raise {
                    exc: raised.error.exc.into(),
                    message: raised.error.message.clone(),
                });
                self.complete(id, Err(raised));
            }
            Err(Signal::Suspend) => {
                // the await site already parked this coroutine; keep the path
                let path = mem::take(&mut self.suspend_path);
                self.coro_mut(id).resume_path = path;
            }
        }
    }

    fn drop_injected(&mut self, injected: Option<Result<Value, Raised>>) {
        match injected {
            Some(Ok(value)) => value.drop_with_heap(&mut self.heap),
            Some(Err(raised)) => raised.drop_with_heap(&mut self.heap),
            None => {}
        }
    }

    /// Marks a coroutine done, stores its outcome, wakes every waiter with
    /// an injected copy of the result, and reports to a parent gather.
    pub(super) fn complete(&mut self, id: HeapId, outcome: Result<Value, Raised>) {
        let scope_to_free = {
            let c = self.coro_mut(id);
            debug_assert!(!c.is_done(), "coroutine completed twice");
            c.state = CoroutineState::Done;
            if let CoroutineKind::Body { scope, .. } = &mut c.kind {
                scope.take()
            } else {
                None
            }
        };
        if let Some(scope) = scope_to_free {
            self.heap.dec_ref(scope);
        }

        let (waiters, parent) = {
            let c = self.coro_mut(id);
            (mem::take(&mut c.waiters), c.parent_gather.take())
        };
        for waiter in waiters {
            let injection = match &outcome {
                Ok(value) => {
                    let shallow = value.shallow();
                    Ok(shallow.copy_for_read(&mut self.heap))
                }
                Err(raised) => Err(raised.clone_with_heap(&self.heap)),
            };
            let awaited = {
                let w = self.coro_mut(waiter);
                w.value_from_await = Some(injection);
                w.state = CoroutineState::Runnable;
                w.awaiting_on.take()
            };
            if let Some(target) = awaited {
                debug_assert_eq!(target, id, "waiter was awaiting a different coroutine");
                self.heap.dec_ref(target);
            }
            // the waiter-list reference moves to the ready queue
            self.sched.push_ready(waiter);
        }
        if let Some((gather, index)) = parent {
            let report = match &outcome {
                Ok(value) => {
                    let shallow = value.shallow();
                    Ok(shallow.copy_for_read(&mut self.heap))
                }
                Err(raised) => Err(raised.clone_with_heap(&self.heap)),
            };
            self.record_child_result(gather, index, report);
            self.heap.dec_ref(gather);
        }
        let c = self.coro_mut(id);
        match outcome {
            Ok(value) => c.result = Some(value),
            Err(raised) => c.exception = Some(raised),
        }
    }

    /// `cancel(c)`: edge-triggered, idempotent, irreversible. Suspended
    /// coroutines are rescheduled so the cancellation error is raised at
    /// their suspension point.
    pub(super) fn cancel_coroutine(&mut self, id: HeapId) {
        let (state, already, gather_children) = {
            let c = self.coro_mut(id);
            if c.is_done() {
                return;
            }
            let already = c.cancelled;
            c.cancelled = true;
            let children = if let CoroutineKind::Gather { children, .. } = &c.kind {
                children.clone()
            } else {
                Vec::new()
            };
            (c.state, already, children)
        };
        if already {
            return;
        }
        match state {
            CoroutineState::SuspendedSleep => {
                let removed = self.sched.remove_sleeper(id);
                debug_assert!(removed, "sleeping coroutine missing from the sleep queue");
                self.coro_mut(id).state = CoroutineState::Runnable;
                // the sleep-queue reference moves to the ready queue
                self.sched.push_ready(id);
            }
            CoroutineState::SuspendedAwait => {
                let awaited = self.coro_mut(id).awaiting_on.take();
                if let Some(target) = awaited {
                    let w = self.coro_mut(target);
                    if let Some(at) = w.waiters.iter().position(|w| *w == id) {
                        w.waiters.remove(at);
                    }
                    self.heap.dec_ref(target);
                    self.coro_mut(id).state = CoroutineState::Runnable;
                    // the waiter-list reference moves to the ready queue
                    self.sched.push_ready(id);
                }
                // a gather parent has no awaiting_on entry; its children are
                // cancelled below and completion flows back through them
            }
            CoroutineState::New | CoroutineState::Runnable => {}
            CoroutineState::Done => unreachable!("handled above"),
        }
        for child in gather_children {
            self.cancel_coroutine(child);
        }
    }

    // === statement execution ===

    fn resume_block_start(&mut self) -> usize {
        match self.resume_cursor.pop() {
            Some(ResumeStep::Stmt(index)) => index,
            None => 0,
            Some(other) => {
                debug_assert!(false, "malformed resume path: {other:?}");
                0
            }
        }
    }

    pub(super) fn exec_block(&mut self, stmts: &[Stmt]) -> Exec<Flow> {
        let start = self.resume_block_start();
        for (index, stmt) in stmts.iter().enumerate().skip(start) {
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(Signal::Suspend) => {
                    self.suspend_path.push(ResumeStep::Stmt(index));
                    return Err(Signal::Suspend);
                }
                Err(raise) => return Err(raise),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec<Flow> {
        if let Some(line) = stmt_line(stmt) {
            self.tracer.event(TraceEvent::Stmt { line });
        }
        match stmt {
            Stmt::Let { name, value } => {
                let v = self.eval_expr(value)?;
                let scope_id = self.scope_id();
                let old = scope::scope_mut(&mut self.heap, scope_id).declare(name.clone(), v);
                if let Some(old) = old {
                    old.drop_with_heap(&mut self.heap);
                }
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value } => {
                let v = self.eval_expr(value)?;
                self.assign(target, v)?;
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                let v = self.eval_expr(expr)?;
                if self.current_task == self.main_task && self.frames.len() == 1 {
                    if let Some(old) = self.main_last_value.replace(v) {
                        old.drop_with_heap(&mut self.heap);
                    }
                } else {
                    v.drop_with_heap(&mut self.heap);
                }
                Ok(Flow::Normal)
            }
            Stmt::Show { value } => {
                let v = self.eval_expr(value)?;
                let text = self.repr_ctx().display(&v);
                v.drop_with_heap(&mut self.heap);
                self.print.write(&text);
                self.print.newline();
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => self.exec_if(cond, then_block, else_block.as_deref()),
            Stmt::While { cond, body } => self.exec_while(cond, body),
            Stmt::For { var, iter, body } => self.exec_for(var, iter, body),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Return { value, .. } => {
                let v = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(v))
            }
            Stmt::FunctionDecl { name, func } => {
                let scope_id = self.scope_id();
                self.heap.inc_ref(scope_id);
                let closure = self.heap.allocate(HeapData::Closure(Closure {
                    func: *func,
                    scope: scope_id,
                }));
                let old = scope::scope_mut(&mut self.heap, scope_id).declare(name.clone(), Value::Ref(closure));
                if let Some(old) = old {
                    old.drop_with_heap(&mut self.heap);
                }
                Ok(Flow::Normal)
            }
            Stmt::BlueprintDecl {
                name,
                parent,
                attrs,
                methods,
                ..
            } => self.exec_blueprint_decl(name, parent.as_ref(), attrs, methods),
            Stmt::Try { body, catch, finally } => self.exec_try(body, catch.as_ref(), finally.as_deref()),
            Stmt::Raise { value, range } => {
                let v = self.eval_expr(value)?;
                let message = self.repr_ctx().display(&v);
                Err(Signal::Raise(Raised {
                    error: RunError::new(ExcType::Error, message).with_range(*range),
                    payload: Some(v),
                }))
            }
        }
    }

    fn exec_if(&mut self, cond: &ExprLoc, then_block: &Block, else_block: Option<&[Stmt]>) -> Exec<Flow> {
        // resume directly into the branch that suspended, skipping the condition
        match self.resume_cursor.last() {
            Some(ResumeStep::IfThen) => {
                self.resume_cursor.pop();
                return self.run_branch(then_block, ResumeStep::IfThen);
            }
            Some(ResumeStep::IfElse) => {
                self.resume_cursor.pop();
                let block = else_block.expect("resume path names a missing else block");
                return self.run_branch(block, ResumeStep::IfElse);
            }
            _ => {}
        }
        if self.eval_bool(cond)? {
            self.run_branch(then_block, ResumeStep::IfThen)
        } else if let Some(block) = else_block {
            self.run_branch(block, ResumeStep::IfElse)
        } else {
            Ok(Flow::Normal)
        }
    }

    fn run_branch(&mut self, block: &[Stmt], marker: ResumeStep) -> Exec<Flow> {
        match self.exec_block(block) {
            Err(Signal::Suspend) => {
                self.suspend_path.push(marker);
                Err(Signal::Suspend)
            }
            other => other,
        }
    }

    fn exec_while(&mut self, cond: &ExprLoc, body: &Block) -> Exec<Flow> {
        // finish the suspended iteration before looping normally again
        if matches!(self.resume_cursor.last(), Some(ResumeStep::WhileBody)) {
            self.resume_cursor.pop();
            match self.exec_block(body) {
                Ok(Flow::Normal | Flow::Continue) => {}
                Ok(Flow::Break) => return Ok(Flow::Normal),
                Ok(flow @ Flow::Return(_)) => return Ok(flow),
                Err(Signal::Suspend) => {
                    self.suspend_path.push(ResumeStep::WhileBody);
                    return Err(Signal::Suspend);
                }
                Err(raise) => return Err(raise),
            }
        }
        loop {
            if !self.eval_bool(cond)? {
                return Ok(Flow::Normal);
            }
            match self.exec_block(body) {
                Ok(Flow::Normal | Flow::Continue) => {}
                Ok(Flow::Break) => return Ok(Flow::Normal),
                Ok(flow @ Flow::Return(_)) => return Ok(flow),
                Err(Signal::Suspend) => {
                    self.suspend_path.push(ResumeStep::WhileBody);
                    return Err(Signal::Suspend);
                }
                Err(raise) => return Err(raise),
            }
        }
    }

    fn exec_for(&mut self, var: &str, iter: &ExprLoc, body: &Block) -> Exec<Flow> {
        let (mut items, mut index, resumed) =
            if matches!(self.resume_cursor.last(), Some(ResumeStep::ForBody { .. })) {
                let Some(ResumeStep::ForBody { items, index }) = self.resume_cursor.pop() else {
                    unreachable!("just matched ForBody");
                };
                (items, index, true)
            } else {
                let seq = self.eval_expr(iter)?;
                let items = match self.iteration_items(&seq) {
                    Ok(items) => items,
                    Err(err) => {
                        let err = err.with_range(iter.range);
                        seq.drop_with_heap(&mut self.heap);
                        return Err(err.into());
                    }
                };
                seq.drop_with_heap(&mut self.heap);
                (items, 0, false)
            };
        if resumed {
            // the iteration that suspended: its variable is still bound
            match self.exec_block(body) {
                Ok(Flow::Normal | Flow::Continue) => {}
                Ok(Flow::Break) => {
                    drop_values(items, &mut self.heap);
                    return Ok(Flow::Normal);
                }
                Ok(flow @ Flow::Return(_)) => {
                    drop_values(items, &mut self.heap);
                    return Ok(flow);
                }
                Err(Signal::Suspend) => {
                    self.suspend_path.push(ResumeStep::ForBody { items, index });
                    return Err(Signal::Suspend);
                }
                Err(raise) => {
                    drop_values(items, &mut self.heap);
                    return Err(raise);
                }
            }
        }
        while index < items.len() {
            let item = mem::replace(&mut items[index], Value::Null);
            index += 1;
            let scope_id = self.scope_id();
            let old = scope::scope_mut(&mut self.heap, scope_id).declare(var.to_owned(), item);
            if let Some(old) = old {
                old.drop_with_heap(&mut self.heap);
            }
            match self.exec_block(body) {
                Ok(Flow::Normal | Flow::Continue) => {}
                Ok(Flow::Break) => break,
                Ok(flow @ Flow::Return(_)) => {
                    drop_values(items, &mut self.heap);
                    return Ok(flow);
                }
                Err(Signal::Suspend) => {
                    self.suspend_path.push(ResumeStep::ForBody { items, index });
                    return Err(Signal::Suspend);
                }
                Err(raise) => {
                    drop_values(items, &mut self.heap);
                    return Err(raise);
                }
            }
        }
        drop_values(items, &mut self.heap);
        Ok(Flow::Normal)
    }

    /// Snapshot of the values a `for` loop walks: array/tuple elements,
    /// string characters, or dict keys, each copied for reading.
    fn iteration_items(&mut self, seq: &Value) -> RunResult<Vec<Value>> {
        let Some(id) = seq.ref_id() else {
            return Err(RunError::type_error(format!(
                "cannot iterate over {}",
                seq.type_name(&self.heap)
            )));
        };
        let shallow: Vec<Value> = match self.heap.get(id) {
            HeapData::Array(items) | HeapData::Tuple(items) => items.iter().map(Value::shallow).collect(),
            HeapData::Str(s) => {
                let chars: Vec<String> = s.chars().map(String::from).collect();
                return Ok(chars
                    .into_iter()
                    .map(|c| Value::str(&mut self.heap, c))
                    .collect());
            }
            HeapData::Dict(dict) => {
                let keys: Vec<String> = dict.keys().map(str::to_owned).collect();
                return Ok(keys
                    .into_iter()
                    .map(|k| Value::str(&mut self.heap, k))
                    .collect());
            }
            other => {
                return Err(RunError::type_error(format!("cannot iterate over {}", other.type_name())));
            }
        };
        Ok(shallow.iter().map(|v| v.copy_for_read(&mut self.heap)).collect())
    }

    fn exec_blueprint_decl(
        &mut self,
        name: &str,
        parent: Option<&(String, crate::token::CodeRange)>,
        attrs: &[(String, ExprLoc)],
        methods: &[(String, FunctionId)],
    ) -> Exec<Flow> {
        let parent_id = match parent {
            Some((parent_name, parent_range)) => {
                let scope_id = self.scope_id();
                let Some(owner) = scope::resolve(&self.heap, scope_id, parent_name) else {
                    return Err(RunError::name_error(parent_name).with_range(*parent_range).into());
                };
                let parent_value = scope::scope(&self.heap, owner)
                    .get(parent_name)
                    .expect("resolved scope lost its binding")
                    .shallow();
                match parent_value {
                    Value::Blueprint(id) => Some(id),
                    other => {
                        return Err(RunError::type_error(format!(
                            "`{name}` can only inherit from a blueprint, found {}",
                            other.type_name(&self.heap)
                        ))
                        .with_range(*parent_range)
                        .into());
                    }
                }
            }
            None => None,
        };

        let attrs_scope = self.heap.allocate(HeapData::Scope(Scope::new(None)));
        for (attr_name, attr_expr) in attrs {
            let value = match self.eval_expr(attr_expr) {
                Ok(v) => v,
                Err(err) => {
                    self.heap.dec_ref(attrs_scope);
                    return Err(err);
                }
            };
            let old = scope::scope_mut(&mut self.heap, attrs_scope).declare(attr_name.clone(), value);
            if let Some(old) = old {
                old.drop_with_heap(&mut self.heap);
            }
        }

        let def_scope = self.scope_id();
        let mut init = None;
        for (method_name, func) in methods {
            self.heap.inc_ref(def_scope);
            let closure = self.heap.allocate(HeapData::Closure(Closure {
                func: *func,
                scope: def_scope,
            }));
            if method_name == "init" {
                self.heap.inc_ref(closure);
                init = Some(closure);
            }
            let old =
                scope::scope_mut(&mut self.heap, attrs_scope).declare(method_name.clone(), Value::Ref(closure));
            if let Some(old) = old {
                old.drop_with_heap(&mut self.heap);
            }
        }

        let id = self.blueprints.register(Blueprint {
            name: name.to_owned(),
            parent: parent_id,
            attrs: attrs_scope,
            init,
        });
        let scope_id = self.scope_id();
        let old = scope::scope_mut(&mut self.heap, scope_id).declare(name.to_owned(), Value::Blueprint(id));
        if let Some(old) = old {
            old.drop_with_heap(&mut self.heap);
        }
        Ok(Flow::Normal)
    }

    fn exec_try(&mut self, body: &Block, catch: Option<&CatchClause>, finally: Option<&[Stmt]>) -> Exec<Flow> {
        // resume dispatch: re-enter the block that suspended
        #[derive(PartialEq, Clone, Copy)]
        enum TryResume {
            Finally,
            Catch,
            Body,
            Fresh,
        }
        let resume_kind = match self.resume_cursor.last() {
            Some(ResumeStep::TryFinally { .. }) => TryResume::Finally,
            Some(ResumeStep::TryCatch) => TryResume::Catch,
            Some(ResumeStep::TryBody) => TryResume::Body,
            _ => TryResume::Fresh,
        };
        let pre: Exec<Flow> = match resume_kind {
            TryResume::Finally => {
                let Some(ResumeStep::TryFinally { pending }) = self.resume_cursor.pop() else {
                    unreachable!("just matched TryFinally");
                };
                let finally = finally.expect("resume path names a missing finally block");
                return self.run_finally(finally, pending);
            }
            TryResume::Catch => {
                self.resume_cursor.pop();
                let clause = catch.expect("resume path names a missing catch block");
                self.run_branch(&clause.body, ResumeStep::TryCatch)
            }
            TryResume::Body | TryResume::Fresh => {
                if resume_kind == TryResume::Body {
                    self.resume_cursor.pop();
                }
                let body_result = self.run_branch(body, ResumeStep::TryBody);
                match body_result {
                    Err(Signal::Raise(raised)) if catch.is_some() => {
                        let clause = catch.expect("checked above");
                        self.bind_catch_var(&clause.var, raised);
                        self.run_branch(&clause.body, ResumeStep::TryCatch)
                    }
                    other => other,
                }
            }
        };
        match finally {
            None => pre,
            Some(finally) => {
                let pending = match pre {
                    Ok(Flow::Normal) => SavedFlow::Normal,
                    Ok(Flow::Break) => SavedFlow::Break,
                    Ok(Flow::Continue) => SavedFlow::Continue,
                    Ok(Flow::Return(value)) => SavedFlow::Return(value),
                    Err(Signal::Raise(raised)) => SavedFlow::Raise(raised),
                    Err(Signal::Suspend) => return Err(Signal::Suspend),
                };
                self.run_finally(finally, pending)
            }
        }
    }

    fn bind_catch_var(&mut self, var: &str, raised: Raised) {
        let bound = match raised.payload {
            Some(value) => value,
            None => {
                let text = format!("{}: {}", raised.error.exc, raised.error.message);
                Value::str(&mut self.heap, text)
            }
        };
        let scope_id = self.scope_id();
        let old = scope::scope_mut(&mut self.heap, scope_id).declare(var.to_owned(), bound);
        if let Some(old) = old {
            old.drop_with_heap(&mut self.heap);
        }
    }

    /// Runs a `finally` block and then re-applies the parked disposition,
    /// unless the block overrode it with its own control flow.
    fn run_finally(&mut self, finally: &[Stmt], pending: SavedFlow) -> Exec<Flow> {
        match self.exec_block(finally) {
            Ok(Flow::Normal) => match pending {
                SavedFlow::Normal => Ok(Flow::Normal),
                SavedFlow::Break => Ok(Flow::Break),
                SavedFlow::Continue => Ok(Flow::Continue),
                SavedFlow::Return(value) => Ok(Flow::Return(value)),
                SavedFlow::Raise(raised) => Err(Signal::Raise(raised)),
            },
            Ok(flow) => {
                self.drop_saved_flow(pending);
                Ok(flow)
            }
            Err(Signal::Suspend) => {
                self.suspend_path.push(ResumeStep::TryFinally { pending });
                Err(Signal::Suspend)
            }
            Err(raise) => {
                self.drop_saved_flow(pending);
                Err(raise)
            }
        }
    }

    fn drop_saved_flow(&mut self, pending: SavedFlow) {
        match pending {
            SavedFlow::Return(value) => value.drop_with_heap(&mut self.heap),
            SavedFlow::Raise(raised) => raised.drop_with_heap(&mut self.heap),
            _ => {}
        }
    }

    // === assignment ===

    fn assign(&mut self, target: &AssignTarget, value: Value) -> Exec<()> {
        let (place, keepers) = match self.resolve_assign_place(target) {
            Ok(resolved) => resolved,
            Err(err) => {
                value.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        let old = match place {
            Place::ScopeVar { scope: scope_id, name } => {
                scope::scope_mut(&mut self.heap, scope_id).declare(name, value)
            }
            Place::ArrayElem { array, index } => {
                let HeapData::Array(items) = self.heap.get_mut(array) else {
                    unreachable!("assignment place vanished");
                };
                Some(mem::replace(&mut items[index], value))
            }
            Place::DictKey { dict, key } => {
                let HeapData::Dict(entries) = self.heap.get_mut(dict) else {
                    unreachable!("assignment place vanished");
                };
                entries.insert(key, value)
            }
        };
        if let Some(old) = old {
            old.drop_with_heap(&mut self.heap);
        }
        // the navigated containers were kept alive until after the store:
        // index expressions may run user code that rebinds them
        self.drop_all(keepers);
        Ok(())
    }

    fn resolve_assign_place(&mut self, target: &AssignTarget) -> Exec<(Place, Vec<Value>)> {
        let scope_id = self.scope_id();
        let Some(owner) = scope::resolve(&self.heap, scope_id, &target.base) else {
            return Err(RunError::name_error(&target.base).with_range(target.base_range).into());
        };
        if target.path.is_empty() {
            return Ok((
                Place::ScopeVar {
                    scope: owner,
                    name: target.base.clone(),
                },
                Vec::new(),
            ));
        }
        // every container on the path is held by reference until the store
        // lands, so user code inside an index expression cannot free it
        let mut keepers: Vec<Value> = Vec::new();
        let base = scope::scope(&self.heap, owner)
            .get(&target.base)
            .expect("resolved scope lost its binding")
            .clone_with_heap(&self.heap);
        let mut current = base.shallow();
        keepers.push(base);
        let last = target.path.len() - 1;
        for (at, seg) in target.path.iter().enumerate() {
            let is_last = at == last;
            match seg {
                AccessSeg::Index(index_expr) => {
                    let index_value = match self.eval_expr(index_expr) {
                        Ok(v) => v,
                        Err(err) => {
                            self.drop_all(keepers);
                            return Err(err);
                        }
                    };
                    let step = match self.nav_index(&current, index_value, index_expr, is_last) {
                        Ok(step) => step,
                        Err(err) => {
                            self.drop_all(keepers);
                            return Err(err);
                        }
                    };
                    match step {
                        NavStep::Place(place) => return Ok((place, keepers)),
                        NavStep::Child(child) => {
                            let share = child.clone_with_heap(&self.heap);
                            current = share.shallow();
                            keepers.push(share);
                        }
                    }
                }
                AccessSeg::Attr(attr, attr_range) => {
                    let step = match self.nav_attr(&current, attr, *attr_range, is_last) {
                        Ok(step) => step,
                        Err(err) => {
                            self.drop_all(keepers);
                            return Err(err);
                        }
                    };
                    match step {
                        NavStep::Place(place) => return Ok((place, keepers)),
                        NavStep::Child(child) => {
                            let share = child.clone_with_heap(&self.heap);
                            current = share.shallow();
                            keepers.push(share);
                        }
                    }
                }
            }
        }
        unreachable!("assignment path ended without a place")
    }

    fn nav_attr(
        &mut self,
        current: &Value,
        attr: &str,
        attr_range: crate::token::CodeRange,
        is_last: bool,
    ) -> Exec<NavStep> {
        let Some(id) = current.ref_id() else {
            return Err(RunError::type_error(format!(
                "cannot set attribute on {}",
                current.type_name(&self.heap)
            ))
            .with_range(attr_range)
            .into());
        };
        match self.heap.get(id) {
            HeapData::Instance(instance) => {
                let attrs = instance.attrs;
                if is_last {
                    return Ok(NavStep::Place(Place::ScopeVar {
                        scope: attrs,
                        name: attr.to_owned(),
                    }));
                }
                let Some(child) = scope::scope(&self.heap, attrs).get(attr) else {
                    let type_name = format!("`{}` instance", self.instance_name(id));
                    return Err(RunError::attribute_error(&type_name, attr)
                        .with_range(attr_range)
                        .into());
                };
                Ok(NavStep::Child(child.shallow()))
            }
            HeapData::Dict(entries) => {
                if is_last {
                    return Ok(NavStep::Place(Place::DictKey {
                        dict: id,
                        key: attr.to_owned(),
                    }));
                }
                let Some(child) = entries.get(attr) else {
                    return Err(RunError::key_error(attr).with_range(attr_range).into());
                };
                Ok(NavStep::Child(child.shallow()))
            }
            other => Err(RunError::type_error(format!("cannot set attribute on {}", other.type_name()))
                .with_range(attr_range)
                .into()),
        }
    }

    fn nav_index(&mut self, current: &Value, index_value: Value, index_expr: &ExprLoc, is_last: bool) -> Exec<NavStep> {
        let Some(id) = current.ref_id() else {
            index_value.drop_with_heap(&mut self.heap);
            return Err(RunError::type_error(format!(
                "cannot index {}",
                current.type_name(&self.heap)
            ))
            .with_range(index_expr.range)
            .into());
        };
        match self.heap.get(id) {
            HeapData::Array(items) => {
                let len = items.len();
                let raw = match index_value {
                    Value::Int(raw) => raw,
                    other => {
                        let type_name = other.type_name(&self.heap).to_owned();
                        other.drop_with_heap(&mut self.heap);
                        return Err(RunError::type_error(format!("array index must be an int, got {type_name}"))
                            .with_range(index_expr.range)
                            .into());
                    }
                };
                let at = normalize_index(raw, len).map_err(|e| Signal::from(e.with_range(index_expr.range)))?;
                if is_last {
                    Ok(NavStep::Place(Place::ArrayElem { array: id, index: at }))
                } else {
                    let HeapData::Array(items) = self.heap.get(id) else {
                        unreachable!("array vanished during navigation");
                    };
                    Ok(NavStep::Child(items[at].shallow()))
                }
            }
            HeapData::Dict(_) => {
                let key = match string_content(&index_value, &self.heap) {
                    Some(key) => key,
                    None => {
                        let type_name = index_value.type_name(&self.heap).to_owned();
                        index_value.drop_with_heap(&mut self.heap);
                        return Err(RunError::type_error(format!(
                            "dict keys must be strings, got {type_name}"
                        ))
                        .with_range(index_expr.range)
                        .into());
                    }
                };
                index_value.drop_with_heap(&mut self.heap);
                if is_last {
                    Ok(NavStep::Place(Place::DictKey { dict: id, key }))
                } else {
                    let HeapData::Dict(entries) = self.heap.get(id) else {
                        unreachable!("dict vanished during navigation");
                    };
                    let Some(child) = entries.get(&key) else {
                        return Err(RunError::key_error(&key).with_range(index_expr.range).into());
                    };
                    Ok(NavStep::Child(child.shallow()))
                }
            }
            HeapData::Tuple(items) => {
                if is_last {
                    index_value.drop_with_heap(&mut self.heap);
                    return Err(RunError::type_error("tuples do not support item assignment")
                        .with_range(index_expr.range)
                        .into());
                }
                let len = items.len();
                let raw = match index_value {
                    Value::Int(raw) => raw,
                    other => {
                        let type_name = other.type_name(&self.heap).to_owned();
                        other.drop_with_heap(&mut self.heap);
                        return Err(RunError::type_error(format!("tuple index must be an int, got {type_name}"))
                            .with_range(index_expr.range)
                            .into());
                    }
                };
                let at = normalize_index(raw, len).map_err(|e| Signal::from(e.with_range(index_expr.range)))?;
                let HeapData::Tuple(items) = self.heap.get(id) else {
                    unreachable!("tuple vanished during navigation");
                };
                Ok(NavStep::Child(items[at].shallow()))
            }
            other => {
                let type_name = other.type_name();
                index_value.drop_with_heap(&mut self.heap);
                Err(RunError::type_error(format!("cannot assign into {type_name}"))
                    .with_range(index_expr.range)
                    .into())
            }
        }
    }

    pub(super) fn instance_name(&self, id: HeapId) -> String {
        match self.heap.get(id) {
            HeapData::Instance(instance) => self.blueprints.name(instance.blueprint).to_owned(),
            other => other.type_name().to_owned(),
        }
    }

    pub(super) fn eval_bool(&mut self, expr: &ExprLoc) -> Exec<bool> {
        let value = self.eval_expr(expr)?;
        match value.as_bool() {
            Some(b) => Ok(b),
            None => {
                let type_name = value.type_name(&self.heap).to_owned();
                value.drop_with_heap(&mut self.heap);
                Err(RunError::type_error(format!("condition must be a bool, got {type_name}"))
                    .with_range(expr.range)
                    .into())
            }
        }
    }
}

enum NavStep {
    Place(Place),
    Child(Value),
}

enum Place {
    ScopeVar { scope: HeapId, name: String },
    ArrayElem { array: HeapId, index: usize },
    DictKey { dict: HeapId, key: String },
}

/// Negative indices wrap once through the length; anything still out of
/// range is an error.
pub(super) fn normalize_index(index: i64, len: usize) -> RunResult<usize> {
    let adjusted = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if adjusted < 0 || adjusted as usize >= len {
        Err(RunError::index_error(index, len))
    } else {
        Ok(adjusted as usize)
    }
}

/// Reads string content out of a heap string value.
pub(super) fn string_content(value: &Value, heap: &Heap) -> Option<String> {
    let id = value.ref_id()?;
    match heap.get(id) {
        HeapData::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn stmt_line(stmt: &Stmt) -> Option<u32> {
    let range = match stmt {
        Stmt::Let { value, .. } | Stmt::Assign { value, .. } | Stmt::Show { value } => value.range,
        Stmt::Expr(expr) => expr.range,
        Stmt::If { cond, .. } | Stmt::While { cond, .. } => cond.range,
        Stmt::For { iter, .. } => iter.range,
        Stmt::Return { range, .. } | Stmt::Raise { range, .. } | Stmt::BlueprintDecl { range, .. } => *range,
        Stmt::Break | Stmt::Continue | Stmt::FunctionDecl { .. } | Stmt::Try { .. } => return None,
    };
    Some(range.start.line)
}
