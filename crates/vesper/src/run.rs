//! Public interface for running Vesper code.

use crate::{
    exception::Exception,
    expressions::Program,
    io::PrintWriter,
    object::Object,
    parse::parse,
    tracer::{NoopTracer, Tracer},
    vm::Vm,
};

/// Primary interface for running Vesper code.
///
/// Parsing happens once in [`Runner::new`]; each [`run`](Runner::run) drives
/// a fresh interpreter (heap, scopes, scheduler) to completion.
///
/// # Example
/// ```
/// use vesper::{NoPrint, Object, Runner};
///
/// let runner = Runner::new("let x = 41\nx + 1", "example.vsp").unwrap();
/// let result = runner.run(&mut NoPrint).unwrap();
/// assert_eq!(result, Object::Int(42));
/// ```
#[derive(Debug)]
pub struct Runner {
    program: Program,
    script_name: String,
}

impl Runner {
    /// Parses `code`; `script_name` tags diagnostics.
    ///
    /// # Errors
    /// Returns a syntax `Exception` when the code does not parse.
    pub fn new(code: &str, script_name: &str) -> Result<Self, Exception> {
        let program = parse(code).map_err(|err| Exception::from_parse_error(err, script_name))?;
        Ok(Self {
            program,
            script_name: script_name.to_owned(),
        })
    }

    /// Runs the program to completion, writing `show:` output to `print`.
    ///
    /// The result is the value of the last top-level expression statement
    /// (or null). The event loop drains before this returns: spawned
    /// coroutines either finished or were dropped unawaited.
    ///
    /// # Errors
    /// Returns an `Exception` for an unhandled runtime exception.
    pub fn run(&self, print: &mut impl PrintWriter) -> Result<Object, Exception> {
        self.run_traced(print, &mut NoopTracer)
    }

    /// Like [`run`](Runner::run), with execution trace events delivered to
    /// `tracer`.
    pub fn run_traced(&self, print: &mut impl PrintWriter, tracer: &mut impl Tracer) -> Result<Object, Exception> {
        let mut vm = Vm::new(&self.program.functions, print, tracer);
        let outcome = vm.run_program(self.program.main);
        let result = match outcome {
            Ok(value) => {
                let object = vm.to_object(&value);
                value.drop_with_heap(&mut vm.heap);
                Ok(object)
            }
            Err(error) => Err(Exception::from_run_error(error, &self.script_name)),
        };
        vm.shutdown();
        result
    }
}
