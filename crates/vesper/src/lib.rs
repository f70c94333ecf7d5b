#![doc = include_str!("../../../README.md")]

mod blueprint;
mod builtins;
mod dict;
mod exception;
mod expressions;
mod heap;
mod io;
mod object;
mod parse;
mod run;
mod sched;
mod scope;
mod token;
mod tracer;
mod value;
mod vm;

pub use crate::{
    exception::{CANCELLED_ERROR_MSG, ExcType, Exception},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::Object,
    run::Runner,
    token::CodeLoc,
    tracer::{NoopTracer, RingTracer, StderrTracer, TraceEvent, Tracer},
};
