#![deny(missing_docs)]
//! Tool execution for the Delta Engine.
//!
//! Three stages, each its own seam:
//!
//! 1. [`expand`] — `exec:`/`shell:` sugar becomes the normalized
//!    `command + parameters` form at configuration time.
//! 2. [`compose`] — a normalized definition plus model-supplied arguments
//!    becomes a concrete argv and optional stdin string.
//! 3. [`execute`] — the argv runs as a subprocess with the workspace as
//!    CWD, `AGENT_HOME` exported, full stream capture, and a hard timeout.
//!
//! The security invariant lives in stages 1–2: model-supplied values are
//! never concatenated into a command string. They travel as argv elements,
//! as stdin bytes, or as shell positional parameters dereferenced behind
//! `"$N"` quoting.
//!
//! Execution failures are values, not errors: non-zero exit, timeout, and
//! spawn failure all come back as an [`ExecutionResult`] with
//! `success == false` so the engine can turn them into observations.

pub mod expand;

mod exec;

pub use exec::{
    compose, execute, validate_required, ExecutionContext, ExecutionFailure, ExecutionResult,
    ResolvedInvocation, DEFAULT_TOOL_TIMEOUT_MS,
};
