#![deny(missing_docs)]
//! # delta-engine — the stateless execution core
//!
//! One engine process drives one run: a Think→Act→Observe loop over an
//! append-only journal. The journal plus the metadata file ARE the run's
//! state — the engine holds nothing in memory it cannot rebuild from
//! disk, which is what makes crash recovery and the ask-human pause
//! cheap: stop the process, start another one later, and the loop
//! continues from the journal.
//!
//! | Piece | Module | Job |
//! |-------|--------|-----|
//! | Engine loop | [`Engine`] | Sequence context → model → tools → journal |
//! | Ask-human broker | [`broker`] | Inline prompt, or pause with exit code 101 |
//! | Janitor | [`janitor`] | Decide whether a RUNNING run is actually alive |
//! | Run layout | [`RunPaths`] | `<workspace>/.delta/<run_id>/` |
//!
//! Failure policy: tool and hook problems become journal events and
//! observations the model can react to; only configuration errors,
//! journal corruption, and LLM transport failures escape [`Engine::run`].

pub mod broker;
pub mod janitor;

mod engine;
mod paths;

pub use engine::{Engine, EngineOptions, RunOutcome, OBSERVATION_CAP};
pub use paths::{RunPaths, DELTA_DIR_NAME};
