//! `wsh`: a small interactive shell with POSIX job control.
//!
//! Command lines are tokenized and parsed into pipelines. A handful of built-ins (`exit`, `cd`,
//! `jobs`, `fg`, `bg`) run in-process; everything else is launched by the job control engine
//! as one process group per pipeline, either in the foreground (owning the terminal until it
//! stops or exits) or in the background.
//!
//! The main entry point is [`Interpreter`], driven by a [`interpreter::LineSource`]. The job
//! control core lives in [`JobControl`], built from a [`Terminal`] controller and a
//! [`Reconciler`] that collects child status changes from `SIGCHLD`.

mod builtin;
pub mod command;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod interpreter;
pub mod job;
pub mod job_table;
mod launcher;
mod lexer;
mod parser;
pub mod reconciler;
mod resolve;
pub mod terminal;

pub use config::Config;
pub use engine::JobControl;
pub use error::JobError;
/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;
pub use reconciler::Reconciler;
pub use terminal::Terminal;
