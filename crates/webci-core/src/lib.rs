pub mod checkout;
pub mod environment;
pub mod error;
pub mod event;
pub mod git;
pub mod install;
pub mod io;
pub mod paths;
pub mod report;
pub mod runner;
pub mod runtime;
pub mod shell;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use error::{Result, WebciError};
