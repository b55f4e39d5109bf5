//! Durable background jobs over CSV files.
//!
//! A client submits an input file and gets a job id back at once. Workers
//! pick the job off a broker, sum one column of the CSV, and write the
//! total to a result artifact. The client polls the status and fetches the
//! artifact once the job has succeeded.

pub mod accessor;
pub mod api;
pub mod broker;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod intake;
pub mod logging;
pub mod shutdown;
pub mod state_machine;
pub mod store;
pub mod worker;
