//! Inbound endpoints: directory polling and RabbitMQ consumption feeding
//! named injection sequences.
//!
//! Both endpoint kinds share one lifecycle, implemented once in
//! [`work_queue`]: connect with retry, enumerate, claim, process, resolve
//! the outcome, finalize exactly once.

pub mod broker;
pub mod config;
pub mod endpoint;
pub mod file;
pub mod process;
pub mod supervisor;
pub mod utils;
pub mod work_queue;
