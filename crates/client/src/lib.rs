//! Client runtime for the flowline pipeline service.
//! Pipes send into a route and poll one step; workers drain a pipe
//! through ordered handler chains. Transport lives behind the
//! [`Driver`] trait, with [`http::HttpDriver`] talking to the hosted
//! REST API.

pub mod driver;
pub mod error;
pub mod http;
pub mod pipe;
mod pump;
pub mod retry;
pub mod worker;

pub use {
    driver::{Driver, DynDriver},
    error::{Error, Result},
    http::{DEFAULT_ENDPOINT, HttpConfig, HttpDriver},
    pipe::Pipe,
    retry::RetryPolicy,
    worker::{ErrorHandler, MessageHandler, Worker},
};
