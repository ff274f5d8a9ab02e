//! Offline resilience for a web application's network traffic: a caching proxy that
//! serves from cache when the network is gone, queues writes for replay, and tells
//! observers what happened.

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod logging;
pub mod net;
pub mod notify;
pub mod proxy;
pub mod queue;
pub mod worker;

#[cfg(test)]
mod testing;
