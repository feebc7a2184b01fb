//! Local core for the browser activity tracker.
//!
//! The browser extension forwards tab, window and idle events here. The core
//! keeps a mirror of the browser state, runs every tracking transition through
//! a single sequential queue, appends finished sessions to a day-keyed store
//! and ships a daily plaintext report to a webhook.

pub mod clock;
pub mod config;
pub mod oracle;
pub mod profile;
pub mod queue;
pub mod report;
pub mod server;
pub mod service;
pub mod session;
pub mod store;
#[cfg(test)]
mod test_support;
pub mod tracker;
pub mod trigger;
pub mod webhook;
