//! livememo: mark moments of a live stream by its running time, annotate
//! them, and export the list.

pub mod board;
pub mod bridge;
pub mod cdp;
pub mod cli;
pub mod clipboard;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod locator;
pub mod observer;
pub mod protocol;
pub mod store;
pub mod timecode;
pub mod trigger;

pub use error::{LivememoError, Result};
