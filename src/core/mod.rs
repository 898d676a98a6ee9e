//! Core of the restricted clipboard shell.
//!
//! Leaves first: tokenizing and parsing know nothing about the filesystem,
//! the resolver and transfer engine know nothing about requests, and the
//! dispatcher ties them together.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod output;
pub mod request;
pub mod resolver;
pub mod restriction;
pub mod store;
pub mod telemetry;
pub mod tokenize;
pub mod transfer;
