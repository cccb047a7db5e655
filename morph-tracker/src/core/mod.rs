/*!
Core architecture modules for the morph unlock tracker
*/

pub mod commands;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod host;
pub mod memory_host;
pub mod morph;
pub mod notifications;
pub mod poller;
pub mod selection;
pub mod service;
