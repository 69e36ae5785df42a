//! Usage: Git credential protocol adapter (request parsing, response writing, dispatch).

pub mod commands;
pub mod input;
pub mod output;
