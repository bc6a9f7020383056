pub mod archive;
pub mod cleanup;
pub mod clone;
pub mod commands;
pub mod error;
pub mod http;
pub mod link;
pub mod package;
pub mod resolve;
pub mod runtime;
