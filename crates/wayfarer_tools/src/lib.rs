#![forbid(unsafe_code)]

pub mod inspect_cli;
