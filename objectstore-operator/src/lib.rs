#![allow(clippy::result_large_err)]

pub mod api;
pub mod cli;
pub mod config;
pub mod objectstore;
pub mod queue;
pub mod store;

pub mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
