//! OLM OCI CLI - build, push, copy and inspect operator catalogs as OCI artifacts.

pub mod commands;
pub mod output;
