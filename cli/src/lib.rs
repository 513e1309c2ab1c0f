//! A3S Artifact CLI - manage files stored as OCI artifacts.

pub mod commands;
pub mod output;
