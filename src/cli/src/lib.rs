//! stagekey CLI - stage digests for multi-stage Dockerfiles.

pub mod commands;
