//! Tests for status, pause, resume, retry and remove.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_status() {
    match parse(&["qdm", "status"]) {
        CliCommand::Status => {}
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_pause() {
    match parse(&["qdm", "pause", "42"]) {
        CliCommand::Pause { id } => assert_eq!(id, 42),
        _ => panic!("expected Pause"),
    }
}

#[test]
fn cli_parse_resume() {
    match parse(&["qdm", "resume", "1"]) {
        CliCommand::Resume { id } => assert_eq!(id, 1),
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_retry() {
    match parse(&["qdm", "retry", "7"]) {
        CliCommand::Retry { id } => assert_eq!(id, 7),
        _ => panic!("expected Retry"),
    }
}

#[test]
fn cli_parse_remove() {
    match parse(&["qdm", "remove", "99"]) {
        CliCommand::Remove { id } => assert_eq!(id, 99),
        _ => panic!("expected Remove"),
    }
}

#[test]
fn cli_rejects_negative_id() {
    assert!(Cli::try_parse_from(["qdm", "pause", "-1"]).is_err());
}
