//! Tests for the queue subcommands.

use super::parse;
use crate::cli::{CliCommand, QueueCommand};

#[test]
fn cli_parse_queue_add_defaults() {
    match parse(&["qdm", "queue", "add"]) {
        CliCommand::Queue(QueueCommand::Add(o)) => {
            assert!(o.save_dir.is_none());
            assert!(o.max_concurrent.is_none());
            assert!(o.bandwidth.is_none());
            assert!(o.strict.is_none());
        }
        _ => panic!("expected queue add"),
    }
}

#[test]
fn cli_parse_queue_add_all_options() {
    match parse(&[
        "qdm",
        "queue",
        "add",
        "--save-dir",
        "/srv/dl",
        "--max-concurrent",
        "2",
        "--bandwidth",
        "512",
        "--start",
        "22:00",
        "--end",
        "06:00",
        "--max-retries",
        "1",
        "--strict",
        "true",
    ]) {
        CliCommand::Queue(QueueCommand::Add(o)) => {
            assert_eq!(o.save_dir.as_deref(), Some(std::path::Path::new("/srv/dl")));
            assert_eq!(o.max_concurrent, Some(2));
            assert_eq!(o.bandwidth, Some(512));
            assert_eq!(o.start.as_deref(), Some("22:00"));
            assert_eq!(o.end.as_deref(), Some("06:00"));
            assert_eq!(o.max_retries, Some(1));
            assert_eq!(o.strict, Some(true));
        }
        _ => panic!("expected queue add with options"),
    }
}

#[test]
fn cli_parse_queue_list_and_remove() {
    assert!(matches!(
        parse(&["qdm", "queue", "list"]),
        CliCommand::Queue(QueueCommand::List)
    ));
    match parse(&["qdm", "queue", "remove", "4"]) {
        CliCommand::Queue(QueueCommand::Remove { id }) => assert_eq!(id, 4),
        _ => panic!("expected queue remove"),
    }
}

#[test]
fn cli_parse_queue_edit() {
    match parse(&["qdm", "queue", "edit", "2", "--bandwidth", "0"]) {
        CliCommand::Queue(QueueCommand::Edit { id, options }) => {
            assert_eq!(id, 2);
            assert_eq!(options.bandwidth, Some(0));
            assert!(options.start.is_none());
        }
        _ => panic!("expected queue edit"),
    }
}
