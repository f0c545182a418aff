//! Unit tests for heartbeat parsing plus heartbeat and version negotiation.

use std::time::Duration;
use stompwire::{ConnError, Version, negotiate_heartbeats, negotiate_version, parse_heartbeat_header};

// =============================================================================
// parse_heartbeat_header tests
// =============================================================================

#[test]
fn parse_standard_heartbeat() {
    assert_eq!(parse_heartbeat_header("10000,10000"), (10000, 10000));
    assert_eq!(parse_heartbeat_header("0,0"), (0, 0));
    assert_eq!(parse_heartbeat_header("5000,15000"), (5000, 15000));
}

#[test]
fn parse_whitespace_padded() {
    assert_eq!(parse_heartbeat_header(" 10000 , 10000 "), (10000, 10000));
    assert_eq!(parse_heartbeat_header("\t5000\t,\t5000\t"), (5000, 5000));
}

#[test]
fn parse_missing_fields_default_to_zero() {
    assert_eq!(parse_heartbeat_header("10000"), (10000, 0));
    assert_eq!(parse_heartbeat_header("10000,"), (10000, 0));
    assert_eq!(parse_heartbeat_header(",10000"), (0, 10000));
    assert_eq!(parse_heartbeat_header(""), (0, 0));
}

#[test]
fn parse_invalid_values_default_to_zero() {
    assert_eq!(parse_heartbeat_header("abc,10000"), (0, 10000));
    assert_eq!(parse_heartbeat_header("10000,-5"), (10000, 0));
    assert_eq!(parse_heartbeat_header("1.5,2"), (0, 2));
}

#[test]
fn parse_ignores_extra_fields() {
    assert_eq!(parse_heartbeat_header("1,2,3"), (1, 2));
}

// =============================================================================
// negotiate_heartbeats tests
// =============================================================================

fn ms(value: u64) -> Option<Duration> {
    Some(Duration::from_millis(value))
}

#[test]
fn negotiate_takes_larger_interval_per_direction() {
    // client sends every 1000, server wants every 4000: outgoing 4000
    // client wants every 2000, server sends every 3000: incoming 3000
    assert_eq!(negotiate_heartbeats(1000, 2000, 3000, 4000), (ms(4000), ms(3000)));
    assert_eq!(negotiate_heartbeats(10000, 10000, 5000, 5000), (ms(10000), ms(10000)));
}

#[test]
fn negotiate_zero_on_either_side_disables_direction() {
    let table = [
        // (client_out, client_in, server_out, server_in) -> (out, in)
        ((0, 0, 1000, 1000), (None, None)),
        ((1000, 1000, 0, 0), (None, None)),
        ((1000, 0, 5000, 2000), (ms(2000), None)),
        ((0, 1000, 5000, 2000), (None, ms(5000))),
        ((1000, 1000, 0, 2000), (ms(2000), None)),
        ((1000, 1000, 2000, 0), (None, ms(2000))),
    ];
    for ((cx, cy, sx, sy), expected) in table {
        assert_eq!(
            negotiate_heartbeats(cx, cy, sx, sy),
            expected,
            "client {},{} server {},{}",
            cx,
            cy,
            sx,
            sy
        );
    }
}

#[test]
fn negotiate_equal_values() {
    assert_eq!(negotiate_heartbeats(500, 500, 500, 500), (ms(500), ms(500)));
}

// =============================================================================
// negotiate_version tests
// =============================================================================

#[test]
fn version_from_server_header() {
    let offered = Version::ALL;
    assert_eq!(negotiate_version(&offered, Some("1.2")).unwrap(), Version::V1_2);
    assert_eq!(negotiate_version(&offered, Some("1.1")).unwrap(), Version::V1_1);
}

#[test]
fn missing_version_header_means_1_0() {
    assert_eq!(negotiate_version(&Version::ALL, None).unwrap(), Version::V1_0);
    assert!(matches!(
        negotiate_version(&[Version::V1_2], None),
        Err(ConnError::Connect(_))
    ));
}

#[test]
fn version_must_have_been_offered() {
    assert!(matches!(
        negotiate_version(&[Version::V1_1, Version::V1_2], Some("1.0")),
        Err(ConnError::Connect(_))
    ));
}

#[test]
fn unknown_version_is_rejected() {
    assert!(matches!(
        negotiate_version(&Version::ALL, Some("3.0")),
        Err(ConnError::Connect(_))
    ));
}
