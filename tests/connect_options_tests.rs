//! Tests for ConnectOptions, Version and Heartbeat configuration

use std::time::Duration;
use stompwire::{CodecKind, ConnectOptions, Connection, Heartbeat, Version};

// ============================================================================
// ConnectOptions
// ============================================================================

#[test]
fn connect_options_defaults() {
    let opts = ConnectOptions::default();
    assert_eq!(opts.accept_version, Version::ALL.to_vec());
    assert!(opts.login.is_none());
    assert!(opts.passcode.is_none());
    assert!(opts.host.is_none());
    assert!(opts.client_id.is_none());
    assert!(opts.headers.is_empty());
    assert!(!opts.use_stomp_command);
    assert_eq!(opts.codec, CodecKind::Stream);
    assert_eq!(opts.heartbeat, Heartbeat::new(10000, 10000));
    assert_eq!(opts.connect_timeout, None);
    assert_eq!(opts.disconnect_timeout, Duration::from_secs(5));
    assert_eq!(opts.max_header_len, 4096);
    assert!(!opts.strict_channel);
}

#[test]
fn connect_options_new_equals_default() {
    let a = ConnectOptions::new();
    let b = ConnectOptions::default();
    assert_eq!(a.accept_version, b.accept_version);
    assert_eq!(a.heartbeat, b.heartbeat);
}

#[test]
fn connect_options_builder_chain() {
    let opts = ConnectOptions::new()
        .login("user", "pass")
        .host("my-vhost")
        .client_id("durable-1")
        .accept_version([Version::V1_2])
        .heartbeat(Heartbeat::disabled())
        .use_stomp_command()
        .codec(CodecKind::Channel)
        .connect_timeout(Duration::from_secs(3))
        .disconnect_timeout(Duration::from_millis(250))
        .max_header_len(1024)
        .strict_channel(true);

    assert_eq!(opts.login.as_deref(), Some("user"));
    assert_eq!(opts.passcode.as_deref(), Some("pass"));
    assert_eq!(opts.host.as_deref(), Some("my-vhost"));
    assert_eq!(opts.client_id.as_deref(), Some("durable-1"));
    assert_eq!(opts.accept_version, vec![Version::V1_2]);
    assert_eq!(opts.heartbeat, Heartbeat::disabled());
    assert!(opts.use_stomp_command);
    assert_eq!(opts.codec, CodecKind::Channel);
    assert_eq!(opts.connect_timeout, Some(Duration::from_secs(3)));
    assert_eq!(opts.disconnect_timeout, Duration::from_millis(250));
    assert_eq!(opts.max_header_len, 1024);
    assert!(opts.strict_channel);
}

#[test]
fn custom_headers_keep_insertion_order() {
    let opts = ConnectOptions::new()
        .header("x-b", "2")
        .header("x-a", "1")
        .header("x-b", "3");
    assert_eq!(
        opts.headers,
        vec![
            ("x-b".to_string(), "2".to_string()),
            ("x-a".to_string(), "1".to_string()),
            ("x-b".to_string(), "3".to_string()),
        ]
    );
}

#[test]
fn accept_version_header_formatting() {
    assert_eq!(ConnectOptions::new().accept_version_header(), "1.0,1.1,1.2");
    let opts = ConnectOptions::new().accept_version([Version::V1_1, Version::V1_2]);
    assert_eq!(opts.accept_version_header(), "1.1,1.2");
}

#[test]
fn empty_accept_version_offers_everything() {
    let opts = ConnectOptions::new().accept_version(Vec::new());
    assert_eq!(opts.offered_versions(), Version::ALL.to_vec());
    assert_eq!(opts.accept_version_header(), "1.0,1.1,1.2");
}

// ============================================================================
// Version
// ============================================================================

#[test]
fn version_parse_and_display() {
    assert_eq!(Version::parse("1.0"), Some(Version::V1_0));
    assert_eq!(Version::parse(" 1.1 "), Some(Version::V1_1));
    assert_eq!(Version::parse("1.2"), Some(Version::V1_2));
    assert_eq!(Version::parse("2.0"), None);
    assert_eq!(Version::parse(""), None);
    assert_eq!(Version::V1_2.to_string(), "1.2");
    assert!(Version::V1_0 < Version::V1_2);
}

// ============================================================================
// Heartbeat
// ============================================================================

#[test]
fn heartbeat_new() {
    let hb = Heartbeat::new(5000, 10000);
    assert_eq!(hb.send_ms, 5000);
    assert_eq!(hb.receive_ms, 10000);
}

#[test]
fn heartbeat_disabled() {
    assert_eq!(Heartbeat::disabled().to_string(), "0,0");
    assert_eq!(Heartbeat::disabled().to_string(), Connection::NO_HEARTBEAT);
}

#[test]
fn heartbeat_default() {
    assert_eq!(Heartbeat::default().to_string(), Connection::DEFAULT_HEARTBEAT);
}

#[test]
fn heartbeat_from_duration() {
    let hb = Heartbeat::from_duration(Duration::from_secs(15));
    assert_eq!(hb, Heartbeat::new(15000, 15000));

    let hb = Heartbeat::from_duration(Duration::from_millis(500));
    assert_eq!(hb.to_string(), "500,500");
}

#[test]
fn heartbeat_parse() {
    assert_eq!(Heartbeat::parse("1000,2000"), Heartbeat::new(1000, 2000));
    assert_eq!(Heartbeat::parse(" 7 , 8 "), Heartbeat::new(7, 8));
    assert_eq!(Heartbeat::parse("abc"), Heartbeat::disabled());
    assert_eq!(Heartbeat::parse("300"), Heartbeat::new(300, 0));
}

#[test]
fn heartbeat_display_round_trips() {
    let hb = Heartbeat::new(1234, 5678);
    assert_eq!(Heartbeat::parse(&hb.to_string()), hb);
}
