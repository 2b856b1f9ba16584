//! Offline reads of capture files through the public API

mod common;

use anyhow::{Context, Result};
use common::{BASE_TIME, MYSQL_LOGIN_INDEX, PcapBuilder, init_tracing, mysql_session_capture, udp_capture, udp_frame};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracewire::layers::{IpLayer, Layer, TcpLayer};
use tracewire::{DissectError, DissectionResult, Options, Tracewire};

fn keys(value: &Value, prefix: &str, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = format!("{}/{}", prefix, key);
                out.insert(path.clone());
                keys(child, &path, out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                keys(item, &format!("{}[{}]", prefix, i), out);
            }
        }
        _ => {}
    }
}

fn key_set(result: &DissectionResult) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    keys(&Value::Object(result.layers().clone()), "", &mut out);
    out
}

#[tokio::test]
async fn mysql_login_request_at_frame_65() -> Result<()> {
    init_tracing();
    let file = mysql_session_capture().write_temp();
    let tracewire = Tracewire::new();

    let frame = tracewire.get_frame(file.path(), MYSQL_LOGIN_INDEX as i64, Options::new()).await?;
    assert_eq!(frame.number, 65);
    assert_eq!(frame.field_str("frame.len"), Some("155"));
    assert_eq!(frame.field_str("tcp.dstport"), Some("3306"));

    let login = frame.field("mysql.login_request").context("login request subtree")?;
    assert_eq!(login["mysql.user"], "root");

    // 155 bytes: nine full rows and a short tenth.
    assert_eq!(frame.hex.rows(), 10);
    assert_eq!(frame.hex.offset.last().map(String::as_str), Some("0090"));
    assert_eq!(frame.hex.ascii.last().map(String::len), Some(11));

    let tcp = TcpLayer::from_result(&frame)?.context("tcp layer")?;
    assert_eq!(tcp.dst_port(), Some(3306));
    // Sequence analysis saw the handshake even though only frame 65 was asked for.
    assert_eq!(tcp.seq(), Some(1));
    let ip = IpLayer::from_result(&frame)?.context("ip layer")?;
    assert_eq!(ip.dst_addr(), Some("10.211.55.2".parse()?));
    Ok(())
}

#[tokio::test]
async fn get_frames_omits_invalid_indexes() -> Result<()> {
    let file = udp_capture(13).write_temp();
    let frames = Tracewire::new().get_frames(file.path(), [5, 1, 11, -1, 288], Options::new()).await?;
    assert_eq!(frames.iter().map(|f| f.number).collect::<Vec<_>>(), vec![1, 5, 11]);
    Ok(())
}

#[tokio::test]
async fn pages_concatenate_to_the_whole_file() -> Result<()> {
    let file = mysql_session_capture().write_temp();
    let tracewire = Tracewire::new();
    let all = tracewire.get_all_frames(file.path(), Options::new()).await?;
    assert_eq!(all.len(), 67);

    for size in [1, 7, 10, 67, 100] {
        let first = tracewire.get_page(file.path(), 1, size, Options::new()).await?;
        let mut paged = first.records.clone();
        for page in 2..=first.page_count() as i64 {
            let next = tracewire.get_page(file.path(), page, size, Options::new()).await?;
            assert_eq!(next.total_frames, 67);
            paged.extend(next.records);
        }
        assert_eq!(paged, all, "page size {}", size);
    }
    Ok(())
}

#[tokio::test]
async fn descriptive_values_keep_the_same_keys() -> Result<()> {
    let file = mysql_session_capture().write_temp();
    let tracewire = Tracewire::new();

    let plain = tracewire.get_frame(file.path(), MYSQL_LOGIN_INDEX as i64, Options::new()).await?;
    let described =
        tracewire.get_frame(file.path(), MYSQL_LOGIN_INDEX as i64, Options::new().with_descriptive_values(true)).await?;

    assert_eq!(key_set(&plain), key_set(&described));
    assert_eq!(plain.hex, described.hex);
    assert_ne!(plain.field_str("ip.proto"), described.field_str("ip.proto"));
    Ok(())
}

#[tokio::test]
async fn zero_length_frame_is_never_delivered() -> Result<()> {
    let frame = udp_frame(([10, 0, 0, 1], 1000), ([10, 0, 0, 2], 2000), b"hello");
    let file = PcapBuilder::new()
        .packet(BASE_TIME, &frame)
        .empty_packet(BASE_TIME + Duration::from_millis(1))
        .packet(BASE_TIME + Duration::from_millis(2), &frame)
        .write_temp();
    let tracewire = Tracewire::new();

    let err = tracewire.get_frame(file.path(), 2, Options::new()).await.unwrap_err();
    assert!(matches!(err, DissectError::FrameNotFound { index: 2 }));
    assert!(tracewire.get_frames(file.path(), [2], Options::new()).await?.is_empty());
    assert_eq!(tracewire.count_frames(file.path()).await?, 3);
    Ok(())
}

/// A dropped frame still consumes its sequence number, so numbering has a
/// gap where the frame was. This pins the current numbering policy.
#[tokio::test]
async fn dropped_frame_leaves_a_gap_in_frame_numbers() -> Result<()> {
    let frame = udp_frame(([10, 0, 0, 1], 1000), ([10, 0, 0, 2], 2000), b"hello");
    let file = PcapBuilder::new()
        .packet(BASE_TIME, &frame)
        .empty_packet(BASE_TIME + Duration::from_millis(1))
        .packet(BASE_TIME + Duration::from_millis(2), &frame)
        .write_temp();

    let all = Tracewire::new().get_all_frames(file.path(), Options::new()).await?;
    assert_eq!(all.iter().map(|f| f.number).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(all[1].field_str("frame.number"), Some("3"));
    Ok(())
}

#[tokio::test]
async fn concurrent_reads_of_one_file_are_isolated() -> Result<()> {
    let file = mysql_session_capture().write_temp();
    let tracewire = Tracewire::new();
    let expected = tracewire.get_all_frames(file.path(), Options::new()).await?;

    let reads = (0..4).map(|_| tracewire.get_all_frames(file.path(), Options::new()));
    for result in futures::future::join_all(reads).await {
        assert_eq!(result?, expected);
    }
    assert!(tracewire.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn hex_data_needs_no_dissection() -> Result<()> {
    let file = mysql_session_capture().write_temp();
    let tracewire = Tracewire::new();
    let hex = tracewire.get_hex_data(file.path(), MYSQL_LOGIN_INDEX as i64).await?;
    let frame = tracewire.get_frame(file.path(), MYSQL_LOGIN_INDEX as i64, Options::new()).await?;
    assert_eq!(hex, frame.hex);
    assert!(matches!(tracewire.get_hex_data(file.path(), 68).await, Err(DissectError::FrameNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn results_serialize_as_analyzer_documents() -> Result<()> {
    let file = udp_capture(1).write_temp();
    let frame = Tracewire::new().get_frame(file.path(), 1, Options::new()).await?;
    let json = serde_json::to_value(&frame)?;

    assert!(json["_index"].as_str().is_some_and(|i| i.starts_with("packets-2023-11-14")));
    assert!(json["offset"].is_array());
    assert!(json["_source"]["layers"]["udp"].is_object());
    Ok(())
}
