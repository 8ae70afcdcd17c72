//! Integration tests for reelcast-client
//!
//! These tests require a running reelcast server. They are ignored by default
//! and can be run with:
//!
//! ```sh
//! REELCAST_TEST_URL=ws://localhost:9988/ws REELCAST_TEST_TOKEN=your-token \
//! REELCAST_TEST_MEDIA=507f191e810c19729de860ea cargo test --test integration -- --ignored
//! ```

use reelcast_client::{ClientMessage, ErrorCode, Event, ReelcastClient, ReelcastConfig, ReelcastError};
use std::env;
use std::time::Duration;

fn get_test_config() -> Option<ReelcastConfig> {
    let url = env::var("REELCAST_TEST_URL").ok()?;
    let token = env::var("REELCAST_TEST_TOKEN").ok()?;

    Some(ReelcastConfig::new(url, token).operation_timeout(Duration::from_secs(5)))
}

#[tokio::test]
#[ignore = "requires running reelcast server"]
async fn test_connect_close() {
    let config = get_test_config().expect("REELCAST_TEST_URL and REELCAST_TEST_TOKEN must be set");
    let client = ReelcastClient::new(config);

    let session = client.connect().await.expect("Failed to connect");
    session.close().await.expect("Failed to close");
}

#[tokio::test]
#[ignore = "requires running reelcast server"]
async fn test_stream_media() {
    let config = get_test_config().expect("REELCAST_TEST_URL and REELCAST_TEST_TOKEN must be set");
    let media_id = env::var("REELCAST_TEST_MEDIA").expect("REELCAST_TEST_MEDIA must be set");
    let client = ReelcastClient::new(config);

    let mut session = client.connect().await.expect("Failed to connect");
    let media = session.stream_by_id(&media_id).await.expect("Stream failed");

    println!("Received {} bytes in {} chunks", media.bytes().len(), media.chunk_count());
    assert_eq!(media.media_id, media_id);

    session.close().await.expect("Failed to close");
}

#[tokio::test]
#[ignore = "requires running reelcast server"]
async fn test_bad_media_id() {
    let config = get_test_config().expect("REELCAST_TEST_URL and REELCAST_TEST_TOKEN must be set");
    let client = ReelcastClient::new(config);

    let mut session = client.connect().await.expect("Failed to connect");
    let err = session.stream_by_id("not-an-id").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BadRequest));

    // The session survives a rejected request
    session
        .send(&ClientMessage::stream_by_id("ffffffffffffffffffffffff"))
        .await
        .expect("Send failed");
    match session.next_event().await.expect("No response") {
        Event::Control(msg) => println!("Got {:?}", msg),
        other => panic!("unexpected {:?}", other),
    }

    session.close().await.expect("Failed to close");
}

#[tokio::test]
#[ignore = "requires running reelcast server"]
async fn test_invalid_token() {
    let url = env::var("REELCAST_TEST_URL").expect("REELCAST_TEST_URL must be set");
    let config = ReelcastConfig::new(url, "invalid-token-12345");

    let result = ReelcastClient::new(config).connect().await;
    match result {
        Err(ReelcastError::Rejected { status, message }) => {
            assert_eq!(status, 401);
            println!("Got expected rejection: {}", message);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("Should fail with invalid token"),
    }
}
