//! End-to-end `Session`-to-`Session` scenarios over the in-repo link
//! adapters: round-trips, an exchange, a size-limit rejection, and
//! retransmission under dropped ACKs / a corrupted chunk.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chunked_transport::{Error, HarnessLink, LoopbackLink, Session, TransportConfig};

fn fast_config() -> TransportConfig {
    TransportConfig::default()
        .with_ack_timeout(Duration::from_millis(200))
        .with_chunk_timeout(Some(Duration::from_millis(500)))
}

#[tokio::test]
async fn round_trips_a_single_small_chunk() {
    let (link_a, link_b) = LoopbackLink::pair(185);
    let sender = Session::new(Arc::new(link_a), fast_config()).unwrap();
    let receiver = Session::new(Arc::new(link_b), fast_config()).unwrap();

    let send_task = tokio::spawn(async move { sender.send(Bytes::from_static(b"hello")).await });
    let received = receiver
        .receive(Some(Duration::from_secs(2)))
        .await
        .unwrap();
    send_task.await.unwrap().unwrap();

    assert_eq!(&received[..], b"hello");
}

#[tokio::test]
async fn round_trips_a_multi_chunk_payload() {
    let (link_a, link_b) = LoopbackLink::pair(185);
    let sender = Session::new(Arc::new(link_a), fast_config()).unwrap();
    let receiver = Session::new(Arc::new(link_b), fast_config()).unwrap();

    let chunks_seen = Arc::new(AtomicUsize::new(0));
    let chunks_seen_cb = chunks_seen.clone();
    receiver.on_progress(move |current, total, is_receiving| {
        assert!(is_receiving);
        assert_eq!(total, 3);
        chunks_seen_cb.store(current as usize, Ordering::SeqCst);
    });

    // 500 bytes over a 185-byte MTU (168-byte chunk_size) chunks to 168/168/164.
    let payload: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let send_task = {
        let payload = Bytes::from(payload);
        tokio::spawn(async move { sender.send(payload).await })
    };
    let received = receiver
        .receive(Some(Duration::from_secs(2)))
        .await
        .unwrap();
    send_task.await.unwrap().unwrap();

    assert_eq!(&received[..], &expected[..]);
    assert_eq!(chunks_seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exchange_delivers_a_response() {
    let (link_a, link_b) = LoopbackLink::pair(185);
    let requester = Session::new(Arc::new(link_a), fast_config()).unwrap();
    let responder = Session::new(Arc::new(link_b), fast_config()).unwrap();

    let responder_task = tokio::spawn(async move {
        let request = responder
            .receive(Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(&request[..], b"ping");
        responder.send(Bytes::from_static(b"pong")).await.unwrap();
    });

    let response = requester
        .exchange_with_deadline(Bytes::from_static(b"ping"), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(&response[..], b"pong");
    responder_task.await.unwrap();
}

#[tokio::test]
async fn oversized_payload_is_rejected_before_any_wire_traffic() {
    let (link_a, _link_b) = LoopbackLink::pair(185);
    let sender = Session::new(Arc::new(link_a), fast_config()).unwrap();

    let oversized = vec![0u8; TransportConfig::default().max_total_data_size() + 1];
    let err = sender.send(Bytes::from(oversized)).await.unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { .. }));
}

#[tokio::test]
async fn dropped_acks_trigger_retransmission_without_corrupting_the_transfer() {
    let (link_a, link_b) = LoopbackLink::pair(185);
    let harness_b = HarnessLink::wrap(link_b);
    // Chunk 2 of a 3-chunk transfer: drop its first two CHUNK_RECEIVED acks,
    // forcing the sender to retransmit before the third attempt succeeds.
    harness_b.drop_first_k_acks_for_chunk(2, 2);

    let sender = Session::new(Arc::new(link_a), fast_config()).unwrap();
    let receiver = Session::new(Arc::new(harness_b), fast_config()).unwrap();

    let payload: Vec<u8> = (0..400u32).map(|i| (i % 200) as u8).collect();
    let expected = payload.clone();
    let send_task = {
        let payload = Bytes::from(payload);
        tokio::spawn(async move { sender.send(payload).await })
    };

    let received = receiver
        .receive(Some(Duration::from_secs(5)))
        .await
        .unwrap();
    send_task.await.unwrap().unwrap();

    assert_eq!(&received[..], &expected[..]);
    let stats = receiver.stats();
    assert_eq!(stats.successful_transfers(), 1);
}

#[tokio::test]
async fn corrupted_chunk_is_rejected_then_succeeds_on_retransmission() {
    let (link_a, link_b) = LoopbackLink::pair(185);
    let harness_a = HarnessLink::wrap(link_a);
    // Flip one payload byte of chunk 1, exactly once, without touching its
    // declared chunk_crc32 — the receiver must catch this via the CRC check.
    harness_a.corrupt_chunk_payload(1, 0);

    let sender = Session::new(Arc::new(harness_a), fast_config()).unwrap();
    let receiver = Session::new(Arc::new(link_b), fast_config()).unwrap();

    let send_task =
        tokio::spawn(async move { sender.send(Bytes::from_static(b"corrupt me maybe")).await });
    let received = receiver
        .receive(Some(Duration::from_secs(2)))
        .await
        .unwrap();
    send_task.await.unwrap().unwrap();

    assert_eq!(&received[..], b"corrupt me maybe");
    assert!(receiver.stats().crc_errors() >= 1);
}
