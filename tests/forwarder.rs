//! End-to-end forwarder tests over a real UDP socket and a mock upstream.

use async_trait::async_trait;
use dnsdig::analytics::{Analytics, MemorySampleStore, SampleStore};
use dnsdig::cache::{AnswerCache, MemoryStore, DEFAULT_TTL_CEILING};
use dnsdig::clients::Exchanger;
use dnsdig::forwarder::UdpForwarder;
use dnsdig::types::*;
use dnsdig::Error;
use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// An upstream that replies with a canned response, counting its calls.
struct MockUpstream {
    response: Message,
    calls: AtomicUsize,
}

impl MockUpstream {
    fn new(response: Message) -> Arc<MockUpstream> {
        Arc::new(MockUpstream {
            response,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exchanger for MockUpstream {
    async fn exchange(&self, _query: &Message) -> Result<Message, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// An upstream that always fails.
struct FailingUpstream;

#[async_trait]
impl Exchanger for FailingUpstream {
    async fn exchange(&self, _query: &Message) -> Result<Message, Error> {
        Err(Error::Upstream("connection refused".to_string()))
    }
}

fn response_for(qname: &str, ip: &str, ttl: u32) -> Message {
    let mut m = Message::default();
    m.add_question(qname, Type::A, Class::Internet);
    m.qr = QR::Response;
    m.ra = true;
    m.answers.push(Record {
        name: format!("{}.", qname),
        class: Class::Internet,
        ttl,
        resource: Resource::A(ip.parse().unwrap()),
    });
    m
}

struct Fixture {
    addr: SocketAddr,
    cache: Arc<MemoryStore>,
    samples: Arc<MemorySampleStore>,
}

/// Binds a forwarder on an ephemeral port and spawns its serve loop.
async fn start_forwarder(upstream: Arc<dyn Exchanger>) -> Fixture {
    let store = Arc::new(MemoryStore::default());
    let samples = Arc::new(MemorySampleStore::default());

    let cache = AnswerCache::new(store.clone(), DEFAULT_TTL_CEILING);
    let analytics = Arc::new(Analytics::new(samples.clone()));

    let bound = UdpForwarder::new("127.0.0.1", 0, cache, upstream, analytics)
        .bind()
        .await
        .expect("failed to bind");
    let addr = bound.local_addr().expect("failed to read bound address");

    tokio::spawn(bound.run());

    Fixture {
        addr,
        cache: store,
        samples,
    }
}

async fn exchange_udp(addr: SocketAddr, query: &Message) -> Message {
    let wire = query.to_vec().expect("failed to encode query");

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&wire, addr).await.unwrap();

    let mut buf = [0; 4096];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a response")
        .unwrap();

    Message::from_slice(&buf[..len]).expect("invalid response")
}

async fn expect_no_reply(addr: SocketAddr, datagram: &[u8]) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(datagram, addr).await.unwrap();

    let mut buf = [0; 4096];
    let received = timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
    assert!(received.is_err(), "expected the datagram to be dropped");
}

#[tokio::test]
async fn test_miss_then_store() {
    let upstream = MockUpstream::new(response_for("example.com", "203.0.113.5", 120));
    let fixture = start_forwarder(upstream.clone()).await;

    let mut query = Message::default();
    query.add_question("example.com", Type::A, Class::Internet);

    let response = exchange_udp(fixture.addr, &query).await;

    assert_eq!(response.id, query.id, "response id must match the query id");
    assert_eq!(response.answers.len(), 1);
    assert_eq!(
        response.answers[0].resource,
        Resource::A("203.0.113.5".parse().unwrap())
    );
    assert_eq!(upstream.calls(), 1);

    // The answer is now cached under the derived key.
    let cache = AnswerCache::new(fixture.cache.clone(), DEFAULT_TTL_CEILING);
    let cached = cache
        .get(&AnswerCache::key("example.com.", Type::A))
        .await
        .expect("expected the response to be cached");
    assert_eq!(cached.answers, response.answers);

    // A second identical query is served from the cache.
    let again = exchange_udp(fixture.addr, &query).await;
    assert_eq!(again.answers, response.answers);
    assert_eq!(upstream.calls(), 1, "second query must not reach upstream");
}

#[tokio::test]
async fn test_cache_hit_skips_upstream() {
    let upstream = MockUpstream::new(response_for("example.com", "198.51.100.99", 120));
    let fixture = start_forwarder(upstream.clone()).await;

    // Preload the cache with a different address than the upstream would
    // return, so a hit is distinguishable.
    let cache = AnswerCache::new(fixture.cache.clone(), DEFAULT_TTL_CEILING);
    cache
        .put(
            &AnswerCache::key("example.com.", Type::A),
            &response_for("example.com", "192.0.2.1", 60),
        )
        .await;

    let mut query = Message::default();
    query.add_question("example.com", Type::A, Class::Internet);

    let response = exchange_udp(fixture.addr, &query).await;

    assert_eq!(response.id, query.id);
    assert_eq!(
        response.answers[0].resource,
        Resource::A("192.0.2.1".parse().unwrap())
    );
    assert_eq!(upstream.calls(), 0, "upstream must not be invoked on a hit");
}

#[tokio::test]
async fn test_each_response_gets_its_query_id() {
    let upstream = MockUpstream::new(response_for("example.com", "203.0.113.5", 120));
    let fixture = start_forwarder(upstream).await;

    for _ in 0..4 {
        let mut query = Message::default();
        query.id = Message::random_id();
        query.add_question("example.com", Type::A, Class::Internet);

        let response = exchange_udp(fixture.addr, &query).await;
        assert_eq!(response.id, query.id);
    }
}

#[tokio::test]
async fn test_undecodable_datagram_is_dropped() {
    let upstream = MockUpstream::new(response_for("example.com", "203.0.113.5", 120));
    let fixture = start_forwarder(upstream.clone()).await;

    expect_no_reply(fixture.addr, &[0xde, 0xad, 0xbe, 0xef]).await;
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn test_question_less_query_is_dropped() {
    let upstream = MockUpstream::new(response_for("example.com", "203.0.113.5", 120));
    let fixture = start_forwarder(upstream.clone()).await;

    let query = Message::default(); // no question added
    let wire = query.to_vec().unwrap();

    expect_no_reply(fixture.addr, &wire).await;
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn test_upstream_failure_drops_silently() {
    let fixture = start_forwarder(Arc::new(FailingUpstream)).await;

    let mut query = Message::default();
    query.add_question("example.com", Type::A, Class::Internet);

    expect_no_reply(fixture.addr, &query.to_vec().unwrap()).await;
}

#[tokio::test]
async fn test_latency_sample_recorded_after_answer() {
    let upstream = MockUpstream::new(response_for("example.com", "203.0.113.5", 120));
    let fixture = start_forwarder(upstream).await;

    let mut query = Message::default();
    query.add_question("example.com", Type::A, Class::Internet);
    exchange_udp(fixture.addr, &query).await;

    // The sample is written after the response is sent; give it a moment.
    let mut samples = Vec::new();
    for _ in 0..20 {
        samples = fixture
            .samples
            .since(chrono::Duration::minutes(5))
            .await
            .unwrap();
        if !samples.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].name, "example.com.");
    assert_eq!(samples[0].record_type, Type::A);
    assert_eq!(samples[0].ttl, 120);
    assert!(samples[0].resolve_time >= 0.0);
}
