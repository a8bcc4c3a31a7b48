//! DNS query resolution logic.
//!
//! Handles the per-query pipeline:
//! 1. Cache lookup
//! 2. Route to an upstream by domain policy
//! 3. Forward, cache the answer and build the reply
//!
//! Transports handle the actual I/O, the resolver handles decisions.

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, OpCode, ResponseCode};
use tracing::{debug, error, info};

use crate::cache::{CacheKey, DnsCache};
use crate::dns::{self, AnswerSummary};
use crate::error::ResolveError;
use crate::router::DomainPolicy;
use crate::upstream::Upstream;

/// Outcome of resolving one query.
///
/// Every variant carries a complete reply for the client.
#[derive(Debug)]
pub enum Resolution {
    /// Answered from the cache without upstream I/O.
    Cached { response: Message },
    /// Answered by the upstream the policy selected.
    Forwarded {
        response: Message,
        upstream: SocketAddr,
    },
    /// Resolution failed; `response` is an error reply mirroring the query.
    Failed {
        response: Message,
        error: ResolveError,
    },
}

impl Resolution {
    pub fn response(&self) -> &Message {
        match self {
            Resolution::Cached { response }
            | Resolution::Forwarded { response, .. }
            | Resolution::Failed { response, .. } => response,
        }
    }

    pub fn into_response(self) -> Message {
        match self {
            Resolution::Cached { response }
            | Resolution::Forwarded { response, .. }
            | Resolution::Failed { response, .. } => response,
        }
    }
}

/// Resolver ties the cache, the domain policy and the upstream client together.
///
/// Shared by every transport; one call to [`Resolver::process_query`] per
/// inbound query, possibly many at once.
pub struct Resolver<U> {
    cache: Arc<DnsCache>,
    policy: DomainPolicy,
    upstream: U,
}

impl<U: Upstream> Resolver<U> {
    pub fn new(cache: Arc<DnsCache>, policy: DomainPolicy, upstream: U) -> Self {
        Self {
            cache,
            policy,
            upstream,
        }
    }

    /// Resolve a decoded query.
    ///
    /// Returns `None` for opcodes other than QUERY, which the resolver does
    /// not act on.
    pub async fn process_query(&self, query: &Message) -> Option<Resolution> {
        if query.op_code() != OpCode::Query {
            debug!(op_code = ?query.op_code(), id = query.id(), "ignoring non-query opcode");
            return None;
        }

        let Some(question) = query.queries().first() else {
            let error = ResolveError::EmptyQuestion;
            error!(id = query.id(), %error, "failed lookup");
            return Some(Resolution::Failed {
                response: dns::error_reply(query, ResponseCode::FormErr),
                error,
            });
        };

        let key = match CacheKey::from_query(question) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(name = %question.name(), error = %e, "query bypasses cache");
                None
            }
        };

        if let Some(key) = &key
            && let Some(answer) = self.cache.get(key)
        {
            let response = dns::reply_from(query, answer);
            log_answer(&response, "cache");
            return Some(Resolution::Cached { response });
        }

        let upstream = self.policy.route(&question.name().to_ascii());

        match self.upstream.forward(query, upstream).await {
            Ok(answer) => {
                if let Some(key) = key
                    && is_cacheable(&answer)
                {
                    self.cache.set(key, answer.clone());
                }
                let response = dns::reply_from(query, answer);
                log_answer(&response, "upstream");
                Some(Resolution::Forwarded { response, upstream })
            }
            Err(source) => {
                let error = ResolveError::Upstream {
                    server: upstream,
                    source,
                };
                error!(name = %question.name(), %error, "failed lookup");
                Some(Resolution::Failed {
                    response: dns::error_reply(query, ResponseCode::ServFail),
                    error,
                })
            }
        }
    }

    pub fn cache(&self) -> &Arc<DnsCache> {
        &self.cache
    }

    pub fn policy(&self) -> &DomainPolicy {
        &self.policy
    }
}

/// Only definitive, complete answers are worth keeping.
fn is_cacheable(answer: &Message) -> bool {
    matches!(
        answer.response_code(),
        ResponseCode::NoError | ResponseCode::NXDomain
    ) && !answer.truncated()
}

fn log_answer(response: &Message, source: &str) {
    let Some(record) = response.answers().first() else {
        return;
    };

    match dns::summarize(record) {
        AnswerSummary::Ipv4(ip) => info!(name = %record.name(), %ip, source, "lookup"),
        AnswerSummary::Record(text) => {
            info!(name = %record.name(), response = %text, source, "lookup")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use futures::future::join_all;
    use hickory_proto::op::{MessageType, Query};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Upstream double that answers every A query with a fixed address.
    #[derive(Clone, Default)]
    pub struct MockUpstream {
        pub forward_count: Arc<AtomicU64>,
        pub servers: Arc<Mutex<Vec<SocketAddr>>>,
        pub response_code: Option<ResponseCode>,
        pub fail: bool,
        pub delay: Option<Duration>,
    }

    impl MockUpstream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn forward_count(&self) -> u64 {
            self.forward_count.load(Ordering::SeqCst)
        }

        pub fn servers(&self) -> Vec<SocketAddr> {
            self.servers.lock().unwrap().clone()
        }
    }

    impl Upstream for MockUpstream {
        async fn forward(&self, query: &Message, server: SocketAddr) -> Result<Message, UpstreamError> {
            self.forward_count.fetch_add(1, Ordering::SeqCst);
            self.servers.lock().unwrap().push(server);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(UpstreamError::Timeout(Duration::from_secs(2)));
            }

            let mut response = Message::new();
            response
                .set_id(query.id())
                .set_message_type(MessageType::Response)
                .set_response_code(self.response_code.unwrap_or(ResponseCode::NoError));
            response.add_queries(query.queries().to_vec());
            if let Some(q) = query.queries().first() {
                response.add_answer(Record::from_rdata(
                    q.name().clone(),
                    300,
                    RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
                ));
            }
            Ok(response)
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    /// Keeps the name's case the way wire decoding does.
    fn create_query(domain: &str, id: u16) -> Message {
        let mut message = Message::new();
        message
            .set_id(id)
            .set_recursion_desired(true)
            .add_query(Query::query(Name::from_ascii(domain).unwrap(), RecordType::A));
        message
    }

    fn resolver(upstream: MockUpstream) -> Resolver<MockUpstream> {
        let policy = DomainPolicy::new(addr("8.8.8.8:53")).with_route("example.com", addr("10.0.0.1:53"));
        Resolver::new(Arc::new(DnsCache::new(Duration::from_secs(60))), policy, upstream)
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache() {
        let upstream = MockUpstream::new();
        let resolver = resolver(upstream.clone());

        let first = resolver.process_query(&create_query("www.example.com", 1)).await.unwrap();
        let second = resolver.process_query(&create_query("www.example.com", 2)).await.unwrap();

        assert!(matches!(first, Resolution::Forwarded { .. }));
        assert!(matches!(second, Resolution::Cached { .. }));
        assert_eq!(second.response().id(), 2);
        assert_eq!(second.response().answers().len(), 1);
        assert_eq!(upstream.forward_count(), 1);
    }

    #[tokio::test]
    async fn cache_hit_ignores_name_case() {
        let upstream = MockUpstream::new();
        let resolver = resolver(upstream.clone());

        let query = create_query("EXAMPLE.com", 2);
        assert_eq!(query.queries()[0].name().to_ascii(), "EXAMPLE.com");

        resolver.process_query(&create_query("example.com", 1)).await.unwrap();
        let hit = resolver.process_query(&query).await.unwrap();

        assert!(matches!(hit, Resolution::Cached { .. }));
        assert_eq!(hit.response().queries()[0].name().to_ascii(), "EXAMPLE.com");
        assert_eq!(upstream.forward_count(), 1);
    }

    #[tokio::test]
    async fn matching_domain_routes_to_policy_server() {
        let upstream = MockUpstream::new();
        let resolver = resolver(upstream.clone());

        let resolution = resolver.process_query(&create_query("api.example.com", 1)).await.unwrap();

        match resolution {
            Resolution::Forwarded { upstream: server, .. } => assert_eq!(server, addr("10.0.0.1:53")),
            other => panic!("expected forward, got {other:?}"),
        }
        assert_eq!(upstream.servers(), vec![addr("10.0.0.1:53")]);
    }

    #[tokio::test]
    async fn unmatched_domain_routes_to_default_server() {
        let upstream = MockUpstream::new();
        let resolver = resolver(upstream.clone());

        resolver.process_query(&create_query("other.org", 1)).await.unwrap();

        assert_eq!(upstream.servers(), vec![addr("8.8.8.8:53")]);
    }

    #[tokio::test]
    async fn upstream_failure_yields_servfail_reply() {
        let upstream = MockUpstream::failing();
        let resolver = resolver(upstream.clone());
        let query = create_query("example.com", 4242);

        let resolution = resolver.process_query(&query).await.unwrap();

        let response = resolution.response();
        assert_eq!(response.id(), 4242);
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(response.response_code(), ResponseCode::ServFail);
        assert_eq!(response.queries(), query.queries());
        assert!(response.answers().is_empty());
        assert!(matches!(
            resolution,
            Resolution::Failed {
                error: ResolveError::Upstream { .. },
                ..
            }
        ));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn failure_does_not_poison_later_queries() {
        let upstream = MockUpstream::failing();
        let failing = resolver(upstream);
        failing.process_query(&create_query("example.com", 1)).await.unwrap();

        let healthy = Resolver::new(
            Arc::clone(failing.cache()),
            failing.policy().clone(),
            MockUpstream::new(),
        );
        let resolution = healthy.process_query(&create_query("example.com", 2)).await.unwrap();

        assert!(matches!(resolution, Resolution::Forwarded { .. }));
    }

    #[tokio::test]
    async fn non_query_opcode_is_ignored() {
        let upstream = MockUpstream::new();
        let resolver = resolver(upstream.clone());
        let mut query = create_query("example.com", 1);
        query.set_op_code(OpCode::Update);

        assert!(resolver.process_query(&query).await.is_none());
        assert_eq!(upstream.forward_count(), 0);
    }

    #[tokio::test]
    async fn query_without_question_gets_formerr() {
        let upstream = MockUpstream::new();
        let resolver = resolver(upstream.clone());
        let mut query = Message::new();
        query.set_id(9);

        let resolution = resolver.process_query(&query).await.unwrap();

        assert_eq!(resolution.response().response_code(), ResponseCode::FormErr);
        assert_eq!(resolution.response().id(), 9);
        assert_eq!(upstream.forward_count(), 0);
    }

    #[tokio::test]
    async fn root_query_is_forwarded_but_not_cached() {
        let upstream = MockUpstream::new();
        let resolver = resolver(upstream.clone());

        resolver.process_query(&create_query(".", 1)).await.unwrap();
        resolver.process_query(&create_query(".", 2)).await.unwrap();

        assert_eq!(upstream.forward_count(), 2);
        assert_eq!(upstream.servers()[0], addr("8.8.8.8:53"));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn servfail_from_upstream_is_passed_through_but_not_cached() {
        let upstream = MockUpstream {
            response_code: Some(ResponseCode::ServFail),
            ..MockUpstream::default()
        };
        let resolver = resolver(upstream.clone());

        let resolution = resolver.process_query(&create_query("example.com", 1)).await.unwrap();

        assert_eq!(resolution.response().response_code(), ResponseCode::ServFail);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn expired_entry_is_forwarded_again() {
        let upstream = MockUpstream::new();
        let policy = DomainPolicy::new(addr("8.8.8.8:53"));
        let cache = Arc::new(DnsCache::new(Duration::from_millis(20)));
        let resolver = Resolver::new(cache, policy, upstream.clone());

        resolver.process_query(&create_query("example.com", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let again = resolver.process_query(&create_query("example.com", 2)).await.unwrap();

        assert!(matches!(again, Resolution::Forwarded { .. }));
        assert_eq!(upstream.forward_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_distinct_queries_are_cached_independently() {
        let upstream = MockUpstream::new();
        let resolver = Arc::new(resolver(upstream.clone()));

        let tasks = (0..32u16).map(|i| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                resolver
                    .process_query(&create_query(&format!("host{i}.example.net"), i))
                    .await
                    .map(Resolution::into_response)
            })
        });
        let responses = join_all(tasks).await;

        for (i, response) in responses.into_iter().enumerate() {
            let response = response.unwrap().unwrap();
            assert_eq!(response.id(), i as u16);
            assert_eq!(
                response.answers()[0].name().to_ascii(),
                format!("host{i}.example.net")
            );
        }
        assert_eq!(resolver.cache().len(), 32);
        for i in 0..32u16 {
            let key = CacheKey::new(
                &format!("host{i}.example.net"),
                RecordType::A,
                hickory_proto::rr::DNSClass::IN,
            )
            .unwrap();
            let cached = resolver.cache().get(&key).unwrap();
            assert_eq!(cached.answers()[0].name().to_ascii(), format!("host{i}.example.net"));
        }
        assert_eq!(upstream.forward_count(), 32);
    }

    #[tokio::test]
    async fn concurrent_first_queries_for_same_name_each_forward() {
        // No in-flight coalescing: both misses reach the upstream.
        let upstream = MockUpstream {
            delay: Some(Duration::from_millis(50)),
            ..MockUpstream::default()
        };
        let resolver = resolver(upstream.clone());

        let first = create_query("example.com", 1);
        let second = create_query("example.com", 2);
        let (a, b) = tokio::join!(resolver.process_query(&first), resolver.process_query(&second));

        assert!(matches!(a, Some(Resolution::Forwarded { .. })));
        assert!(matches!(b, Some(Resolution::Forwarded { .. })));
        assert_eq!(upstream.forward_count(), 2);
        assert_eq!(resolver.cache().len(), 1);
    }
}
