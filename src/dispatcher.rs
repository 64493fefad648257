//! Dispatch coordinator.
//!
//! Routes each request exactly once: promotional and bulk traffic goes to the
//! async hand-off, OTP and transactional traffic is sent synchronously through
//! the gateway the template maps to. Synchronous sends always end in exactly
//! one [`Outcome`], including when the vendor call itself fails.

use sms_core::{
    encode, fallback_id, DispatchError, Gateway, Outcome, Request, SendRequest, SmsError,
    VendorRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::handoff::{AsyncHandoff, EventStream};
use crate::reconciler::Reconciler;
use crate::selector::{GatewaySelector, StaticTemplateRegistry, TemplateRegistry};
use crate::store::RequestStore;
use crate::vendors;

/// Behaviour switches, passed in explicitly rather than read from global config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Persist requests before sending and reconcile outcomes afterwards.
    pub store_requests: bool,
    /// Upper bound on one vendor call.
    pub vendor_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            store_requests: true,
            vendor_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a synchronous send.
#[derive(Debug)]
pub struct Delivery {
    pub communication_id: String,
    /// Set only when the request was persisted.
    pub request_id: Option<i64>,
    pub gateway: Gateway,
    pub outcome: Outcome,
    /// Transport or HTTP error that was folded into a failure outcome.
    pub vendor_error: Option<SmsError>,
}

#[derive(Debug)]
pub enum Dispatch {
    /// Published to the event stream; no vendor was called.
    Queued { envelope_id: Uuid },
    Sent(Delivery),
}

#[derive(Clone)]
pub struct Dispatcher {
    settings: DispatchSettings,
    selector: GatewaySelector,
    vendors: VendorRegistry,
    store: Arc<dyn RequestStore>,
    reconciler: Reconciler,
    handoff: AsyncHandoff,
}

impl Dispatcher {
    pub fn new(
        settings: DispatchSettings,
        selector: GatewaySelector,
        vendors: VendorRegistry,
        store: Arc<dyn RequestStore>,
        handoff: AsyncHandoff,
    ) -> Self {
        Self {
            settings,
            selector,
            vendors,
            reconciler: Reconciler::new(store.clone()),
            store,
            handoff,
        }
    }

    /// Wire a dispatcher from configuration, using the static template registry.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn RequestStore>,
        stream: Arc<dyn EventStream>,
    ) -> Result<Self, DispatchError> {
        let settings = config.dispatch.settings();
        let vendors = vendors::build_registry(&config.providers, settings.vendor_timeout)?;
        let registry: Arc<dyn TemplateRegistry> =
            Arc::new(StaticTemplateRegistry::from_config(&config.templates));
        Ok(Self::new(
            settings,
            GatewaySelector::new(registry),
            vendors,
            store,
            AsyncHandoff::new(stream, config.dispatch.handoff_topic.clone()),
        ))
    }

    pub fn settings(&self) -> DispatchSettings {
        self.settings
    }

    pub async fn dispatch(&self, request: Request) -> Result<Dispatch, DispatchError> {
        if request.priority.is_deferred() {
            info!(
                priority = request.priority.as_u8(),
                template_id = %request.template_id,
                "deferring request to event stream"
            );
            let envelope_id = self.handoff.forward(request).await?;
            return Ok(Dispatch::Queued { envelope_id });
        }
        self.send_now(request).await.map(Dispatch::Sent)
    }

    /// Like [`Dispatcher::dispatch`], but gives up as soon as `cancel` fires.
    ///
    /// A cancelled send may leave a stored request pending; sweeping those is
    /// left to whoever owns the store.
    pub async fn dispatch_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Dispatch, DispatchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("dispatch cancelled by caller");
                Err(DispatchError::Cancelled)
            }
            result = self.dispatch(request) => result,
        }
    }

    async fn send_now(&self, mut request: Request) -> Result<Delivery, DispatchError> {
        let route = self.selector.resolve(&request.template_id).await?;
        route.apply(&mut request);
        let gateway = route.gateway;
        let binding = self
            .vendors
            .get(gateway)
            .ok_or_else(|| DispatchError::UnsupportedGateway(gateway.to_string()))?;

        let (request_id, communication_id) = if self.settings.store_requests {
            let created = self
                .store
                .create_request(&request)
                .await
                .map_err(|e| DispatchError::Persistence(e.to_string()))?;
            (Some(created.request_id), created.communication_id)
        } else {
            (None, fallback_id())
        };
        request.request_id = request_id;
        request.communication_id = Some(communication_id.clone());

        let mobile_numbers = request.mobile_list();
        let content = encode(&request.message_text, request.message_type, gateway);
        let send = binding.client.send(SendRequest {
            mobile_numbers: &mobile_numbers,
            sender_id: &request.sender_id,
            content: &content,
            message_type: request.message_type,
            template_id: &request.template_id,
            entity_id: &request.entity_id,
        });

        let (outcome, vendor_error) =
            match tokio::time::timeout(self.settings.vendor_timeout, send).await {
                Ok(Ok(raw)) => {
                    let parsed = binding.parser.parse(&raw);
                    (Outcome::from_parsed(&communication_id, raw, parsed), None)
                }
                Ok(Err(e)) => {
                    warn!(%gateway, communication_id = %communication_id, error = %e, "vendor call failed");
                    (Outcome::vendor_failure(&communication_id, &e), Some(e))
                }
                Err(_) => {
                    let e = SmsError::Transport(format!(
                        "vendor call exceeded {}s",
                        self.settings.vendor_timeout.as_secs_f64()
                    ));
                    warn!(%gateway, communication_id = %communication_id, error = %e, "vendor call timed out");
                    (Outcome::vendor_failure(&communication_id, &e), Some(e))
                }
            };

        if self.settings.store_requests {
            self.reconciler.reconcile(&communication_id, &outcome).await?;
        }

        info!(
            %gateway,
            gateway_id = gateway.id(),
            communication_id = %communication_id,
            success = outcome.is_success(),
            response_code = %outcome.response_code,
            rule = %outcome.rule,
            "dispatch complete"
        );
        Ok(Delivery {
            communication_id,
            request_id,
            gateway,
            outcome,
            vendor_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::BroadcastStream;
    use crate::selector::TemplateMapping;
    use crate::store::{CreatedRequest, MemoryStore, OutcomeUpdate, StoreError, StoredRequest};
    use async_trait::async_trait;
    use sms_core::{
        codes, Classification, MessageType, ParsedResponse, Priority, ResponseParser, Status,
        VendorClient,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Vendor stub that records what it was asked to send.
    struct StubVendor {
        gateway: Gateway,
        reply: Result<&'static str, u16>,
        delay: Duration,
        calls: AtomicUsize,
        last_content: Mutex<Option<String>>,
    }

    impl StubVendor {
        fn new(gateway: Gateway, reply: Result<&'static str, u16>) -> Arc<Self> {
            Arc::new(Self {
                gateway,
                reply,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                last_content: Mutex::new(None),
            })
        }

        fn slow(gateway: Gateway, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                gateway,
                reply: Ok("200,MsgID = 1"),
                delay,
                calls: AtomicUsize::new(0),
                last_content: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VendorClient for StubVendor {
        fn gateway(&self) -> Gateway {
            self.gateway
        }

        async fn send(&self, req: SendRequest<'_>) -> Result<String, SmsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_content.lock().unwrap() = Some(req.content.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.reply {
                Ok(body) => Ok(body.to_string()),
                Err(status) => Err(SmsError::VendorHttp {
                    status,
                    body: "unavailable".into(),
                }),
            }
        }
    }

    /// Recognises "OK <ref>", fails on everything else.
    struct StubParser;

    impl ResponseParser for StubParser {
        fn parse(&self, raw: &str) -> ParsedResponse {
            match raw.strip_prefix("OK ") {
                Some(reference) => ParsedResponse::success("200", raw, reference),
                None => ParsedResponse::failure(codes::UNPARSED, raw).unparsed(),
            }
        }
    }

    /// Store whose outcome writes always fail.
    struct BrokenStore(MemoryStore);

    #[async_trait]
    impl RequestStore for BrokenStore {
        async fn create_request(&self, request: &Request) -> Result<CreatedRequest, StoreError> {
            self.0.create_request(request).await
        }

        async fn update_outcome(&self, _: &str, _: OutcomeUpdate) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }

        async fn get(&self, id: &str) -> Result<Option<StoredRequest>, StoreError> {
            self.0.get(id).await
        }
    }

    fn registry() -> Arc<dyn TemplateRegistry> {
        Arc::new(
            StaticTemplateRegistry::new()
                .with(
                    "t-cdac",
                    TemplateMapping {
                        gateway: "1".into(),
                        entity_id: "E1".into(),
                        sender_id: "GOVSMS".into(),
                        message_type: MessageType::Unicode,
                    },
                )
                .with(
                    "t-nic",
                    TemplateMapping {
                        gateway: "2".into(),
                        entity_id: "E2".into(),
                        sender_id: "NICSMS".into(),
                        message_type: MessageType::PlainText,
                    },
                ),
        )
    }

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<MemoryStore>,
        stream: BroadcastStream,
    }

    fn harness(vendor: Arc<StubVendor>, settings: DispatchSettings) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let stream = BroadcastStream::default();
        let vendors = VendorRegistry::new().with(vendor, Arc::new(StubParser));
        let dispatcher = Dispatcher::new(
            settings,
            GatewaySelector::new(registry()),
            vendors,
            store.clone(),
            AsyncHandoff::new(Arc::new(stream.clone()), "sms.deferred"),
        );
        Harness {
            dispatcher,
            store,
            stream,
        }
    }

    fn request(template_id: &str, priority: Priority, text: &str) -> Request {
        Request::new("app", template_id, priority, text, vec!["9000000001".into()])
    }

    fn sent(result: Result<Dispatch, DispatchError>) -> Delivery {
        match result {
            Ok(Dispatch::Sent(delivery)) => delivery,
            other => panic!("expected Sent, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn synchronous_send_is_parsed_and_reconciled() {
        let vendor = StubVendor::new(Gateway::Cdac, Ok("OK abc"));
        let h = harness(vendor.clone(), DispatchSettings::default());

        let delivery = sent(h.dispatcher.dispatch(request("t-cdac", Priority::Otp, "hi")).await);
        assert_eq!(vendor.calls(), 1);
        assert_eq!(delivery.gateway, Gateway::Cdac);
        assert_eq!(delivery.outcome.reference_id, "abc");
        assert_eq!(delivery.request_id, Some(1));

        let row = h.store.get(&delivery.communication_id).await.unwrap().unwrap();
        assert_eq!(row.request.status, Status::Submitted);
        assert_eq!(row.request.sender_id, "GOVSMS");
        assert_eq!(row.outcome.unwrap().complete_response, "OK abc");
    }

    #[tokio::test]
    async fn content_is_encoded_for_the_resolved_gateway() {
        let vendor = StubVendor::new(Gateway::Cdac, Ok("OK 1"));
        let h = harness(vendor.clone(), DispatchSettings::default());

        sent(h.dispatcher.dispatch(request("t-cdac", Priority::Otp, "नम")).await);
        assert_eq!(
            vendor.last_content.lock().unwrap().as_deref(),
            Some("&#2344;&#2350;")
        );
    }

    #[tokio::test]
    async fn deferred_priorities_never_reach_a_vendor() {
        let vendor = StubVendor::new(Gateway::Cdac, Ok("OK 1"));
        let h = harness(vendor.clone(), DispatchSettings::default());
        let mut rx = h.stream.subscribe();

        for priority in [Priority::Promotional, Priority::Bulk] {
            let req = request("t-cdac", priority, "sale");
            let result = h.dispatcher.dispatch(req.clone()).await.unwrap();
            assert!(matches!(result, Dispatch::Queued { .. }));
            assert_eq!(rx.recv().await.unwrap().request, req);
        }
        assert_eq!(vendor.calls(), 0);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_template_stops_before_vendor() {
        let vendor = StubVendor::new(Gateway::Cdac, Ok("OK 1"));
        let h = harness(vendor.clone(), DispatchSettings::default());

        let err = h
            .dispatcher
            .dispatch(request("missing", Priority::Otp, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::GatewayResolution { .. }));
        assert_eq!(vendor.calls(), 0);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn gateway_without_adapter_is_unsupported() {
        let vendor = StubVendor::new(Gateway::Cdac, Ok("OK 1"));
        let h = harness(vendor.clone(), DispatchSettings::default());

        let err = h
            .dispatcher
            .dispatch(request("t-nic", Priority::Transactional, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedGateway(_)));
        assert_eq!(vendor.calls(), 0);
    }

    #[tokio::test]
    async fn vendor_http_error_becomes_failure_outcome() {
        let vendor = StubVendor::new(Gateway::Cdac, Err(503));
        let h = harness(vendor, DispatchSettings::default());

        let delivery = sent(h.dispatcher.dispatch(request("t-cdac", Priority::Otp, "hi")).await);
        assert_eq!(delivery.outcome.classification, Classification::Failure);
        assert_eq!(delivery.outcome.response_code, codes::TRANSPORT_FAILURE);
        assert!(matches!(
            delivery.vendor_error,
            Some(SmsError::VendorHttp { status: 503, .. })
        ));

        let row = h.store.get(&delivery.communication_id).await.unwrap().unwrap();
        assert_eq!(row.request.status, Status::Failed);
        assert_eq!(row.outcome.unwrap().complete_response, "unavailable");
    }

    #[tokio::test]
    async fn slow_vendor_is_cut_off_by_timeout() {
        let vendor = StubVendor::slow(Gateway::Cdac, Duration::from_secs(5));
        let settings = DispatchSettings {
            store_requests: true,
            vendor_timeout: Duration::from_millis(50),
        };
        let h = harness(vendor, settings);

        let delivery = sent(h.dispatcher.dispatch(request("t-cdac", Priority::Otp, "hi")).await);
        assert_eq!(delivery.outcome.response_code, codes::TRANSPORT_FAILURE);
        assert!(matches!(delivery.vendor_error, Some(SmsError::Transport(_))));
        let row = h.store.get(&delivery.communication_id).await.unwrap().unwrap();
        assert_eq!(row.request.status, Status::Failed);
    }

    #[tokio::test]
    async fn store_flag_off_skips_persistence() {
        let vendor = StubVendor::new(Gateway::Cdac, Ok("garbage"));
        let settings = DispatchSettings {
            store_requests: false,
            ..DispatchSettings::default()
        };
        let h = harness(vendor, settings);

        let delivery = sent(h.dispatcher.dispatch(request("t-cdac", Priority::Otp, "hi")).await);
        assert!(delivery.request_id.is_none());
        assert!(!delivery.communication_id.is_empty());
        assert_eq!(delivery.outcome.complete_response, "garbage");
        assert!(!delivery.outcome.parsed);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn reconciliation_failure_is_surfaced() {
        let vendor = StubVendor::new(Gateway::Cdac, Ok("OK 1"));
        let store = Arc::new(BrokenStore(MemoryStore::new()));
        let stream = BroadcastStream::default();
        let dispatcher = Dispatcher::new(
            DispatchSettings::default(),
            GatewaySelector::new(registry()),
            VendorRegistry::new().with(vendor.clone(), Arc::new(StubParser)),
            store.clone(),
            AsyncHandoff::new(Arc::new(stream), "sms.deferred"),
        );

        let err = dispatcher
            .dispatch(request("t-cdac", Priority::Otp, "hi"))
            .await
            .unwrap_err();
        match err {
            DispatchError::Reconciliation { outcome, reason, .. } => {
                assert!(reason.contains("disk full"));
                assert_eq!(outcome.complete_response, "OK 1");
                assert_eq!(outcome.reference_id, "1");
                assert_eq!(outcome.response_code, "200");
                assert!(outcome.is_success());
            }
            other => panic!("expected Reconciliation, got {:?}", other),
        }
        assert_eq!(vendor.calls(), 1);
        // the row stays pending for an external sweep
        assert_eq!(store.0.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let vendor = StubVendor::slow(Gateway::Cdac, Duration::from_secs(10));
        let h = harness(vendor.clone(), DispatchSettings::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = h
            .dispatcher
            .dispatch_with_cancel(request("t-cdac", Priority::Otp, "hi"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(vendor.calls(), 1);
        assert_eq!(h.store.pending().await.len(), 1);
    }
}
