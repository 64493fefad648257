//! # NIC Gateway
//!
//! Plain-credential SMS gateway adapter for smsdispatch.
//!
//! Messages are submitted with a single `GET` whose query string carries the
//! account credentials, the DLT entity/template identifiers and the message
//! itself. No hashing is involved.

use async_trait::async_trait;
use serde::Serialize;
use sms_core::{
    codes, Gateway, Grammar, GrammarRule, Matcher, MessageType, ParsedResponse, ResponseParser,
    SendRequest, SmsError, VendorClient,
};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROVIDER: &str = "nic";

/// NIC gateway client.
#[derive(Clone, Debug)]
pub struct NicClient {
    pub username: String,
    pin: String,
    /// DLT entity id registered for the account; sent on every message.
    pub entity_id: String,
    /// Endpoint; override for testing/mocking.
    pub base_url: String,
    http: reqwest::Client,
}

impl NicClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://smsgw.sms.gov.in/failsafe/MLink";

    pub fn new<S: Into<String>>(
        username: S,
        pin: S,
        entity_id: S,
        timeout: Duration,
    ) -> Result<Self, SmsError> {
        Self::with_base_url(
            username,
            pin,
            entity_id,
            Self::DEFAULT_BASE_URL.to_string(),
            timeout,
        )
    }

    pub fn with_base_url<S: Into<String>>(
        username: S,
        pin: S,
        entity_id: S,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, SmsError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmsError::Invalid(format!("http client: {}", e)))?;
        Ok(Self {
            username: username.into(),
            pin: pin.into(),
            entity_id: entity_id.into(),
            base_url,
            http,
        })
    }
}

/// `msgType` query value.
pub fn msg_type(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Unicode => "UC",
        MessageType::PlainText => "PM",
    }
}

#[derive(Debug, Serialize)]
struct NicQuery<'a> {
    username: &'a str,
    pin: &'a str,
    message: &'a str,
    mnumber: &'a str,
    signature: &'a str,
    dlt_entity_id: &'a str,
    dlt_template_id: &'a str,
    #[serde(rename = "msgType")]
    msg_type: &'a str,
}

fn transport_error(e: reqwest::Error) -> SmsError {
    if e.is_timeout() {
        SmsError::Transport(format!("timed out: {}", e))
    } else {
        SmsError::Transport(e.to_string())
    }
}

#[async_trait]
impl VendorClient for NicClient {
    fn gateway(&self) -> Gateway {
        Gateway::Nic
    }

    async fn send(&self, req: SendRequest<'_>) -> Result<String, SmsError> {
        let query = NicQuery {
            username: &self.username,
            pin: &self.pin,
            message: req.content,
            mnumber: req.mobile_numbers,
            signature: req.sender_id,
            dlt_entity_id: &self.entity_id,
            dlt_template_id: req.template_id,
            msg_type: msg_type(req.message_type),
        };
        info!(
            provider = PROVIDER,
            mnumber = req.mobile_numbers,
            dlt_template_id = req.template_id,
            "submitting message"
        );

        let res = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        let body = res.text().await.map_err(transport_error)?;
        if !status.is_success() {
            warn!(provider = PROVIDER, status = status.as_u16(), "vendor rejected request");
            return Err(SmsError::VendorHttp {
                status: status.as_u16(),
                body,
            });
        }
        debug!(provider = PROVIDER, body = %body, "vendor response");
        Ok(body)
    }
}

static GRAMMAR: LazyLock<Grammar> = LazyLock::new(|| {
    Grammar::new(PROVIDER, |m| {
        ParsedResponse::failure(codes::UNPARSED, m.raw().trim()).unparsed()
    })
    .rule(GrammarRule::new(
        "request-id",
        1,
        Matcher::pattern(r"Request ID=(\d+)~code=([A-Z0-9]+)").expect("static pattern"),
        |m| ParsedResponse::success(m.group(2), m.raw().trim(), m.group(1)),
    ))
    .rule(GrammarRule::new(
        "message-accepted",
        1,
        Matcher::Contains("Message Accepted"),
        |m| ParsedResponse::success(codes::ACCEPTED, m.raw().trim(), ""),
    ))
});

/// Response grammar for the NIC gateway.
///
/// The `Request ID=..~code=..` pattern is tried before the bare
/// "Message Accepted" acknowledgement; anything else is a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NicParser;

impl ResponseParser for NicParser {
    fn parse(&self, raw: &str) -> ParsedResponse {
        GRAMMAR.parse(raw)
    }
}
