//! # SMS Core
//!
//! Core traits and types for the smsdispatch outbound SMS engine.
//!
//! This crate provides the building blocks shared by every vendor adapter and
//! by the dispatch coordinator:
//! - [`Request`] and [`Outcome`], the durable request record and the normalized
//!   result of one vendor round-trip
//! - [`VendorClient`] and [`ResponseParser`], the two halves of a vendor adapter
//! - [`VendorRegistry`] to look adapters up by [`Gateway`]
//! - the [`encoding`] transforms and the [`grammar`] engine used by parsers
//!
//! ## Example
//!
//! ```rust,ignore
//! use sms_core::{SendRequest, VendorClient};
//!
//! // Any vendor adapter implements VendorClient
//! let raw = client.send(SendRequest {
//!     mobile_numbers: "9876543210",
//!     sender_id: "GOVSMS",
//!     content: "Your OTP is 123456",
//!     message_type: MessageType::PlainText,
//!     template_id: "1107160000000012345",
//!     entity_id: "1101100000000001234",
//! }).await?;
//! let parsed = parser.parse(&raw);
//! ```

pub mod encoding;
pub mod grammar;

pub use encoding::{decode_numeric_references, encode};
pub use grammar::{Grammar, GrammarRule, Matcher, RuleMatch};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Errors raised by a vendor adapter while talking to its gateway
#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    /// Network failure or timeout reaching the vendor
    #[error("transport error: {0}")]
    Transport(String),
    /// Vendor answered with a non-success HTTP status
    #[error("vendor returned HTTP {status}: {body}")]
    VendorHttp { status: u16, body: String },
    /// Invalid request parameters or adapter configuration
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Terminal failures of a dispatch attempt, surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no gateway mapping for template {template_id}: {reason}")]
    GatewayResolution { template_id: String, reason: String },
    #[error("unsupported gateway: {0}")]
    UnsupportedGateway(String),
    #[error("request could not be persisted: {0}")]
    Persistence(String),
    /// The vendor call completed but its outcome could not be stored.
    #[error("reconciliation failed for {communication_id}: {reason}")]
    Reconciliation {
        communication_id: String,
        reason: String,
        /// Outcome that failed to persist, raw vendor text included.
        outcome: Box<Outcome>,
    },
    #[error("async hand-off failed: {0}")]
    Handoff(String),
    #[error("dispatch cancelled")]
    Cancelled,
    #[error("SMS error: {0}")]
    Sms(#[from] SmsError),
}

/// Fixed response codes used when the vendor did not supply one.
pub mod codes {
    /// Vendor error text that does not follow the `Error <code> : <message>` form.
    pub const INVALID_RESPONSE: &str = "01";
    /// Transport failure or non-success HTTP status.
    pub const TRANSPORT_FAILURE: &str = "02";
    /// Response that matched no grammar rule.
    pub const UNPARSED: &str = "03";
    /// Bare "Message Accepted" acknowledgement without a request id.
    pub const ACCEPTED: &str = "ACCEPTED";
}

/// Message priority. 1 and 2 are dispatched synchronously, 3 and 4 are deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Otp = 1,
    Transactional = 2,
    Promotional = 3,
    Bulk = 4,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Promotional and bulk traffic bypasses synchronous dispatch.
    pub fn is_deferred(self) -> bool {
        matches!(self, Priority::Promotional | Priority::Bulk)
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Otp),
            2 => Ok(Priority::Transactional),
            3 => Ok(Priority::Promotional),
            4 => Ok(Priority::Bulk),
            other => Err(format!("priority must be 1..=4, got {}", other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.as_u8()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    PlainText,
    Unicode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    Submitted,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending)
    }
}

/// The closed set of supported vendor gateways.
///
/// Template registries identify gateways by wire id (`"1"`, `"2"`); the
/// lowercase vendor name is accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    /// Hash-authenticated vendor (form POST with MD5/SHA-512 derived values).
    Cdac,
    /// Plain-credential vendor (GET query string).
    Nic,
}

impl Gateway {
    pub fn id(self) -> &'static str {
        match self {
            Gateway::Cdac => "1",
            Gateway::Nic => "2",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Gateway::Cdac => "cdac",
            Gateway::Nic => "nic",
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Gateway {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" | "cdac" => Ok(Gateway::Cdac),
            "2" | "nic" => Ok(Gateway::Nic),
            other => Err(DispatchError::UnsupportedGateway(other.to_string())),
        }
    }
}

/// One message send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Assigned by the persistence layer.
    pub request_id: Option<i64>,
    /// Join key between the request and its outcome.
    pub communication_id: Option<String>,
    pub application_id: String,
    pub facility_id: String,
    pub priority: Priority,
    pub message_text: String,
    pub message_type: MessageType,
    pub sender_id: String,
    pub mobile_numbers: Vec<String>,
    pub entity_id: String,
    pub template_id: String,
    pub gateway: Option<Gateway>,
    pub status: Status,
}

impl Request {
    /// A pending request with gateway metadata still unresolved.
    pub fn new(
        application_id: impl Into<String>,
        template_id: impl Into<String>,
        priority: Priority,
        message_text: impl Into<String>,
        mobile_numbers: Vec<String>,
    ) -> Self {
        Self {
            request_id: None,
            communication_id: None,
            application_id: application_id.into(),
            facility_id: String::new(),
            priority,
            message_text: message_text.into(),
            message_type: MessageType::PlainText,
            sender_id: String::new(),
            mobile_numbers,
            entity_id: String::new(),
            template_id: template_id.into(),
            gateway: None,
            status: Status::Pending,
        }
    }

    pub fn with_facility(mut self, facility_id: impl Into<String>) -> Self {
        self.facility_id = facility_id.into();
        self
    }

    /// Mobile numbers in wire form (comma-delimited).
    pub fn mobile_list(&self) -> String {
        self.mobile_numbers.join(",")
    }
}

/// Parameters handed to a [`VendorClient`]; `content` is already encoded.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SendRequest<'a> {
    pub mobile_numbers: &'a str,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub message_type: MessageType,
    pub template_id: &'a str,
    pub entity_id: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Success,
    Failure,
}

/// What a [`ResponseParser`] extracted from raw vendor text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub classification: Classification,
    /// False when a fallback rule produced the verdict.
    pub parsed: bool,
    pub response_code: String,
    pub response_text: String,
    pub reference_id: String,
    /// `name@vN` of the grammar rule that matched.
    pub rule: String,
}

impl ParsedResponse {
    pub fn success(
        code: impl Into<String>,
        text: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            classification: Classification::Success,
            parsed: true,
            response_code: code.into(),
            response_text: text.into(),
            reference_id: reference_id.into(),
            rule: String::new(),
        }
    }

    pub fn failure(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            classification: Classification::Failure,
            parsed: true,
            response_code: code.into(),
            response_text: text.into(),
            reference_id: String::new(),
            rule: String::new(),
        }
    }

    /// Marks the verdict as a best-effort fallback.
    pub fn unparsed(mut self) -> Self {
        self.parsed = false;
        self
    }
}

/// Normalized result of one vendor round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub communication_id: String,
    pub classification: Classification,
    pub parsed: bool,
    pub response_code: String,
    pub response_text: String,
    pub reference_id: String,
    /// Raw vendor text, kept verbatim whatever the parse result.
    pub complete_response: String,
    pub rule: String,
}

impl Outcome {
    pub fn from_parsed(
        communication_id: impl Into<String>,
        complete_response: impl Into<String>,
        parsed: ParsedResponse,
    ) -> Self {
        Self {
            communication_id: communication_id.into(),
            classification: parsed.classification,
            parsed: parsed.parsed,
            response_code: parsed.response_code,
            response_text: parsed.response_text,
            reference_id: parsed.reference_id,
            complete_response: complete_response.into(),
            rule: parsed.rule,
        }
    }

    /// Failure outcome for a vendor call that never produced a usable body.
    pub fn vendor_failure(communication_id: impl Into<String>, error: &SmsError) -> Self {
        let complete_response = match error {
            SmsError::VendorHttp { body, .. } => body.clone(),
            other => other.to_string(),
        };
        Self {
            communication_id: communication_id.into(),
            classification: Classification::Failure,
            parsed: false,
            response_code: codes::TRANSPORT_FAILURE.to_string(),
            response_text: error.to_string(),
            reference_id: String::new(),
            complete_response,
            rule: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.classification == Classification::Success
    }

    /// Terminal request status implied by this outcome.
    pub fn status(&self) -> Status {
        match self.classification {
            Classification::Success => Status::Submitted,
            Classification::Failure => Status::Failed,
        }
    }
}

/// Outbound half of a vendor adapter.
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Gateway this client talks to.
    fn gateway(&self) -> Gateway;
    /// Perform the vendor call and return the raw response body.
    async fn send(&self, req: SendRequest<'_>) -> Result<String, SmsError>;
}

/// Converts one vendor's raw response text into a [`ParsedResponse`].
///
/// Parsing is total: text matching no rule degrades to a fallback verdict.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, raw: &str) -> ParsedResponse;
}

/// Utility to create a communication id when no durable row assigns one.
pub fn fallback_id() -> String {
    Uuid::new_v4().to_string()
}

/// A vendor client paired with the parser for its responses.
#[derive(Clone)]
pub struct VendorBinding {
    pub client: Arc<dyn VendorClient>,
    pub parser: Arc<dyn ResponseParser>,
}

/// Runtime registry so the coordinator can reach any configured vendor by gateway.
#[derive(Default, Clone)]
pub struct VendorRegistry {
    map: Arc<HashMap<Gateway, VendorBinding>>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self {
            map: Arc::new(HashMap::new()),
        }
    }

    pub fn with(mut self, client: Arc<dyn VendorClient>, parser: Arc<dyn ResponseParser>) -> Self {
        let mut m = (*self.map).clone();
        m.insert(client.gateway(), VendorBinding { client, parser });
        self.map = Arc::new(m);
        self
    }

    pub fn get(&self, gateway: Gateway) -> Option<VendorBinding> {
        self.map.get(&gateway).cloned()
    }

    pub fn gateways(&self) -> Vec<Gateway> {
        self.map.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_routes_low_priority_to_stream() {
        assert!(!Priority::Otp.is_deferred());
        assert!(!Priority::Transactional.is_deferred());
        assert!(Priority::Promotional.is_deferred());
        assert!(Priority::Bulk.is_deferred());
    }

    #[test]
    fn priority_rejects_out_of_range() {
        assert!(Priority::try_from(0).is_err());
        assert!(Priority::try_from(5).is_err());
        let p: Priority = serde_json::from_str("2").unwrap();
        assert_eq!(p, Priority::Transactional);
        assert!(serde_json::from_str::<Priority>("9").is_err());
    }

    #[test]
    fn gateway_parses_wire_ids_and_names() {
        assert_eq!("1".parse::<Gateway>().unwrap(), Gateway::Cdac);
        assert_eq!("nic".parse::<Gateway>().unwrap(), Gateway::Nic);
        for gateway in [Gateway::Cdac, Gateway::Nic] {
            assert_eq!(gateway.id().parse::<Gateway>().unwrap(), gateway);
        }
        match "7".parse::<Gateway>() {
            Err(DispatchError::UnsupportedGateway(id)) => assert_eq!(id, "7"),
            other => panic!("expected UnsupportedGateway, got {:?}", other),
        }
    }

    #[test]
    fn vendor_failure_keeps_http_body() {
        let err = SmsError::VendorHttp {
            status: 503,
            body: "Service Unavailable".into(),
        };
        let outcome = Outcome::vendor_failure("c-1", &err);
        assert_eq!(outcome.response_code, codes::TRANSPORT_FAILURE);
        assert_eq!(outcome.complete_response, "Service Unavailable");
        assert_eq!(outcome.status(), Status::Failed);
        assert!(!outcome.parsed);
    }

    #[test]
    fn request_joins_mobile_numbers() {
        let req = Request::new(
            "app",
            "t-1",
            Priority::Otp,
            "hi",
            vec!["9000000001".into(), "9000000002".into()],
        );
        assert_eq!(req.mobile_list(), "9000000001,9000000002");
        assert_eq!(req.status, Status::Pending);
        assert!(req.gateway.is_none());
    }
}
