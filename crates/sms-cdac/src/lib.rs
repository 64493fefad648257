//! # CDAC Gateway
//!
//! Hash-authenticated SMS gateway adapter for smsdispatch.
//!
//! Every submission is a form-encoded `POST` carrying the MD5 digest of the
//! account password and a per-message SHA-512 key over
//! `username + senderid + content + secret`. Responses are plain text:
//! `"<code>,MsgID = <id>"` on acceptance, `"Error <code> : <message>"` otherwise.

use async_trait::async_trait;
use md5::Md5;
use serde::Serialize;
use sha2::{Digest, Sha512};
use sms_core::{
    codes, Gateway, Grammar, GrammarRule, Matcher, MessageType, ParsedResponse, ResponseParser,
    SendRequest, SmsError, VendorClient,
};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROVIDER: &str = "cdac";

/// CDAC REST client.
#[derive(Clone, Debug)]
pub struct CdacClient {
    /// Department account user name.
    pub username: String,
    /// Hex MD5 digest of the account password; the plaintext is never kept.
    password_digest: String,
    /// Shared secret mixed into the per-message key.
    secret_key: String,
    /// Submission endpoint; override for testing/mocking.
    pub base_url: String,
    http: reqwest::Client,
}

impl CdacClient {
    pub const DEFAULT_BASE_URL: &'static str =
        "https://msdgweb.mgov.gov.in/esms/sendsmsrequestDLT";

    pub fn new<S: Into<String>>(
        username: S,
        password: &str,
        secret_key: S,
        timeout: Duration,
    ) -> Result<Self, SmsError> {
        Self::with_base_url(
            username,
            password,
            secret_key,
            Self::DEFAULT_BASE_URL.to_string(),
            timeout,
        )
    }

    pub fn with_base_url<S: Into<String>>(
        username: S,
        password: &str,
        secret_key: S,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, SmsError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmsError::Invalid(format!("http client: {}", e)))?;
        Ok(Self {
            username: username.into(),
            password_digest: password_digest(password),
            secret_key: secret_key.into(),
            base_url,
            http,
        })
    }
}

/// Hex MD5 digest of the plaintext password, as the gateway expects it.
pub fn password_digest(password: &str) -> String {
    hex::encode(Md5::digest(password.as_bytes()))
}

/// Hex SHA-512 of `username + sender_id + content + secret`.
pub fn message_key(username: &str, sender_id: &str, content: &str, secret: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(username.as_bytes());
    hasher.update(sender_id.as_bytes());
    hasher.update(content.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// `smsservicetype` for a message: unicode wins, then anything mentioning an OTP.
pub fn service_type(content: &str, message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Unicode => "unicodemsg",
        MessageType::PlainText if content.to_lowercase().contains("otp") => "otpmsg",
        MessageType::PlainText => "singlemsg",
    }
}

#[derive(Debug, Serialize)]
struct CdacSendForm<'a> {
    username: &'a str,
    password: &'a str,
    mobileno: &'a str,
    senderid: &'a str,
    content: &'a str,
    smsservicetype: &'a str,
    key: String,
    templateid: &'a str,
}

fn transport_error(e: reqwest::Error) -> SmsError {
    if e.is_timeout() {
        SmsError::Transport(format!("timed out: {}", e))
    } else {
        SmsError::Transport(e.to_string())
    }
}

#[async_trait]
impl VendorClient for CdacClient {
    fn gateway(&self) -> Gateway {
        Gateway::Cdac
    }

    async fn send(&self, req: SendRequest<'_>) -> Result<String, SmsError> {
        let smsservicetype = service_type(req.content, req.message_type);
        let form = CdacSendForm {
            username: &self.username,
            password: &self.password_digest,
            mobileno: req.mobile_numbers,
            senderid: req.sender_id,
            content: req.content,
            smsservicetype,
            key: message_key(&self.username, req.sender_id, req.content, &self.secret_key),
            templateid: req.template_id,
        };
        info!(
            provider = PROVIDER,
            mobileno = req.mobile_numbers,
            smsservicetype,
            templateid = req.template_id,
            "submitting message"
        );

        let res = self
            .http
            .post(&self.base_url)
            .form(&form)
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
        ParsedResponse::success(codes::UNPARSED, m.raw().trim(), "").unparsed()
    })
    .rule(GrammarRule::new(
        "error-detail",
        1,
        Matcher::pattern(r"(?s)^Error\s+(\S+)\s*:\s*(.*?)\s*$").expect("static pattern"),
        |m| ParsedResponse::failure(m.group(1), m.group(2)),
    ))
    .rule(GrammarRule::new(
        "error-marker",
        1,
        Matcher::Prefix("Error"),
        |m| ParsedResponse::failure(codes::INVALID_RESPONSE, m.raw().trim()),
    ))
    .rule(GrammarRule::new(
        "msgid",
        1,
        Matcher::pattern(r"^(\d{3}),MsgID = (\d+\w*)").expect("static pattern"),
        |m| ParsedResponse::success(m.group(1), m.raw().trim(), m.group(2)),
    ))
});

/// Response grammar for the CDAC gateway.
///
/// Text starting with `Error` is always a failure. Anything else that is not
/// a `MsgID` acknowledgement is an unparsed success carrying [`codes::UNPARSED`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CdacParser;

impl ResponseParser for CdacParser {
    fn parse(&self, raw: &str) -> ParsedResponse {
        GRAMMAR.parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sms_core::Classification;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> CdacClient {
        CdacClient::with_base_url(
            "dept",
            "password",
            "s3cr3t",
            format!("{}/esms/sendsmsrequestDLT", base_url),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn otp_request(content: &str) -> SendRequest<'_> {
        SendRequest {
            mobile_numbers: "9876543210",
            sender_id: "GOVSMS",
            content,
            message_type: MessageType::PlainText,
            template_id: "1107160000000012345",
            entity_id: "1101100000000001234",
        }
    }

    #[test]
    fn password_digest_is_hex_md5() {
        assert_eq!(password_digest("password"), "5f4dcc3b5aa765d61d8327deb882cf99");
    }

    #[test]
    fn message_key_is_sha512_of_concatenation() {
        let expected = "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
                        2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f";
        assert_eq!(message_key("a", "b", "c", ""), expected);
    }

    #[test]
    fn message_key_is_deterministic() {
        let a = message_key("dept", "GOVSMS", "Your OTP is 1234", "s3cr3t");
        let b = message_key("dept", "GOVSMS", "Your OTP is 1234", "s3cr3t");
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        assert_ne!(a, message_key("dept", "GOVSMS", "Your OTP is 1235", "s3cr3t"));
    }

    #[test]
    fn service_type_heuristics() {
        assert_eq!(service_type("Your OTP is 1", MessageType::PlainText), "otpmsg");
        assert_eq!(service_type("one-time otp", MessageType::PlainText), "otpmsg");
        assert_eq!(service_type("&#2344;otp", MessageType::Unicode), "unicodemsg");
        assert_eq!(service_type("Meeting at 5", MessageType::PlainText), "singlemsg");
    }

    #[test]
    fn parses_msgid_acknowledgement() {
        let parsed = CdacParser.parse("200,MsgID = 12345appostsms");
        assert_eq!(parsed.classification, Classification::Success);
        assert_eq!(parsed.response_code, "200");
        assert_eq!(parsed.reference_id, "12345appostsms");
        assert_eq!(parsed.rule, "msgid@v1");
    }

    #[test]
    fn parses_error_detail() {
        let parsed = CdacParser.parse("Error 401 : Invalid Sender");
        assert_eq!(parsed.classification, Classification::Failure);
        assert_eq!(parsed.response_code, "401");
        assert_eq!(parsed.response_text, "Invalid Sender");
        assert!(parsed.parsed);
    }

    #[test]
    fn malformed_error_uses_invalid_response_code() {
        let parsed = CdacParser.parse("Error: gateway busy");
        assert_eq!(parsed.classification, Classification::Failure);
        assert_eq!(parsed.response_code, codes::INVALID_RESPONSE);
        assert_eq!(parsed.rule, "error-marker@v1");
    }

    #[test]
    fn error_marker_is_case_sensitive() {
        let parsed = CdacParser.parse("error 401 : lower case");
        assert_eq!(parsed.classification, Classification::Success);
        assert_eq!(parsed.response_code, codes::UNPARSED);
        assert!(!parsed.parsed);
    }

    #[test]
    fn unknown_text_is_unparsed_success() {
        let parsed = CdacParser.parse("Submitted OK");
        assert_eq!(parsed.classification, Classification::Success);
        assert_eq!(parsed.response_code, codes::UNPARSED);
        assert_eq!(parsed.response_text, "Submitted OK");
        assert_eq!(parsed.rule, "fallback");
    }

    #[tokio::test]
    async fn send_posts_form_with_derived_hashes() {
        let server = MockServer::start().await;
        let key = message_key("dept", "GOVSMS", "Your OTP is 4455", "s3cr3t");

        Mock::given(method("POST"))
            .and(path("/esms/sendsmsrequestDLT"))
            .and(body_string_contains("username=dept"))
            .and(body_string_contains(
                "password=5f4dcc3b5aa765d61d8327deb882cf99",
            ))
            .and(body_string_contains("smsservicetype=otpmsg"))
            .and(body_string_contains("mobileno=9876543210"))
            .and(body_string_contains(format!("key={}", key)))
            .and(body_string_contains("templateid=1107160000000012345"))
            .respond_with(ResponseTemplate::new(200).set_body_string("402,MsgID = 77appostsms"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let raw = client.send(otp_request("Your OTP is 4455")).await.unwrap();
        assert_eq!(raw, "402,MsgID = 77appostsms");
    }

    #[tokio::test]
    async fn non_success_status_is_vendor_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        match client.send(otp_request("hello")).await {
            Err(SmsError::VendorHttp { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected VendorHttp, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_vendor_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("402,MsgID = 1")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = CdacClient::with_base_url(
            "dept",
            "password",
            "s3cr3t",
            server.uri(),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = client.send(otp_request("hello")).await.unwrap_err();
        assert!(matches!(err, SmsError::Transport(_)), "got {:?}", err);
    }
}
