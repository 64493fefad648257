//! # SMS Dispatch
//!
//! Outbound SMS dispatch engine for message-management applications.
//!
//! ## Features
//!
//! - **Priority routing**: OTP and transactional traffic is sent synchronously,
//!   promotional and bulk traffic is handed off to an event stream
//! - **Vendor adapters**: hash-authenticated (CDAC) and plain-credential (NIC)
//!   gateways behind one [`VendorClient`](sms_core::VendorClient) trait
//! - **Response grammars**: ordered, versioned rules turn free-form vendor text
//!   into a normalized [`Outcome`](sms_core::Outcome); raw text is never lost
//! - **Reconciliation**: outcomes are written back onto the stored request in a
//!   separate keyed update
//! - **Configuration**: layered file and environment configuration
//! - **Observability**: structured logging through `tracing`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use smsdispatch::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let dispatcher = Dispatcher::from_config(
//!         &config,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(BroadcastStream::default()),
//!     )?;
//!
//!     let request = Request::new(
//!         "citizen-portal",
//!         "1107160000000012345",
//!         Priority::Otp,
//!         "Your OTP is 482913",
//!         vec!["9876543210".to_string()],
//!     );
//!     match dispatcher.dispatch(request).await? {
//!         Dispatch::Sent(delivery) => println!("{:?}", delivery.outcome),
//!         Dispatch::Queued { envelope_id } => println!("queued as {}", envelope_id),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! use smsdispatch::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("store requests: {}, vendor timeout: {}s",
//!          config.dispatch.store_requests,
//!          config.dispatch.vendor_timeout_seconds);
//! ```

pub mod config;
pub mod dispatcher;
pub mod handoff;
pub mod logging;
pub mod reconciler;
pub mod selector;
pub mod store;
pub mod vendors;

pub use crate::config::*;

/// Common imports for smsdispatch usage
pub mod prelude {
    pub use crate::config::{
        AppConfig, CdacConfig, DispatchConfig, LoggingConfig, NicConfig, ProvidersConfig,
        TemplateConfig,
    };
    pub use crate::dispatcher::{Delivery, Dispatch, DispatchSettings, Dispatcher};
    pub use crate::handoff::{AsyncHandoff, BroadcastStream, EventStream, RequestEnvelope};
    pub use crate::reconciler::Reconciler;
    pub use crate::selector::{
        GatewaySelector, Route, StaticTemplateRegistry, TemplateMapping, TemplateRegistry,
    };
    pub use crate::store::{MemoryStore, RequestStore};
    pub use sms_core::*;
}
