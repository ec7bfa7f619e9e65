//! Actix-web middleware for structured request/response logs with body
//! capture, failure tracing, and a call-site-aware extra-logger.
//!
//! Every request is observed end to end: headers, bodies, timing, status
//! and handler failures are collected into one record per request and
//! emitted through the `log` crate. Logging is purely observational — the
//! handler still receives the request body byte for byte, responses are
//! forwarded untouched, and a failing handler's error is re-raised
//! unchanged after being recorded.
//!
//! # Examples
//! ## Structured flavor
//! Fields are attached as `log` key/values, so any kv-aware backend can
//! format them by name:
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use actix_web_request_logging::{RequestLogger, StructuredOptions};
//! use structured_logger::{async_json::new_writer, Builder};
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Builder::new()
//!         .with_target_writer("*", new_writer(tokio::io::stdout()))
//!         .init();
//!
//!     HttpServer::new(|| {
//!         App::new()
//!             .wrap(RequestLogger::structured(StructuredOptions::default()))
//!             .route("/", web::get().to(|| async { "Hello world!" }))
//!     })
//!     .bind("127.0.0.1:8080")?
//!     .run()
//!     .await
//! }
//! ```
//! ## Positional-format flavor
//! Each record is rendered through a `{field}` template into a single line
//! before emission:
//! ```rust
//! use actix_web::App;
//! use actix_web_request_logging::{FormatOptions, RequestLogger};
//!
//! let app = App::new().wrap(RequestLogger::formatted(FormatOptions {
//!     format: "{asctime} {levelname} {request_method} {request_path} \
//!              {response_status_code} {duration} {message}"
//!         .to_owned(),
//!     ..FormatOptions::default()
//! }));
//! ```
//! A placeholder whose field has no value for a request (say `remote_port`
//! on a unix-socket connection) renders empty; it never fails the emission.
//!
//! ## Extra-logger
//! Augments ad-hoc log calls, anywhere in application code, with the call
//! site and the enclosing function's argument values:
//! ```rust
//! use actix_web_request_logging::{extra_warn, ExtraLogger, StructuredOptions};
//!
//! fn charge(account: &str, amount: u32) {
//!     let log = ExtraLogger::structured(StructuredOptions::default());
//!     extra_warn!(log, "charge flagged", args = [account, amount],
//!                 extra = { "review" => true });
//! }
//! charge("acc-1", 250);
//! ```
//!
//! # Configuration
//!
//! ## Custom fields
//! ```rust
//! use actix_web_request_logging::{Fields, RequestLogger, StructuredOptions};
//!
//! let logger = RequestLogger::structured(StructuredOptions::default()).fields(
//!     Fields::builder()
//!         .with_request_method()
//!         .with_request_path()
//!         .with_response_status_code()
//!         .with_duration()
//!         .with_exception()
//!         .build(),
//! );
//! ```
//!
//! ## Path exclusions
//! ```rust
//! use actix_web_request_logging::RequestLogger;
//!
//! let logger = RequestLogger::default()
//!     .exclude("/health")
//!     .exclude_regex(r"^/assets/.*");
//! ```
//!
//! ## Body capture cap
//! Captured request/response bodies are bounded; bytes past the cap are
//! still delivered, just not logged:
//! ```rust
//! use actix_web_request_logging::RequestLogger;
//!
//! let logger = RequestLogger::default().body_cap(16 * 1024);
//! ```
//!
//! # Available fields
//!
//! - `duration` - elapsed request time in float seconds
//! - `exception` - failure description and trace text, when the handler failed
//! - `request_uri` - full request URI
//! - `request_referrer` - Referer header
//! - `request_protocol` - HTTP protocol version
//! - `request_method` - HTTP method (GET, POST, etc.)
//! - `request_path` - request path
//! - `request_host` - request host
//! - `request_size` - request body size in bytes
//! - `request_content_type` - Content-Type header
//! - `remote_ip` / `remote_port` - peer address
//! - `request_headers` / `response_headers` - header maps as JSON
//! - `request_body` / `response_body` - captured body text, capped
//! - `response_size` - response body size in bytes
//! - `response_status_code` - response status code
//! - `datetime` - request timestamp in RFC3339 format
//!
//! Named single headers and environment variables can also be logged under
//! their own names. These field names are a public contract; log-shipping
//! configuration may reference them.
//!
//! Attaching both flavors at once is supported: each middleware instance is
//! independent and emits its own record per request.

mod extra;
mod fields;
mod logger;
mod record;
mod sink;
mod tee;

pub use crate::extra::{CallSite, ExtraLogger};
pub use crate::fields::{Field, Fields, FieldsBuilder};
pub use crate::logger::{RequestLogger, RequestLoggerMiddleware};
pub use crate::record::NormalizedRecord;
pub use crate::sink::{DEFAULT_DATE_FORMAT, DEFAULT_FORMAT, FormatOptions, StructuredOptions};
pub use crate::tee::{BodyCapture, TeeBody};

pub use log::{Level, LevelFilter};
