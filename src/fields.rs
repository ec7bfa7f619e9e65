use std::{collections::HashSet, env, time::Duration};

use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::http::header::{HeaderMap, HeaderName};

use crate::record::ExceptionInfo;
use crate::tee::BodyCapture;

/// Context available only once the request has fully completed (or failed,
/// or was cancelled).
pub(crate) struct FinishContext<'a> {
    pub(crate) duration: Duration,
    pub(crate) status: Option<StatusCode>,
    pub(crate) response_size: Option<usize>,
    pub(crate) response_body: Option<&'a BodyCapture>,
    pub(crate) exception: Option<&'a ExceptionInfo>,
}

/// A loggable field.
///
/// Each variant carries its own extraction rule: rendering replaces the
/// variant in place with the terminal [`Field::KV`] form, where a `None`
/// value means the field could not be resolved for this request. Anything
/// still unrendered when the record is finalized is swept to an absent `KV`,
/// so every registry entry always resolves to a name/value pair and a
/// missing value can never break formatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    /// Key, Value. Terminal rendered form.
    KV(String, Option<String>),
    /// Elapsed request time in float seconds. Example: 0.001985
    Duration,
    /// Failure description and trace text, when the handler failed.
    Exception,
    /// Full request URI. Example: http://localhost:8080/index?x=1
    RequestUri,
    /// Referrer header. Example: https://actix.rs
    RequestReferrer,
    /// HTTP protocol. Example: HTTP/1.1
    RequestProtocol,
    /// Method. Example: GET
    RequestMethod,
    /// Request path. Example: /index.html
    RequestPath,
    /// Host. Example: localhost:8080
    RequestHost,
    /// Total request body size in bytes. Example: 1024
    RequestSize,
    /// Content-Type header. Example: application/json
    RequestContentType,
    /// Peer IP address. Example: 192.168.0.1
    RemoteIp,
    /// Peer port. Example: 51442
    RemotePort,
    /// All request headers as a JSON object.
    RequestHeaders,
    /// Captured request body text, truncated at the configured cap.
    RequestBody,
    /// Total response body size in bytes. Example: 1024
    ResponseSize,
    /// Status code. Example: 200
    ResponseStatusCode,
    /// All response headers as a JSON object.
    ResponseHeaders,
    /// Captured response body text, truncated at the configured cap.
    ResponseBody,
    /// Timestamp in RFC3339 format. Example: 2019-05-29T18:51:00.000000Z
    DateTime,
    /// A single named request header. Example: Accept: application/json
    RequestHeader(HeaderName),
    /// A single named response header. Example: ETag: "33a64df5"
    ResponseHeader(HeaderName),
    /// Environment variable. Example: USER
    Environment(String),
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

fn headers_json(headers: &HeaderMap) -> String {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let text = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match map.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&text);
            }
            _ => {
                map.insert(name.as_str().to_owned(), Value::String(text));
            }
        }
    }
    Value::Object(map).to_string()
}

impl Field {
    /// The name the field is published under, used both as the structured
    /// key and as the placeholder name in format templates.
    pub(crate) fn name(&self) -> String {
        match self {
            Field::KV(key, _) => key.clone(),
            Field::Duration => "duration".to_owned(),
            Field::Exception => "exception".to_owned(),
            Field::RequestUri => "request_uri".to_owned(),
            Field::RequestReferrer => "request_referrer".to_owned(),
            Field::RequestProtocol => "request_protocol".to_owned(),
            Field::RequestMethod => "request_method".to_owned(),
            Field::RequestPath => "request_path".to_owned(),
            Field::RequestHost => "request_host".to_owned(),
            Field::RequestSize => "request_size".to_owned(),
            Field::RequestContentType => "request_content_type".to_owned(),
            Field::RemoteIp => "remote_ip".to_owned(),
            Field::RemotePort => "remote_port".to_owned(),
            Field::RequestHeaders => "request_headers".to_owned(),
            Field::RequestBody => "request_body".to_owned(),
            Field::ResponseSize => "response_size".to_owned(),
            Field::ResponseStatusCode => "response_status_code".to_owned(),
            Field::ResponseHeaders => "response_headers".to_owned(),
            Field::ResponseBody => "response_body".to_owned(),
            Field::DateTime => "datetime".to_owned(),
            Field::RequestHeader(header) | Field::ResponseHeader(header) => header.to_string(),
            Field::Environment(name) => name.clone(),
        }
    }

    pub(crate) fn render_request(&mut self, now: OffsetDateTime, req: &ServiceRequest) {
        match self {
            Field::RequestMethod => {
                *self = Field::KV(self.name(), Some(req.method().to_string()));
            }

            Field::RequestProtocol => {
                let version = match req.version() {
                    actix_http::Version::HTTP_09 => "HTTP/0.9",
                    actix_http::Version::HTTP_10 => "HTTP/1.0",
                    actix_http::Version::HTTP_11 => "HTTP/1.1",
                    actix_http::Version::HTTP_2 => "HTTP/2.0",
                    actix_http::Version::HTTP_3 => "HTTP/3.0",
                    _ => "unknown",
                };
                *self = Field::KV(self.name(), Some(version.to_owned()));
            }

            Field::RequestPath => {
                *self = Field::KV(self.name(), Some(req.path().to_owned()));
            }

            Field::RequestUri => {
                let uri = {
                    let conn = req.connection_info();
                    format!("{}://{}{}", conn.scheme(), conn.host(), req.uri())
                };
                *self = Field::KV(self.name(), Some(uri));
            }

            Field::RequestHost => {
                let host = req.connection_info().host().to_owned();
                *self = Field::KV(self.name(), Some(host));
            }

            Field::RequestReferrer => {
                *self = Field::KV(self.name(), header_text(req.headers(), "referer"));
            }

            Field::RequestContentType => {
                *self = Field::KV(self.name(), header_text(req.headers(), "content-type"));
            }

            Field::RequestHeaders => {
                *self = Field::KV(self.name(), Some(headers_json(req.headers())));
            }

            Field::RemoteIp => {
                *self = Field::KV(self.name(), req.peer_addr().map(|addr| addr.ip().to_string()));
            }

            Field::RemotePort => {
                *self = Field::KV(
                    self.name(),
                    req.peer_addr().map(|addr| addr.port().to_string()),
                );
            }

            Field::DateTime => {
                *self = Field::KV(self.name(), now.format(&Rfc3339).ok());
            }

            &mut Field::RequestHeader(ref header) => {
                *self = Field::KV(header.to_string(), header_text(req.headers(), header.as_str()));
            }

            _ => {}
        }
    }

    /// Body-derived request fields are rendered separately: the record must
    /// already exist while the payload is still being drained, so a client
    /// disconnect mid-body leaves these absent rather than losing the record.
    pub(crate) fn render_request_body(&mut self, body: &BodyCapture) {
        match self {
            Field::RequestSize => {
                *self = Field::KV(self.name(), Some(body.total_size().to_string()));
            }

            Field::RequestBody => {
                *self = Field::KV(self.name(), Some(body.text()));
            }

            _ => {}
        }
    }

    pub(crate) fn render_response<B>(&mut self, res: &ServiceResponse<B>) {
        match self {
            Field::ResponseHeaders => {
                *self = Field::KV(self.name(), Some(headers_json(res.headers())));
            }

            &mut Field::ResponseHeader(ref header) => {
                *self = Field::KV(header.to_string(), header_text(res.headers(), header.as_str()));
            }

            _ => {}
        }
    }

    pub(crate) fn finish(&mut self, ctx: &FinishContext<'_>) {
        match self {
            Field::Duration => {
                *self = Field::KV(self.name(), Some(ctx.duration.as_secs_f64().to_string()));
            }

            Field::ResponseStatusCode => {
                *self = Field::KV(self.name(), ctx.status.map(|s| s.as_u16().to_string()));
            }

            Field::ResponseSize => {
                *self = Field::KV(self.name(), ctx.response_size.map(|s| s.to_string()));
            }

            Field::ResponseBody => {
                *self = Field::KV(self.name(), ctx.response_body.map(BodyCapture::text));
            }

            Field::Exception => {
                *self = Field::KV(
                    self.name(),
                    ctx.exception.map(|e| format!("{}: {}", e.message, e.trace)),
                );
            }

            Field::Environment(name) => {
                *self = Field::KV(name.clone(), env::var(name.as_str()).ok());
            }

            Field::KV(..) => {}

            // Everything else should have been rendered earlier; a request
            // that never got that far (cancellation) leaves them absent.
            other => {
                let name = other.name();
                *other = Field::KV(name, None);
            }
        }
    }
}

/// The set of fields a logger instance emits.
#[derive(Debug, Clone)]
pub struct Fields(HashSet<Field>);

impl Default for Fields {
    fn default() -> Self {
        FieldsBuilder::default().build()
    }
}

impl Fields {
    pub fn builder() -> FieldsBuilder {
        FieldsBuilder::new()
    }

    pub fn new(fields: HashSet<Field>) -> Self {
        Fields(fields)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ListFields(pub(crate) Vec<Field>);

impl From<Fields> for ListFields {
    fn from(fields: Fields) -> Self {
        ListFields(fields.0.into_iter().collect())
    }
}

pub struct FieldsBuilder {
    fields: HashSet<Field>,
}

impl FieldsBuilder {
    pub fn new() -> Self {
        FieldsBuilder {
            fields: HashSet::new(),
        }
    }

    pub fn build(self) -> Fields {
        Fields(self.fields)
    }

    pub fn with_duration(mut self) -> Self {
        self.fields.insert(Field::Duration);
        self
    }

    pub fn with_exception(mut self) -> Self {
        self.fields.insert(Field::Exception);
        self
    }

    pub fn with_request_uri(mut self) -> Self {
        self.fields.insert(Field::RequestUri);
        self
    }

    pub fn with_request_referrer(mut self) -> Self {
        self.fields.insert(Field::RequestReferrer);
        self
    }

    pub fn with_request_protocol(mut self) -> Self {
        self.fields.insert(Field::RequestProtocol);
        self
    }

    pub fn with_request_method(mut self) -> Self {
        self.fields.insert(Field::RequestMethod);
        self
    }

    pub fn with_request_path(mut self) -> Self {
        self.fields.insert(Field::RequestPath);
        self
    }

    pub fn with_request_host(mut self) -> Self {
        self.fields.insert(Field::RequestHost);
        self
    }

    pub fn with_request_size(mut self) -> Self {
        self.fields.insert(Field::RequestSize);
        self
    }

    pub fn with_request_content_type(mut self) -> Self {
        self.fields.insert(Field::RequestContentType);
        self
    }

    pub fn with_remote_ip(mut self) -> Self {
        self.fields.insert(Field::RemoteIp);
        self
    }

    pub fn with_remote_port(mut self) -> Self {
        self.fields.insert(Field::RemotePort);
        self
    }

    pub fn with_request_headers(mut self) -> Self {
        self.fields.insert(Field::RequestHeaders);
        self
    }

    pub fn with_request_body(mut self) -> Self {
        self.fields.insert(Field::RequestBody);
        self
    }

    pub fn with_response_size(mut self) -> Self {
        self.fields.insert(Field::ResponseSize);
        self
    }

    pub fn with_response_status_code(mut self) -> Self {
        self.fields.insert(Field::ResponseStatusCode);
        self
    }

    pub fn with_response_headers(mut self) -> Self {
        self.fields.insert(Field::ResponseHeaders);
        self
    }

    pub fn with_response_body(mut self) -> Self {
        self.fields.insert(Field::ResponseBody);
        self
    }

    pub fn with_date_time(mut self) -> Self {
        self.fields.insert(Field::DateTime);
        self
    }

    /// Log a single named request header under its own name.
    ///
    /// # Panics
    /// Panics if `header` is not a valid header name.
    pub fn with_request_header(mut self, header: &str) -> Self {
        self.fields
            .insert(Field::RequestHeader(HeaderName::try_from(header).unwrap()));
        self
    }

    /// Log a single named response header under its own name.
    ///
    /// # Panics
    /// Panics if `header` is not a valid header name.
    pub fn with_response_header(mut self, header: &str) -> Self {
        self.fields
            .insert(Field::ResponseHeader(HeaderName::try_from(header).unwrap()));
        self
    }

    /// Log an environment variable under its own name.
    pub fn with_environment(mut self, var: &str) -> Self {
        self.fields.insert(Field::Environment(var.to_owned()));
        self
    }
}

impl Default for FieldsBuilder {
    /// The full request/response vocabulary.
    fn default() -> Self {
        FieldsBuilder::new()
            .with_duration()
            .with_exception()
            .with_request_uri()
            .with_request_referrer()
            .with_request_protocol()
            .with_request_method()
            .with_request_path()
            .with_request_host()
            .with_request_size()
            .with_request_content_type()
            .with_remote_ip()
            .with_remote_port()
            .with_request_headers()
            .with_request_body()
            .with_response_size()
            .with_response_status_code()
            .with_response_headers()
            .with_response_body()
            .with_date_time()
    }
}
