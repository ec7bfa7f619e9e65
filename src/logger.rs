use std::{collections::HashSet, rc::Rc, time::Instant};

use futures_util::future::LocalBoxFuture;
use regex::Regex;
use time::OffsetDateTime;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::HttpMessage;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::{Error, Result};

use crate::fields::{Fields, ListFields};
use crate::record::EmitGuard;
use crate::sink::{FormatOptions, Sink, StructuredOptions};
use crate::tee::{DEFAULT_BODY_CAP, TeeBody, tee_payload};

/// Middleware that logs one record per request.
///
/// Wraps every request end to end: the request body is teed so the handler
/// still receives it intact, the handler's outcome (response, failure or
/// disconnect) is observed but never altered, and the captured fields are
/// emitted through the flavor chosen at construction.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_request_logging::{RequestLogger, StructuredOptions};
///
/// let app = App::new()
///     .wrap(RequestLogger::structured(StructuredOptions::default()));
/// ```
pub struct RequestLogger(Rc<Inner>);

#[derive(Debug, Clone)]
struct Inner {
    fields: ListFields,
    sink: Sink,
    exclude: HashSet<String>,
    exclude_regex: Vec<Regex>,
    body_cap: usize,
    extra_fields: Vec<(String, String)>,
}

impl RequestLogger {
    /// Create a logger emitting rendered single-line records through the
    /// positional-format flavor.
    ///
    /// # Panics
    /// Panics if `opts.date_format` is not a valid format description.
    pub fn formatted(opts: FormatOptions) -> RequestLogger {
        RequestLogger::with_sink(Sink::formatted(opts))
    }

    /// Create a logger emitting records as structured key/values through the
    /// `log` crate's kv support.
    pub fn structured(opts: StructuredOptions) -> RequestLogger {
        RequestLogger::with_sink(Sink::structured(opts))
    }

    fn with_sink(sink: Sink) -> RequestLogger {
        RequestLogger(Rc::new(Inner {
            fields: Fields::default().into(),
            sink,
            exclude: HashSet::new(),
            exclude_regex: Vec::new(),
            body_cap: DEFAULT_BODY_CAP,
            extra_fields: Vec::new(),
        }))
    }

    /// Replace the default field set with `fields`.
    pub fn fields(mut self, fields: Fields) -> Self {
        Rc::get_mut(&mut self.0).unwrap().fields = fields.into();
        self
    }

    /// Ignore and do not log requests for the specified path.
    pub fn exclude<T: Into<String>>(mut self, path: T) -> Self {
        Rc::get_mut(&mut self.0)
            .unwrap()
            .exclude
            .insert(path.into());
        self
    }

    /// Ignore and do not log requests for paths that match regex.
    pub fn exclude_regex<T: Into<String>>(mut self, path: T) -> Self {
        let inner = Rc::get_mut(&mut self.0).unwrap();
        inner.exclude_regex.push(Regex::new(&path.into()).unwrap());
        self
    }

    /// Cap, in bytes, on each captured body copy. Bytes past the cap are
    /// still delivered to the handler and the client, just not logged.
    pub fn body_cap(mut self, cap: usize) -> Self {
        Rc::get_mut(&mut self.0).unwrap().body_cap = cap;
        self
    }

    /// Add a static field merged into every emitted record. Wins over a
    /// registry field of the same name.
    pub fn extra_field<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        Rc::get_mut(&mut self.0)
            .unwrap()
            .extra_fields
            .push((key.into(), value.into()));
        self
    }
}

impl Default for RequestLogger {
    /// Structured flavor with the full default field set.
    fn default() -> Self {
        RequestLogger::structured(StructuredOptions::default())
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<TeeBody<B>>;
    type Error = Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service: Rc::new(service),
            inner: Rc::clone(&self.0),
        }))
    }
}

/// Logger middleware service.
pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
    inner: Rc<Inner>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<TeeBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Error>>;

    actix_service::forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let inner = Rc::clone(&self.inner);
        let service = Rc::clone(&self.service);
        let excluded = inner.exclude.contains(req.path())
            || inner.exclude_regex.iter().any(|r| r.is_match(req.path()));

        Box::pin(async move {
            if excluded {
                let res = service.call(req).await?;
                return Ok(res.map_body(|_, body| TeeBody::passthrough(body)));
            }

            let start = Instant::now();
            let now = OffsetDateTime::now_utc();

            let mut fields = inner.fields.clone();
            for unit in &mut fields.0 {
                unit.render_request(now, &req);
            }

            // The guard must exist before the first await: a client that
            // disconnects while the body is still being drained cancels this
            // future, and the guard's drop is what emits the record then.
            let mut guard = EmitGuard::new(
                fields,
                inner.extra_fields.clone(),
                inner.sink.clone(),
                start,
                req.method().to_string(),
                req.uri().to_string(),
            );

            let payload = req.take_payload();
            let (payload, request_body) = tee_payload(payload, inner.body_cap).await;
            req.set_payload(payload);
            guard.set_request_body(&request_body);

            match service.call(req).await {
                Ok(res) => {
                    guard.set_response(&res);
                    let cap = inner.body_cap;
                    // The guard travels with the body; the record is emitted
                    // once the last chunk has been streamed to the client.
                    Ok(res.map_body(move |_, body| TeeBody::new(body, cap, guard)))
                }
                Err(err) => {
                    guard.fail(&err);
                    Err(err)
                }
            }
        })
    }
}
