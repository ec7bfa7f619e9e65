use std::time::Instant;

use log::Level;
use time::OffsetDateTime;

use actix_web::Error;
use actix_web::dev::ServiceResponse;
use actix_web::http::StatusCode;

use crate::fields::{Field, FinishContext, ListFields};
use crate::sink::Sink;
use crate::tee::BodyCapture;

/// Upper bound on any single normalized field value. Bodies and header maps
/// are bounded here again on top of the capture cap so a format template can
/// safely interpolate any field.
pub(crate) const MAX_FIELD_TEXT: usize = 2048;

/// Captured handler failure.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionInfo {
    pub(crate) message: String,
    pub(crate) trace: String,
}

/// A finalized record, ready for either sink flavor.
///
/// `fields` is the full normalized mapping: every registry entry appears by
/// name, `None` meaning the value could not be resolved for this request.
#[derive(Debug)]
pub struct NormalizedRecord {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, Option<String>)>,
    pub exception_trace: Option<String>,
    pub created: OffsetDateTime,
}

impl NormalizedRecord {
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }
}

pub(crate) fn bound_text(mut text: String) -> String {
    if text.len() > MAX_FIELD_TEXT {
        let mut cut = MAX_FIELD_TEXT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

pub(crate) fn upsert(
    fields: &mut Vec<(String, Option<String>)>,
    key: String,
    value: Option<String>,
) {
    match fields.iter_mut().find(|(existing, _)| *existing == key) {
        Some(slot) => slot.1 = value,
        None => fields.push((key, value)),
    }
}

/// Converts rendered registry fields plus caller-supplied extras into the
/// final mapping. Extras win on name collision.
pub(crate) fn normalize(
    fields: ListFields,
    extras: &[(String, String)],
) -> Vec<(String, Option<String>)> {
    let mut out: Vec<(String, Option<String>)> = Vec::with_capacity(fields.0.len() + extras.len());
    for field in fields.0 {
        match field {
            Field::KV(key, value) => out.push((key, value.map(bound_text))),
            other => out.push((other.name(), None)),
        }
    }
    for (key, value) in extras {
        upsert(&mut out, key.clone(), Some(bound_text(value.clone())));
    }
    out
}

/// Exclusive owner of one request's captured state.
///
/// Emits exactly once: from the response body's drop on the normal path,
/// from [`EmitGuard::fail`] when the handler errored, or from its own `Drop`
/// if the request future was cancelled before a response existed.
pub(crate) struct EmitGuard {
    fields: ListFields,
    extras: Vec<(String, String)>,
    sink: Sink,
    start: Instant,
    method: String,
    uri: String,
    status: Option<StatusCode>,
    exception: Option<ExceptionInfo>,
    emitted: bool,
}

impl EmitGuard {
    pub(crate) fn new(
        fields: ListFields,
        extras: Vec<(String, String)>,
        sink: Sink,
        start: Instant,
        method: String,
        uri: String,
    ) -> Self {
        EmitGuard {
            fields,
            extras,
            sink,
            start,
            method,
            uri,
            status: None,
            exception: None,
            emitted: false,
        }
    }

    /// Fills the body-derived request fields once the payload drain has
    /// completed. Skipped entirely when the request is cancelled mid-drain,
    /// leaving those fields absent in the emitted record.
    pub(crate) fn set_request_body(&mut self, body: &BodyCapture) {
        for unit in &mut self.fields.0 {
            unit.render_request_body(body);
        }
    }

    pub(crate) fn set_response<B>(&mut self, res: &ServiceResponse<B>) {
        self.status = Some(res.status());
        for unit in &mut self.fields.0 {
            unit.render_response(res);
        }
        if let Some(err) = res.response().error() {
            self.set_exception(err);
        }
    }

    pub(crate) fn set_exception(&mut self, err: &Error) {
        self.exception = Some(ExceptionInfo {
            message: err.to_string(),
            trace: format!("{err:?}"),
        });
    }

    /// Handler failure path: record the failure and the status the framework
    /// will answer with, then emit.
    pub(crate) fn fail(&mut self, err: &Error) {
        self.set_exception(err);
        self.status = Some(err.as_response_error().status_code());
        self.complete(None, None);
    }

    /// Normal path: the response body finished streaming (or was dropped).
    pub(crate) fn finish_stream(&mut self, size: usize, body: &BodyCapture) {
        self.complete(Some(size), Some(body));
    }

    fn complete(&mut self, response_size: Option<usize>, response_body: Option<&BodyCapture>) {
        if self.emitted {
            return;
        }
        self.emitted = true;

        let duration = self.start.elapsed();
        let ctx = FinishContext {
            duration,
            status: self.status,
            response_size,
            response_body,
            exception: self.exception.as_ref(),
        };
        for unit in &mut self.fields.0 {
            unit.finish(&ctx);
        }

        let level = match (&self.exception, self.status) {
            (Some(_), _) => Level::Error,
            (None, Some(status)) if status.is_client_error() || status.is_server_error() => {
                Level::Error
            }
            (None, Some(status)) if status.is_redirection() => Level::Warn,
            (None, Some(_)) => Level::Info,
            (None, None) => Level::Warn,
        };
        let message = match self.status {
            Some(status) => format!(
                "{} with code {} for request {} \"{}\"",
                if level == Level::Error { "error" } else { "response" },
                status.as_u16(),
                self.method,
                self.uri,
            ),
            None => format!("no response for request {} \"{}\"", self.method, self.uri),
        };

        let fields = std::mem::replace(&mut self.fields, ListFields(Vec::new()));
        let record = NormalizedRecord {
            level,
            message,
            fields: normalize(fields, &self.extras),
            exception_trace: self.exception.as_ref().map(|e| e.trace.clone()),
            created: OffsetDateTime::now_utc(),
        };
        self.sink.emit(&record);
    }
}

impl Drop for EmitGuard {
    fn drop(&mut self) {
        // Cancellation path; a no-op when already emitted.
        self.complete(None, None);
    }
}
