//! End-to-end emission checks through a capturing `log` backend.
//!
//! This is the only test binary asserting on captured record counts. Each
//! test gives its loggers a distinct target prefix and drains only its own
//! records, so concurrently running tests never see each other's output.

use std::sync::{Mutex, Once, OnceLock};

use actix_web::{App, Error, HttpResponse, error, test, web};
use bytes::Bytes;
use log::kv::{Key, Value, VisitSource};

use actix_web_request_logging::{FormatOptions, RequestLogger, StructuredOptions};

#[derive(Debug)]
struct Captured {
    level: log::Level,
    target: String,
    message: String,
    kvs: Vec<(String, String)>,
}

impl Captured {
    fn field(&self, name: &str) -> Option<&str> {
        self.kvs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

static RECORDS: OnceLock<Mutex<Vec<Captured>>> = OnceLock::new();

fn records() -> &'static Mutex<Vec<Captured>> {
    RECORDS.get_or_init(|| Mutex::new(Vec::new()))
}

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        struct Collect<'a>(&'a mut Vec<(String, String)>);

        impl<'kvs> VisitSource<'kvs> for Collect<'_> {
            fn visit_pair(
                &mut self,
                key: Key<'kvs>,
                value: Value<'kvs>,
            ) -> Result<(), log::kv::Error> {
                self.0.push((key.to_string(), value.to_string()));
                Ok(())
            }
        }

        let mut kvs = Vec::new();
        let _ = record.key_values().visit(&mut Collect(&mut kvs));
        records().lock().unwrap().push(Captured {
            level: record.level(),
            target: record.target().to_owned(),
            message: record.args().to_string(),
            kvs,
        });
    }

    fn flush(&self) {}
}

fn init_capture() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_boxed_logger(Box::new(CaptureLogger)).unwrap();
        log::set_max_level(log::LevelFilter::Trace);
    });
}

fn take_records(target: &str) -> Vec<Captured> {
    let mut all = records().lock().unwrap();
    let mut taken = Vec::new();
    let mut kept = Vec::new();
    for record in all.drain(..) {
        if record.target.starts_with(target) {
            taken.push(record);
        } else {
            kept.push(record);
        }
    }
    *all = kept;
    taken
}

#[actix_web::test]
async fn one_record_per_request_with_extracted_fields() {
    init_capture();

    let app = test::init_service(
        App::new()
            .wrap(RequestLogger::structured(StructuredOptions::default()))
            .route(
                "/echo",
                web::post().to(|body: web::Bytes| async move {
                    HttpResponse::Ok()
                        .content_type("application/json")
                        .body(body)
                }),
            )
            .route(
                "/err",
                web::get().to(|| async {
                    Err::<HttpResponse, Error>(error::ErrorInternalServerError(
                        "attempt to divide by zero",
                    ))
                }),
            ),
    )
    .await;

    // Success: the handler reads the teed body, the client gets it back
    // byte-identical.
    let req = test::TestRequest::post()
        .uri("/echo")
        .insert_header(("content-type", "application/json"))
        .set_payload("{\"a\":1}")
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, Bytes::from_static(b"{\"a\":1}"));

    // Failure: the handler's error is turned into the framework's 500
    // response, which still carries the error for the middleware to record.
    let req = test::TestRequest::get().uri("/err").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    // The record is emitted when the response body is dropped.
    drop(res);

    let captured = take_records("actix_web_request_logging");
    assert_eq!(captured.len(), 2);

    let ok = &captured[0];
    assert_eq!(ok.level, log::Level::Info);
    assert_eq!(ok.field("request_method"), Some("POST"));
    assert_eq!(ok.field("request_path"), Some("/echo"));
    assert_eq!(ok.field("request_content_type"), Some("application/json"));
    assert_eq!(ok.field("request_body"), Some("{\"a\":1}"));
    assert_eq!(ok.field("request_size"), Some("7"));
    assert_eq!(ok.field("response_body"), Some("{\"a\":1}"));
    assert_eq!(ok.field("response_size"), Some("7"));
    assert_eq!(ok.field("response_status_code"), Some("200"));
    let duration: f64 = ok.field("duration").unwrap().parse().unwrap();
    assert!(duration >= 0.0);
    assert!(ok.message.contains("response with code 200"));

    let failed = &captured[1];
    assert_eq!(failed.level, log::Level::Error);
    assert_eq!(failed.field("request_method"), Some("GET"));
    assert_eq!(failed.field("request_path"), Some("/err"));
    assert_eq!(failed.field("response_status_code"), Some("500"));
    assert!(failed.field("exception").unwrap().contains("divide by zero"));
    assert!(failed.message.contains("error with code 500"));

    // Formatted flavor: absent placeholders render empty, excluded paths
    // emit nothing.
    let app = test::init_service(
        App::new()
            .wrap(
                RequestLogger::formatted(FormatOptions {
                    format: "{levelname} {request_method} {request_path} {remote_port}|"
                        .to_owned(),
                    ..FormatOptions::default()
                })
                .exclude("/health"),
            )
            .route("/ok", web::get().to(|| async { HttpResponse::Ok().body("ok") }))
            .route(
                "/health",
                web::get().to(|| async { HttpResponse::Ok().finish() }),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/ok").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, Bytes::from_static(b"ok"));

    let req = test::TestRequest::get().uri("/health").to_request();
    let res = test::call_service(&app, req).await;
    assert!(res.status().is_success());

    let captured = take_records("actix_web_request_logging");
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].message, "INFO GET /ok |");
    assert!(captured[0].kvs.is_empty());
}

#[actix_web::test]
async fn cancelled_request_still_emits_one_record() {
    use actix_web::dev::{Payload, Service, Transform};
    use actix_web::error::PayloadError;
    use futures_util::stream;
    use std::future::Future;

    init_capture();

    let logger = RequestLogger::structured(StructuredOptions {
        logger_name: Some("cancelled_requests".to_owned()),
        ..StructuredOptions::default()
    });
    let srv = logger.new_transform(test::ok_service()).await.unwrap();

    // A payload that never yields suspends the middleware in its body
    // drain; dropping the in-flight future there is a client disconnect.
    let mut req = test::TestRequest::post().uri("/upload").to_srv_request();
    req.set_payload(Payload::Stream {
        payload: Box::pin(stream::pending::<Result<Bytes, PayloadError>>()) as _,
    });

    let mut fut = Box::pin(srv.call(req));
    let poll = futures_util::future::poll_fn(|cx| std::task::Poll::Ready(fut.as_mut().poll(cx)))
        .await;
    assert!(poll.is_pending());
    drop(fut);

    let captured = take_records("cancelled_requests");
    assert_eq!(captured.len(), 1);
    let cancelled = &captured[0];
    assert_eq!(cancelled.level, log::Level::Warn);
    assert!(cancelled.message.contains("no response for request POST"));
    assert_eq!(cancelled.field("request_method"), Some("POST"));
    assert_eq!(cancelled.field("request_path"), Some("/upload"));
    // No response ever existed; the status field is present but carries no
    // code a backend could mistake for one.
    let status = cancelled.field("response_status_code").unwrap();
    assert!(status.parse::<u16>().is_err());
    let duration: f64 = cancelled.field("duration").unwrap().parse().unwrap();
    assert!(duration >= 0.0);
}
