use log::Level;
use time::OffsetDateTime;

use crate::record::{NormalizedRecord, bound_text, upsert};
use crate::sink::{FormatOptions, Sink, StructuredOptions};

/// Where a log call was issued from, captured at compile time by
/// [`callsite!`](crate::callsite).
#[derive(Debug, Clone, Copy)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    /// Fully qualified enclosing function.
    pub function: &'static str,
}

/// A logging-call wrapper that tags every message with its call site and the
/// enclosing function's argument values, independent of any request.
///
/// Each call synthesizes `request_path` (`file:line.function`) and
/// `request_body` (argument snapshot text) and merges them with the
/// logger-level and per-call custom fields; an explicitly passed field wins
/// on collision. Calls without a resolvable call site (the macro-free `log`
/// method with `None`) emit absent values instead of failing.
///
/// # Examples
/// ```rust
/// use actix_web_request_logging::{extra_info, ExtraLogger, StructuredOptions};
///
/// fn transfer(account: &str, amount: u32) {
///     let log = ExtraLogger::structured(StructuredOptions::default());
///     extra_info!(log, "transfer accepted", args = [account, amount]);
/// }
/// transfer("acc-1", 250);
/// ```
pub struct ExtraLogger {
    sink: Sink,
    extra_fields: Vec<(String, String)>,
}

impl ExtraLogger {
    /// Extra-logger bound to the positional-format flavor.
    ///
    /// # Panics
    /// Panics if `opts.date_format` is not a valid format description.
    pub fn formatted(opts: FormatOptions) -> ExtraLogger {
        ExtraLogger {
            sink: Sink::formatted(opts),
            extra_fields: Vec::new(),
        }
    }

    /// Extra-logger bound to the structured-context flavor.
    pub fn structured(opts: StructuredOptions) -> ExtraLogger {
        ExtraLogger {
            sink: Sink::structured(opts),
            extra_fields: Vec::new(),
        }
    }

    /// Add a static field merged into every call from this logger.
    pub fn extra_field<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.extra_fields.push((key.into(), value.into()));
        self
    }

    /// Emit one message. Usually invoked through the [`extra_log!`] family
    /// of macros, which fill in `site` and `args` automatically.
    pub fn log(
        &self,
        level: Level,
        msg: &str,
        site: Option<CallSite>,
        args: Option<String>,
        extras: &[(&str, String)],
    ) {
        let record = NormalizedRecord {
            level,
            message: msg.to_owned(),
            fields: build_fields(site, args, &self.extra_fields, extras),
            exception_trace: None,
            created: OffsetDateTime::now_utc(),
        };
        self.sink.emit(&record);
    }
}

fn build_fields(
    site: Option<CallSite>,
    args: Option<String>,
    base: &[(String, String)],
    extras: &[(&str, String)],
) -> Vec<(String, Option<String>)> {
    let mut fields = vec![
        (
            "request_path".to_owned(),
            site.map(|s| format!("{}:{}.{}", s.file, s.line, s.function)),
        ),
        ("request_body".to_owned(), args.map(bound_text)),
    ];
    for (key, value) in base {
        upsert(&mut fields, key.clone(), Some(bound_text(value.clone())));
    }
    for (key, value) in extras {
        upsert(
            &mut fields,
            (*key).to_owned(),
            Some(bound_text(value.clone())),
        );
    }
    fields
}

/// Captures the current call site, including the enclosing function's name.
#[macro_export]
macro_rules! callsite {
    () => {{
        fn __here() {}
        fn __name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let __name = __name_of(__here);
        let __name = __name.strip_suffix("::__here").unwrap_or(__name);
        $crate::CallSite {
            file: ::std::file!(),
            line: ::std::line!(),
            function: __name,
        }
    }};
}

/// Formats a snapshot of named values as `{name=value, ..}` text, using
/// their `Debug` representations.
#[macro_export]
macro_rules! fn_args {
    () => {
        ::std::string::String::from("{}")
    };
    ($($arg:expr),+ $(,)?) => {{
        let mut __out = ::std::string::String::from("{");
        $(
            if __out.len() > 1 {
                __out.push_str(", ");
            }
            __out.push_str(::std::stringify!($arg));
            __out.push('=');
            __out.push_str(&::std::format!("{:?}", &$arg));
        )+
        __out.push('}');
        __out
    }};
}

/// Logs through an [`ExtraLogger`] with the call site captured automatically.
///
/// Forms:
/// - `extra_log!(logger, level, "msg")`
/// - `extra_log!(logger, level, "msg", args = [x, y])`
/// - `extra_log!(logger, level, "msg", extra = { "key" => value })`
/// - `extra_log!(logger, level, "msg", args = [x], extra = { "key" => value })`
#[macro_export]
macro_rules! extra_log {
    ($logger:expr, $level:expr, $msg:expr $(,)?) => {
        $logger.log(
            $level,
            $msg,
            ::std::option::Option::Some($crate::callsite!()),
            ::std::option::Option::None,
            &[],
        )
    };
    ($logger:expr, $level:expr, $msg:expr, args = [$($arg:expr),* $(,)?] $(,)?) => {
        $logger.log(
            $level,
            $msg,
            ::std::option::Option::Some($crate::callsite!()),
            ::std::option::Option::Some($crate::fn_args!($($arg),*)),
            &[],
        )
    };
    ($logger:expr, $level:expr, $msg:expr, extra = { $($key:literal => $value:expr),* $(,)? } $(,)?) => {
        $logger.log(
            $level,
            $msg,
            ::std::option::Option::Some($crate::callsite!()),
            ::std::option::Option::None,
            &[$(($key, ::std::string::ToString::to_string(&$value))),*],
        )
    };
    ($logger:expr, $level:expr, $msg:expr, args = [$($arg:expr),* $(,)?], extra = { $($key:literal => $value:expr),* $(,)? } $(,)?) => {
        $logger.log(
            $level,
            $msg,
            ::std::option::Option::Some($crate::callsite!()),
            ::std::option::Option::Some($crate::fn_args!($($arg),*)),
            &[$(($key, ::std::string::ToString::to_string(&$value))),*],
        )
    };
}

/// [`extra_log!`] at debug level.
#[macro_export]
macro_rules! extra_debug {
    ($logger:expr, $($rest:tt)+) => {
        $crate::extra_log!($logger, $crate::Level::Debug, $($rest)+)
    };
}

/// [`extra_log!`] at info level.
#[macro_export]
macro_rules! extra_info {
    ($logger:expr, $($rest:tt)+) => {
        $crate::extra_log!($logger, $crate::Level::Info, $($rest)+)
    };
}

/// [`extra_log!`] at warn level.
#[macro_export]
macro_rules! extra_warn {
    ($logger:expr, $($rest:tt)+) => {
        $crate::extra_log!($logger, $crate::Level::Warn, $($rest)+)
    };
}

/// [`extra_log!`] at error level.
#[macro_export]
macro_rules! extra_error {
    ($logger:expr, $($rest:tt)+) => {
        $crate::extra_log!($logger, $crate::Level::Error, $($rest)+)
    };
}
