use std::borrow::Cow;

use log::LevelFilter;
use time::format_description::{self, OwnedFormatItem};

use crate::record::NormalizedRecord;

/// Default line template for the positional-format flavor.
pub const DEFAULT_FORMAT: &str =
    "{asctime} {levelname} {response_status_code} {duration} {request_method} {request_path} {message}";

/// Default timestamp layout, as a `time` format description.
pub const DEFAULT_DATE_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";

/// Configuration for the positional-format flavor.
///
/// `format` is a template over the field names, `{asctime}`, `{levelname}`
/// and `{message}`; a placeholder whose field is absent renders empty.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Log target the rendered lines are emitted under.
    pub logger_name: Option<String>,
    pub format: String,
    pub date_format: String,
    /// Minimum severity emitted.
    pub level: LevelFilter,
    /// Also echo the full failure trace to stderr when a request fails.
    pub traceback_to_console: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            logger_name: None,
            format: DEFAULT_FORMAT.to_owned(),
            date_format: DEFAULT_DATE_FORMAT.to_owned(),
            level: LevelFilter::Info,
            traceback_to_console: false,
        }
    }
}

/// Configuration for the structured-context flavor. Line layout belongs to
/// the installed `log` backend, so there is no template here.
#[derive(Debug, Clone)]
pub struct StructuredOptions {
    /// Log target the records are emitted under.
    pub logger_name: Option<String>,
    /// Minimum severity emitted.
    pub level: LevelFilter,
    /// Also echo the full failure trace to stderr when a request fails.
    pub traceback_to_console: bool,
}

impl Default for StructuredOptions {
    fn default() -> Self {
        StructuredOptions {
            logger_name: None,
            level: LevelFilter::Info,
            traceback_to_console: false,
        }
    }
}

#[derive(Debug, Clone)]
struct SinkConfig {
    level: LevelFilter,
    traceback_to_console: bool,
    target: Cow<'static, str>,
}

impl SinkConfig {
    fn new(logger_name: Option<String>, level: LevelFilter, traceback_to_console: bool) -> Self {
        SinkConfig {
            level,
            traceback_to_console,
            target: logger_name
                .map(Cow::Owned)
                .unwrap_or(Cow::Borrowed(module_path!())),
        }
    }

    fn echo_traceback(&self, record: &NormalizedRecord) {
        if self.traceback_to_console {
            if let Some(trace) = &record.exception_trace {
                eprintln!("{trace}");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone)]
struct Template(Vec<Segment>);

impl Template {
    fn parse(input: &str) -> Template {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = input.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if closed {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Placeholder(name));
                    } else {
                        // unterminated placeholder, keep it as text
                        literal.push('{');
                        literal.push_str(&name);
                    }
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Template(segments)
    }

    fn render<'a>(&self, lookup: impl Fn(&str) -> Option<Cow<'a, str>>) -> String {
        let mut out = String::new();
        for segment in &self.0 {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    if let Some(value) = lookup(name) {
                        out.push_str(&value);
                    }
                }
            }
        }
        out
    }
}

/// Backend flavor, chosen once at construction. Both flavors consume the
/// same [`NormalizedRecord`]; the interceptor never knows which is active.
#[derive(Debug, Clone)]
pub(crate) enum Sink {
    Format(FormatSink),
    Structured(StructuredSink),
}

impl Sink {
    /// # Panics
    /// Panics if `opts.date_format` is not a valid format description.
    pub(crate) fn formatted(opts: FormatOptions) -> Sink {
        Sink::Format(FormatSink::new(opts))
    }

    pub(crate) fn structured(opts: StructuredOptions) -> Sink {
        Sink::Structured(StructuredSink::new(opts))
    }

    pub(crate) fn emit(&self, record: &NormalizedRecord) {
        match self {
            Sink::Format(sink) => sink.emit(record),
            Sink::Structured(sink) => sink.emit(record),
        }
    }
}

/// Renders each record through a `{field}` template into a single line.
#[derive(Debug, Clone)]
pub(crate) struct FormatSink {
    template: Template,
    date_format: OwnedFormatItem,
    config: SinkConfig,
}

impl FormatSink {
    fn new(opts: FormatOptions) -> FormatSink {
        let date_format = format_description::parse_owned::<2>(&opts.date_format)
            .unwrap_or_else(|err| panic!("invalid date format {:?}: {err}", opts.date_format));
        FormatSink {
            template: Template::parse(&opts.format),
            date_format,
            config: SinkConfig::new(opts.logger_name, opts.level, opts.traceback_to_console),
        }
    }

    fn render_line(&self, record: &NormalizedRecord) -> String {
        // A formatting failure degrades the line, never the request.
        let asctime = record.created.format(&self.date_format).unwrap_or_else(|err| {
            eprintln!("request logging: failed to format timestamp: {err}");
            String::new()
        });
        self.template.render(|name| match name {
            "asctime" => Some(Cow::Borrowed(asctime.as_str())),
            "levelname" => Some(Cow::Owned(record.level.to_string())),
            "message" => Some(Cow::Borrowed(record.message.as_str())),
            other => record.lookup(other).map(Cow::Borrowed),
        })
    }

    fn emit(&self, record: &NormalizedRecord) {
        if record.level > self.config.level {
            return;
        }
        let line = self.render_line(record);
        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{line}"))
                .level(record.level)
                .target(self.config.target.as_ref())
                .build(),
        );
        self.config.echo_traceback(record);
    }
}

/// Attaches the normalized mapping to each record as `log` key/values, for
/// backends that format fields by name (e.g. `structured_logger`).
#[derive(Debug, Clone)]
pub(crate) struct StructuredSink {
    config: SinkConfig,
}

impl StructuredSink {
    fn new(opts: StructuredOptions) -> StructuredSink {
        StructuredSink {
            config: SinkConfig::new(opts.logger_name, opts.level, opts.traceback_to_console),
        }
    }

    fn emit(&self, record: &NormalizedRecord) {
        if record.level > self.config.level {
            return;
        }
        let kvs: Vec<(&str, log::kv::Value)> = record
            .fields
            .iter()
            .map(|(key, value)| match value {
                Some(value) => (key.as_str(), log::kv::Value::from_display(value)),
                None => (key.as_str(), log::kv::Value::null()),
            })
            .collect();
        let kvs = kvs.as_slice();

        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{}", record.message))
                .level(record.level)
                .target(self.config.target.as_ref())
                .key_values(&kvs)
                .build(),
        );
        self.config.echo_traceback(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use time::OffsetDateTime;

    fn record() -> NormalizedRecord {
        NormalizedRecord {
            level: Level::Info,
            message: "response with code 200".to_owned(),
            fields: vec![
                ("request_method".to_owned(), Some("GET".to_owned())),
                ("request_path".to_owned(), Some("/index".to_owned())),
                ("remote_port".to_owned(), None),
            ],
            exception_trace: None,
            created: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        }
    }

    #[test]
    fn test_template_parse() {
        let template = Template::parse("a {x} b {{literal}} {y}");
        assert_eq!(
            template.0,
            vec![
                Segment::Literal("a ".to_owned()),
                Segment::Placeholder("x".to_owned()),
                Segment::Literal(" b {literal} ".to_owned()),
                Segment::Placeholder("y".to_owned()),
            ]
        );
    }

    #[test]
    fn test_template_unterminated_placeholder_is_text() {
        let template = Template::parse("before {oops");
        assert_eq!(template.0, vec![Segment::Literal("before {oops".to_owned())]);
    }

    #[test]
    fn test_absent_placeholder_renders_empty() {
        let sink = FormatSink::new(FormatOptions {
            format: "{request_method} [{remote_port}] [{never_registered}] {request_path}"
                .to_owned(),
            ..FormatOptions::default()
        });
        let line = sink.render_line(&record());
        assert_eq!(line, "GET [] [] /index");
    }

    #[test]
    fn test_render_line_injects_builtins() {
        let sink = FormatSink::new(FormatOptions {
            format: "{asctime} {levelname} {message}".to_owned(),
            ..FormatOptions::default()
        });
        let line = sink.render_line(&record());
        assert_eq!(line, "2023-11-14 22:13:20 INFO response with code 200");
    }

    #[test]
    #[should_panic(expected = "invalid date format")]
    fn test_invalid_date_format_panics_at_construction() {
        FormatSink::new(FormatOptions {
            date_format: "[not-a-component]".to_owned(),
            ..FormatOptions::default()
        });
    }

    #[test]
    fn test_default_target_is_module_path() {
        let sink = StructuredSink::new(StructuredOptions::default());
        assert_eq!(sink.config.target, "actix_web_request_logging::sink");

        let sink = StructuredSink::new(StructuredOptions {
            logger_name: Some("access".to_owned()),
            ..StructuredOptions::default()
        });
        assert_eq!(sink.config.target, "access");
    }
}
