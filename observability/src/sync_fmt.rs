use std::{fmt, io};

use nu_ansi_term::{Color, Style};
use tracing::{field, span, Event, Level, Subscriber};
use tracing_subscriber::field::{RecordFields, VisitFmt, VisitOutput};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Compact, human oriented log format.
///
/// ```txt
/// [INFO] [10-19|12:00:01.123] network=mainnet processing block  block=19000000
/// ```
///
/// Fields of the enclosing spans are printed before the message, so that every
/// line emitted inside a per-network span carries the network name.
pub struct SyncFormat {
    time_format: time::format_description::OwnedFormatItem,
}

impl<S, N> FormatEvent<S, N> for SyncFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let ansi = writer.has_ansi_escapes();

        write!(writer, "{}", FmtLevel::new(event.metadata().level(), ansi))?;
        writer.write_char(' ')?;
        if self.format_time(&mut writer).is_err() {
            write!(writer, "[<unknown-timestamp>]")?;
        }
        writer.write_char(' ')?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let Some(fields) = extensions.get::<FormattedFields<N>>() else {
                    continue;
                };

                if fields.is_empty() {
                    continue;
                }

                if ansi {
                    write!(writer, "{} ", Style::new().dimmed().paint(fields.as_str()))?;
                } else {
                    write!(writer, "{} ", fields.as_str())?;
                }
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

impl<'w> FormatFields<'w> for SyncFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'w>, fields: R) -> fmt::Result {
        let mut visitor = FieldVisitor::new(writer, true);
        fields.record(&mut visitor);
        visitor.finish()
    }

    fn add_fields(
        &self,
        current: &'w mut FormattedFields<Self>,
        fields: &span::Record<'_>,
    ) -> fmt::Result {
        let empty = current.is_empty();
        let writer = current.as_writer();
        let mut visitor = FieldVisitor::new(writer, empty);
        fields.record(&mut visitor);
        visitor.finish()
    }
}

impl SyncFormat {
    pub fn format_time(&self, writer: &mut Writer<'_>) -> fmt::Result {
        let now = time::OffsetDateTime::from(std::time::SystemTime::now());
        let mut adaptor = WriteAdaptor { fmt_writer: writer };
        now.format_into(&mut adaptor, &self.time_format)
            .map_err(|_| fmt::Error)?;
        Ok(())
    }
}

impl Default for SyncFormat {
    fn default() -> Self {
        let time_format = time::format_description::parse_owned::<2>(
            r#"\[[month]-[day]|[hour]:[minute]:[second].[subsecond digits:3]\]"#,
        )
        .expect("static time format is valid");

        Self { time_format }
    }
}

struct FieldVisitor<'a> {
    writer: Writer<'a>,
    is_empty: bool,
    result: fmt::Result,
}

impl<'a> FieldVisitor<'a> {
    fn new(writer: Writer<'a>, is_empty: bool) -> Self {
        Self {
            writer,
            is_empty,
            result: Ok(()),
        }
    }

    fn separator(&mut self) -> &'static str {
        if self.is_empty {
            self.is_empty = false;
            ""
        } else {
            " "
        }
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            self.record_debug(field, &format_args!("{value}"))
        } else {
            self.record_debug(field, &value)
        }
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }

        let separator = self.separator();
        let value = format!("{:?}", value);

        self.result = match field.name() {
            // Pad the message so that fields line up in consecutive lines.
            "message" => write!(self.writer, "{separator}{value:<40}"),
            name if self.writer.has_ansi_escapes() => {
                let color = if name == "error" || name == "err" {
                    Color::Red
                } else {
                    Color::Blue
                };
                write!(self.writer, "{separator}{name}={}", color.paint(value))
            }
            name => write!(self.writer, "{separator}{name}={value}"),
        };
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(self) -> fmt::Result {
        self.result
    }
}

impl VisitFmt for FieldVisitor<'_> {
    fn writer(&mut self) -> &mut dyn fmt::Write {
        &mut self.writer
    }
}

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> FmtLevel<'a> {
    fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }
}

impl fmt::Display for FmtLevel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, color) = match *self.level {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => ("INFO", Color::Green),
            Level::WARN => ("WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        };

        if self.ansi {
            write!(f, "[{}]", color.paint(name))
        } else {
            write!(f, "[{}]", name)
        }
    }
}

struct WriteAdaptor<'a> {
    fmt_writer: &'a mut dyn fmt::Write,
}

impl io::Write for WriteAdaptor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s =
            std::str::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.fmt_writer
            .write_str(s)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        Ok(s.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
