use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// A writer that masks API keys and bearer tokens before they reach stderr.
pub struct RedactingWriter<W> {
    inner: W,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            inner: std::io::stderr(),
        }
    }
}

impl<W: std::io::Write> std::io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        let redacted = redact_secrets(&original);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stderr()
    }
}

static SECRET_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          Bearer\s+\S+           # authorization headers
        | sk-[A-Za-z0-9_\-]{8,}  # OpenAI-style keys
        ",
    )
    .expect("redaction regex should compile")
});

/// Replace provider keys and bearer tokens with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    SECRET_PATTERNS.replace_all(input, "[REDACTED]").into_owned()
}

/// Install the global subscriber. `RUST_LOG` wins over `--log-level`.
pub fn init(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_openai_key() {
        let input = "key=sk-proj-abcdef123456";
        assert_eq!(redact_secrets(input), "key=[REDACTED]");
    }

    #[test]
    fn redacts_bearer_token() {
        let input = "authorization: Bearer toto-secret-42 sent";
        assert_eq!(redact_secrets(input), "authorization: [REDACTED] sent");
    }

    #[test]
    fn short_sk_prefix_is_left_alone() {
        assert_eq!(redact_secrets("task-sk-1"), "task-sk-1");
    }

    #[test]
    fn leaves_normal_text_unchanged() {
        let input = "chat turn finished outcome=Streamed";
        assert_eq!(redact_secrets(input), input);
    }

    #[test]
    fn writer_passes_through_redacted_bytes() {
        use std::io::Write;

        let mut writer = RedactingWriter { inner: Vec::new() };
        let written = writer.write(b"token sk-0123456789abcdef end").unwrap();
        assert_eq!(written, 29);
        assert_eq!(String::from_utf8(writer.inner).unwrap(), "token [REDACTED] end");
    }
}
