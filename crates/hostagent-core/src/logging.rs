//! Process-wide logger setup with secret redaction.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use env_logger::{Env, Target};

/// Markers after which the next token is a secret.
const SECRET_MARKERS: &[&str] = &[
    "bearer ",
    "access_token=",
    "enrollment_token=",
    "x-enrollment-token: ",
    "\"access_token\":",
    "\"enrollment_token\":",
];

const REDACTED: &str = "***";

/// Install the global logger. `RUST_LOG` wins over `level`; with a
/// `log_file` that can be opened, lines are appended there instead of
/// stderr. Returns `false` if a logger was already installed.
pub fn init(level: &str, log_file: Option<&Path>) -> bool {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            record.level(),
            record.target(),
            redact(&record.args().to_string())
        )
    });

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("cannot open log file {}: {e}", path.display()),
        }
    }

    builder.try_init().is_ok()
}

/// Replace the token following each secret marker with `***`.
pub fn redact(line: &str) -> String {
    let lower = line.to_ascii_lowercase();
    let mut cuts: Vec<(usize, usize)> = Vec::new();

    for marker in SECRET_MARKERS {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(marker) {
            let mut start = from + pos + marker.len();
            let bytes = line.as_bytes();
            while start < bytes.len() && (bytes[start] == b' ' || bytes[start] == b'"') {
                start += 1;
            }
            let end = line[start..]
                .find(|c: char| c.is_whitespace() || matches!(c, '"' | ',' | '&' | ';' | '}'))
                .map_or(line.len(), |i| start + i);
            if end > start {
                cuts.push((start, end));
            }
            from = end.max(start);
        }
    }
    if cuts.is_empty() {
        return line.to_string();
    }

    cuts.sort_unstable();
    let mut out = String::with_capacity(line.len());
    let mut pos = 0;
    for (start, end) in cuts {
        if start < pos {
            continue;
        }
        out.push_str(&line[pos..start]);
        out.push_str(REDACTED);
        pos = end;
    }
    out.push_str(&line[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_tokens_are_masked() {
        assert_eq!(
            redact("Authorization: Bearer abc.def-123 sent"),
            "Authorization: Bearer *** sent"
        );
    }

    #[test]
    fn key_value_and_json_secrets_are_masked() {
        assert_eq!(
            redact("url?access_token=xyz&x=1 enrollment_token=s3cret"),
            "url?access_token=***&x=1 enrollment_token=***"
        );
        assert_eq!(
            redact(r#"{"access_token": "T1", "device_id": "D1"}"#),
            r#"{"access_token": "***", "device_id": "D1"}"#
        );
        assert_eq!(redact("X-Enrollment-Token: hunter2"), "X-Enrollment-Token: ***");
    }

    #[test]
    fn plain_lines_pass_through() {
        let line = "POST http://127.0.0.1:8000/api/telemetry/metrics (1 sample(s))";
        assert_eq!(redact(line), line);
    }

    #[test]
    fn init_is_idempotent() {
        init("debug", None);
        assert!(!init("info", None));
        log::info!("logger ready, Bearer never-printed");
    }
}
