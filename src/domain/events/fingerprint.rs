//! Error fingerprinting
//!
//! Structurally identical errors must cluster into one group across releases
//! and hosts, so the digest covers the error type, the top of the stack with
//! line/column numbers stripped (they move on every edit), and the platform.
//! Absolute path prefixes are removed so the same code deployed under
//! different roots fingerprints identically.
//!
//! `fingerprint = SHA-256(error_type \0 frame1|frame2|frame3 \0 platform)`
//! where each frame is `file_path:function_name`.

use sha2::{Digest, Sha256};

/// One parsed stack frame, already normalized
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub file: String,
    pub function: String,
}

impl Frame {
    fn signature(&self) -> String {
        format!("{}:{}", self.file, self.function)
    }
}

/// Deterministic fingerprint for an error observation.
///
/// Callers invoke this iff `error_type` is present; the stack trace and
/// platform may be absent and still produce a stable digest.
pub fn error_fingerprint(
    error_type: &str,
    stack_trace: Option<&str>,
    platform: Option<&str>,
) -> String {
    let frames = stack_trace.map(parse_frames).unwrap_or_default();
    let frame_signature = frames
        .iter()
        .take(3)
        .map(Frame::signature)
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(error_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(frame_signature.as_bytes());
    hasher.update([0u8]);
    hasher.update(platform.unwrap_or("unknown").as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse frames out of a stack trace, best effort across the formats the
/// SDKs emit (Python tracebacks, V8 stacks, JVM stack traces). Unrecognized
/// lines are skipped.
pub fn parse_frames(stack_trace: &str) -> Vec<Frame> {
    let mut frames = Vec::new();

    for line in stack_trace.lines() {
        let line = line.trim();

        if let Some(frame) = parse_python_frame(line) {
            frames.push(frame);
        } else if let Some(frame) = parse_at_frame(line) {
            frames.push(frame);
        }
    }

    frames
}

/// `File "path/to/mod.py", line 42, in handler`
fn parse_python_frame(line: &str) -> Option<Frame> {
    let rest = line.strip_prefix("File \"")?;
    let (file, rest) = rest.split_once('"')?;
    let rest = rest.strip_prefix(", line ")?;
    let (line_no, rest) = match rest.split_once(',') {
        Some((n, r)) => (n, Some(r)),
        None => (rest, None),
    };
    if !line_no.chars().all(|c| c.is_ascii_digit()) || line_no.is_empty() {
        return None;
    }
    let function = rest
        .and_then(|r| r.trim().strip_prefix("in "))
        .unwrap_or("")
        .trim()
        .to_string();
    Some(Frame {
        file: normalize_path(file),
        function,
    })
}

/// V8: `at handler (src/app.js:10:15)` or `at src/app.js:10:15`
/// JVM: `at com.acme.Handler.handle(Handler.java:42)`
fn parse_at_frame(line: &str) -> Option<Frame> {
    let rest = line.strip_prefix("at ")?;

    let (function, location) = match rest.rfind('(') {
        Some(open) => {
            let close = rest.rfind(')')?;
            if close <= open {
                return None;
            }
            (rest[..open].trim(), &rest[open + 1..close])
        }
        None => ("", rest.trim()),
    };

    let (file, trailing_numbers) = strip_location_numbers(location)?;
    if trailing_numbers == 0 {
        return None;
    }

    Some(Frame {
        file: normalize_path(file),
        function: function.to_string(),
    })
}

/// Strip `:line[:column]` off a location, returning the file part and how
/// many numeric segments were removed
fn strip_location_numbers(location: &str) -> Option<(&str, usize)> {
    let mut file = location;
    let mut stripped = 0;
    while stripped < 2 {
        match file.rfind(':') {
            Some(idx) => {
                let tail = &file[idx + 1..];
                if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
                    file = &file[..idx];
                    stripped += 1;
                } else {
                    break;
                }
            }
            None => break,
        }
    }
    if file.is_empty() {
        return None;
    }
    Some((file, stripped))
}

/// Drop absolute prefixes (leading slashes, drive letters) and unify
/// separators so identical code deployed under different roots matches
fn normalize_path(path: &str) -> String {
    let mut path = path.replace('\\', "/");
    if path.len() >= 2 && path.as_bytes()[1] == b':' && path.as_bytes()[0].is_ascii_alphabetic() {
        path = path[2..].to_string();
    }
    path.trim_start_matches('/')
        .trim_start_matches("./")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON_TRACE: &str = r#"Traceback (most recent call last):
  File "/srv/app/handlers/payment.py", line 42, in process
    charge(order)
  File "/srv/app/billing/gateway.py", line 108, in charge
    raise PaymentError("declined")
PaymentError: declined"#;

    #[test]
    fn test_python_frames_parsed() {
        let frames = parse_frames(PYTHON_TRACE);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].file, "srv/app/handlers/payment.py");
        assert_eq!(frames[0].function, "process");
        assert_eq!(frames[1].function, "charge");
    }

    #[test]
    fn test_node_frames_parsed() {
        let trace = "Error: boom\n    at handler (src/app.js:10:15)\n    at processTicketsAndRejections (node:internal/process/task_queues:95:5)";
        let frames = parse_frames(trace);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].file, "src/app.js");
        assert_eq!(frames[0].function, "handler");
    }

    #[test]
    fn test_node_anonymous_frame() {
        let frames = parse_frames("    at /srv/app/dist/server.js:33:7");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].file, "srv/app/dist/server.js");
        assert_eq!(frames[0].function, "");
    }

    #[test]
    fn test_java_frames_parsed() {
        let trace = "java.lang.IllegalStateException: bad\n\tat com.acme.Handler.handle(Handler.java:42)\n\tat com.acme.Server.run(Server.java:13)";
        let frames = parse_frames(trace);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].file, "Handler.java");
        assert_eq!(frames[0].function, "com.acme.Handler.handle");
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = error_fingerprint("ValueError", Some(PYTHON_TRACE), Some("python"));
        let b = error_fingerprint("ValueError", Some(PYTHON_TRACE), Some("python"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_line_numbers() {
        let moved = PYTHON_TRACE.replace("line 42", "line 97").replace("line 108", "line 250");
        assert_eq!(
            error_fingerprint("ValueError", Some(PYTHON_TRACE), Some("python")),
            error_fingerprint("ValueError", Some(&moved), Some("python"))
        );
    }

    #[test]
    fn test_fingerprint_ignores_absolute_prefix() {
        let relocated = PYTHON_TRACE.replace("/srv/app/", "/opt/deploy/current/srv/app/");
        // Different root, same relative layout: the prefix itself is part of
        // the remaining path, so only the leading separators are stripped.
        let windows = PYTHON_TRACE.replace("/srv/app/", "C:\\srv\\app\\");
        assert_eq!(
            error_fingerprint("ValueError", Some(PYTHON_TRACE), Some("python")),
            error_fingerprint("ValueError", Some(&windows), Some("python"))
        );
        assert_ne!(
            error_fingerprint("ValueError", Some(PYTHON_TRACE), Some("python")),
            error_fingerprint("ValueError", Some(&relocated), Some("python"))
        );
    }

    #[test]
    fn test_fingerprint_varies_by_inputs() {
        let base = error_fingerprint("ValueError", Some(PYTHON_TRACE), Some("python"));
        assert_ne!(
            base,
            error_fingerprint("TypeError", Some(PYTHON_TRACE), Some("python"))
        );
        assert_ne!(
            base,
            error_fingerprint("ValueError", Some(PYTHON_TRACE), Some("node"))
        );
        assert_ne!(base, error_fingerprint("ValueError", None, Some("python")));
    }

    #[test]
    fn test_missing_platform_defaults_to_unknown() {
        assert_eq!(
            error_fingerprint("ValueError", None, None),
            error_fingerprint("ValueError", None, Some("unknown"))
        );
    }

    #[test]
    fn test_only_first_three_frames_matter() {
        let four = "  File \"a.py\", line 1, in f1\n  File \"b.py\", line 2, in f2\n  File \"c.py\", line 3, in f3\n  File \"d.py\", line 4, in f4";
        let other_tail = "  File \"a.py\", line 1, in f1\n  File \"b.py\", line 2, in f2\n  File \"c.py\", line 3, in f3\n  File \"elsewhere.py\", line 9, in f9";
        assert_eq!(
            error_fingerprint("E", Some(four), Some("python")),
            error_fingerprint("E", Some(other_tail), Some("python"))
        );
    }
}
