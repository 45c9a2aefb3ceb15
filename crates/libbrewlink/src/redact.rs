//! Device identifiers are authentication-adjacent: anything that reaches a
//! shared log gets a short prefix, never the full value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest prefix kept by [`redact`].
pub const REDACT_PREFIX_LEN: usize = 8;

const FALLBACKS: [&str; 2] = ["<redacted>", "***"];

/// Return a correlation prefix of `id` that never contains `id` itself.
///
/// At most half of the identifier is kept (capped at [`REDACT_PREFIX_LEN`]
/// characters), so short ids lose proportionally more.
pub fn redact(id: &str) -> String {
    if id.is_empty() {
        return FALLBACKS[0].to_string();
    }

    let chars: Vec<char> = id.chars().collect();
    let mut keep = REDACT_PREFIX_LEN.min(chars.len() / 2);
    while keep > 0 {
        let mut out: String = chars[..keep].iter().collect();
        out.push_str("...");
        if !out.contains(id) {
            return out;
        }
        keep -= 1;
    }

    FALLBACKS
        .iter()
        .find(|fallback| !fallback.contains(id))
        .unwrap_or(&FALLBACKS[0])
        .to_string()
}

/// Opaque device identifier.
///
/// Serializes as the full value (durable records need it) but formats as the
/// redacted prefix, so `%device_id` and `?device_id` in a tracing field are
/// always safe.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Full identifier. Do not pass this to log macros.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(&self.0))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", redact(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[test]
    fn keeps_short_prefix() {
        assert_eq!(
            redact("0123456789abcdef0123456789abcdef"),
            "01234567..."
        );
        assert_eq!(redact("abcd"), "ab...");
        assert_eq!(redact(""), "<redacted>");
    }

    #[test]
    fn never_contains_full_id() {
        let ids = [
            "a", "e", "*", "ab", "...", "a...", "x.......", "<redacted>", "***", "ünïcödé-dévice",
            "0123456789abcdef",
        ];
        for id in ids {
            let out = redact(id);
            assert!(!out.contains(id), "{id:?} leaked as {out:?}");
        }
    }

    #[test]
    fn formatting_is_redacted() {
        let id = DeviceId::new("A1B2C3D4E5F6A7B8C9D0");
        assert_eq!(id.to_string(), "A1B2C3D4...");
        assert_eq!(format!("{id:?}"), "DeviceId(A1B2C3D4...)");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"A1B2C3D4E5F6A7B8C9D0\""
        );
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn log_lines_never_carry_full_id() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();

        let raw = "PICO-7f3a9c1e5b2d4f60";
        let device = DeviceId::new(raw);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(device = %device, "registered");
            tracing::warn!(device = ?device, "lock wait timed out");
            tracing::debug!(?device, "dispatching");
        });

        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("PICO-7f3"));
        assert!(!out.contains(raw));
    }
}
