//! Readiness signal written to the parent once warm-up has concluded.
//!
//! The parent watches this process's output for a sentinel line. It may pipe
//! only one of the two streams, so the sentinel is written to both stdout and
//! stderr. It is written once, whether warm-up succeeded or not.

use std::fmt::Display;
use std::future::Future;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Sentinel used when none is configured.
pub const DEFAULT_SENTINEL: &str = "SSR_READY";

/// A sentinel that can be emitted at most once.
#[derive(Debug)]
pub struct ReadinessSignal {
    sentinel: String,
    emitted: AtomicBool,
}

impl ReadinessSignal {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            emitted: AtomicBool::new(false),
        }
    }

    pub fn is_emitted(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }

    /// Write the sentinel to stdout and stderr.
    ///
    /// Returns `false` if it had already been emitted.
    pub fn emit(&self) -> bool {
        self.emit_to(&mut io::stdout().lock(), &mut io::stderr().lock())
    }

    /// Write the sentinel to the given streams.
    pub fn emit_to(&self, out: &mut impl Write, err: &mut impl Write) -> bool {
        if self.emitted.swap(true, Ordering::AcqRel) {
            return false;
        }
        for stream in [out as &mut dyn Write, err as &mut dyn Write] {
            // A closed stream must not prevent writing to the other one
            let _ = writeln!(stream, "{}", self.sentinel).and_then(|_| stream.flush());
        }
        tracing::debug!(sentinel = %self.sentinel, "Readiness signal emitted");
        true
    }
}

/// Await a warm-up step, then emit the readiness signal regardless of outcome.
///
/// Failures are logged and otherwise ignored so the parent is always told the
/// step has concluded.
pub async fn after_warm_up<F, T, E>(warm_up: F, signal: &ReadinessSignal) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let outcome = match warm_up.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(error = %e, "Warm-up failed");
            None
        }
    };
    signal.emit();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_writes_both_streams_once() {
        let signal = ReadinessSignal::new("build-1234");
        let mut out = Vec::new();
        let mut err = Vec::new();

        assert!(signal.emit_to(&mut out, &mut err));
        assert!(!signal.emit_to(&mut out, &mut err));

        assert_eq!(String::from_utf8(out).unwrap(), "build-1234\n");
        assert_eq!(String::from_utf8(err).unwrap(), "build-1234\n");
        assert!(signal.is_emitted());
    }

    #[test]
    fn test_default_sentinel() {
        let signal = ReadinessSignal::new(DEFAULT_SENTINEL);
        assert!(!signal.is_emitted());

        let mut out = Vec::new();
        let mut err = Vec::new();
        signal.emit_to(&mut out, &mut err);
        assert_eq!(out, b"SSR_READY\n");
    }

    #[tokio::test]
    async fn test_after_warm_up_success_emits() {
        let signal = ReadinessSignal::new("ok-signal");
        let value = after_warm_up(async { Ok::<_, String>(7) }, &signal).await;
        assert_eq!(value, Some(7));
        assert!(signal.is_emitted());
    }

    #[tokio::test]
    async fn test_after_warm_up_failure_still_emits() {
        let signal = ReadinessSignal::new("failed-signal");
        let value = after_warm_up(async { Err::<(), _>("bundle broke") }, &signal).await;
        assert!(value.is_none());
        assert!(signal.is_emitted());
        // A second warm-up in the same cycle does not emit again
        assert!(!signal.emit_to(&mut Vec::new(), &mut Vec::new()));
    }
}
