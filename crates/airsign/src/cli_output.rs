//! Centralised helpers for user-facing CLI output written to stderr.
//!
//! Machine-readable results go to stdout; everything here is for the human operator.

use std::io::Write as _;

use crate::provider::FeeQuote;
use crate::AirsignError;

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

pub fn print_mnemonic_warning() {
    stderr_writeln(
        "Write these words down on paper and keep them offline. Anyone with them can spend your coins.",
    );
}

pub fn print_fee_quote(quote: &FeeQuote) {
    if let crate::provider::FeeSource::Fallback { reason } = &quote.source {
        stderr_writeln(&format!(
            "warning: live fee estimates unavailable ({reason}); using fallback {} sat/vB",
            quote.sat_per_vb
        ));
    }
}

/// Tell the operator how many QR frames follow on stdout.
pub fn print_chunk_banner(kind: &str, count: usize) {
    stderr_writeln(&format!(
        "{kind}: {count} QR frame(s) follow, one per line. Show them in order on the other device."
    ));
}

pub fn print_scan_progress(received: usize, total: usize) {
    stderr_writeln(&format!("scanned {received}/{total} frames"));
}

pub fn print_notice(msg: &str) {
    stderr_writeln(msg);
}

/// Print an error as `{code, message, retryable}` JSON on stderr.
pub fn print_error_json(e: &AirsignError) {
    let report = crate::ErrorReport::from(e.clone());
    match serde_json::to_string(&report) {
        Ok(s) => stderr_writeln(&s),
        Err(_e) => stderr_writeln(&e.to_string()),
    }
}
