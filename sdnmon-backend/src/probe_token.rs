//! Send-time tokens carried in echo and ICMP probe payloads.
//!
//! A probe's payload is echoed back unchanged, so writing the send time into
//! it lets the reply handler compute the round trip without keeping any
//! per-probe state. The token is the send time in seconds, as ASCII text with
//! microsecond precision.

use sdnmon_shared::Timestamp;

pub fn encode(sent_at: Timestamp) -> Vec<u8> {
    format!("{:.6}", sent_at).into_bytes()
}

/// Recover the send time from an echoed payload.
///
/// Returns `None` for anything that is not a finite decimal number, such as
/// payloads of probes this engine did not send.
pub fn decode(payload: &[u8]) -> Option<Timestamp> {
    let text = std::str::from_utf8(payload).ok()?;
    let value: f64 = text.trim().parse().ok()?;
    value.is_finite().then_some(value)
}
