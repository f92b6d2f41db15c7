use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, OnceLock};

#[derive(Default)]
struct MetricsState {
    connections: Mutex<u64>,
    messages_sent: Mutex<HashMap<&'static str, u64>>,
    decode_failures: Mutex<HashMap<&'static str, u64>>,
    captcha_sessions: Mutex<HashMap<&'static str, u64>>,
}

static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

pub(crate) fn record_connection_accepted() {
    if let Ok(mut count) = metrics_state().connections.lock() {
        *count += 1;
    }
}

pub(crate) fn record_message_sent(kind: &'static str) {
    if let Ok(mut counters) = metrics_state().messages_sent.lock() {
        *counters.entry(kind).or_insert(0) += 1;
    }
}

pub(crate) fn record_decode_failure(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().decode_failures.lock() {
        *counters.entry(reason).or_insert(0) += 1;
    }
}

pub(crate) fn record_captcha_session(outcome: &'static str) {
    if let Ok(mut counters) = metrics_state().captcha_sessions.lock() {
        *counters.entry(outcome).or_insert(0) += 1;
    }
}

pub fn render_metrics() -> String {
    let connections = metrics_state().connections.lock().map_or(0, |guard| *guard);
    let messages_sent = metrics_state().messages_sent.lock().map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let decode_failures = metrics_state().decode_failures.lock().map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let captcha_sessions = metrics_state().captcha_sessions.lock().map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();

    output.push_str("# HELP chatcore_connections_accepted_total Count of TCP connections accepted\n");
    output.push_str("# TYPE chatcore_connections_accepted_total counter\n");
    let _ = writeln!(output, "chatcore_connections_accepted_total {connections}");

    output.push_str("# HELP chatcore_messages_sent_total Count of delivered messages by kind\n");
    output.push_str("# TYPE chatcore_messages_sent_total counter\n");
    let mut message_entries: Vec<_> = messages_sent.into_iter().collect();
    message_entries.sort_by_key(|(kind, _)| *kind);
    for (kind, value) in message_entries {
        let _ = writeln!(output, "chatcore_messages_sent_total{{kind=\"{kind}\"}} {value}");
    }

    output.push_str("# HELP chatcore_decode_failures_total Count of frames that failed to decode by reason\n");
    output.push_str("# TYPE chatcore_decode_failures_total counter\n");
    let mut decode_entries: Vec<_> = decode_failures.into_iter().collect();
    decode_entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in decode_entries {
        let _ = writeln!(output, "chatcore_decode_failures_total{{reason=\"{reason}\"}} {value}");
    }

    output.push_str("# HELP chatcore_captcha_sessions_total Count of captcha session outcomes\n");
    output.push_str("# TYPE chatcore_captcha_sessions_total counter\n");
    let mut captcha_entries: Vec<_> = captcha_sessions.into_iter().collect();
    captcha_entries.sort_by_key(|(outcome, _)| *outcome);
    for (outcome, value) in captcha_entries {
        let _ = writeln!(output, "chatcore_captcha_sessions_total{{outcome=\"{outcome}\"}} {value}");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::{record_connection_accepted, record_decode_failure, render_metrics};

    #[test]
    fn rendered_output_reflects_recorded_counters() {
        record_connection_accepted();
        record_decode_failure("malformed_payload");
        let rendered = render_metrics();
        assert!(rendered.contains("chatcore_connections_accepted_total"));
        assert!(rendered.contains("chatcore_decode_failures_total{reason=\"malformed_payload\"}"));
    }
}
