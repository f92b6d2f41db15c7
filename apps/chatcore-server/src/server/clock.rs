/// Wall-clock helpers shared by handlers. All timestamps the protocol
/// exposes are second-precision local time, `"YYYY-MM-DD HH:MM:SS"`
/// (SPEC_FULL.md §6).
pub(crate) fn now_unix() -> i64 {
    chrono::Local::now().timestamp()
}

pub(crate) fn format_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
