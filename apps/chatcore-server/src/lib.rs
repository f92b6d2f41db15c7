#![forbid(unsafe_code)]

mod server;

pub use server::{handle_connection, init_tracing, render_metrics, AppConfig, AppState};
