use lazy_static::lazy_static;
use serde::Serialize;

/// Used when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVES: &str = "fabric_deployer=info";

lazy_static! {
    pub static ref RUST_LOG_JSON: bool = std::env::var("RUST_LOG_JSON").is_ok();
}

pub fn init() {
    let directives =
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_DIRECTIVES.to_string());
    init_with_directives(&directives);
}

pub fn init_with_directives(directives: &str) {
    let result = pretty_env_logger::formatted_timed_builder()
        .parse_filters(directives)
        .format_timestamp_millis()
        .try_init();
    if result.is_err() {
        eprintln!("Logger already initialized, ignoring directives: {directives}");
    }
}

/// Renders `value` for log lines. Pretty JSON when `RUST_LOG_JSON` is set,
/// `Debug` otherwise.
pub fn pretty_json<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    if *RUST_LOG_JSON {
        match serde_json::to_string_pretty(value) {
            Ok(s) => s,
            _ => format!("{value:?}"),
        }
    } else {
        format!("{value:?}")
    }
}
