//! config-rs/lib.rs
//! Shared configuration utilities for the narrative service.
//! Provides port/address helpers plus the typed settings read at startup.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

pub mod pipeline;
pub mod settings;

pub use pipeline::PipelineConfig;
pub use settings::{load_dotenv, CacheSettings, LlmSettings, LoggingSettings, ServiceSettings};

/// Service key used for the narrative service's environment variables.
pub const NARRATIVE_SERVICE: &str = "NARRATIVE";

/// Port for `service_name`, read from `<SERVICE>_SERVICE_PORT`.
///
/// # Arguments
/// * `lookup` - Variable source, usually the process environment
/// * `service_name` - The name of the service (e.g., "NARRATIVE")
/// * `default_port` - The port to use when the variable is missing or invalid
pub fn get_service_port<F>(lookup: &F, service_name: &str, default_port: u16) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    let var_name = format!("{}_SERVICE_PORT", service_name.to_uppercase());
    lookup_or(lookup, &var_name, default_port)
}

/// Create a SocketAddr for binding a service
///
/// `<SERVICE>_SERVICE_ADDR` wins when it parses, either as `host:port` or
/// as `http(s)://host:port`; otherwise the port helper decides.
pub fn get_bind_address<F>(lookup: &F, service_name: &str, default_port: u16) -> SocketAddr
where
    F: Fn(&str) -> Option<String>,
{
    let var_name = format!("{}_SERVICE_ADDR", service_name.to_uppercase());

    if let Some(addr_str) = lookup_string(lookup, &var_name) {
        if let Some(addr) = parse_socket_addr(addr_str.trim()) {
            return addr;
        }
        log::warn!("Invalid address format in {}, using default", var_name);
    }

    let port = get_service_port(lookup, service_name, default_port);
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

/// Process environment as a lookup function.
pub fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn parse_socket_addr(raw: &str) -> Option<SocketAddr> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr);
    }
    raw.split_once("://")
        .and_then(|(_, rest)| rest.trim_end_matches('/').parse::<SocketAddr>().ok())
}

/// Get service name for logging and monitoring
pub fn get_formatted_service_name(service_name: &str) -> String {
    match service_name {
        "NARRATIVE" => "narrative-service".to_string(),
        _ => format!("{}-service", service_name.to_lowercase().replace('_', "-")),
    }
}

/// Get default port for a specific service
pub fn get_default_port(service_name: &str) -> u16 {
    match service_name.to_uppercase().as_str() {
        "NARRATIVE" => 8290,
        _ => 50100,
    }
}

/// Read a typed value from a lookup function, falling back to `default`
/// when the key is absent or does not parse.
pub fn lookup_or<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("Invalid value {:?} in {}, using default", raw, name);
            default
        }),
        None => default,
    }
}

/// Boolean flavour of [`lookup_or`] accepting `1/0`, `yes/no`, `on/off`.
pub fn lookup_flag<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            log::warn!("Invalid boolean {:?} in {}, using default {}", v, name, default);
            default
        }
        None => default,
    }
}

/// Non-empty string value for `name`, if any.
pub fn lookup_string<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_get_service_port() {
        let lookup = vars(&[("TEST_SERVICE_PORT", "9000"), ("BAD_SERVICE_PORT", "not-a-port")]);
        assert_eq!(get_service_port(&lookup, "TEST", 8000), 9000);
        assert_eq!(get_service_port(&lookup, "BAD", 8000), 8000);
        assert_eq!(get_service_port(&lookup, "UNKNOWN", 8000), 8000);
    }

    #[test]
    fn test_get_bind_address() {
        let lookup = vars(&[
            ("URL_SERVICE_ADDR", "http://127.0.0.1:9100"),
            ("PLAIN_SERVICE_ADDR", "127.0.0.1:9200"),
            ("PORT_SERVICE_PORT", "9300"),
        ]);
        assert_eq!(
            get_bind_address(&lookup, "URL", 8000),
            "127.0.0.1:9100".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(get_bind_address(&lookup, "PLAIN", 8000).port(), 9200);
        assert_eq!(
            get_bind_address(&lookup, "PORT", 8000),
            "0.0.0.0:9300".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(get_bind_address(&lookup, "NONE", 8000).port(), 8000);
    }

    #[test]
    fn test_service_naming() {
        assert_eq!(get_formatted_service_name(NARRATIVE_SERVICE), "narrative-service");
        assert_eq!(get_formatted_service_name("TASK_STORE"), "task-store-service");
        assert_eq!(get_default_port(NARRATIVE_SERVICE), 8290);
    }

    #[test]
    fn test_lookup_helpers() {
        let lookup = vars(&[("N", "42"), ("BAD", "x"), ("ON", "yes"), ("EMPTY", " ")]);

        assert_eq!(lookup_or(&lookup, "N", 7u32), 42);
        assert_eq!(lookup_or(&lookup, "BAD", 7u32), 7);
        assert_eq!(lookup_or(&lookup, "MISSING", 7u32), 7);
        assert!(lookup_flag(&lookup, "ON", false));
        assert!(!lookup_flag(&lookup, "BAD", false));
        assert_eq!(lookup_string(&lookup, "EMPTY"), None);
    }
}
