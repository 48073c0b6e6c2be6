// Environment variable helpers shared by module configs

use tracing::warn;

/// Parse an environment variable, logging a warning if the value is present but invalid.
pub fn parse_env_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) if v.trim().is_empty() => default,
        Ok(v) => match v.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(var = name, value = %v, "Invalid env var value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a string environment variable, treating empty values as unset.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
