use typerace_lib::GameRules;

const DEFAULT_PORT: u16 = 42181;

/// Runtime configuration for the server process. Everything is sourced from
/// the environment with a sensible default; game parameters are forwarded to
/// clients in `InitialConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub rules: GameRules,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = GameRules::default();
        Self {
            port: env_or("PORT", DEFAULT_PORT),
            rules: GameRules {
                room_capacity: env_or("ROOM_CAPACITY", defaults.room_capacity),
                pre_start_seconds: env_or("PRE_START_SECONDS", defaults.pre_start_seconds),
                race_seconds: env_or("RACE_SECONDS", defaults.race_seconds),
            },
        }
    }
}

/// Parses an environment variable, falling back to `default` when the
/// variable is unset or unparseable.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
