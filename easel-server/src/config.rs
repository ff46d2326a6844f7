use easel_sync::ServerConfig;

const ENV_PREFIX: &str = "EASEL_";

/// Load the server configuration from `EASEL_*` environment variables,
/// after reading an optional `.env` file. Unset variables keep their defaults.
pub fn load() -> Result<ServerConfig, ConfigError> {
    dotenvy::dotenv().ok();
    from_vars(std::env::vars())
}

fn from_vars<I>(vars: I) -> Result<ServerConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    envy::prefixed(ENV_PREFIX)
        .from_iter(vars)
        .map_err(ConfigError::EnvError)
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
