use crate::error::ConfigError;

const DEFAULT_DATABASE_URL: &str = "sqlite:./data/messagely.db?mode=rwc";
const DEFAULT_PORT: u16 = 3000;
// bcrypt rejects costs outside this range
const MIN_WORK_FACTOR: u32 = 4;
const MAX_WORK_FACTOR: u32 = 31;

/// Settings the credential manager needs: how expensive hashing is and what
/// key signs session tokens.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub work_factor: u32,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub auth: AuthConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let secret_key = match std::env::var("SECRET_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!("SECRET_KEY not set, falling back to the development key");
                "secret".to_string()
            }
        };

        let port = parse_var("PORT", DEFAULT_PORT)?;
        let work_factor = parse_var("BCRYPT_WORK_FACTOR", bcrypt::DEFAULT_COST)?;
        if !(MIN_WORK_FACTOR..=MAX_WORK_FACTOR).contains(&work_factor) {
            return Err(ConfigError::WorkFactorOutOfRange {
                value: work_factor,
                min: MIN_WORK_FACTOR,
                max: MAX_WORK_FACTOR,
            });
        }

        Ok(Self {
            database_url,
            port,
            auth: AuthConfig {
                work_factor,
                secret_key,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::NotANumber { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_falls_back_to_default_when_unset() {
        let port: u16 = parse_var("MESSAGELY_TEST_UNSET_VAR", 4242).unwrap();
        assert_eq!(port, 4242);
    }

    #[test]
    fn parse_var_rejects_non_numeric_values() {
        std::env::set_var("MESSAGELY_TEST_BAD_NUMBER", "twelve");
        let err = parse_var::<u32>("MESSAGELY_TEST_BAD_NUMBER", 12).unwrap_err();
        assert!(matches!(err, ConfigError::NotANumber { name: "MESSAGELY_TEST_BAD_NUMBER", .. }));
    }
}
