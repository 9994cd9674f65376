//! The single recognised configuration option (§4.5, §10.3).

use std::collections::HashMap;
use std::env;

const ENV_KEY: &str = "OTEL_SSP_EXPORT_SAMPLED";
const PROPERTY_KEY: &str = "otel.ssp.export.sampled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub only_sampled_export: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            only_sampled_export: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            only_sampled_export: parse_bool_or_default(env::var(ENV_KEY).ok().as_deref(), ENV_KEY),
        }
    }

    pub fn from_properties(properties: &HashMap<String, String>) -> Config {
        Config {
            only_sampled_export: parse_bool_or_default(
                properties.get(PROPERTY_KEY).map(String::as_str),
                PROPERTY_KEY,
            ),
        }
    }
}

fn parse_bool_or_default(raw: Option<&str>, key: &str) -> bool {
    match raw {
        None => true,
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                tracing::warn!(key, value, "unparseable boolean, falling back to default true");
                true
            }
        },
    }
}
