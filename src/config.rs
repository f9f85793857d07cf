// Engine settings, deserialized from a RON file.

use ron::de::from_reader;
use serde::Deserialize;
use std::fs::File;


#[derive(Deserialize, Debug, Copy, Clone)]
pub struct Config {
    // Cell count of the interpreter memory.
    pub memory: usize,
    // Start under the interactive debugger.
    pub debug: bool,
}

impl Config {
    pub fn default() -> Config {
        Config {
            memory: 10_000,
            debug: false,
        }
    }
}


#[derive(Debug)]
pub enum ConfigError {
    ReadError(String),
    ParseError(String),
}


pub fn load(path: &str) -> Result<Config, ConfigError> {
    let reader = File::open(path)
        .map_err(|e| ConfigError::ReadError(format!("{}: {}", path, e)))?;
    from_reader(reader).map_err(|e| ConfigError::ParseError(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.memory, 10_000);
        assert_eq!(config.debug, false);
    }

    #[test]
    fn test_parse() {
        let config: Config = ron::de::from_str(
            "(memory: 4096, debug: true)"
        ).unwrap();
        assert_eq!(config.memory, 4096);
        assert_eq!(config.debug, true);
    }
}
