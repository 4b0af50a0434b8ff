//! Container name validation and generation

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;

use crate::error::{Error, Result};

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]+$").unwrap_or_else(|e| panic!("bad name pattern: {e}"))
});

const ADJECTIVES: &[&str] = &[
    "admiring", "bold", "brave", "busy", "calm", "clever", "eager", "elastic", "epic", "fervent",
    "focused", "gallant", "happy", "hungry", "jolly", "keen", "kind", "lucid", "nifty", "peaceful",
    "quirky", "relaxed", "serene", "sharp", "stoic", "tender", "vibrant", "wizardly", "zealous",
];

const NOUNS: &[&str] = &[
    "babbage", "bohr", "curie", "darwin", "dijkstra", "einstein", "euler", "fermi", "gauss",
    "hopper", "knuth", "lamport", "lovelace", "mccarthy", "newton", "noether", "pike", "ritchie",
    "shannon", "tesla", "thompson", "turing", "wozniak",
];

/// Check a user supplied container or network name
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > 128 {
        return Err(Error::validation(format!(
            "invalid name {:?}: longer than 128 characters",
            name
        )));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(Error::validation(format!(
            "invalid name {:?}: must match [a-zA-Z0-9][a-zA-Z0-9_.-]+",
            name
        )));
    }
    Ok(())
}

/// Names that collide with the static `/containers/stop/:id` and
/// `/containers/logs/:id` route segments
const RESERVED_CONTAINER_NAMES: &[&str] = &["stop", "logs"];

/// Container names follow `validate_name` and may not be a route segment
pub fn validate_container_name(name: &str) -> Result<()> {
    validate_name(name)?;
    if RESERVED_CONTAINER_NAMES.contains(&name) {
        return Err(Error::validation(format!(
            "invalid name {:?}: reserved",
            name
        )));
    }
    Ok(())
}

/// Random `<adjective>_<noun>` name
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("container");
    format!("{adjective}_{noun}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("web").is_ok());
        assert!(validate_name("web-1.prod_a").is_ok());
        assert!(validate_name("w").is_err());
        assert!(validate_name("-web").is_err());
        assert!(validate_name("web server").is_err());
        assert!(validate_name("../etc").is_err());
    }

    #[test]
    fn test_route_segments_are_reserved_for_containers() {
        assert!(validate_container_name("stop").is_err());
        assert!(validate_container_name("logs").is_err());
        assert!(validate_container_name("logs-1").is_ok());
        assert!(validate_name("logs").is_ok());
    }

    #[test]
    fn test_generated_names_are_valid() {
        for _ in 0..50 {
            let name = generate_name();
            assert!(validate_name(&name).is_ok(), "{name}");
            assert!(name.contains('_'));
        }
    }
}
