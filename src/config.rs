//! On-disk configuration, loaded once by whatever binds this crate to a
//! `Repository` and handed to [`crate::fs::Filesystem::new`].
//!
//! Adapted from `backpak::config`: same `home`+`toml` lookup and the same
//! fallback to `Default` on `io::ErrorKind::NotFound`, but widened with
//! `chunker_polynomial` (spec §4.6 - the polynomial that seeds content-defined
//! chunking, so two repositories with different polynomials don't produce
//! comparable chunk boundaries) and no longer pulls in a cache size default
//! from a SQLite-backed cache module; the blob cache here is in-memory only,
//! so its default lives next to it in [`crate::cache`].

use std::{fs, io};

use anyhow::{Context, Result, anyhow};
use byte_unit::Byte;
use camino::Utf8PathBuf;
use serde_derive::Deserialize;

use crate::cache;

/// A polynomial with no particular meaning beyond "not zero"; picked once so
/// a fresh `snapvfs.toml` and a from-scratch `Configuration::default()` chunk
/// identically in tests.
const DEFAULT_POLYNOMIAL: u64 = 0xa1e2d3c4b5968778;

#[inline]
fn default_cache_size() -> Byte {
    cache::DEFAULT_SIZE
}

#[inline]
fn default_polynomial() -> u64 {
    DEFAULT_POLYNOMIAL
}

/// Everything the VFS needs that can't be recovered from the repository
/// itself.
#[derive(Debug, Deserialize)]
pub struct Configuration {
    /// Upper bound on the in-memory blob cache, in bytes.
    #[serde(default = "default_cache_size")]
    pub cache_size: Byte,
    /// Seeds the content-defined chunker (see [`crate::chunk::Chunker`]).
    /// Repositories that want comparable chunk boundaries must agree on
    /// this value; it isn't negotiated or stored by this crate.
    #[serde(default = "default_polynomial")]
    pub chunker_polynomial: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            cache_size: cache::DEFAULT_SIZE,
            chunker_polynomial: DEFAULT_POLYNOMIAL,
        }
    }
}

/// Loads `~/.config/snapvfs.toml`, falling back to [`Configuration::default`]
/// if it doesn't exist.
pub fn load() -> Result<Configuration> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "snapvfs.toml"]);

    let s = match fs::read_to_string(&confpath) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Configuration::default()),
        found => found,
    }
    .with_context(|| format!("Couldn't open {confpath}"))?;

    let conf = toml::from_str(&s).with_context(|| format!("Couldn't parse {confpath}"))?;
    Ok(conf)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_matches_constants() {
        let conf = Configuration::default();
        assert_eq!(conf.cache_size, cache::DEFAULT_SIZE);
        assert_eq!(conf.chunker_polynomial, DEFAULT_POLYNOMIAL);
    }

    #[test]
    fn parses_partial_toml() {
        let conf: Configuration = toml::from_str("chunker_polynomial = 42\n").unwrap();
        assert_eq!(conf.chunker_polynomial, 42);
        assert_eq!(conf.cache_size, cache::DEFAULT_SIZE);
    }
}
