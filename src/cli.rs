//! Command-line and sidecar-file configuration for the `rarvfs` binary
//! (spec.md §6 "Environment / CLI"). Grounded on `clap`'s derive style as
//! used throughout the pack's CLI-carrying repos; the optional
//! `rarvfs.toml` sidecar mirrors the teacher's `serde`/`toml` ambient
//! dependency even though the wire-level config (`.rarconfig`) is parsed
//! by hand in `config.rs`.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::recursion::{DEFAULT_MAX_RECURSION_DEPTH, DEFAULT_MAX_UNPACKED_SIZE};

/// Read-only FUSE filesystem exposing the contents of RAR archives.
#[derive(Debug, Parser)]
#[command(name = "rarvfs", version, about)]
pub struct Cli {
    /// Real directory whose RAR archives are exposed through the mount.
    pub source: PathBuf,

    /// Directory under which the virtual filesystem is mounted.
    pub mountpoint: PathBuf,

    /// Maximum nested-archive recursion depth (1..=10).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub recursion_depth: Option<u8>,

    /// Cumulative unpacked-size ceiling across one nested-extraction chain.
    /// Accepts a plain byte count or a `K`/`M`/`G`-suffixed value.
    #[arg(long, value_parser = parse_byte_size)]
    pub max_unpack_size: Option<u64>,

    /// Override for the `.rarconfig` location (defaults to
    /// `<source>/.rarconfig`).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Optional sidecar file of mount defaults (distinct from
    /// `.rarconfig`); defaults to `<source>/rarvfs.toml` if present.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Stay attached to the terminal instead of daemonizing.
    #[arg(short = 'f', long)]
    pub foreground: bool,
}

/// Mount defaults read from an optional `rarvfs.toml`. CLI flags always
/// take precedence over values found here.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    pub recursion_depth: Option<u8>,
    pub max_unpack_size: Option<u64>,
}

impl Settings {
    pub fn load(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}

/// Resolved mount parameters after merging CLI flags over sidecar
/// defaults over hard-coded defaults.
pub struct Resolved {
    pub source: PathBuf,
    pub mountpoint: PathBuf,
    pub recursion_depth: usize,
    pub max_unpack_size: u64,
    pub config_path: Option<PathBuf>,
    pub foreground: bool,
}

impl Cli {
    pub fn resolve(self) -> Resolved {
        let settings_path = self.settings.clone().unwrap_or_else(|| self.source.join("rarvfs.toml"));
        let settings = Settings::load(&settings_path);
        Resolved {
            source: self.source,
            mountpoint: self.mountpoint,
            recursion_depth: self
                .recursion_depth
                .map(|d| d as usize)
                .or(settings.recursion_depth.map(|d| d as usize))
                .unwrap_or(DEFAULT_MAX_RECURSION_DEPTH),
            max_unpack_size: self
                .max_unpack_size
                .or(settings.max_unpack_size)
                .unwrap_or(DEFAULT_MAX_UNPACKED_SIZE),
            config_path: self.config,
            foreground: self.foreground,
        }
    }
}

fn parse_byte_size(value: &str) -> Result<u64, String> {
    let trimmed = value.trim();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('K' | 'k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('M' | 'm') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('G' | 'g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        Some(_) => (trimmed, 1),
        None => return Err("empty size".to_owned()),
    };
    let base: u64 = digits.parse().map_err(|_| format!("invalid size: {value}"))?;
    Ok(base * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_byte_size_suffixes() {
        assert_eq!(parse_byte_size("100").unwrap(), 100);
        assert_eq!(parse_byte_size("4K").unwrap(), 4096);
        assert_eq!(parse_byte_size("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_byte_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_byte_size("").is_err());
    }

    #[test]
    fn settings_missing_file_yields_defaults() {
        let settings = Settings::load(std::path::Path::new("/nonexistent/rarvfs.toml"));
        assert!(settings.recursion_depth.is_none());
    }
}
