//! Errors raised while loading or saving `config.ron`.

/// Failure to produce a [`Config`](crate::Config) from, or persist one to, the config directory.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `config.ron` exists but could not be read.
    #[error("cannot read config.ron: {0}")]
    Read(#[source] std::io::Error),

    /// The config directory or `config.ron` could not be created.
    #[error("cannot write config.ron: {0}")]
    Write(#[source] std::io::Error),

    /// `config.ron` is not valid RON for the streaming settings; the span points at the bad field.
    #[error("malformed config.ron: {0}")]
    Parse(#[source] ron::error::SpannedError),

    /// The default settings could not be written out as RON.
    #[error("cannot encode default config as RON: {0}")]
    Serialize(#[source] ron::Error),

    /// No platform config directory and no `--config` given.
    #[error("no config directory available on this platform")]
    NoConfigDir,
}
