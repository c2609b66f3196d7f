use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::get_version;

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case", version = get_version(), about)]
pub struct Opts {
    /// Read the forwarder configuration from this file.
    ///
    /// The format is detected from the extension: `.yaml`/`.yml`, `.toml` or `.json`.
    #[arg(
        id = "config",
        short,
        long,
        env = "LOG_FORWARDER_CONFIG",
        default_value = "/etc/log-forwarder/forwarder.yaml"
    )]
    pub config_path: PathBuf,

    /// Directory holding checkpoints and the status file. Overrides `dataDir` from the
    /// configuration.
    #[arg(long, env = "LOG_FORWARDER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable more detailed internal logging. Repeat to increase level. Overridden by `--quiet`.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Reduce detail of internal logging. Repeat to reduce further. Overrides `--verbose`.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Set the logging format
    #[arg(long, default_value = "text", env = "LOG_FORWARDER_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Control when ANSI terminal formatting is used.
    #[arg(long, default_value = "auto", env = "LOG_FORWARDER_COLOR")]
    pub color: Color,

    /// Watch the configuration file and reload when it changes.
    #[arg(short, long, env = "LOG_FORWARDER_WATCH_CONFIG")]
    pub watch_config: bool,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    pub validate: bool,

    /// Number of worker threads. Defaults to the number of available cores.
    #[arg(short, long, env = "LOG_FORWARDER_THREADS")]
    pub threads: Option<usize>,
}

impl Opts {
    pub fn get_matches() -> Result<Self, clap::Error> {
        Self::try_parse()
    }

    pub const fn log_level(&self) -> &'static str {
        match self.quiet {
            0 => match self.verbose {
                0 => "info",
                1 => "debug",
                2..=255 => "trace",
            },
            1 => "warn",
            2 => "error",
            3..=255 => "off",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Auto,
    Always,
    Never,
}

impl Color {
    pub fn use_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn verbosity_maps_to_levels() {
        let opts = Opts::try_parse_from(["log-forwarder", "-vv"]).unwrap();
        assert_eq!(opts.log_level(), "trace");

        let opts = Opts::try_parse_from(["log-forwarder", "-v", "-q"]).unwrap();
        assert_eq!(opts.log_level(), "warn");
    }

    #[test]
    fn parses_flags() {
        let opts = Opts::try_parse_from([
            "log-forwarder",
            "--config",
            "/tmp/forwarder.toml",
            "--log-format",
            "json",
            "--watch-config",
            "--validate",
        ])
        .unwrap();
        assert_eq!(opts.config_path, PathBuf::from("/tmp/forwarder.toml"));
        assert_eq!(opts.log_format, LogFormat::Json);
        assert!(opts.watch_config);
        assert!(opts.validate);
    }
}
