use std::{path::PathBuf, sync::Arc};

use futures::{StreamExt, stream};
use tokio::{runtime, sync::mpsc};

use crate::{
    cli::{LogFormat, Opts},
    config::{self, DEFAULT_DATA_DIR, ForwarderConfig},
    internal_events::{
        ConfigInvalid, ForwarderQuit, ForwarderReloadFailed, ForwarderReloaded, ForwarderStarted,
        ForwarderStopped,
    },
    router::Router,
    signal::{self, SignalTo},
    status::StatusReporter,
    topology::{ReloadOutcome, RunningTopology},
    trace,
};

pub struct Application {
    opts: Opts,
    runtime: runtime::Runtime,
}

impl Application {
    /// Parses the command line, runs until shutdown and returns the process exit code.
    pub fn run() -> exitcode::ExitCode {
        let opts = match Opts::get_matches() {
            Ok(opts) => opts,
            Err(error) => {
                let code = if error.use_stderr() {
                    exitcode::USAGE
                } else {
                    exitcode::OK
                };
                _ = error.print();
                return code;
            }
        };
        match Self::prepare(opts) {
            Ok(app) => app.start(),
            Err(code) => code,
        }
    }

    pub fn prepare(opts: Opts) -> Result<Self, exitcode::ExitCode> {
        let levels = std::env::var("LOG_FORWARDER_LOG").unwrap_or_else(|_| match opts.log_level() {
            "off" => "off".to_owned(),
            level => [
                format!("log_forwarder={level}"),
                format!("file_source={level}"),
                format!("forwarder_buffers={level}"),
                "aws_config=warn".to_owned(),
            ]
            .join(","),
        });
        trace::init(
            opts.color.use_color(),
            opts.log_format == LogFormat::Json,
            &levels,
        );

        if opts.threads == Some(0) {
            error!(message = "The `threads` argument must be greater or equal to 1.");
            return Err(exitcode::CONFIG);
        }
        let mut builder = runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("log-forwarder-worker");
        if let Some(threads) = opts.threads {
            builder.worker_threads(threads);
        }
        let runtime = builder.build().map_err(|error| {
            error!(message = "Unable to create async runtime.", %error);
            exitcode::OSERR
        })?;

        Ok(Self { opts, runtime })
    }

    fn start(self) -> exitcode::ExitCode {
        let Self { opts, runtime } = self;
        runtime.block_on(run(opts))
    }
}

/// Loads the configuration file, applying command line overrides.
fn load_config(opts: &Opts) -> Result<ForwarderConfig, Vec<String>> {
    let mut config = config::load_from_path(&opts.config_path).map_err(|error| error.errors())?;
    if let Some(data_dir) = &opts.data_dir {
        config.data_dir.clone_from(data_dir);
    }
    Ok(config)
}

fn validate(config: &ForwarderConfig) -> Result<(), Vec<String>> {
    Router::new(config)
        .map(|_| ())
        .map_err(|error| vec![error.to_string()])
}

async fn run(opts: Opts) -> exitcode::ExitCode {
    info!(message = "Loading configuration.", path = ?opts.config_path);
    let config = load_config(&opts).and_then(|config| validate(&config).map(|()| config));

    if opts.validate {
        return match config {
            Ok(_) => {
                info!(message = "Configuration is valid.", path = ?opts.config_path);
                exitcode::OK
            }
            Err(errors) => {
                emit!(ConfigInvalid { errors: &errors });
                exitcode::CONFIG
            }
        };
    }

    let config = match config {
        Ok(config) => config,
        Err(errors) => {
            emit!(ConfigInvalid { errors: &errors });
            let data_dir = opts
                .data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
            if std::fs::create_dir_all(&data_dir).is_ok() {
                StatusReporter::new(&data_dir).config_rejected(&errors);
            }
            return exitcode::CONFIG;
        }
    };

    let status = Arc::new(StatusReporter::new(&config.data_dir));
    let (mut topology, mut crashed) = match RunningTopology::start(config, status).await {
        Ok(started) => started,
        Err(errors) => {
            emit!(ConfigInvalid { errors: &errors });
            return exitcode::CONFIG;
        }
    };

    let os_signals = match signal::signals() {
        Ok(signals) => signals,
        Err(error) => {
            error!(message = "Unable to install signal handlers.", %error);
            return exitcode::OSERR;
        }
    };
    let (reload_tx, reload_rx) = mpsc::unbounded_channel();
    let _watcher = if opts.watch_config {
        match config::watcher::spawn(&opts.config_path, reload_tx) {
            Ok(watcher) => Some(watcher),
            Err(error) => {
                error!(message = "Unable to start config watcher.", %error);
                return exitcode::CONFIG;
            }
        }
    } else {
        None
    };
    let mut signals = stream::select(os_signals, signal::reloads(reload_rx)).boxed();

    emit!(ForwarderStarted);
    let signal = loop {
        tokio::select! {
            Some(signal) = signals.next() => match signal {
                SignalTo::Reload => reload(&opts, &mut topology).await,
                other => break other,
            },
            _ = crashed.recv() => break SignalTo::Shutdown,
            else => break SignalTo::Shutdown,
        }
    };

    match signal {
        SignalTo::Quit => {
            emit!(ForwarderQuit);
            drop(topology);
        }
        _ => {
            emit!(ForwarderStopped);
            tokio::select! {
                () = topology.stop() => {}
                _ = signals.next() => emit!(ForwarderQuit),
            }
        }
    }
    exitcode::OK
}

async fn reload(opts: &Opts, topology: &mut RunningTopology) {
    let config = load_config(opts).and_then(|config| validate(&config).map(|()| config));
    let config = match config {
        Ok(config) => config,
        Err(errors) => {
            emit!(ConfigInvalid { errors: &errors });
            topology.status().config_rejected(&errors);
            emit!(ForwarderReloadFailed {
                error: "configuration is invalid"
            });
            return;
        }
    };

    match topology.reload(config).await {
        ReloadOutcome::Reloaded { generation } => emit!(ForwarderReloaded {
            config_path: &opts.config_path,
            generation,
        }),
        ReloadOutcome::Rejected { errors } => {
            emit!(ConfigInvalid { errors: &errors });
            emit!(ForwarderReloadFailed {
                error: "configuration could not be built"
            });
        }
    }
}
