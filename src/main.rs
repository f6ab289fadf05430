use anyhow::Context;
use clap::Parser;
use log::{debug, info, LevelFilter};
use std::path::Path;
use xds_gdb::bridge::overwrite::{OverwriteTable, OVERWRITE_ENV};
use xds_gdb::bridge::{Bridge, BridgeOptions};
use xds_gdb::cli::{self, Args, GdbOptions};
use xds_gdb::config;
use xds_gdb::error::Error;
use xds_gdb::log::{file_logger, parse_level, INITIAL_LOG_FILE, LOGGER_SWITCHER};
use xds_gdb::session::{Backend, Session};

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            debug!("exit: {e:#}");
            e.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(1)
        }
    };
    log::logger().flush();
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    // log everything until the configured file and level are known
    LOGGER_SWITCHER.install();
    let initial = Path::new(INITIAL_LOG_FILE);
    LOGGER_SWITCHER.switch(file_logger(initial, LevelFilter::Debug, true)?, LevelFilter::Debug);

    let argv: Vec<String> = std::env::args().collect();
    debug!("xds-gdb started with args: {argv:?}");
    let split = cli::split_args(argv.clone());
    let gdb = GdbOptions::scan(&split.gdb);

    // help and version are handled here, before any configuration error
    let args = Args::parse_from(&split.own);

    let cwd = std::env::current_dir().context("cannot get current directory")?;
    let env = config::load(
        args.config.as_deref(),
        gdb.command_file.as_deref().map(Path::new),
        &cwd,
    )?;
    info!("load env config: {env:?}");
    env.export();
    // loaded env file may define options
    let args = Args::parse_from(&split.own);

    let level = parse_level(&args.log_level)?;
    info!("switch log level to {level}");
    if args.log_file != initial {
        info!("switch logging to log file {}", args.log_file.display());
        LOGGER_SWITCHER.switch(file_logger(&args.log_file, level, true)?, level);
    } else {
        LOGGER_SWITCHER.switch(file_logger(initial, level, false)?, level);
    }

    let overwrite =
        OverwriteTable::from_env_value(std::env::var(OVERWRITE_ENV).ok().as_deref())?;
    debug!("overwrite table: {overwrite:?}");

    let backend = args.backend();
    // native gdb gets every argument, the remote agent builds its own command line
    let gdb_args = match backend {
        Backend::Native { .. } => split.gdb.clone(),
        Backend::Remote => gdb.args.clone(),
    };
    let session = backend.create(gdb_args, env.assignments());
    if !args.is_native() {
        configure_remote(session.as_ref(), &args)?;
    }

    info!("original arguments: {argv:?}");
    info!("current directory : {}", cwd.display());
    info!("use env config    : {:?}", env.source);
    info!("execute           : {} {:?}", session.command(), session.arguments());

    let options = BridgeOptions {
        inferior_tty: gdb.tty.filter(|_| !args.is_native()).map(Into::into),
        command_file: gdb.command_file,
        overwrite,
        relay_signals: true,
    };
    let result = Bridge::new(session, options).run(std::io::stdin());

    if let Some(e) = result.error {
        info!("exit with error: {e}");
        if result.code != 0 {
            eprintln!("{e}");
        }
    }
    Ok(result.code)
}

fn configure_remote(session: &dyn Session, args: &Args) -> Result<(), Error> {
    session.set_config("endpoint", args.server_url.as_str().into())?;
    if let Some(url) = args.backend_url.as_deref() {
        session.set_config("serverURL", url.into())?;
    }
    if let Some(id) = args.project_id.as_deref() {
        session.set_config("projectID", id.into())?;
    }
    if let Some(id) = args.sdk_id.as_deref() {
        session.set_config("sdkID", id.into())?;
    }
    if let Some(rpath) = args.rpath.as_deref() {
        session.set_config("relativePath", rpath.into())?;
    }
    session.set_config("listProjects", args.list.into())
}
