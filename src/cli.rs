//! Command line of xds-gdb.
//!
//! xds-gdb is used as a drop-in replacement of gdb, so most arguments belong to gdb.
//! Own options are either given before a `--` separator or read from environment variables.

use crate::log::INITIAL_LOG_FILE;
use crate::session::native::DEFAULT_GDB;
use crate::session::remote::DEFAULT_ENDPOINT;
use crate::session::Backend;
use clap::Parser;
use log::warn;
use std::path::PathBuf;

const LONG_ABOUT: &str = "\
gdb wrapper for X(cross) Development System

 Two debugging models are supported:
  - xds remote debugging requiring an XDS agent and allowing cross debug
  - native debugging
 By default xds remote debug is used, define XDS_NATIVE_GDB to use native gdb debug mode
 instead.

 xds-gdb configuration can be set using:
  - a config file (XDS_CONFIG)
  - or environment variables
  - or by setting variables within gdb ini file (commented line including :XDS-ENV: tag)
    Example of gdb ini file where we define project and sdk ID:
     # :XDS-ENV: XDS_PROJECT_ID=IW7B4EE-DBY4Z74_myProject
     # :XDS-ENV: XDS_SDK_ID=poky-agl_aarch64_3.99.1+snapshot

 xds-gdb options must be separated from gdb ones with `--`:
     xds-gdb --list -- -x myGdbConf.ini";

#[derive(Parser, Debug, Clone)]
#[command(name = "xds-gdb", author, version, about, long_about = LONG_ABOUT)]
pub struct Args {
    /// Env config file to source on startup
    #[clap(long, env = "XDS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level (supported levels: panic, fatal, error, warn, info, debug, trace)
    #[clap(long, env = "XDS_LOGLEVEL", default_value = "warning")]
    pub log_level: String,

    /// Logging file
    #[clap(long, env = "XDS_LOGFILE", default_value = INITIAL_LOG_FILE)]
    pub log_file: PathBuf,

    /// Use native gdb instead of remote XDS agent (value may name the gdb to use)
    #[clap(long, env = "XDS_NATIVE_GDB")]
    pub native_gdb: Option<String>,

    /// Project ID you want to debug (mandatory for remote debugging)
    #[clap(long, env = "XDS_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Relative path into project
    #[clap(long, env = "XDS_RPATH")]
    pub rpath: Option<String>,

    /// Cross SDK ID to use to debug project
    #[clap(long, env = "XDS_SDK_ID")]
    pub sdk_id: Option<String>,

    /// XDS agent url
    #[clap(long, env = "XDS_SERVER_URL", default_value = DEFAULT_ENDPOINT)]
    pub server_url: String,

    /// XDS server url the agent must be connected to
    #[clap(long)]
    pub backend_url: Option<String>,

    /// List existing xds projects and installed SDKs
    #[clap(long, visible_alias = "ls")]
    pub list: bool,
}

impl Args {
    /// Native mode is requested with any non-empty `XDS_NATIVE_GDB` value.
    pub fn is_native(&self) -> bool {
        self.native_gdb.as_deref().is_some_and(|v| !v.is_empty())
    }

    /// Backend selected by the options. A native gdb value that is not an executable program
    /// (`1`, `true`, ...) selects the default gdb.
    pub fn backend(&self) -> Backend {
        if !self.is_native() {
            return Backend::Remote;
        }
        let program = self
            .native_gdb
            .as_deref()
            .filter(|p| which::which(p).is_ok())
            .unwrap_or(DEFAULT_GDB);
        Backend::Native {
            program: program.to_string(),
        }
    }
}

/// Arguments split between xds-gdb and gdb.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitArgs {
    /// xds-gdb arguments, program name included.
    pub own: Vec<String>,
    pub gdb: Vec<String>,
}

/// Separate xds-gdb arguments from gdb ones.
///
/// With `--` separator own arguments are before it, otherwise only help, version and listing
/// flags are recognized and every argument is passed to gdb.
pub fn split_args(argv: Vec<String>) -> SplitArgs {
    let mut argv = argv.into_iter();
    let program = argv.next().unwrap_or_else(|| "xds-gdb".to_string());
    let args: Vec<String> = argv.collect();

    for (idx, arg) in args.iter().enumerate() {
        let own_flag = match arg.as_str() {
            "--help" | "-h" => Some("--help"),
            "--version" | "-v" | "-V" => Some("--version"),
            "--list" | "--ls" | "-ls" => Some("--list"),
            "--" => {
                let mut own = vec![program];
                own.extend_from_slice(&args[..idx]);
                return SplitArgs {
                    own,
                    gdb: args[idx + 1..].to_vec(),
                };
            }
            _ => None,
        };
        if let Some(flag) = own_flag {
            return SplitArgs {
                own: vec![program, flag.to_string()],
                gdb: args,
            };
        }
    }

    SplitArgs {
        own: vec![program],
        gdb: args,
    }
}

/// gdb options that matter for xds-gdb.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GdbOptions {
    /// gdb arguments without the inferior tty options.
    pub args: Vec<String>,
    /// Terminal of the debugged program.
    pub tty: Option<String>,
    /// gdb command file, may contain `:XDS-ENV:` tags.
    pub command_file: Option<String>,
}

impl GdbOptions {
    /// Scan gdb arguments: `--tty` options are extracted, `-x`/`--command` are detected
    /// and kept.
    pub fn scan(gdb_args: &[String]) -> Self {
        let mut opts = GdbOptions::default();
        let mut iter = gdb_args.iter().peekable();

        while let Some(arg) = iter.next() {
            let arg = arg.as_str();
            if let Some(tty) = arg.strip_prefix("--tty=") {
                opts.tty = Some(tty.to_string());
                continue;
            }
            if arg == "--tty" || arg == "-tty" {
                match iter.next() {
                    Some(tty) => opts.tty = Some(tty.clone()),
                    None => warn!(target: "config", "missing value for {arg}"),
                }
                continue;
            }

            if opts.command_file.is_none() {
                if let Some(file) = arg.strip_prefix("--command=") {
                    opts.command_file = Some(file.to_string());
                } else if arg == "-x" || arg == "--command" {
                    opts.command_file = iter.peek().map(|f| f.to_string());
                }
            }
            opts.args.push(arg.to_string());
        }

        opts
    }
}
