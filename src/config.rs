use std::{ffi::OsString, path::PathBuf};

use clap::{App, Arg};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Ir,
    Llvm,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Read source from this file instead of stdin.
    pub input: Option<PathBuf>,
    pub backend: BackendKind,
    pub prompt: bool,
    pub evaluate: bool,
    pub verbosity: u64,
}

fn app() -> App<'static, 'static> {
    App::new("kaleido")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("INPUT")
                .help("source file to read, stdin when omitted")
                .index(1),
        )
        .arg(
            Arg::with_name("backend")
                .short("b")
                .long("backend")
                .takes_value(true)
                .possible_values(&["ir", "llvm"])
                .default_value("ir")
                .help("code generation backend"),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .help("do not print the ready> prompt"),
        )
        .arg(
            Arg::with_name("no-eval")
                .long("no-eval")
                .help("do not evaluate top-level expressions"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("increase log verbosity, may be repeated"),
        )
}

impl Config {
    /// Parse the process arguments, exiting with usage on error.
    pub fn from_args() -> Config {
        Config::try_from_iter(std::env::args_os()).unwrap_or_else(|err| err.exit())
    }

    pub fn try_from_iter<I, T>(args: I) -> Result<Config, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Config::from_matches(&app().get_matches_from_safe(args)?))
    }

    fn from_matches(matches: &clap::ArgMatches<'_>) -> Config {
        let input = matches.value_of_os("INPUT").map(PathBuf::from);
        let backend = match matches.value_of("backend") {
            Some("llvm") => BackendKind::Llvm,
            _ => BackendKind::Ir,
        };

        Config {
            // A prompt only makes sense when someone is typing.
            prompt: input.is_none() && !matches.is_present("quiet"),
            input,
            backend,
            evaluate: !matches.is_present("no-eval"),
            verbosity: matches.occurrences_of("verbose"),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}
