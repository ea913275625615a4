mod ast;
mod backend;
mod codegen;
mod config;
mod driver;
mod lexer;
mod parser;

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
};

use anyhow::Context as _;
use tracing::{info, level_filters::LevelFilter};

use backend::ir::IrModule;
use codegen::Codegen;
use config::{BackendKind, Config};
use driver::{Options, Session};
use lexer::Lexer;
use parser::Parser;

const MODULE_NAME: &str = "kaleido";

fn init_logging(level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

#[cfg(feature = "llvm")]
fn run_llvm<R: BufRead>(parser: Parser<R>, options: Options) -> anyhow::Result<()> {
    let context = inkwell::context::Context::create();
    let backend = backend::llvm::LlvmBackend::new(&context, MODULE_NAME);
    Session::new(parser, Codegen::new(backend), io::stderr(), options).run()
}

#[cfg(not(feature = "llvm"))]
fn run_llvm<R: BufRead>(_parser: Parser<R>, _options: Options) -> anyhow::Result<()> {
    anyhow::bail!("built without the llvm backend, rebuild with `--features llvm`")
}

fn main() -> anyhow::Result<()> {
    let config = Config::from_args();
    init_logging(config.log_level());
    info!(?config, "starting session");

    let input: Box<dyn BufRead> = match config.input {
        Some(ref path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let parser = Parser::new(Lexer::new(input));
    let options = Options {
        prompt: config.prompt,
        evaluate: config.evaluate,
    };

    match config.backend {
        BackendKind::Ir => Session::new(
            parser,
            Codegen::new(IrModule::new(MODULE_NAME)),
            io::stderr(),
            options,
        )
        .run(),
        BackendKind::Llvm => run_llvm(parser, options),
    }
}
