use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};

use strawberry::bytecode;
use strawberry::diagnostic::ansi::AnsiRenderer;
use strawberry::diagnostic::Diagnostic;
use strawberry::repl::Repl;
use strawberry::vm::{Vm, VmConfig};
use strawberry::Error;

#[derive(Parser, Debug)]
#[command(name = "strawberry", author, version, about = "Compile and run Strawberry scripts on a stack VM")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a script and execute it.
    Run {
        file: PathBuf,
        #[command(flatten)]
        vm: VmFlags,
    },
    /// Print the compiled bytecode listing or the AST as JSON.
    Emit {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = EmitFormat::Bytecode)]
        format: EmitFormat,
    },
    /// Execute a bytecode listing.
    Exec {
        listing: PathBuf,
        #[command(flatten)]
        vm: VmFlags,
    },
    /// Interactive session (the default).
    Repl {
        #[command(flatten)]
        vm: VmFlags,
    },
}

#[derive(Args, Debug, Default)]
struct VmFlags {
    /// Reuse the caller's frame for calls in tail position.
    #[arg(long)]
    tail_calls: bool,
    #[arg(long)]
    unroll_loops: bool,
}

impl From<&VmFlags> for VmConfig {
    fn from(flags: &VmFlags) -> Self {
        VmConfig { tail_calls: flags.tail_calls, unroll_loops: flags.unroll_loops }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EmitFormat {
    Bytecode,
    Ast,
}

fn read_file(path: &Path) -> Result<String, ExitCode> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("error: cannot read {}: {}", path.display(), e);
        ExitCode::FAILURE
    })
}

fn report(err: &Error, source: Option<&str>) -> ExitCode {
    let renderer = AnsiRenderer::for_stderr();
    for d in err.diagnostics(source) {
        eprint!("{}", renderer.render(&d));
    }
    ExitCode::FAILURE
}

fn execute(vm: &mut Vm) -> ExitCode {
    match vm.run() {
        Ok(()) => {
            let stats = vm.stats();
            let gc = vm.gc_stats();
            log::debug!(
                "executed {} instruction(s), {} call(s) ({} tail), peak depth {}, {} collection(s) freed {}",
                stats.instructions, stats.calls, stats.tail_calls, stats.peak_call_depth, gc.collections, gc.freed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            let renderer = AnsiRenderer::for_stderr();
            eprint!("{}", renderer.render(&Diagnostic::runtime(&e, vm)));
            ExitCode::FAILURE
        }
    }
}

fn run_file(path: &Path, config: VmConfig) -> ExitCode {
    let source = match read_file(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let code = match strawberry::compile_source(&source) {
        Ok(code) => code,
        Err(e) => return report(&e, Some(&source)),
    };
    let mut vm = Vm::new(code).with_config(config);
    execute(&mut vm)
}

fn emit_file(path: &Path, format: EmitFormat) -> ExitCode {
    let source = match read_file(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match format {
        EmitFormat::Ast => {
            let program = match strawberry::parse_source(&source) {
                Ok(p) => p,
                Err(e) => return report(&e, Some(&source)),
            };
            match serde_json::to_string_pretty(&program) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("error: cannot serialize AST: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        EmitFormat::Bytecode => match strawberry::compile_source(&source) {
            Ok(code) => print!("{}", bytecode::to_listing(&code)),
            Err(e) => return report(&e, Some(&source)),
        },
    }
    ExitCode::SUCCESS
}

fn exec_listing(path: &Path, config: VmConfig) -> ExitCode {
    let text = match read_file(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut vm = Vm::new(bytecode::parse_listing(&text)).with_config(config);
    execute(&mut vm)
}

fn repl(config: VmConfig) -> ExitCode {
    let stdin = std::io::stdin();
    let mut repl = Repl::new(config, Box::new(std::io::stdout()));
    match repl.run(stdin.lock(), &mut std::io::stdout(), &mut std::io::stderr()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Run { file, vm }) => run_file(&file, VmConfig::from(&vm)),
        Some(Command::Emit { file, format }) => emit_file(&file, format),
        Some(Command::Exec { listing, vm }) => exec_listing(&listing, VmConfig::from(&vm)),
        Some(Command::Repl { vm }) => repl(VmConfig::from(&vm)),
        None => repl(VmConfig::default()),
    }
}
