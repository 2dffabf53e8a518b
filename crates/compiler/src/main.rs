//! bqc - debug driver for the BASIC compiler core
//!
//! The production build pipeline (parser in front, QBE and cc behind) is a
//! separate tool; this binary is the core's debug surface. It reads the
//! AST the front end serialized to JSON, plus the optional DATA table from
//! the preprocessor, and either emits QBE IL or dumps an intermediate
//! stage as text.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "bqc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "BASIC compiler core - QBE IL emission and dumps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit QBE IL for a serialized AST
    Emit {
        /// AST file (JSON, produced by the front end)
        input: PathBuf,

        /// DATA table from the preprocessor (JSON)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Output path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pretty-print the deserialized AST
    DumpAst {
        input: PathBuf,
    },

    /// Dump the symbol table after semantic analysis
    DumpSymbols {
        input: PathBuf,

        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Dump every procedure's control-flow graph
    DumpCfg {
        input: PathBuf,

        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Emit {
            input,
            data,
            output,
        } => run_emit(&input, data.as_deref(), output.as_deref()),
        Commands::DumpAst { input } => {
            let program = load_program(&input);
            println!("{:#?}", program);
        }
        Commands::DumpSymbols { input, data } => {
            let program = load_program(&input);
            let data = load_data(data.as_deref());
            let (symbols, diags) = bqc::analyze(&program, &data);
            for d in diags.iter() {
                eprintln!("{}", d);
            }
            print!("{}", symbols.dump());
            if diags.has_errors() {
                process::exit(1);
            }
        }
        Commands::DumpCfg { input, data } => {
            let program = load_program(&input);
            let data = load_data(data.as_deref());
            let (symbols, diags) = bqc::analyze(&program, &data);
            for d in diags.iter() {
                eprintln!("{}", d);
            }
            if diags.has_errors() {
                process::exit(1);
            }
            match bqc::build_program(&program, &symbols) {
                Ok(pcfg) => {
                    for cfg in pcfg.all() {
                        print!("{}", cfg.dump());
                    }
                }
                Err(diags) => {
                    for d in diags.iter() {
                        eprintln!("{}", d);
                    }
                    process::exit(1);
                }
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "bqc", &mut io::stdout());
        }
    }
}

fn run_emit(input: &Path, data: Option<&Path>, output: Option<&Path>) {
    let program = load_program(input);
    let data = load_data(data);
    match bqc::compile_to_il(&program, &data) {
        Ok(out) => {
            for w in &out.warnings {
                eprintln!("{}", w);
            }
            match output {
                Some(path) => {
                    if let Err(e) = std::fs::write(path, &out.il) {
                        eprintln!("failed to write {}: {}", path.display(), e);
                        process::exit(1);
                    }
                }
                None => print!("{}", out.il),
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn load_program(path: &Path) -> bqc::Program {
    let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("failed to read {}: {}", path.display(), e);
        process::exit(1);
    });
    serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("{} is not a serialized AST: {}", path.display(), e);
        process::exit(1);
    })
}

fn load_data(path: Option<&Path>) -> bqc::DataValues {
    let Some(path) = path else {
        return bqc::DataValues::default();
    };
    let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("failed to read {}: {}", path.display(), e);
        process::exit(1);
    });
    serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("{} is not a DATA table: {}", path.display(), e);
        process::exit(1);
    })
}
