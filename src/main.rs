use std::process;

use clap::{Args, Parser, Subcommand};
use tracing::Level;

use arithjit::{BackendKind, CompileOptions, CompileResult, Compiler};

#[derive(Parser)]
#[command(
  name = "arithjit",
  version,
  about = "Compile arithmetic expressions to native floating-point functions"
)]
struct Cli {
  #[command(flatten)]
  global: GlobalArgs,
  #[command(subcommand)]
  command: Command,
}

#[derive(Args)]
struct GlobalArgs {
  /// Backend: native or interp (default: $ARITHJIT_BACKEND, else native)
  #[arg(long, global = true)]
  backend: Option<BackendKind>,
  /// Print instruction listings before finalizing
  #[arg(long, global = true)]
  dump: bool,
  /// Maximum parenthesis nesting and tree depth
  #[arg(long, global = true, value_name = "N")]
  max_depth: Option<usize>,
  /// More log output (-v info, -vv debug, -vvv trace)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,
}

#[derive(Subcommand)]
enum Command {
  /// Compile an expression and call it with values for its variables,
  /// given in alphabetical order of the variable names
  Eval {
    expr: String,
    #[arg(allow_negative_numbers = true)]
    values: Vec<f64>,
  },
  /// Fold an expression over a list of values
  Reduce {
    expr: String,
    /// Accumulator variable
    #[arg(long, default_value = "t")]
    acc: String,
    /// Element variable
    #[arg(long, default_value = "x")]
    elem: String,
    /// Initial accumulator value
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    init: f64,
    #[arg(allow_negative_numbers = true)]
    values: Vec<f64>,
  },
  /// Print the parsed and lowered trees
  Ast { expr: String },
  /// Print the instruction listing of the scalar function
  Listing { expr: String },
}

impl GlobalArgs {
  fn options(&self) -> CompileOptions {
    let mut options = CompileOptions::from_env();
    if let Some(backend) = self.backend {
      options.backend = backend;
    }
    if let Some(max_depth) = self.max_depth {
      options.max_depth = max_depth;
    }
    options.dump_listing |= self.dump;
    options
  }

  fn level(&self) -> Level {
    match self.verbose {
      0 => Level::WARN,
      1 => Level::INFO,
      2 => Level::DEBUG,
      _ => Level::TRACE,
    }
  }
}

fn run(command: Command, compiler: &Compiler) -> CompileResult<()> {
  match command {
    Command::Eval { expr, values } => {
      let f = compiler.compile(&expr)?;
      println!("{}", f.call(&values)?);
    }
    Command::Reduce {
      expr,
      acc,
      elem,
      init,
      values,
    } => {
      let reducer = compiler.reducer(&expr, &acc, &elem)?;
      println!("{}", reducer.reduce(init, &values));
    }
    Command::Ast { expr } => {
      let ast = compiler.parse(&expr)?;
      println!("parsed:  {ast}");
      println!("lowered: {}", arithjit::lower::lower(&ast)?);
    }
    Command::Listing { expr } => print!("{}", compiler.listing(&expr)?),
  }
  Ok(())
}

fn main() {
  let cli = Cli::parse();
  tracing_subscriber::fmt()
    .with_max_level(cli.global.level())
    .with_writer(std::io::stderr)
    .init();

  let compiler = Compiler::new(cli.global.options());
  if let Err(err) = run(cli.command, &compiler) {
    eprintln!("{err}");
    process::exit(1);
  }
}
