use clap::{Parser, Subcommand};
use fs_sandbox::{ExecOptions, ProcessOutput, SandboxEnvironment, SandboxError, CONTAINER_NAME};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// fs-sandbox - Disposable Filesystem Work Areas
///
/// Creates, inspects and sweeps the throwaway directories used by test runs.
#[derive(Parser)]
#[command(name = "fs-sandbox")]
#[command(version = "0.1.0")]
#[command(about = "Disposable filesystem sandboxes for tests and scripts", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base directory for sandboxes created without --at (default: system temp dir)
    #[arg(long, global = true, conflicts_with = "here")]
    base: Option<PathBuf>,

    /// Use the current directory as the base
    #[arg(long, global = true)]
    here: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sandbox and print its path (it is left on disk)
    Create {
        /// Root to create the sandbox under instead of the base
        #[arg(long)]
        at: Option<PathBuf>,
    },
    /// Remove the sandbox container under the base, including leftovers
    Sweep,
    /// List sandbox directories under the base
    List {
        /// Root to look under instead of the base
        #[arg(long)]
        at: Option<PathBuf>,
    },
    /// Run a command inside a fresh sandbox
    Exec {
        /// Root to create the sandbox under instead of the base
        #[arg(long)]
        at: Option<PathBuf>,

        /// Keep the sandbox after the command finishes
        #[arg(long)]
        keep: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// The command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    let environment = match build_environment(&cli) {
        Ok(environment) => environment,
        Err(e) => {
            error!("Failed to configure base directory: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Create { at } => create(&environment, at),
        Commands::Sweep => sweep(&environment),
        Commands::List { at } => list(&environment, at),
        Commands::Exec {
            at,
            keep,
            json,
            command,
        } => exec(&environment, at, keep, json, command).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn build_environment(cli: &Cli) -> Result<SandboxEnvironment, SandboxError> {
    let environment = SandboxEnvironment::new();
    if let Some(base) = &cli.base {
        environment.set_base_target(base)?;
    } else if cli.here {
        environment.set_base_target_to_current_dir()?;
    }
    Ok(environment)
}

fn create(environment: &SandboxEnvironment, at: Option<PathBuf>) -> Result<i32, SandboxError> {
    let sandbox = environment.create(at.as_deref())?;
    println!("{}", sandbox.path().display());
    Ok(0)
}

fn sweep(environment: &SandboxEnvironment) -> Result<i32, SandboxError> {
    let orphans = environment.orphans()?;
    environment.destroy_any()?;
    info!(
        "Removed {} sandbox(es) from {}",
        orphans.len(),
        environment.container_path().display()
    );
    Ok(0)
}

fn list(environment: &SandboxEnvironment, at: Option<PathBuf>) -> Result<i32, SandboxError> {
    let root = at.unwrap_or_else(|| environment.base_target());
    let orphans = environment.orphans_at(&root)?;

    println!("\n{}", "=".repeat(60));
    println!("Sandboxes in {}", root.join(CONTAINER_NAME).display());
    println!("{}", "=".repeat(60));

    if orphans.is_empty() {
        println!("No sandboxes found.");
    } else {
        for path in &orphans {
            println!("  {}", path.display());
        }
    }

    println!("{}", "=".repeat(60));
    Ok(0)
}

async fn exec(
    environment: &SandboxEnvironment,
    at: Option<PathBuf>,
    keep: bool,
    json: bool,
    command: Vec<String>,
) -> Result<i32, SandboxError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(2);
    };

    let sandbox = environment.create(at.as_deref())?;
    info!("Executing: {} in {}", command.join(" "), sandbox.path().display());

    let outcome = sandbox.exec(program, args, ExecOptions::default()).await;

    if keep {
        info!("Keeping sandbox at {}", sandbox.path().display());
    } else {
        sandbox.destroy()?;
    }

    let output = match outcome {
        Ok(output) => output,
        Err(SandboxError::ProcessFailed(failure)) => failure.output,
        Err(e) => return Err(e),
    };
    print_output(&command, &output, json)?;

    Ok(output.exit_code.unwrap_or(1))
}

fn print_output(command: &[String], output: &ProcessOutput, json: bool) -> Result<(), SandboxError> {
    if json {
        println!("{}", serde_json::to_string_pretty(output)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60));
    println!("Command: {}", command.join(" "));
    println!("Exit Code: {:?}", output.exit_code);
    println!("{}", "=".repeat(60));

    if !output.stdout.is_empty() {
        println!("\nSTDOUT:\n{}", output.stdout_text());
    }

    if !output.stderr.is_empty() {
        println!("\nSTDERR:\n{}", output.stderr_text());
    }

    Ok(())
}
