//! Subflow - composable TCP/UDP stream proxy

use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use subflow::app::Runtime;
use subflow::config::Config;
use subflow::error::Result;

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    if args.gen_config {
        match serde_json::to_string_pretty(&Config::default_socks_server()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("failed to render config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            eprintln!("no config file specified, run with -c <FILE> or --gen-config");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the config file level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    info!("subflow v{} starting", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let runtime = Runtime::from_config(&config).await?;
        runtime.run().await
    })?;

    info!("goodbye");
    Ok(())
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    gen_config: bool,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut gen_config = false;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--gen-config" => gen_config = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    // Positional argument: treat as config file
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self {
            config,
            gen_config,
            version,
        }
    }
}

fn print_help() {
    println!(
        r#"Subflow - composable TCP/UDP stream proxy

USAGE:
    subflow [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    --gen-config            Print an example configuration
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    subflow -c config.json
    subflow --gen-config > config.json
"#
    );
}

fn print_version() {
    println!("subflow v{}", env!("CARGO_PKG_VERSION"));
}
