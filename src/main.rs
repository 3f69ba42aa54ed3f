use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use cartograph_core::{CartographConfig, OutputFormat};
use cartograph_repomap::{RepoMapRequest, RepoMapService};

#[derive(Parser)]
#[command(
    name = "cartograph",
    version,
    about = "Cached, token-budgeted repository maps",
    long_about = "Cartograph summarizes a source tree for an LLM's context window.\n\n\
                   It extracts definitions and references with tree-sitter, ranks files with\n\
                   personalized PageRank and renders the most important definitions within a\n\
                   token budget. Results are cached per file, per file set and per query.\n\n\
                   Examples:\n  \
                     cartograph map                       Map the current directory\n  \
                     cartograph map --focus src/lib.rs    Bias the map toward a file\n  \
                     cartograph map --format json         Content plus metadata as JSON\n  \
                     cartograph mcp                       Serve maps over MCP (stdio)\n  \
                     cartograph cache clear               Drop all cached results"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .cartograph.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        long_help = "Output format for the map.\n\n\
                       Formats:\n  \
                         text      Tree-style summary (default)\n  \
                         json      Map content and metadata with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a ranked map of the repository
    #[command(long_about = "Generate a ranked map of the repository.\n\n\
        Files are ranked by how often other files reference their definitions,\n\
        biased toward --focus files and files defining --mention identifiers.\n\n\
        Examples:\n  cartograph map --path .\n  cartograph map --max-tokens 2048 --focus src/main.rs --mention Config")]
    Map {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Maximum tokens for the map (default: from config, 5000)
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Focus files (boost ranking for these files and what they reference)
        #[arg(long)]
        focus: Vec<PathBuf>,

        /// Identifiers mentioned in the conversation
        #[arg(long)]
        mention: Vec<String>,

        /// Append reference counts to each definition
        #[arg(long)]
        enhance: bool,
    },
    /// Start the MCP server on stdio
    #[command(long_about = "Start the MCP server on stdio.\n\n\
        Exposes the get_repo_map tool to MCP clients. The server keeps its caches\n\
        warm between calls.")]
    Mcp {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
    /// Manage the on-disk cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Create a default .cartograph.toml configuration file
    #[command(long_about = "Create a default .cartograph.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .cartograph.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached file, graph and result
    Clear {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
}

const CONFIG_FILE: &str = ".cartograph.toml";

const DEFAULT_CONFIG: &str = r#"# Cartograph configuration
# See: https://github.com/cartograph-dev/cartograph

[map]
# max_tokens = 5000
# chars_per_token = 4
# format = "text"            # text, json, markdown
# enable_enhancement = false # append reference counts to definitions

[rank]
# damping = 0.85
# focus_boost = 50.0         # restart weight multiplier for focus files
# mention_boost = 50.0       # restart weight multiplier for files defining mentioned identifiers
# epsilon = 1e-9
# max_iterations = 100

[cache]
# enabled = true
# dir = ".cartograph"        # relative to the repository root
# fingerprint = "metadata"   # metadata (mtime + size) or content (SHA-256)

[walk]
# max_file_size = 1048576
# workers = 0                # 0 uses the available parallelism
"#;

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("CARTOGRAPH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<CartographConfig> {
    let path = match path {
        Some(path) => path,
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if !default_path.exists() {
                return Ok(CartographConfig::default());
            }
            default_path
        }
    };
    tracing::debug!(path = %path.display(), "loading config");
    Ok(CartographConfig::from_file(path)?)
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if use_color {
        println!("\x1b[1mcartograph\x1b[0m v{version}: ranked repository maps for coding agents\n");
        println!("Quick start:");
        println!("  \x1b[36mcartograph map\x1b[0m                Map the current directory");
        println!("  \x1b[36mcartograph init\x1b[0m               Create a .cartograph.toml config file");
        println!("  \x1b[36mcartograph mcp\x1b[0m                Serve maps to an MCP client\n");
        println!("Run \x1b[1mcartograph --help\x1b[0m for all options.");
    } else {
        println!("cartograph v{version}: ranked repository maps for coding agents\n");
        println!("Quick start:");
        println!("  cartograph map                Map the current directory");
        println!("  cartograph init               Create a .cartograph.toml config file");
        println!("  cartograph mcp                Serve maps to an MCP client\n");
        println!("Run cartograph --help for all options.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;
    let format = cli.format.unwrap_or(config.map.format);

    match cli.command {
        None => {
            let use_color =
                std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err();
            print_welcome(use_color);
        }
        Some(Command::Map {
            path,
            max_tokens,
            focus,
            mention,
            enhance,
        }) => {
            let request = RepoMapRequest::new(&path)
                .with_max_tokens(max_tokens.unwrap_or(config.map.max_tokens))
                .with_focus_files(focus)
                .with_mentioned_idents(mention)
                .with_enhancement(enhance || config.map.enable_enhancement)
                .with_format(format);
            let service = RepoMapService::open(&path, config)?;
            let map = tokio::task::spawn_blocking(move || service.repo_map(&request))
                .await
                .into_diagnostic()??;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&map).into_diagnostic()?);
                }
                OutputFormat::Text | OutputFormat::Markdown => {
                    print!("{}", map.content);
                    if cli.verbose {
                        let m = &map.metadata;
                        eprintln!(
                            "{} of {} files rendered, {} definitions, ~{} tokens{}",
                            m.rendered_files,
                            m.file_count,
                            m.definition_count,
                            m.token_estimate,
                            if m.truncated { " (truncated)" } else { "" },
                        );
                    }
                }
            }
        }
        Some(Command::Mcp { path }) => {
            cartograph_mcp::server::run_server(path, config).await?;
        }
        Some(Command::Cache {
            action: CacheAction::Clear { path },
        }) => {
            let cache_dir = config.cache_dir_for(&path);
            let service = RepoMapService::open(&path, config)?;
            service.clear_caches()?;
            println!("Cleared cache at {}", cache_dir.display());
        }
        Some(Command::Init) => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "cartograph", &mut std::io::stdout());
        }
    }

    Ok(())
}
