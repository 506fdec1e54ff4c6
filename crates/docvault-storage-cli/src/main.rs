use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "docvault-storage")]
#[command(about = "Document storage with fallback across S3, Azure and local disk", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML settings file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved backends in priority order
    Backends {
        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Probe every backend and print the aggregate health
    Health {
        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Upload a local file
    Upload {
        /// File to upload
        file: String,

        /// Storage key (defaults to the file name)
        #[arg(short, long)]
        key: Option<String>,

        /// Declared MIME type
        #[arg(short, long, default_value = "application/octet-stream")]
        mime_type: String,

        /// Attach a SHA-256 checksum
        #[arg(long, default_value = "false")]
        checksum: bool,

        /// Custom metadata as key=value (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },

    /// Download a stored file
    Download {
        /// Storage key or locator
        path: String,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,

        /// Verify content against the stored checksum
        #[arg(long, default_value = "false")]
        verify: bool,
    },

    /// Delete a stored file
    Delete {
        /// Storage key or locator
        path: String,
    },

    /// List stored files
    List {
        /// Only list files under this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show usage statistics of the serving backend
    Stats {
        /// Output format (text, json, yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Generate a time-limited download URL
    Url {
        /// Storage key or locator
        path: String,

        /// Link lifetime in seconds
        #[arg(short, long, default_value = "3600")]
        expires_in: u64,
    },

    /// Probe all backends and dump the recorded metrics
    Metrics {
        /// Output format (prometheus, json)
        #[arg(short, long, default_value = "prometheus")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = cli.config.as_deref();

    match cli.command {
        Commands::Backends { format } => {
            commands::backends::run(config, &format).await?;
        }
        Commands::Health { format } => {
            commands::health::run(config, &format).await?;
        }
        Commands::Upload {
            file,
            key,
            mime_type,
            checksum,
            metadata,
        } => {
            commands::files::upload(config, &file, key.as_deref(), &mime_type, checksum, &metadata)
                .await?;
        }
        Commands::Download {
            path,
            output,
            verify,
        } => {
            commands::files::download(config, &path, output.as_deref(), verify).await?;
        }
        Commands::Delete { path } => {
            commands::files::delete(config, &path).await?;
        }
        Commands::List { prefix, format } => {
            commands::files::list(config, prefix.as_deref(), &format).await?;
        }
        Commands::Stats { format } => {
            commands::files::stats(config, &format).await?;
        }
        Commands::Url { path, expires_in } => {
            commands::files::url(config, &path, expires_in).await?;
        }
        Commands::Metrics { format } => {
            commands::metrics::run(config, &format).await?;
        }
    }

    Ok(())
}
