use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use markglow_core::{
    config::Config,
    http_client::HttpClient,
    model::GenerationParams,
    prompts::{Action, PromptInputs, PromptPair},
    provider::ProviderRegistry,
    relay::{ChunkRelay, FnSink},
    server::{self, AppState},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "markglow streaming relay", long_about = None)]
struct Cli {
    /// Config file (TOML or JSON)
    #[arg(short, long, global = true, default_value = "config/markglow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Overrides `server.bind` from the config file
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one action against the upstream and print deltas live
    Stream {
        #[arg(short, long, default_value = "beautify")]
        action: String,
        #[arg(long, help = "Document text; '-' reads stdin")]
        content: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        style: Option<String>,
        #[arg(long)]
        target_lang: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_path(&cli.config)
        .map_err(|e| anyhow::anyhow!("loading {}: {e}", cli.config.display()))?;
    tracing::debug!(
        config = %cli.config.display(),
        default_provider = %cfg.default_provider,
        "config loaded"
    );

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let state = AppState::from_config(&cfg)?;
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            server::serve(listener, state).await?;
        }
        Commands::Stream {
            action,
            content,
            title,
            context,
            style,
            target_lang,
            model,
            provider,
            temperature,
            max_tokens,
        } => {
            let content = match content.as_deref() {
                Some("-") => Some(io::read_to_string(io::stdin())?),
                _ => content,
            };
            let action = Action::resolve(Some(&action));
            let prompts = PromptPair::build(
                action,
                &PromptInputs {
                    content: content.as_deref(),
                    style: style.as_deref(),
                    target_lang: target_lang.as_deref(),
                    title: title.as_deref(),
                    context: context.as_deref(),
                },
            )?;

            let registry = ProviderRegistry::from_config(&cfg)?;
            let profile = registry.resolve(provider.as_deref());
            let params = GenerationParams::resolve(temperature, max_tokens, &cfg.generation);
            let req = profile.stream_request(
                prompts.user,
                Some(prompts.system),
                params,
                model.as_deref(),
            );

            let relay = ChunkRelay::upstream(HttpClient::from_cfg(&cfg.http)?);
            let mut out = io::stdout();
            let mut sink = FnSink::new(|text: &str| {
                out.write_all(text.as_bytes())?;
                out.flush()?;
                Ok(())
            });
            let outcome = relay.run(&req, &mut sink).await?;
            println!();
            eprintln!(
                "[{} via {}/{}: {} chunks in {} ms]",
                action, req.provider, req.model, outcome.chunks, outcome.elapsed_ms
            );
        }
    }

    Ok(())
}
