use anyhow::Result;
use clap::Parser;
use log::info;

use parley::{
    API_KEY_ENV, Config, ConversationSession, DEFAULT_BASE_URL, DEFAULT_MODEL, RequestOptions,
    SystemPrompt,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Single question, single answer", long_about = None)]
struct Args {
    /// API key for authentication
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: String,

    /// Base URL for the API endpoint
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Model to use for chat completion
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// The user message to send
    #[arg(long, default_value = "Explain in one paragraph what a Rust trait is.")]
    message: String,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(long, default_value = "0.7")]
    temperature: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Model: {}", args.model);
    info!("Base URL: {}", args.base_url);

    let config = Config::new("zai", &args.model)
        .with_base_url(&args.base_url)
        .with_api_key(&args.api_key);

    let mut session = ConversationSession::connect(config)?
        .with_system_prompt(SystemPrompt::FriendlyAssistant.text())?
        .with_options(RequestOptions::new().with_temperature(args.temperature));

    let response = session
        .send_user(&args.message)
        .await?
        .into_response()
        .await?;

    println!("{}", response.content());

    if let Some(usage) = &response.usage {
        info!(
            "Tokens: {} prompt + {} completion = {}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        );
    }

    Ok(())
}
