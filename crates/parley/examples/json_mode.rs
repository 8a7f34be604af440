use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

use parley::{
    API_KEY_ENV, Config, ConversationSession, DEFAULT_BASE_URL, DEFAULT_MODEL, RequestOptions,
    ResponseFormat, SystemPrompt,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ask for a JSON object and decode it", long_about = None)]
struct Args {
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct Language {
    name: String,
    year: u32,
    paradigms: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::new("zai", &args.model)
        .with_base_url(&args.base_url)
        .with_api_key(&args.api_key);

    let mut session = ConversationSession::connect(config)?
        .with_system_prompt(SystemPrompt::JsonOnly.text())?
        .with_options(
            RequestOptions::new()
                .with_response_format(ResponseFormat::JsonObject)
                .with_temperature(0.1),
        );

    let response = session
        .send_user(
            "Describe the Rust programming language as a JSON object with the keys \
             \"name\", \"year\" (first stable release) and \"paradigms\" (list of strings).",
        )
        .await?
        .into_response()
        .await?;

    let language: Language = response.parse_content()?;
    println!("{} ({})", language.name, language.year);
    for paradigm in &language.paradigms {
        println!("  - {paradigm}");
    }

    Ok(())
}
