use anyhow::Result;
use clap::Parser;
use log::info;

use parley::{
    API_KEY_ENV, Config, ConversationSession, DEFAULT_BASE_URL, DEFAULT_MODEL, SystemPrompt,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Several turns that build on each other", long_about = None)]
struct Args {
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
}

const QUESTIONS: [&str; 3] = [
    "What is ownership in Rust?",
    "How does borrowing relate to it?",
    "Summarize both ideas in one sentence.",
];

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::new("zai", &args.model)
        .with_base_url(&args.base_url)
        .with_api_key(&args.api_key);

    let mut session =
        ConversationSession::connect(config)?.with_system_prompt(SystemPrompt::Teacher.text())?;

    for question in QUESTIONS {
        println!("User: {question}");
        let response = session.send_user(question).await?.into_response().await?;
        println!("Assistant: {}\n", response.content());
    }

    info!(
        "Transcript {} holds {} messages",
        session.transcript().id,
        session.transcript().len()
    );

    Ok(())
}
