use std::io::Write;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use log::info;

use parley::{
    API_KEY_ENV, Config, ConversationSession, DEFAULT_BASE_URL, DEFAULT_MODEL, Reply,
    RequestOptions, SystemPrompt,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print an answer as it streams in", long_about = None)]
struct Args {
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = "Write a short poem about the borrow checker.")]
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::new("zai", &args.model)
        .with_base_url(&args.base_url)
        .with_api_key(&args.api_key);

    let mut session = ConversationSession::connect(config)?
        .with_system_prompt(SystemPrompt::CodingAssistant.text())?
        .with_options(RequestOptions::new().with_streaming(true));

    let start_time = Instant::now();
    let Reply::Streaming(mut stream) = session.send_user(&args.message).await? else {
        anyhow::bail!("expected a streamed reply");
    };

    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        if let Some(content) = chunk?.delta_content {
            print!("{content}");
            stdout.flush()?;
        }
    }
    println!();
    drop(stream);

    info!("Session state: {}", session.state());
    info!("Total request time: {}ms", start_time.elapsed().as_millis());

    Ok(())
}
