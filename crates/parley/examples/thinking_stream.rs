use std::io::Write;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use log::{info, warn};

use parley::{
    API_KEY_ENV, Config, ConversationSession, DEFAULT_BASE_URL, DEFAULT_MODEL, PhaseTracker,
    Reply, RequestOptions, StreamPhase, ThinkingMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream the model's reasoning, then its answer", long_about = None)]
struct Args {
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(
        long,
        default_value = "A bat and a ball cost $1.10. The bat costs $1.00 more than the ball. How much is the ball?"
    )]
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::new("zai", &args.model)
        .with_base_url(&args.base_url)
        .with_api_key(&args.api_key);

    let mut session = ConversationSession::connect(config)?.with_options(
        RequestOptions::new()
            .with_streaming(true)
            .with_thinking(ThinkingMode::Enabled),
    );

    let Reply::Streaming(mut stream) = session.send_user(&args.message).await? else {
        anyhow::bail!("expected a streamed reply");
    };

    let mut tracker = PhaseTracker::new();
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match tracker.observe(&chunk) {
            Some(StreamPhase::Reasoning) => println!("--- Reasoning ---"),
            Some(StreamPhase::Answer) => println!("\n--- Response ---"),
            _ => {}
        }

        match tracker.phase() {
            StreamPhase::Reasoning => {
                if let Some(reasoning) = &chunk.delta_reasoning_content {
                    print!("{reasoning}");
                }
            }
            StreamPhase::Answer => {
                if let Some(content) = &chunk.delta_content {
                    print!("{content}");
                }
            }
            StreamPhase::Waiting => {}
        }
        stdout.flush()?;
    }
    println!();

    if tracker.late_reasoning() > 0 {
        warn!(
            "{} reasoning fragment(s) arrived after the answer started",
            tracker.late_reasoning()
        );
    }
    info!(
        "{} chars of reasoning, {} chars of answer",
        stream.reasoning().len(),
        stream.content().len()
    );

    Ok(())
}
