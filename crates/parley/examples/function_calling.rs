use std::io::{BufRead, Write};

use anyhow::Result;
use clap::Parser;
use log::info;

use parley::{
    API_KEY_ENV, Config, ConversationSession, DEFAULT_BASE_URL, DEFAULT_MODEL, MessageRole,
    OpenAIClient, RequestOptions, ToolCall, ToolChoice, ToolExecutor,
};

fn confirm(call: &ToolCall) -> Result<bool> {
    print!("Run {}({})? [y/N] ", call.name(), call.function.arguments);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Let the model call local tools", long_about = None)]
struct Args {
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = "Calculate the 10th Fibonacci number.")]
    message: String,

    /// Drive the tool loop automatically; every tool runs without asking
    #[arg(long)]
    auto: bool,

    /// Run tools that need approval without asking
    #[arg(long)]
    yes: bool,

    /// Maximum number of tool rounds
    #[arg(long, default_value = "10")]
    max_turns: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::new("zai", &args.model)
        .with_base_url(&args.base_url)
        .with_api_key(&args.api_key);

    let executor = ToolExecutor::with_builtin_tools();
    for tool in executor.get_all_tools() {
        info!("Registered tool: {}", tool.name());
    }

    let mut session = ConversationSession::connect(config)?
        .with_max_turns(args.max_turns)
        .with_options(
            RequestOptions::new()
                .with_tools(executor.get_all_tools())
                .with_tool_choice(ToolChoice::Auto),
        );

    if args.auto {
        session.append(parley::Message::user(&args.message))?;
        let answer = session.run(&executor).await?;
        println!("Assistant: {}", answer.content());
        return Ok(());
    }

    // Phase one: the model decides which tools to call.
    let first = session
        .send_user(&args.message)
        .await?
        .into_response()
        .await?;

    for call in &first.message.tool_calls {
        println!("Tool call: {}({})", call.name(), call.function.arguments);
    }

    let declined: Vec<&ToolCall> = first
        .message
        .tool_calls
        .iter()
        .filter(|call| !executor.is_tool_auto_approved(call.name()) && !args.yes)
        .filter(|call| !confirm(call).unwrap_or(false))
        .collect();

    let results = if declined.is_empty() {
        session.resolve_tool_calls(&first.message, &executor).await?
    } else {
        // Declined calls still need an answer before the session can resume.
        first
            .message
            .tool_calls
            .iter()
            .map(|call| {
                ConversationSession::<OpenAIClient>::tool_error_message(
                    call,
                    "not run, the user declined a tool call in this turn",
                )
            })
            .collect()
    };
    for result in &results {
        println!("Tool result: {}", result.text());
    }

    // Phase two: the model answers using the results.
    let answer = if results.is_empty() {
        first
    } else {
        session.continue_with(results).await?.into_response().await?
    };
    println!("Assistant: {}", answer.content());

    let tool_messages = session
        .transcript()
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .count();
    info!("Session {} with {tool_messages} tool result(s)", session.state());

    Ok(())
}
