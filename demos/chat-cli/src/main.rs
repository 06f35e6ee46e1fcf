//! Example terminal client for a streaming agent endpoint.
//!
//! Run with: cargo run -p chat-cli-demo -- <url> <prompt>
//!
//! Streams the assistant's reply to stdout as it arrives and prints the
//! final application state when the run finishes.

use std::io::Write;

use agent_stream_client::{Agent, AgentConfig, RunAgentParams};
use agent_stream_core::{Message, Role};
use anyhow::{Context, Result};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().context("usage: chat-cli-demo <url> <prompt>")?;
    let prompt = args.next().context("usage: chat-cli-demo <url> <prompt>")?;

    let mut config = AgentConfig::new(url);
    let mut message = Message::new("user-1", Role::User);
    message.content = prompt;
    config.initial_messages = vec![message];
    config.initial_state = serde_json::json!({});

    let agent = Agent::new(config);
    tracing::info!(thread_id = %agent.thread_id(), "starting run");

    let mut printed = 0usize;
    let mut stream = agent.run_agent(Some(RunAgentParams::default()));
    while let Some(snapshot) = stream.next().await {
        let snapshot = snapshot?;
        let Some(messages) = &snapshot.messages else {
            continue;
        };
        let Some(reply) = messages.iter().rev().find(|m| m.role == Role::Assistant) else {
            continue;
        };
        if reply.content.len() > printed {
            print!("{}", &reply.content[printed..]);
            std::io::stdout().flush()?;
            printed = reply.content.len();
        }
    }
    println!();

    tracing::info!(state = %agent.state(), "run finished");
    Ok(())
}
