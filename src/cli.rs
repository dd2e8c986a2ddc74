use std::io::{self, Write};
use std::sync::Arc;

use tokio::task;
use tracing::error;

use crate::services::agent::OpenRouterAgent;
use crate::services::settings;

/// Terminal read-eval-print loop against the single-agent collaborator.
/// Stdin reads and agent calls both block, so they run on the blocking
/// pool and keep the runtime free.
pub async fn run() {
    println!("OpenRouter Agent");
    println!("Type 'quit', 'exit', or 'bye' to exit");
    println!("{}", "-".repeat(50));

    let agent_settings = settings::current();
    let agent = match task::spawn_blocking(move || OpenRouterAgent::from_settings(&agent_settings))
        .await
    {
        Ok(Ok(agent)) => Arc::new(agent),
        Ok(Err(err)) => {
            println!("Error initializing agent: {err}");
            println!("Set your OpenRouter API key via OPENROUTER_API_KEY or /api/config.");
            return;
        }
        Err(join_err) => {
            error!("[CLI] agent init aborted: {}", join_err);
            return;
        }
    };
    println!("Agent initialized successfully!");
    println!("Using model: {}", settings::current().model);
    println!("{}", "-".repeat(50));

    loop {
        let line = match read_line().await {
            Some(line) => line,
            None => break,
        };
        let input = line.trim().to_string();

        if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "bye") {
            println!("Goodbye!");
            break;
        }
        if input.is_empty() {
            println!("Please enter a question or command.");
            continue;
        }

        println!("Agent: Thinking...");
        let agent = Arc::clone(&agent);
        let result = task::spawn_blocking(move || agent.run(&input, None)).await;
        match result {
            Ok(Ok(response)) => println!("Agent: {response}"),
            Ok(Err(err)) => println!("Error: {err}"),
            Err(join_err) => {
                error!("[CLI] agent call aborted: {}", join_err);
                println!("Error: the agent crashed, please try again.");
            }
        }
    }
}

async fn read_line() -> Option<String> {
    task::spawn_blocking(|| {
        print!("\nUser: ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}
