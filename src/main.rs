mod completion;
mod config;
mod conversation_state;
mod error;
mod handlers;
mod openai_types;
mod tasks;
mod twilio_api;
mod twilio_types;
mod types;
mod utils;

use crate::config::{Cli, Command, PurchaseArgs, ServeArgs};
use crate::consts::MAX_EVICTION_INTERVAL_SECS;
use crate::error::AppError;
use crate::twilio_api::TwilioClient;
use crate::types::AppState;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const GREETING: &str = "Hello! Welcome to the Visa Assistant. How can I help you today?";
    pub const FAREWELL_LINE: &str = "You're welcome! Goodbye!";
    pub const APOLOGY_LINE: &str =
        "I'm sorry, I'm having trouble connecting. Could you please try again?";
    pub const NO_SPEECH_LINE: &str = "Sorry, I didn't catch that. Could you please repeat?";
    pub const UNKNOWN_CALL_LINE: &str = "Sorry, we could not identify this call. Goodbye.";
    pub const FAREWELL_KEYWORDS: &[&str] = &["thank", "thanks", "thank you", "thank u", "goodbye"];
    pub const SENTENCE_ENDINGS: &[char] = &['.', '!', '?'];
    /// Trailing history messages sent with each completion request.
    pub const HISTORY_WINDOW: usize = 10;
    pub const INBOUND_AGENT_PATH: &str = "/inbound-agent";
    pub const GATHER_SPEECH_TIMEOUT: &str = "2";
    pub const GATHER_SPEECH_MODEL: &str = "googlev2_long";
    pub const GATHER_HINTS: &str = "Listen carefully for names.";
    pub const COMPLETION_TEMPERATURE: f32 = 0.2;
    pub const COMPLETION_MAX_TOKENS: u32 = 150;
    pub const MAX_EVICTION_INTERVAL_SECS: u64 = 60;
    pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
    pub const SYSTEM_PROMPT: &str = "You are a visa assistant.
Your goal is to determine the most suitable visa type for the user.
You must follow these rules:

1. Ask a maximum of three to four questions (about nationality, requesting country, purpose of visit, and duration/occupation if relevant).
2. Keep questions short, clear, and conversational.
3. After the third question, based on all collected answers, suggest the most appropriate visa type and category, like H-1B or F-1/J-1.
4. If you already have enough information before three or four questions, you can suggest the visa earlier.
5. Do not ask unnecessary follow-up questions after giving the visa recommendation.
Do not explain; just ask the questions you need to find the visa type.";
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // a .env file is optional; real deployments set the environment directly
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("tower_http", tracing_subscriber::filter::LevelFilter::DEBUG),
            (
                "twilio_voice_agent",
                tracing_subscriber::filter::LevelFilter::DEBUG,
            ),
        ]))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::PurchaseNumber(args) => purchase_number(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<(), AppError> {
    let http_client = reqwest::Client::new();
    let app_state = Arc::new(AppState::new(&args, http_client));
    info!(
        bind=%args.bind,
        model=%args.completion.model,
        phone_number=?args.phone_number,
        "starting voice agent"
    );

    let sweep_every = Duration::from_secs(
        args.conversation_ttl_secs
            .clamp(1, MAX_EVICTION_INTERVAL_SECS),
    );
    tokio::spawn(tasks::evict_stale_conversations(
        app_state.clone(),
        sweep_every,
    ));

    let app = handlers::router(app_state);
    axum::Server::try_bind(&args.bind)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn purchase_number(args: PurchaseArgs) -> Result<(), AppError> {
    let client = TwilioClient::new(
        reqwest::Client::new(),
        args.twilio.api_base,
        args.twilio.account_sid,
        args.twilio.auth_token,
    );
    let number = client
        .purchase_number(&args.country, args.voice_url.as_deref())
        .await?;
    info!(number=%number, "purchased number");
    println!("{number}");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error=%e, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
