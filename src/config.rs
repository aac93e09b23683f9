use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;

pub const DEFAULT_COMPLETION_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_COMPLETION_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Every option may also be supplied through the environment or a `.env` file.
#[derive(Parser, Debug)]
#[command(name = "twilio-voice-agent", version, about = "Twilio speech IVR backed by an LLM")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the inbound call webhook server
    Serve(ServeArgs),
    /// Buy the first available local number in a country and print it
    PurchaseNumber(PurchaseArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:9030")]
    pub bind: SocketAddr,
    /// Public base URL Twilio reaches this server on, e.g. https://agent.example.com
    #[arg(long, env = "PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,
    /// Number callers dial; only logged
    #[arg(long, env = "TWILIO_PHONE_NUMBER")]
    pub phone_number: Option<String>,
    /// Voice for <Say>, e.g. Polly.Joanna
    #[arg(long, env = "TWILIO_VOICE")]
    pub voice: Option<String>,
    /// Seconds a call may stay idle before its history is dropped
    #[arg(long, env = "CONVERSATION_TTL_SECS", default_value_t = 3600)]
    pub conversation_ttl_secs: u64,
    #[arg(long, env = "MAX_CONVERSATIONS", default_value_t = 10_000)]
    pub max_conversations: usize,
    #[command(flatten)]
    pub completion: CompletionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionArgs {
    #[arg(long = "completion-api-key", env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: String,
    #[arg(long = "completion-url", env = "COMPLETION_API_URL", default_value = DEFAULT_COMPLETION_URL)]
    pub url: String,
    #[arg(long = "completion-model", env = "COMPLETION_MODEL", default_value = DEFAULT_COMPLETION_MODEL)]
    pub model: String,
}

#[derive(Args, Debug, Clone)]
pub struct PurchaseArgs {
    /// ISO country code, e.g. US, IN, GB
    #[arg(default_value = "US")]
    pub country: String,
    /// Voice webhook to attach to the new number
    #[arg(long, env = "TWILIO_VOICE_URL")]
    pub voice_url: Option<String>,
    #[command(flatten)]
    pub twilio: TwilioArgs,
}

#[derive(Args, Debug, Clone)]
pub struct TwilioArgs {
    #[arg(long, env = "TWILIO_ACCOUNT_SID")]
    pub account_sid: String,
    #[arg(long, env = "TWILIO_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: String,
    #[arg(long = "twilio-api-base", env = "TWILIO_API_BASE", default_value = DEFAULT_TWILIO_API_BASE)]
    pub api_base: String,
}
