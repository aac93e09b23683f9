use crate::completion::CompletionClient;
use crate::config::ServeArgs;
use crate::consts::INBOUND_AGENT_PATH;
use crate::conversation_state::ConversationStore;

use std::time::Duration;

pub struct AppState {
    pub completion: CompletionClient,
    // call sid => conversation
    pub conversations: ConversationStore,
    /// Absolute base used for Twilio callbacks; when unset the request's Host header is used.
    pub public_base_url: Option<String>,
    /// Optional `voice` attribute for every `<Say>`.
    pub voice: Option<String>,
}

impl AppState {
    pub fn new(args: &ServeArgs, http_client: reqwest::Client) -> Self {
        let completion = CompletionClient::new(
            http_client,
            args.completion.url.clone(),
            args.completion.api_key.clone(),
            args.completion.model.clone(),
        );
        let conversations = ConversationStore::new(
            Duration::from_secs(args.conversation_ttl_secs),
            args.max_conversations,
        );
        Self {
            completion,
            conversations,
            public_base_url: args.public_base_url.clone(),
            voice: args.voice.clone(),
        }
    }

    /// Where Twilio should post the next gather result or redirect.
    pub fn callback_url(&self, host: Option<&str>) -> String {
        match (&self.public_base_url, host) {
            (Some(base), _) => format!("{}{INBOUND_AGENT_PATH}", base.trim_end_matches('/')),
            (None, Some(host)) => format!("https://{host}{INBOUND_AGENT_PATH}"),
            (None, None) => INBOUND_AGENT_PATH.to_string(),
        }
    }

    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation_state::ConversationStore;

    fn state(public_base_url: Option<&str>) -> AppState {
        AppState {
            completion: CompletionClient::new(
                reqwest::Client::new(),
                "http://127.0.0.1:9/unused".to_string(),
                "test-key".to_string(),
                "test-model".to_string(),
            ),
            conversations: ConversationStore::new(Duration::from_secs(60), 10),
            public_base_url: public_base_url.map(str::to_string),
            voice: None,
        }
    }

    #[test]
    fn callback_url_prefers_public_base() {
        let app_state = state(Some("https://x.example.com/"));
        assert_eq!(
            app_state.callback_url(Some("ignored.example.com")),
            "https://x.example.com/inbound-agent"
        );
        assert_eq!(app_state.callback_url(None), "https://x.example.com/inbound-agent");
    }

    #[test]
    fn callback_url_falls_back_to_host_then_path() {
        let app_state = state(None);
        assert_eq!(
            app_state.callback_url(Some("agent.example.com")),
            "https://agent.example.com/inbound-agent"
        );
        assert_eq!(app_state.callback_url(None), "/inbound-agent");
    }
}
