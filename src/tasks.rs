use crate::types::AppState;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Task that periodically drops conversations whose calls have gone quiet.  Runs for the life of
/// the server.
pub async fn evict_stale_conversations(app_state: Arc<AppState>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = app_state.conversations.evict_expired(Instant::now());
        if evicted > 0 {
            info!(evicted, remaining = app_state.conversations.len(), "evicted idle conversations");
        } else {
            debug!(active = app_state.conversations.len(), "no idle conversations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionClient;
    use crate::conversation_state::ConversationStore;

    #[tokio::test]
    async fn sweeps_idle_conversations() {
        let app_state = Arc::new(AppState {
            completion: CompletionClient::new(
                reqwest::Client::new(),
                "http://127.0.0.1:9/unused".to_string(),
                "test-key".to_string(),
                "test-model".to_string(),
            ),
            conversations: ConversationStore::new(Duration::ZERO, 10),
            public_base_url: None,
            voice: None,
        });
        app_state.conversations.get_or_create("CA1");
        app_state.conversations.get_or_create("CA2");
        assert_eq!(app_state.conversations.len(), 2);

        let sweeper = tokio::spawn(evict_stale_conversations(
            app_state.clone(),
            Duration::from_millis(10),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();

        assert_eq!(app_state.conversations.len(), 0);
    }
}
