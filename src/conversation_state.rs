use crate::completion::CompletionClient;
use crate::consts::{FAREWELL_KEYWORDS, HISTORY_WINDOW, SYSTEM_PROMPT};
use crate::error::AppError;
use crate::openai_types::OpenAIMessage;
use crate::utils::split_sentences;

use futures_util::pin_mut;
use futures_util::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a single provider callback means for the call, based only on its speech field.
#[derive(Debug, PartialEq, Eq)]
pub enum CallEvent {
    /// No `SpeechResult` at all: the call just connected or a gather timed out.
    FirstContact,
    /// `SpeechResult` was present but blank.
    Silence,
    Farewell,
    Turn(String),
}

impl CallEvent {
    pub fn classify(speech: Option<&str>) -> Self {
        match speech {
            None => CallEvent::FirstContact,
            Some(s) if s.trim().is_empty() => CallEvent::Silence,
            Some(s) if is_farewell(s) => CallEvent::Farewell,
            Some(s) => CallEvent::Turn(s.trim().to_string()),
        }
    }
}

pub fn is_farewell(utterance: &str) -> bool {
    let lower = utterance.to_lowercase();
    FAREWELL_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Result of one caller turn.  `sentences` were already recorded in the history; `failure`,
/// when set, is why the reply stopped short.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub sentences: Vec<String>,
    pub failure: Option<AppError>,
}

/// History of one call.  The system prompt is not stored; it leads every request instead.
#[derive(Debug)]
pub struct Conversation {
    pub call_sid: String,
    history: Vec<OpenAIMessage>,
    turns: usize,
}

impl Conversation {
    pub fn new(call_sid: String) -> Self {
        Self {
            call_sid,
            history: Vec::new(),
            turns: 0,
        }
    }

    pub fn history(&self) -> &[OpenAIMessage] {
        &self.history
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    /// System prompt followed by the trailing window of the history.
    pub fn prompt_window(&self) -> Vec<OpenAIMessage> {
        let start = self.history.len().saturating_sub(HISTORY_WINDOW);
        let mut messages = Vec::with_capacity(HISTORY_WINDOW + 1);
        messages.push(OpenAIMessage::system(SYSTEM_PROMPT));
        messages.extend_from_slice(&self.history[start..]);
        messages
    }

    /// Record the caller's utterance, stream the assistant's reply and record each completed
    /// sentence as it arrives.  A trailing partial sentence is kept only if the stream ended
    /// cleanly.
    pub async fn take_turn(&mut self, utterance: String, client: &CompletionClient) -> TurnOutcome {
        self.turns += 1;
        self.history.push(OpenAIMessage::user(utterance));
        match client.stream_chat(self.prompt_window()).await {
            Ok(stream) => self.record_reply(stream.into_fragments()).await,
            Err(e) => TurnOutcome {
                sentences: Vec::new(),
                failure: Some(e),
            },
        }
    }

    async fn record_reply<S>(&mut self, fragments: S) -> TurnOutcome
    where
        S: Stream<Item = Result<String, AppError>>,
    {
        let mut outcome = TurnOutcome::default();
        let sentences = split_sentences(fragments);
        pin_mut!(sentences);
        while let Some(sentence) = sentences.next().await {
            match sentence {
                Ok(sentence) => self.record_sentence(sentence, &mut outcome),
                Err(e) => {
                    outcome.failure = Some(e);
                    return outcome;
                }
            }
        }
        if outcome.sentences.is_empty() {
            outcome.failure = Some(AppError::EmptyCompletion);
        }
        outcome
    }

    fn record_sentence(&mut self, sentence: String, outcome: &mut TurnOutcome) {
        debug!(call_sid=%self.call_sid, sentence=%sentence, "assistant sentence");
        self.history.push(OpenAIMessage::assistant(sentence.clone()));
        outcome.sentences.push(sentence);
    }
}

struct StoreEntry {
    conversation: Arc<tokio::sync::Mutex<Conversation>>,
    last_seen: Instant,
}

/// Call identifier => conversation.  Each conversation sits behind its own async mutex so
/// overlapping callbacks for one call run one after the other.  Entries leave the store when
/// the call says goodbye, when they sit idle past the ttl, or when the store is full and they
/// are the least recently seen.
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, StoreEntry>>,
    ttl: Duration,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(ttl: Duration, max_conversations: usize) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            ttl,
            max_conversations: max_conversations.max(1),
        }
    }

    /// Fetch the conversation for `call_sid`, creating it if needed.  The flag is true when
    /// the conversation was created by this call.
    pub fn get_or_create(&self, call_sid: &str) -> (Arc<tokio::sync::Mutex<Conversation>>, bool) {
        let now = Instant::now();
        let mut conversations = self.conversations.lock();
        if let Some(entry) = conversations.get_mut(call_sid) {
            entry.last_seen = now;
            return (entry.conversation.clone(), false);
        }
        if conversations.len() >= self.max_conversations {
            evict_least_recent(&mut conversations);
        }
        let conversation = Arc::new(tokio::sync::Mutex::new(Conversation::new(
            call_sid.to_string(),
        )));
        conversations.insert(
            call_sid.to_string(),
            StoreEntry {
                conversation: conversation.clone(),
                last_seen: now,
            },
        );
        info!(call_sid=%call_sid, "new conversation");
        (conversation, true)
    }

    #[cfg(test)]
    pub fn get(&self, call_sid: &str) -> Option<Arc<tokio::sync::Mutex<Conversation>>> {
        self.conversations
            .lock()
            .get(call_sid)
            .map(|entry| entry.conversation.clone())
    }

    pub fn remove(&self, call_sid: &str) -> bool {
        let removed = self.conversations.lock().remove(call_sid).is_some();
        if removed {
            debug!(call_sid=%call_sid, "conversation ended");
        }
        removed
    }

    /// Drop every conversation not seen within the ttl of `now`.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut conversations = self.conversations.lock();
        let before = conversations.len();
        conversations.retain(|_, entry| now.saturating_duration_since(entry.last_seen) < ttl);
        before - conversations.len()
    }

    pub fn len(&self) -> usize {
        self.conversations.lock().len()
    }
}

fn evict_least_recent(conversations: &mut HashMap<String, StoreEntry>) {
    let oldest = conversations
        .iter()
        .min_by_key(|(_, entry)| entry.last_seen)
        .map(|(sid, _)| sid.clone());
    if let Some(sid) = oldest {
        warn!(call_sid=%sid, "conversation store full; evicting least recent call");
        conversations.remove(&sid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai_types::Role;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(fragments: &[&str]) -> String {
        let mut body = String::new();
        for fragment in fragments {
            let chunk = serde_json::json!({"choices": [{"delta": {"content": fragment}}]});
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn client_for(server: &MockServer) -> CompletionClient {
        CompletionClient::new(
            reqwest::Client::new(),
            format!("{}/v1/chat/completions", server.uri()),
            "key".to_string(),
            "model".to_string(),
        )
    }

    #[test]
    fn classify_distinguishes_absent_and_blank_speech() {
        assert_eq!(CallEvent::classify(None), CallEvent::FirstContact);
        assert_eq!(CallEvent::classify(Some("")), CallEvent::Silence);
        assert_eq!(CallEvent::classify(Some("  ")), CallEvent::Silence);
        assert_eq!(
            CallEvent::classify(Some(" I am from Brazil ")),
            CallEvent::Turn("I am from Brazil".to_string())
        );
    }

    #[test]
    fn farewell_keywords_match_any_case() {
        for utterance in ["Thank you", "THANKS a lot", "ok thank u", "Goodbye", "thankful"] {
            assert_eq!(CallEvent::classify(Some(utterance)), CallEvent::Farewell, "{utterance}");
        }
        assert_eq!(
            CallEvent::classify(Some("I want to study in Canada")),
            CallEvent::Turn("I want to study in Canada".to_string())
        );
    }

    #[test]
    fn prompt_window_keeps_system_prompt_and_last_ten() {
        let mut conversation = Conversation::new("CA1".to_string());
        for i in 0..12 {
            conversation.history.push(OpenAIMessage::user(format!("m{i}")));
        }
        let window = conversation.prompt_window();
        assert_eq!(window.len(), HISTORY_WINDOW + 1);
        assert_eq!(window[0].role, Role::System);
        assert_eq!(window[1].content, "m2");
        assert_eq!(window[HISTORY_WINDOW].content, "m11");

        let short = Conversation::new("CA2".to_string()).prompt_window();
        assert_eq!(short.len(), 1);
    }

    #[test]
    fn store_creates_once_and_removes() {
        let store = ConversationStore::new(Duration::from_secs(60), 10);
        let (_, created) = store.get_or_create("CA1");
        assert!(created);
        let (_, created) = store.get_or_create("CA1");
        assert!(!created);
        assert_eq!(store.len(), 1);
        assert!(store.remove("CA1"));
        assert!(!store.remove("CA1"));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn store_evicts_idle_conversations() {
        let store = ConversationStore::new(Duration::from_secs(60), 10);
        store.get_or_create("CA1");
        store.get_or_create("CA2");
        assert_eq!(store.evict_expired(Instant::now()), 0);
        assert_eq!(store.evict_expired(Instant::now() + Duration::from_secs(61)), 2);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn store_is_bounded_by_count() {
        let store = ConversationStore::new(Duration::from_secs(60), 2);
        store.get_or_create("CA1");
        std::thread::sleep(Duration::from_millis(2));
        store.get_or_create("CA2");
        std::thread::sleep(Duration::from_millis(2));
        store.get_or_create("CA3");
        assert_eq!(store.len(), 2);
        assert!(store.get("CA1").is_none());
        assert!(store.get("CA2").is_some());
        assert!(store.get("CA3").is_some());
    }

    #[tokio::test]
    async fn history_interleaves_turns_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse(&["Noted.", " Why", " are you travelling?"]), "text/event-stream"),
            )
            .expect(2)
            .mount(&server)
            .await;
        let client = client_for(&server);

        let mut conversation = Conversation::new("CA9".to_string());
        let first = conversation.take_turn("I am from Kenya".to_string(), &client).await;
        assert!(first.failure.is_none());
        assert_eq!(first.sentences, vec!["Noted.", "Why are you travelling?"]);
        let second = conversation.take_turn("For work".to_string(), &client).await;
        assert!(second.failure.is_none());

        let roles: Vec<Role> = conversation.history().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::User,
                Role::Assistant,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::Assistant,
            ]
        );
        assert_eq!(conversation.history()[3].content, "For work");
        assert_eq!(conversation.turns(), 2);
    }

    #[tokio::test]
    async fn failed_completion_keeps_user_message_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut conversation = Conversation::new("CA5".to_string());
        let outcome = conversation
            .take_turn("Hello".to_string(), &client_for(&server))
            .await;
        assert!(outcome.sentences.is_empty());
        assert!(matches!(outcome.failure, Some(AppError::Upstream { status: 500, .. })));
        assert_eq!(conversation.history().len(), 1);
        assert_eq!(conversation.history()[0].role, Role::User);
    }

    #[tokio::test]
    async fn transport_error_keeps_sentences_already_spoken() {
        let mut conversation = Conversation::new("CA7".to_string());
        conversation.history.push(OpenAIMessage::user("I am from Chile"));
        let fragments = futures_util::stream::iter(vec![
            Ok("Thanks.".to_string()),
            Ok(" What is the".to_string()),
            Err(AppError::UnexpectedResponse("connection reset")),
        ]);
        let outcome = conversation.record_reply(fragments).await;

        assert_eq!(outcome.sentences, vec!["Thanks."]);
        assert!(matches!(
            outcome.failure,
            Some(AppError::UnexpectedResponse("connection reset"))
        ));
        let history = conversation.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "Thanks.");
    }

    #[tokio::test]
    async fn empty_completion_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse(&[]), "text/event-stream"))
            .mount(&server)
            .await;

        let mut conversation = Conversation::new("CA6".to_string());
        let outcome = conversation
            .take_turn("Hello".to_string(), &client_for(&server))
            .await;
        assert!(matches!(outcome.failure, Some(AppError::EmptyCompletion)));
    }
}
