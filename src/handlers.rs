use crate::consts::{
    APOLOGY_LINE, CHAT_SYSTEM_PROMPT, FAREWELL_LINE, GREETING, INBOUND_AGENT_PATH,
    NO_SPEECH_LINE, UNKNOWN_CALL_LINE,
};
use crate::conversation_state::CallEvent;
use crate::openai_types::OpenAIMessage;
use crate::twilio_types::{
    GatherAction, HangupAction, RedirectAction, Response, ResponseAction, SayAction,
    TwilioVoicePayload,
};
use crate::types::AppState;

use axum::{
    body::Bytes,
    extract::{Host, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/chat", post(chat))
        .route(INBOUND_AGENT_PATH, post(inbound_agent))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "AI Call Agent Ready" }))
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "message": "Server is running" }))
}

#[derive(Deserialize)]
pub struct ChatForm {
    pub message: String,
}

/// One-shot relay to the completion api, outside of any call.
pub async fn chat(
    State(app_state): State<Arc<AppState>>,
    Form(form): Form<ChatForm>,
) -> impl IntoResponse {
    let messages = vec![
        OpenAIMessage::system(CHAT_SYSTEM_PROMPT),
        OpenAIMessage::user(form.message),
    ];
    match app_state.completion.chat(messages).await {
        Ok(reply) => (StatusCode::OK, Json(json!({ "reply": reply }))),
        Err(e) => {
            error!(error=%e, "chat relay failed");
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() })))
        }
    }
}

/// Twilio voice webhook and `<Gather>` action.  Always answers 200 with TwiML, whatever went
/// wrong upstream.
pub async fn inbound_agent(
    host: Option<Host>,
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    trace!(body=%String::from_utf8_lossy(&body), "inbound agent request body");
    let payload = serde_urlencoded::from_bytes::<TwilioVoicePayload>(&body).unwrap_or_else(|e| {
        warn!(error=%e, "failed to deserialize Twilio voice payload");
        TwilioVoicePayload::default()
    });
    let callback_url = app_state.callback_url(host.as_ref().map(|Host(h)| h.as_str()));
    let response = respond_to_call(&app_state, payload, &callback_url).await;

    let twiml = response.render();
    trace!("twiml: '{}'", twiml);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
    (StatusCode::OK, headers, twiml)
}

async fn respond_to_call(
    app_state: &AppState,
    payload: TwilioVoicePayload,
    callback_url: &str,
) -> Response {
    let voice = app_state.voice();
    let say = |text: &str| SayAction::new(text, voice);
    let prompt = |text: &str| ResponseAction::Gather(GatherAction::speech(callback_url, say(text)));
    let redirect = || ResponseAction::Redirect(RedirectAction::post(callback_url));

    let mut response = Response::new();
    let call_sid = match payload.call_sid.filter(|sid| !sid.is_empty()) {
        Some(call_sid) => call_sid,
        None => {
            warn!("voice webhook without CallSid; hanging up");
            response
                .push(ResponseAction::Say(say(UNKNOWN_CALL_LINE)))
                .push(ResponseAction::Hangup(HangupAction::default()));
            return response;
        }
    };
    debug!(
        call_sid=%call_sid,
        account_sid=?payload.account_sid,
        call_status=?payload.call_status,
        from=?payload.from,
        to=?payload.to,
        speech=?payload.speech_result,
        confidence=?payload.confidence,
        "voice webhook"
    );

    match CallEvent::classify(payload.speech_result.as_deref()) {
        CallEvent::FirstContact => {
            app_state.conversations.get_or_create(&call_sid);
            response.push(prompt(GREETING)).push(redirect());
        }
        CallEvent::Farewell => {
            info!(call_sid=%call_sid, "farewell detected; hanging up");
            app_state.conversations.remove(&call_sid);
            response
                .push(ResponseAction::Say(say(FAREWELL_LINE)))
                .push(ResponseAction::Hangup(HangupAction::default()));
        }
        CallEvent::Silence => {
            app_state.conversations.get_or_create(&call_sid);
            response.push(prompt(NO_SPEECH_LINE)).push(redirect());
        }
        CallEvent::Turn(utterance) => {
            let (conversation, created) = app_state.conversations.get_or_create(&call_sid);
            if created {
                response.push(ResponseAction::Say(say(GREETING)));
            }
            let outcome = {
                let mut conversation = conversation.lock().await;
                let outcome = conversation
                    .take_turn(utterance, &app_state.completion)
                    .await;
                debug!(
                    call_sid=%call_sid,
                    turn=conversation.turns(),
                    sentences=outcome.sentences.len(),
                    "turn complete"
                );
                outcome
            };
            for sentence in &outcome.sentences {
                response.push(prompt(sentence.as_str()));
            }
            if let Some(e) = outcome.failure {
                error!(call_sid=%call_sid, error=%e, "completion failed; apologizing");
                response.push(prompt(APOLOGY_LINE));
            }
            response.push(redirect());
        }
    }
    response
}
