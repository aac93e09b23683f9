use crate::consts::{COMPLETION_MAX_TOKENS, COMPLETION_TEMPERATURE};
use crate::error::AppError;
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload, OpenAIStreamResponse};

use futures_util::stream::{Stream, StreamExt};
use hyper::body::Bytes;
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, error, trace, warn};

/// Client for an OpenAI-compatible chat completion endpoint.
#[derive(Clone)]
pub struct CompletionClient {
    http_client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl CompletionClient {
    pub fn new(http_client: reqwest::Client, url: String, api_key: String, model: String) -> Self {
        Self {
            http_client,
            url,
            api_key,
            model,
        }
    }

    async fn post(&self, payload: &OpenAIPayload) -> Result<reqwest::Response, AppError> {
        let key = self.api_key.as_str();
        let resp = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send request to completion api");
                AppError::Http(e)
            })?;
        if !resp.status().is_success() {
            let err = AppError::from_response("completion api", resp).await;
            error!(error=%err, "completion api rejected request");
            return Err(err);
        }
        Ok(resp)
    }

    /// Single, non-streamed completion.
    pub async fn chat(&self, messages: Vec<OpenAIMessage>) -> Result<String, AppError> {
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages,
            ..Default::default()
        };
        let resp = self.post(&payload).await?;
        let resp = resp.json::<OpenAIBatchResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize completion response");
            AppError::Http(e)
        })?;
        resp.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(AppError::UnexpectedResponse("completion response had no choices"))
    }

    /// Streamed completion; fragments are pulled with [`CompletionStream::next_fragment`].
    pub async fn stream_chat(
        &self,
        messages: Vec<OpenAIMessage>,
    ) -> Result<CompletionStream, AppError> {
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages,
            temperature: Some(COMPLETION_TEMPERATURE),
            max_tokens: Some(COMPLETION_MAX_TOKENS),
            stream: Some(true),
        };
        debug!(model=%payload.model, messages=payload.messages.len(), "streaming completion");
        let resp = self.post(&payload).await?;
        Ok(CompletionStream::new(resp.bytes_stream()))
    }
}

/// Splits a byte stream into lines, holding back a partial line until its newline arrives.
#[derive(Default, Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = decode_line(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever trailed the last newline when the body ended.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        decode_line(&raw).filter(|line| !line.is_empty())
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    match std::str::from_utf8(raw) {
        Ok(line) => Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()),
        Err(e) => {
            warn!(error=%e, "skipping non utf-8 line in completion stream");
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StreamLine {
    Fragment(String),
    Done,
    Skip,
}

/// Interpret one line of a streamed completion body.
pub fn parse_stream_line(line: &str) -> StreamLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return StreamLine::Skip;
    }
    if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
        return StreamLine::Skip;
    }
    let data = line
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(line);
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamLine::Fragment)
            .unwrap_or(StreamLine::Skip),
        Err(e) => {
            warn!(line=%data, error=%e, "skipping malformed completion fragment");
            StreamLine::Skip
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Content fragments of a streamed completion, in arrival order.
pub struct CompletionStream {
    body: ByteStream,
    decoder: SseDecoder,
    lines: VecDeque<String>,
    exhausted: bool,
}

impl CompletionStream {
    pub fn new<S>(body: S) -> Self
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    {
        Self {
            body: Box::pin(body),
            decoder: SseDecoder::default(),
            lines: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next non-empty content fragment.  `None` once the sentinel or the end of the body has
    /// been reached; a transport error is returned once and ends the stream.
    pub async fn next_fragment(&mut self) -> Option<Result<String, AppError>> {
        loop {
            while let Some(line) = self.lines.pop_front() {
                trace!(line=%line, "completion stream line");
                match parse_stream_line(&line) {
                    StreamLine::Fragment(fragment) => return Some(Ok(fragment)),
                    StreamLine::Done => {
                        self.lines.clear();
                        self.exhausted = true;
                        return None;
                    }
                    StreamLine::Skip => {}
                }
            }
            if self.exhausted {
                return None;
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    let lines = self.decoder.feed(&chunk);
                    self.lines.extend(lines);
                }
                Some(Err(e)) => {
                    error!(error=%e, "failed to read bytes from completion stream");
                    self.exhausted = true;
                    return Some(Err(AppError::Http(e)));
                }
                None => {
                    self.exhausted = true;
                    self.lines.extend(self.decoder.finish());
                }
            }
        }
    }

    /// The same fragments as a [`Stream`].
    pub fn into_fragments(self) -> impl Stream<Item = Result<String, AppError>> {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream
                .next_fragment()
                .await
                .map(|fragment| (fragment, stream))
        })
    }
}
