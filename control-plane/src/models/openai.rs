//! OpenAI-compatible request and response bodies served by the gateway.

use serde::{Deserialize, Serialize};

use fleet_common::{
    ChatCompletionChunk, ChatCompletionRequest, ChatMessage, EmbeddingsRequest,
    EmbeddingsResponse,
};

/// OpenAI-compatible chat completion request.
///
/// Required fields default to empty so that a missing field is reported as a
/// validation error rather than a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Whether to stream the response.
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl OpenAiChatRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn into_internal(self) -> ChatCompletionRequest {
        ChatCompletionRequest {
            stream: self.is_stream(),
            model: self.model.unwrap_or_default(),
            messages: self
                .messages
                .into_iter()
                .map(|m| ChatMessage::new(m.role, m.content.unwrap_or_default()))
                .collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Turn a node chunk into a complete, non-streamed `chat.completion` body.
pub fn into_completion(mut chunk: ChatCompletionChunk) -> ChatCompletionChunk {
    chunk.object = "chat.completion".to_string();
    for choice in &mut chunk.choices {
        if choice.message.is_none() {
            choice.message = choice.delta.take();
        }
        choice.delta = None;
    }
    chunk
}

/// `input` may be one string or a list of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingsInput {
    Single(String),
    Batch(Vec<String>),
}

impl Default for EmbeddingsInput {
    fn default() -> Self {
        EmbeddingsInput::Batch(Vec::new())
    }
}

impl EmbeddingsInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            EmbeddingsInput::Single(text) => vec![text],
            EmbeddingsInput::Batch(texts) => texts,
        }
    }
}

/// OpenAI-compatible embeddings request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiEmbeddingsRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input: EmbeddingsInput,
}

impl OpenAiEmbeddingsRequest {
    pub fn into_internal(self) -> EmbeddingsRequest {
        EmbeddingsRequest {
            model: self.model.unwrap_or_default(),
            input: self.input.into_vec(),
        }
    }
}

/// OpenAI-compatible embeddings response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiEmbeddingsResponse {
    pub object: String,
    pub data: Vec<OpenAiEmbedding>,
    pub model: String,
    pub usage: OpenAiEmbeddingsUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiEmbedding {
    pub object: String,
    pub embedding: Vec<f64>,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiEmbeddingsUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

impl From<EmbeddingsResponse> for OpenAiEmbeddingsResponse {
    fn from(response: EmbeddingsResponse) -> Self {
        Self {
            object: "list".to_string(),
            data: response
                .embeddings
                .into_iter()
                .map(|e| OpenAiEmbedding {
                    object: "embedding".to_string(),
                    embedding: e.values.into_iter().map(f64::from).collect(),
                    index: e.index,
                })
                .collect(),
            model: response.model,
            usage: OpenAiEmbeddingsUsage {
                prompt_tokens: response.usage.prompt_tokens,
                total_tokens: response.usage.total_tokens,
            },
        }
    }
}
