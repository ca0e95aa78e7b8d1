//! Response bodies a node agent would send, for stubbing agents over HTTP.

use fleet_common::{ChatCompletionChunk, Embedding, EmbeddingsResponse, EmbeddingsUsage, STREAM_DONE};

/// A `text/event-stream` body with one delta chunk per entry and a `[DONE]`
/// terminator.
pub fn chat_stream_body(model: &str, contents: &[&str]) -> String {
    let mut body = String::new();
    for content in contents {
        let chunk = ChatCompletionChunk::delta(model, *content);
        body.push_str(&format!("data: {}\n\n", serde_json::to_string(&chunk).unwrap()));
    }
    body.push_str(&format!("data: {}\n\n", STREAM_DONE));
    body
}

pub fn embeddings_body(model: &str, vectors: Vec<Vec<f32>>) -> serde_json::Value {
    let count = vectors.len() as u32;
    let response = EmbeddingsResponse {
        model: model.to_string(),
        embeddings: vectors
            .into_iter()
            .enumerate()
            .map(|(index, values)| Embedding {
                index: index as u32,
                values,
            })
            .collect(),
        usage: EmbeddingsUsage {
            prompt_tokens: count,
            total_tokens: count,
        },
    };
    serde_json::to_value(response).unwrap()
}
