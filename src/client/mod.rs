//! The AI client capability and its vendor variants.
//!
//! The engine only ever sees [`AiClient::send`]; which backend answers is a
//! configuration choice ([`ProviderConfig`](crate::config::ProviderConfig)).
use crate::error::ProviderError;

mod command;
mod openai;

pub use command::CommandClient;
pub use openai::{OpenAiCompatibleClient, OpenAiSettings};

/// Send one prompt, receive the raw response text.
///
/// Implementations own their transport, authentication and timeouts. A
/// timeout is reported as a retryable [`ProviderError`].
pub trait AiClient: Send + Sync {
    fn send(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Short label for logs, such as the model or command name.
    fn describe(&self) -> String {
        "ai client".to_string()
    }
}

impl<T: AiClient + ?Sized> AiClient for &T {
    fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        (**self).send(prompt)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<T: AiClient + ?Sized> AiClient for Box<T> {
    fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        (**self).send(prompt)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Prompt used by connectivity probes.
pub const PROBE_PROMPT: &str = "Reply with the single word OK.";

/// Send [`PROBE_PROMPT`] and return the trimmed reply.
pub fn probe(client: &dyn AiClient) -> Result<String, ProviderError> {
    let reply = client.send(PROBE_PROMPT)?;
    Ok(reply.trim().to_string())
}
