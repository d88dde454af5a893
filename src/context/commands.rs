//! Request type tags, command handlers and the bindings between them.

use crate::bus;
use crate::config::CommandsConfig;
use crate::error::{SealError, SealResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Binding tag used when neither the request tag nor its fallbacks are bound.
pub const DEFAULT_TAG: &str = "*";

/// Plaintext of a sealed application message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub type_tag: String,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new<S: Into<String>>(type_tag: S, body: Vec<u8>) -> Self {
        Self {
            type_tag: type_tag.into(),
            body,
        }
    }

    /// Wrap a typed message.
    pub fn from_message<M: Message>(message: &M) -> SealResult<Self> {
        let body = bus::codec()
            .serialize(message)
            .map_err(SealError::from_envelope_codec)?;
        Ok(Self::new(M::TYPE_TAG, body))
    }

    /// Decode the body as `M`; the tag must match.
    pub fn decode<M: Message>(&self) -> SealResult<M> {
        if self.type_tag != M::TYPE_TAG {
            return Err(SealError::data(format!(
                "expected a {} request, got {}",
                M::TYPE_TAG,
                self.type_tag
            )));
        }
        bus::codec()
            .deserialize(&self.body)
            .map_err(SealError::from_envelope_codec)
    }
}

/// A payload type that travels inside a [`Request`].
pub trait Message: Serialize + DeserializeOwned {
    const TYPE_TAG: &'static str;
}

impl Message for String {
    const TYPE_TAG: &'static str = "string";
}

impl Message for Vec<u8> {
    const TYPE_TAG: &'static str = "bytes";
}

/// Application command run on a decrypted request.
pub trait Command: Send + Sync {
    fn execute(&self, peer_id: &str, request: &Request) -> SealResult<Value>;
}

/// Builds a fresh handler for each dispatched request.
pub type HandlerFactory = fn() -> Box<dyn Command>;

/// Answers with what it received: peer, tag and base64 body.
pub struct EchoCommand;

impl Command for EchoCommand {
    fn execute(&self, peer_id: &str, request: &Request) -> SealResult<Value> {
        Ok(json!({
            "peer": peer_id,
            "type_tag": request.type_tag,
            "body": BASE64.encode(&request.body),
        }))
    }
}

/// Decodes a text message.
pub struct TextCommand;

impl Command for TextCommand {
    fn execute(&self, _peer_id: &str, request: &Request) -> SealResult<Value> {
        let text: String = request.decode()?;
        Ok(Value::String(text))
    }
}

/// Accepts anything and returns nothing.
pub struct DiscardCommand;

impl Command for DiscardCommand {
    fn execute(&self, _peer_id: &str, _request: &Request) -> SealResult<Value> {
        Ok(Value::Null)
    }
}

fn echo() -> Box<dyn Command> {
    Box::new(EchoCommand)
}

fn text() -> Box<dyn Command> {
    Box::new(TextCommand)
}

fn discard() -> Box<dyn Command> {
    Box::new(DiscardCommand)
}

/// Built-in handlers by name
pub fn builtin_handlers() -> Vec<(&'static str, HandlerFactory)> {
    vec![
        ("echo", echo as HandlerFactory),
        ("text", text as HandlerFactory),
        ("discard", discard as HandlerFactory),
    ]
}

/// Routing table from request type tags to handlers.
///
/// Resolution tries the exact tag, then follows the fallback chain, then the
/// default binding (`*`).
#[derive(Clone, Default)]
pub struct CommandBindings {
    bindings: HashMap<String, String>,
    fallbacks: HashMap<String, String>,
    factories: HashMap<String, HandlerFactory>,
}

impl CommandBindings {
    /// Empty bindings with the built-in handlers registered.
    pub fn new() -> Self {
        let mut commands = Self::default();
        for (name, factory) in builtin_handlers() {
            commands.register_handler(name, factory);
        }
        commands
    }

    /// Bindings read from configuration. Every bound handler must be
    /// registered.
    pub fn from_config(config: &CommandsConfig) -> SealResult<Self> {
        let mut commands = Self::new();
        for (tag, handler) in &config.bindings {
            commands.bind(tag.clone(), handler.clone());
        }
        for (tag, next) in &config.fallbacks {
            commands.fallback(tag.clone(), next.clone());
        }
        if let Some(handler) = &config.default {
            commands.set_default(handler.clone());
        }
        commands.validate()?;
        Ok(commands)
    }

    pub fn register_handler<S: Into<String>>(&mut self, name: S, factory: HandlerFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn bind<T: Into<String>, H: Into<String>>(&mut self, type_tag: T, handler: H) -> &mut Self {
        self.bindings.insert(type_tag.into(), handler.into());
        self
    }

    pub fn fallback<T: Into<String>, N: Into<String>>(&mut self, type_tag: T, next: N) -> &mut Self {
        self.fallbacks.insert(type_tag.into(), next.into());
        self
    }

    pub fn set_default<H: Into<String>>(&mut self, handler: H) -> &mut Self {
        self.bind(DEFAULT_TAG, handler)
    }

    /// Check that every bound handler name is registered.
    pub fn validate(&self) -> SealResult<()> {
        for (tag, handler) in &self.bindings {
            if !self.factories.contains_key(handler) {
                return Err(SealError::data(format!(
                    "unknown handler {} bound to {}",
                    handler, tag
                )));
            }
        }
        Ok(())
    }

    /// Name of the handler for `type_tag`.
    pub fn resolve(&self, type_tag: &str) -> SealResult<&str> {
        let mut seen = HashSet::new();
        let mut tag = type_tag;
        loop {
            if let Some(handler) = self.bindings.get(tag) {
                if tag != type_tag {
                    debug!("{} resolved through fallback {}", type_tag, tag);
                }
                return Ok(handler.as_str());
            }
            if !seen.insert(tag) {
                return Err(SealError::data(format!(
                    "fallback cycle while resolving type tag {}",
                    type_tag
                )));
            }
            match self.fallbacks.get(tag) {
                Some(next) => tag = next.as_str(),
                None => break,
            }
        }

        self.bindings
            .get(DEFAULT_TAG)
            .map(String::as_str)
            .ok_or_else(|| SealError::data(format!("unknown type tag: {}", type_tag)))
    }

    /// Fresh instance of the named handler.
    pub fn instantiate(&self, handler: &str) -> SealResult<Box<dyn Command>> {
        self.factories
            .get(handler)
            .map(|factory| factory())
            .ok_or_else(|| SealError::data(format!("unknown handler: {}", handler)))
    }
}

impl std::fmt::Debug for CommandBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut handlers: Vec<&String> = self.factories.keys().collect();
        handlers.sort();
        f.debug_struct("CommandBindings")
            .field("bindings", &self.bindings)
            .field("fallbacks", &self.fallbacks)
            .field("handlers", &handlers)
            .finish()
    }
}
