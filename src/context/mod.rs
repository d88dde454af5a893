//! Responder-side channel registry and request dispatch.
//!
//! One context serves many initiators. Each initiator is known by the source
//! id it puts on its envelopes; a handshake from that id (re)creates its
//! channel, and every sealed request from it is opened with that channel and
//! handed to the command bound to the request's type tag.

pub mod commands;

pub use commands::{Command, CommandBindings, HandlerFactory, Message, Request, DEFAULT_TAG};

use crate::bus::Payload;
use crate::error::{SealError, SealResult};
use crate::secrets::actor::HandshakeActor;
use crate::secrets::channel::{read_sealed, CipherText, SecureChannel};
use crate::secrets::files;
use crate::secrets::trust::SharedTrustStore;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a dispatched request produced.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub peer_id: String,
    pub request: Request,
    /// Name of the handler that ran
    pub handler_type: String,
    pub result: serde_json::Value,
}

/// Result of [`ChannelContext::on_request`].
#[derive(Debug)]
pub enum Outcome {
    /// A handshake completed; the channel is registered under its id.
    Established(Arc<SecureChannel>),
    /// A sealed request was handled.
    Dispatched(CommandResponse),
}

pub struct ChannelContext {
    channels: DashMap<String, Arc<SecureChannel>>,
    trust: SharedTrustStore,
    commands: CommandBindings,
}

impl ChannelContext {
    /// The trust store must hold the responder's private value.
    pub fn new(trust: SharedTrustStore, commands: CommandBindings) -> SealResult<Self> {
        trust.trusted_private_value()?;
        Ok(Self {
            channels: DashMap::new(),
            trust,
            commands,
        })
    }

    pub fn trust(&self) -> &SharedTrustStore {
        &self.trust
    }

    pub fn commands(&self) -> &CommandBindings {
        &self.commands
    }

    /// Handle one envelope read from `input`, writing any reply to `output`.
    ///
    /// A handshake reply is always written. A sealed request is echoed back
    /// sealed unless `silent` is set.
    pub fn on_request<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        silent: bool,
    ) -> SealResult<Outcome> {
        let envelope = read_sealed(input)?;
        match envelope.payload {
            Payload::PublicValue(peer_value) => self
                .establish(envelope.source_id, &peer_value, output)
                .map(Outcome::Established),
            Payload::Sealed(sealed) => self
                .dispatch(envelope.source_id, &sealed, output, silent)
                .map(Outcome::Dispatched),
        }
    }

    fn establish<W: Write>(
        &self,
        peer_id: String,
        peer_value: &[u8],
        output: &mut W,
    ) -> SealResult<Arc<SecureChannel>> {
        let mut actor = HandshakeActor::responder(peer_id.clone(), self.trust.clone());
        actor.respond(peer_value, output)?;
        let channel = Arc::new(actor.into_channel()?);

        if self.channels.insert(peer_id.clone(), channel.clone()).is_some() {
            info!("Replaced channel for {}", peer_id);
        } else {
            info!("Opened channel for {}", peer_id);
        }
        Ok(channel)
    }

    fn dispatch<W: Write>(
        &self,
        peer_id: String,
        sealed: &CipherText,
        output: &mut W,
        silent: bool,
    ) -> SealResult<CommandResponse> {
        let channel = self.channel(&peer_id).ok_or_else(|| {
            warn!("Sealed request from unknown peer {}", peer_id);
            SealError::security(format!("undefined channel: {}", peer_id))
        })?;

        let request: Request = channel.open(sealed)?;
        let handler_type = self.commands.resolve(&request.type_tag)?.to_string();
        debug!(
            "{}: {} request -> {}",
            peer_id, request.type_tag, handler_type
        );

        let result = self
            .commands
            .instantiate(&handler_type)?
            .execute(&peer_id, &request)
            .map_err(|e| {
                if e.is_security() {
                    e
                } else {
                    SealError::data(format!("command {} failed: {}", handler_type, e))
                }
            })?;

        if !silent {
            channel.write(output, &request)?;
        }

        Ok(CommandResponse {
            peer_id,
            request,
            handler_type,
            result,
        })
    }

    /// Registered channel for `peer_id`, if any.
    pub fn channel(&self, peer_id: &str) -> Option<Arc<SecureChannel>> {
        self.channels.get(peer_id).map(|entry| entry.value().clone())
    }

    /// Drop the channel for `peer_id`. Returns whether one was registered.
    pub fn close_channel(&self, peer_id: &str) -> bool {
        let removed = self.channels.remove(peer_id).is_some();
        if removed {
            info!("Closed channel for {}", peer_id);
        }
        removed
    }

    /// Register a channel keyed out of band, replacing any channel of the
    /// same peer.
    pub fn register(&self, channel: SecureChannel) -> SealResult<Arc<SecureChannel>> {
        channel.key()?;
        let peer_id = channel.id().to_string();
        let channel = Arc::new(channel);
        if self.channels.insert(peer_id.clone(), channel.clone()).is_some() {
            info!("Replaced channel for {} with a pre-shared key", peer_id);
        } else {
            info!("Registered pre-shared channel for {}", peer_id);
        }
        Ok(channel)
    }

    /// Register one channel per `peer id -> .key file` entry.
    pub fn register_preshared(&self, preshared: &HashMap<String, PathBuf>) -> SealResult<usize> {
        for (peer_id, path) in preshared {
            let key = files::read_symmetric_key(path)?;
            self.register(SecureChannel::new(peer_id.clone(), key))?;
        }
        Ok(preshared.len())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl std::fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelContext")
            .field("channels", &self.channels.len())
            .field("trust", &self.trust)
            .field("commands", &self.commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::error::ErrorKind;
    use crate::secrets::actor::HandshakeActor;
    use crate::secrets::provider::tests::test_params;
    use crate::secrets::provider::KeyPair;
    use crate::secrets::trust::TrustStore;
    use num_bigint::BigUint;
    use std::io::Cursor;

    fn trust_pair() -> (SharedTrustStore, SharedTrustStore) {
        let pair = KeyPair::from_private(&test_params(), BigUint::from(6u32)).unwrap();
        (
            Arc::new(TrustStore::initiator(pair.public.clone()).unwrap()),
            Arc::new(TrustStore::responder(pair).unwrap()),
        )
    }

    fn context(bob_trust: SharedTrustStore) -> ChannelContext {
        let mut commands = CommandBindings::new();
        commands.bind("string", "text").set_default("echo");
        ChannelContext::new(bob_trust, commands).unwrap()
    }

    /// Runs a full handshake for `id` against `ctx` and returns the
    /// initiator's channel.
    fn connect(ctx: &ChannelContext, alice_trust: &SharedTrustStore, id: &str) -> SecureChannel {
        let mut alice = HandshakeActor::initiator(id, alice_trust.clone());
        let mut request = Vec::new();
        alice.initiate(&mut request).unwrap();

        let mut response = Vec::new();
        let outcome = ctx
            .on_request(&mut Cursor::new(request), &mut response, false)
            .unwrap();
        assert!(matches!(outcome, Outcome::Established(ref c) if c.id() == id));

        alice.complete(&mut Cursor::new(response)).unwrap();
        alice.into_channel().unwrap()
    }

    fn sealed_request(channel: &SecureChannel, id: &str, request: &Request) -> Vec<u8> {
        let mut stream = Vec::new();
        channel.write_with_source(id, &mut stream, request).unwrap();
        stream
    }

    #[test]
    fn test_context_needs_responder_trust() {
        let (alice_trust, _) = trust_pair();
        let err = ChannelContext::new(alice_trust, CommandBindings::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
    }

    #[test]
    fn test_ping_round_trip() {
        let (alice_trust, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let channel = connect(&ctx, &alice_trust, "p1");
        assert_eq!(ctx.channel_count(), 1);

        let ping = Request::from_message(&"ping".to_string()).unwrap();
        let mut response = Vec::new();
        let outcome = ctx
            .on_request(
                &mut Cursor::new(sealed_request(&channel, "p1", &ping)),
                &mut response,
                false,
            )
            .unwrap();

        match outcome {
            Outcome::Dispatched(resp) => {
                assert_eq!(resp.peer_id, "p1");
                assert_eq!(resp.handler_type, "text");
                assert_eq!(resp.result, serde_json::json!("ping"));
                assert_eq!(resp.request, ping);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let echo: Request = channel.read(&mut Cursor::new(response)).unwrap();
        assert_eq!(echo.decode::<String>().unwrap(), "ping");
    }

    #[test]
    fn test_silent_mode_writes_nothing() {
        let (alice_trust, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let channel = connect(&ctx, &alice_trust, "p1");

        let request = Request::new("custom", vec![1, 2, 3]);
        let mut response = Vec::new();
        let outcome = ctx
            .on_request(
                &mut Cursor::new(sealed_request(&channel, "p1", &request)),
                &mut response,
                true,
            )
            .unwrap();
        assert!(response.is_empty());
        assert!(matches!(outcome, Outcome::Dispatched(ref r) if r.handler_type == "echo"));
    }

    #[test]
    fn test_second_handshake_replaces_channel() {
        let (alice_trust, bob_trust) = trust_pair();
        let ctx = context(bob_trust);

        let old = connect(&ctx, &alice_trust, "p1");
        let ping = Request::from_message(&"ping".to_string()).unwrap();
        let stale = sealed_request(&old, "p1", &ping);

        let new = connect(&ctx, &alice_trust, "p1");
        assert_eq!(ctx.channel_count(), 1);

        let err = ctx
            .on_request(&mut Cursor::new(stale), &mut Vec::new(), false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);

        let fresh = sealed_request(&new, "p1", &ping);
        assert!(ctx
            .on_request(&mut Cursor::new(fresh), &mut Vec::new(), true)
            .is_ok());
    }

    #[test]
    fn test_peers_are_isolated() {
        let (alice_trust, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let p1 = connect(&ctx, &alice_trust, "p1");
        connect(&ctx, &alice_trust, "p2");
        assert_eq!(ctx.channel_count(), 2);

        // p1's key under p2's name
        let ping = Request::from_message(&"ping".to_string()).unwrap();
        let spoofed = sealed_request(&p1, "p2", &ping);
        let err = ctx
            .on_request(&mut Cursor::new(spoofed), &mut Vec::new(), false)
            .unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn test_unknown_peer_is_refused() {
        let (alice_trust, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let channel = connect(&ctx, &alice_trust, "p1");

        let ping = Request::from_message(&"ping".to_string()).unwrap();
        let err = ctx
            .on_request(
                &mut Cursor::new(sealed_request(&channel, "ghost", &ping)),
                &mut Vec::new(),
                false,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
        assert_eq!(err.message(), Some("undefined channel: ghost"));
    }

    #[test]
    fn test_close_channel() {
        let (alice_trust, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let channel = connect(&ctx, &alice_trust, "p1");

        assert!(ctx.close_channel("p1"));
        assert!(!ctx.close_channel("p1"));
        assert_eq!(ctx.channel_count(), 0);

        let ping = Request::from_message(&"ping".to_string()).unwrap();
        let err = ctx
            .on_request(
                &mut Cursor::new(sealed_request(&channel, "p1", &ping)),
                &mut Vec::new(),
                false,
            )
            .unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn test_unresolvable_and_failing_requests_are_data_errors() {
        let (alice_trust, bob_trust) = trust_pair();
        let ctx = ChannelContext::new(bob_trust, {
            let mut commands = CommandBindings::new();
            commands.bind("bytes", "text");
            commands
        })
        .unwrap();
        let channel = connect(&ctx, &alice_trust, "p1");

        let unbound = Request::new("custom", vec![]);
        let err = ctx
            .on_request(
                &mut Cursor::new(sealed_request(&channel, "p1", &unbound)),
                &mut Vec::new(),
                false,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);

        // text handler on a bytes request fails to decode a string
        let mismatched = Request::from_message(&vec![1u8, 2]).unwrap();
        let mut response = Vec::new();
        let err = ctx
            .on_request(
                &mut Cursor::new(sealed_request(&channel, "p1", &mismatched)),
                &mut response,
                false,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(response.is_empty());
    }

    #[test]
    fn test_malformed_handshake_is_security_error() {
        let (_, bob_trust) = trust_pair();
        let ctx = context(bob_trust);

        let mut request = Vec::new();
        bus::write_with_source("p1", &mut request, &Payload::PublicValue(vec![0xde, 0xad])).unwrap();
        let err = ctx
            .on_request(&mut Cursor::new(request), &mut Vec::new(), false)
            .unwrap_err();
        assert!(err.is_security());
        assert_eq!(ctx.channel_count(), 0);
    }

    #[test]
    fn test_registered_preshared_channel_dispatches() {
        let (_, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let key = crate::secrets::provider::generate_symmetric_key().unwrap();
        ctx.register(SecureChannel::new("p1", key.clone())).unwrap();
        assert_eq!(ctx.channel_count(), 1);

        let alice = SecureChannel::new("p1", key);
        let ping = Request::from_message(&"ping".to_string()).unwrap();
        let mut response = Vec::new();
        let outcome = ctx
            .on_request(
                &mut Cursor::new(sealed_request(&alice, "p1", &ping)),
                &mut response,
                false,
            )
            .unwrap();
        assert!(matches!(outcome, Outcome::Dispatched(ref r) if r.handler_type == "text"));
        let echo: Request = alice.read(&mut Cursor::new(response)).unwrap();
        assert_eq!(echo, ping);
    }

    #[test]
    fn test_register_rejects_unkeyed_channel() {
        let (_, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let err = ctx.register(SecureChannel::unkeyed("p1")).unwrap_err();
        assert!(err.is_security());
        assert_eq!(ctx.channel_count(), 0);
    }

    #[test]
    fn test_debug_hides_channel_keys() {
        let (_, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let key = crate::secrets::provider::generate_symmetric_key().unwrap();
        ctx.register(SecureChannel::new("p1", key)).unwrap();

        let rendered = format!("{:?}", ctx);
        assert!(rendered.contains("channels: 1"));
        assert!(!rendered.contains("SymmetricKey"));
    }

    #[test]
    fn test_register_preshared_from_key_files() {
        let (_, bob_trust) = trust_pair();
        let ctx = context(bob_trust);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carol.key");
        let key = crate::secrets::provider::generate_symmetric_key().unwrap();
        files::write_symmetric_key(&key, &path).unwrap();

        let preshared = HashMap::from([("carol".to_string(), path)]);
        assert_eq!(ctx.register_preshared(&preshared).unwrap(), 1);
        assert_eq!(ctx.channel("carol").unwrap().key().unwrap(), &key);

        let missing = HashMap::from([("dave".to_string(), dir.path().join("absent.key"))]);
        let err = ctx.register_preshared(&missing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(ctx.channel("dave").is_none());
    }
}
