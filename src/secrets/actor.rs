//! Two-phase Diffie-Hellman handshake.
//!
//! ```text
//!  initiator                               responder
//!  ---------                               ---------
//!  phase_one: fresh key pair
//!  initiate  -- Sourced{id, PublicValue} -->
//!                                          phase_one: provisioned key pair
//!            <-- PublicValue ------------- respond
//!                                          phase_two: derive key
//!  complete: is_trusted? then phase_two
//! ```
//!
//! The responder always answers with its provisioned public value, so an
//! initiator that finds anything else on the wire refuses to go further.

use crate::bus::{self, Payload};
use crate::error::{SealError, SealResult};
use crate::secrets::channel::SecureChannel;
use crate::secrets::provider::{
    decode_public_value, derive_shared_key, encode_public_value, generate_key_pair, DhParameters,
    KeyPair, SymmetricKey,
};
use crate::secrets::trust::SharedTrustStore;
use std::io::{Read, Write};
use tracing::{debug, info, warn};

/// Which end of the handshake an actor plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens the handshake and authenticates the responder.
    Initiator,
    /// Answers with the provisioned key pair.
    Responder,
}

/// Handshake progress. Only ever moves forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeState {
    New,
    PhaseOneDone,
    PhaseTwoDone,
}

pub struct HandshakeActor {
    role: Role,
    state: HandshakeState,
    trust: SharedTrustStore,
    key_pair: Option<KeyPair>,
    peer_public: Option<Vec<u8>>,
    channel: SecureChannel,
}

impl HandshakeActor {
    pub fn new<S: Into<String>>(id: S, role: Role, trust: SharedTrustStore) -> Self {
        Self {
            role,
            state: HandshakeState::New,
            trust,
            key_pair: None,
            peer_public: None,
            channel: SecureChannel::unkeyed(id),
        }
    }

    pub fn initiator<S: Into<String>>(id: S, trust: SharedTrustStore) -> Self {
        Self::new(id, Role::Initiator, trust)
    }

    pub fn responder<S: Into<String>>(id: S, trust: SharedTrustStore) -> Self {
        Self::new(id, Role::Responder, trust)
    }

    /// Identifier of the channel this actor sets up.
    pub fn id(&self) -> &str {
        self.channel.id()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn require(&self, state: HandshakeState) -> SealResult<()> {
        if self.state != state {
            return Err(SealError::illegal_state(self.state));
        }
        Ok(())
    }

    fn require_at_least(&self, state: HandshakeState) -> SealResult<()> {
        if self.state < state {
            return Err(SealError::illegal_state(self.state));
        }
        Ok(())
    }

    /// Phase one over the trusted value's parameters.
    ///
    /// The initiator draws a fresh key pair; the responder loads its
    /// provisioned one.
    pub fn phase_one(&mut self) -> SealResult<()> {
        let params = self.trust.trusted_public_value().params().clone();
        self.phase_one_with(&params)
    }

    /// Phase one over explicit parameters.
    ///
    /// A responder only accepts the parameters of its provisioned key pair.
    pub fn phase_one_with(&mut self, params: &DhParameters) -> SealResult<()> {
        self.require(HandshakeState::New)?;

        let pair = match self.role {
            Role::Initiator => generate_key_pair(params)?,
            Role::Responder => {
                let pair = self.trust.key_pair()?;
                if pair.public.params() != params {
                    return Err(SealError::security("DH parameters mismatch"));
                }
                pair
            }
        };

        self.key_pair = Some(pair);
        self.state = HandshakeState::PhaseOneDone;
        debug!("{}: phase one done ({:?})", self.id(), self.role);
        Ok(())
    }

    /// Phase two: authenticate (initiator only), agree on the channel key and
    /// install it.
    ///
    /// On any failure the actor stays in phase one with no key installed.
    pub fn phase_two(&mut self, peer_encoded_public_value: &[u8]) -> SealResult<()> {
        self.require(HandshakeState::PhaseOneDone)?;

        if self.role == Role::Initiator && !self.trust.is_trusted(peer_encoded_public_value) {
            warn!(
                "{}: rejected untrusted public value {}",
                self.id(),
                bus::fingerprint(peer_encoded_public_value)
            );
            return Err(SealError::security("untrusted public value"));
        }

        let peer = decode_public_value(peer_encoded_public_value)?;
        let pair = self
            .key_pair
            .as_ref()
            .ok_or_else(|| SealError::illegal_state(self.state))?;
        let key = derive_shared_key(&pair.private, &peer)?;

        self.channel.install_key(key);
        self.peer_public = Some(peer_encoded_public_value.to_vec());
        self.state = HandshakeState::PhaseTwoDone;
        info!(
            "{}: handshake complete as {:?}, peer {}",
            self.id(),
            self.role,
            bus::fingerprint(peer_encoded_public_value)
        );
        Ok(())
    }

    /// Encoded public value generated or loaded in phase one.
    pub fn public_value(&self) -> SealResult<Vec<u8>> {
        self.require_at_least(HandshakeState::PhaseOneDone)?;
        let pair = self
            .key_pair
            .as_ref()
            .ok_or_else(|| SealError::illegal_state(self.state))?;
        encode_public_value(&pair.public)
    }

    /// Agreed channel key.
    pub fn shared_key(&self) -> SealResult<&SymmetricKey> {
        self.require(HandshakeState::PhaseTwoDone)?;
        self.channel.key()
    }

    /// Encoded public value received from the peer, once phase two succeeded.
    pub fn peer_public_value(&self) -> Option<&[u8]> {
        self.peer_public.as_deref()
    }

    pub fn channel(&self) -> SealResult<&SecureChannel> {
        self.require(HandshakeState::PhaseTwoDone)?;
        Ok(&self.channel)
    }

    pub fn into_channel(self) -> SealResult<SecureChannel> {
        self.require(HandshakeState::PhaseTwoDone)?;
        Ok(self.channel)
    }

    /// Initiator: run phase one and send `Sourced{id, PublicValue}`.
    pub fn initiate<W: Write>(&mut self, out: &mut W) -> SealResult<()> {
        if self.role != Role::Initiator {
            return Err(SealError::security("only an initiator opens a handshake"));
        }
        self.phase_one()?;
        let public = self.public_value()?;
        bus::write_with_source(self.id(), out, &Payload::PublicValue(public))
    }

    /// Initiator: read the responder's public value and run phase two.
    pub fn complete<R: Read>(&mut self, input: &mut R) -> SealResult<()> {
        if self.role != Role::Initiator {
            return Err(SealError::security("only an initiator completes a handshake"));
        }
        let peer = bus::read::<_, Payload>(input)?.into_public_value()?;
        self.phase_two(&peer)
    }

    /// Responder: run phase one, answer with its own public value, then run
    /// phase two over the initiator's value.
    pub fn respond<W: Write>(
        &mut self,
        peer_encoded_public_value: &[u8],
        out: &mut W,
    ) -> SealResult<()> {
        if self.role != Role::Responder {
            return Err(SealError::security("only a responder answers a handshake"));
        }
        self.phase_one()?;
        bus::write(out, &Payload::PublicValue(self.public_value()?))?;
        self.phase_two(peer_encoded_public_value)
    }
}

impl std::fmt::Debug for HandshakeActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeActor")
            .field("id", &self.id())
            .field("role", &self.role)
            .field("state", &self.state)
            .finish()
    }
}
