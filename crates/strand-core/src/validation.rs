//! Event verification: hash binding, signature recovery, delegate chains.

use crate::crypto::{domain_hash, recover_public_key, PublicKey};
use crate::error::ValidationError;
use crate::event::Event;
use crate::types::{Address, EventHash};

/// Knobs for verifying events from a source that is already trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Skip recomputing the hash. Cheap, so rarely worth skipping.
    pub skip_hash_check: bool,
    /// Skip signature recovery. Relatively expensive.
    pub skip_signature_check: bool,
}

/// Verify that `delegate_sig` is the creator's signature over the delegate key.
pub fn check_delegate_sig(
    delegate_public_key: &PublicKey,
    creator_address: &Address,
    delegate_sig: &crate::crypto::Signature,
) -> Result<(), ValidationError> {
    let hash = domain_hash(delegate_public_key.as_bytes());
    let signer = recover_public_key(hash.as_bytes(), delegate_sig.as_bytes())
        .map_err(|_| ValidationError::BadDelegateSig)?;
    if signer.to_address() != *creator_address {
        return Err(ValidationError::BadDelegateSig);
    }
    Ok(())
}

/// Check that the event's signature was produced by its creator, directly or
/// through a delegate key.
pub fn check_event_signature(event: &Event) -> Result<(), ValidationError> {
    let recovered = recover_public_key(event.hash.as_bytes(), event.signature.as_bytes())
        .map_err(|_| ValidationError::BadEventSignature)?;

    match &event.base.delegate_sig {
        None => {
            if recovered.to_address() != event.base.creator_address {
                return Err(ValidationError::BadEventSignature);
            }
            Ok(())
        }
        Some(delegate_sig) => {
            check_delegate_sig(&recovered, &event.base.creator_address, delegate_sig)
        }
    }
}

/// Verify a single event.
///
/// When `expected_prev` is given, the event must reference exactly that hash
/// and nothing else.
pub fn check_event(event: &Event, expected_prev: Option<&EventHash>) -> Result<(), ValidationError> {
    // 1. Linear chain position
    if let Some(expected) = expected_prev {
        if event.base.prev_events.as_slice() != [*expected] {
            return Err(ValidationError::BadPrevEvents {
                expected: *expected,
                got: event.base.prev_events.clone(),
            });
        }
    }

    // 2. Hash binds the base
    check_event_hash(event)?;

    // 3. Signature
    check_event_signature(event)
}

/// Verify a linear chain: each event must reference exactly the one before it.
///
/// Merge events with several parents fail here by construction. Verify those
/// one at a time with [`check_event`] and `expected_prev = None`.
pub fn check_events(events: &[Event]) -> Result<(), ValidationError> {
    let mut prev: Option<&EventHash> = None;
    for event in events {
        check_event(event, prev)?;
        prev = Some(&event.hash);
    }
    Ok(())
}

/// Verify an event with optional shortcuts for trusted sources.
pub fn verify_event(event: &Event, options: &VerifyOptions) -> Result<(), ValidationError> {
    if !options.skip_hash_check {
        check_event_hash(event)?;
    }
    if !options.skip_signature_check {
        check_event_signature(event)?;
    }
    Ok(())
}

fn check_event_hash(event: &Event) -> Result<(), ValidationError> {
    let computed = event.base.compute_hash()?;
    if computed != event.hash {
        return Err(ValidationError::BadEventId {
            claimed: event.hash,
            computed,
        });
    }
    Ok(())
}
