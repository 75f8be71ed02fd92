//! Proptest generators for property-based testing.

use proptest::prelude::*;

use strand_core::{
    Address, Event, EventBuilder, EventHash, Keypair, MessageBody, MessagePayload, Payload,
    SignerContext, StreamId, StreamKind,
};

/// Generate a random keypair. Out-of-range scalars are filtered out.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_filter_map("secret scalar out of range", |secret| {
        Keypair::from_secret_bytes(&secret).ok()
    })
}

pub fn event_hash() -> impl Strategy<Value = EventHash> {
    any::<[u8; 32]>().prop_map(EventHash)
}

pub fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address)
}

pub fn stream_kind() -> impl Strategy<Value = StreamKind> {
    prop_oneof![
        Just(StreamKind::User),
        Just(StreamKind::Space),
        Just(StreamKind::Channel),
        Just(StreamKind::Dm),
        Just(StreamKind::Gdm),
    ]
}

/// A stream id whose first byte carries its kind.
pub fn stream_id() -> impl Strategy<Value = StreamId> {
    (stream_kind(), any::<[u8; 16]>()).prop_map(|(kind, seed)| StreamId::derive(kind, &seed))
}

/// Generate payload bytes of specified max length.
pub fn payload_bytes(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

pub fn message_text() -> impl Strategy<Value = String> {
    "[ -~]{0,64}".prop_map(String::from)
}

/// Parameters for generating a signed message event.
#[derive(Debug, Clone)]
pub struct EventParams {
    pub keypair: Keypair,
    pub text: String,
    pub reply_to: Option<EventHash>,
    pub prev_events: Vec<EventHash>,
    pub created_at_epoch_ms: i64,
    pub salt: [u8; 16],
}

impl Arbitrary for EventParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            keypair(),
            message_text(),
            prop::option::of(event_hash()),
            prop::collection::vec(event_hash(), 1..4),
            0i64..=1_700_000_000_000i64,
            any::<[u8; 16]>(),
        )
            .prop_map(
                |(keypair, text, reply_to, prev_events, created_at_epoch_ms, salt)| EventParams {
                    keypair,
                    text,
                    reply_to,
                    prev_events,
                    created_at_epoch_ms,
                    salt,
                },
            )
            .boxed()
    }
}

/// Generate a signed event from parameters. Deterministic in `params`.
pub fn event_from_params(params: &EventParams) -> Event {
    let context = SignerContext::new(params.keypair.clone());
    EventBuilder::new(Payload::Message(MessagePayload {
        reply_to: params.reply_to,
        body: MessageBody::Text(params.text.clone()),
    }))
    .prevs(params.prev_events.iter().copied())
    .created_at(params.created_at_epoch_ms)
    .salt(params.salt)
    .sign(&context)
    .expect("sign generated event")
}
