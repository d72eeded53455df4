//! AMQP 1.0 Link Engine
//!
//! A `Link` is the attach/detach/transfer state machine for one handle on a
//! session (§2.6). `Session` owns a registry of these keyed by handle and
//! routes ATTACH/FLOW/TRANSFER/DETACH frames to the matching entry; `Sender`
//! and `Receiver` are thin typed wrappers identifying which handle the
//! caller means, the same way a `Session` identifies itself by channel
//! number rather than by holding a pointer back to its `Connection`.

use crate::condition::AmqpCondition;
use crate::types::{
    AmqpMap, AmqpSymbol, AmqpValue, ReceiverSettleMode, SenderSettleMode, TerminusDurability, TerminusExpiryPolicy,
};
use crate::{AmqpError, AmqpResult, Message};
use uuid::Uuid;

/// Descriptor codes for the link-level performatives.
pub(crate) mod descriptor {
    pub const ATTACH: u64 = 0x12;
    pub const FLOW: u64 = 0x13;
    pub const TRANSFER: u64 = 0x14;
    pub const DISPOSITION: u64 = 0x15;
    pub const DETACH: u64 = 0x16;
}

/// Which end of the link this engine represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    fn as_bool(self) -> bool {
        matches!(self, Role::Receiver)
    }
}

/// AMQP 1.0 link state (§2.6.10), collapsed to the transitions a client
/// actually drives: a link is half-attached the moment we've sent our own
/// ATTACH and becomes fully attached once the peer's ATTACH arrives (or vice
/// versa if the peer attaches first).
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    Unattached,
    HalfAttached,
    Attached,
    DetachSent,
    Detached,
    Error(AmqpCondition),
}

/// AMQP 1.0 terminus configuration (source or target).
#[derive(Debug, Clone)]
pub struct TerminusConfig {
    pub durability: TerminusDurability,
    pub expiry_policy: TerminusExpiryPolicy,
    pub timeout: u32,
    pub properties: AmqpMap,
}

impl Default for TerminusConfig {
    fn default() -> Self {
        TerminusConfig {
            durability: TerminusDurability::None,
            expiry_policy: TerminusExpiryPolicy::SessionEnd,
            timeout: 0,
            properties: AmqpMap::new(),
        }
    }
}

/// AMQP 1.0 link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub name: String,
    pub source: Option<String>,
    pub target: Option<String>,
    pub sender_settle_mode: SenderSettleMode,
    pub receiver_settle_mode: ReceiverSettleMode,
    pub properties: AmqpMap,
    pub source_config: Option<TerminusConfig>,
    pub target_config: Option<TerminusConfig>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            name: Uuid::new_v4().to_string(),
            source: None,
            target: None,
            sender_settle_mode: SenderSettleMode::Mixed,
            receiver_settle_mode: ReceiverSettleMode::First,
            properties: AmqpMap::new(),
            source_config: None,
            target_config: None,
        }
    }
}

/// Callback invoked once a queued send either reaches the wire successfully
/// or fails before it could be framed.
pub type OnSendComplete = Box<dyn FnOnce(AmqpResult<()>) + Send>;

/// One outbound message waiting for link credit. Backed by a plain `Vec`
/// that is only ever pushed to and drained from the front — there is no
/// separate message-count counter to fall out of sync with an array index.
pub struct PendingSend {
    pub message: Message,
    pub on_complete: Option<OnSendComplete>,
}

/// Attach/detach/transfer engine for one link handle. Owned by `Session`,
/// keyed by handle; never holds a reference back to its session or
/// connection.
pub struct Link {
    handle: u32,
    role: Role,
    config: LinkConfig,
    state: LinkState,
    delivery_count: u32,
    link_credit: u32,
    pending: Vec<PendingSend>,
    received: Vec<Message>,
}

impl Link {
    pub fn new(handle: u32, role: Role, config: LinkConfig) -> Self {
        Link {
            handle,
            role,
            config,
            state: LinkState::Unattached,
            delivery_count: 0,
            link_credit: 0,
            pending: Vec::new(),
            received: Vec::new(),
        }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn link_credit(&self) -> u32 {
        self.link_credit
    }

    /// Queue a message to be sent once credit and attachment allow it.
    /// Pushes onto the back of the pending `Vec`; nothing here depends on a
    /// separately-tracked count.
    pub fn queue_send(&mut self, message: Message, on_complete: Option<OnSendComplete>) {
        self.pending.push(PendingSend { message, on_complete });
    }

    pub fn has_pending_sends(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Take the next pending send if the link is attached and has credit,
    /// bumping `delivery_count` and consuming one unit of credit immediately
    /// so a second call before the frame is on the wire doesn't double-spend
    /// the same credit.
    pub fn take_next_send(&mut self) -> Option<PendingSend> {
        if self.state != LinkState::Attached || self.link_credit == 0 || self.pending.is_empty() {
            return None;
        }
        self.link_credit -= 1;
        self.delivery_count = self.delivery_count.wrapping_add(1);
        Some(self.pending.remove(0))
    }

    pub fn poll_received(&mut self) -> Option<Message> {
        if self.received.is_empty() {
            None
        } else {
            Some(self.received.remove(0))
        }
    }

    pub fn add_credit(&mut self, credit: u32) {
        self.link_credit += credit;
    }

    pub fn build_attach(&self) -> AmqpValue {
        let source = self.config.source.clone().map(AmqpValue::String).unwrap_or(AmqpValue::Null);
        let target = self.config.target.clone().map(AmqpValue::String).unwrap_or(AmqpValue::Null);
        let initial_delivery_count = match self.role {
            Role::Sender => AmqpValue::Uint(self.delivery_count),
            Role::Receiver => AmqpValue::Null,
        };
        AmqpValue::described(
            AmqpValue::Ulong(descriptor::ATTACH),
            AmqpValue::List(vec![
                AmqpValue::String(self.config.name.clone()),
                AmqpValue::Uint(self.handle),
                AmqpValue::Boolean(self.role.as_bool()),
                AmqpValue::Ubyte(self.config.sender_settle_mode as u8),
                AmqpValue::Ubyte(self.config.receiver_settle_mode as u8),
                source,
                target,
                AmqpValue::Null, // unsettled
                AmqpValue::Boolean(false), // incomplete-unsettled
                initial_delivery_count,
                AmqpValue::Null, // max-message-size
                AmqpValue::Null, // offered-capabilities
                AmqpValue::Null, // desired-capabilities
                AmqpValue::Map(self.config.properties.clone()),
            ]),
        )
    }

    pub fn on_attach(&mut self, performative: &AmqpValue) -> AmqpResult<()> {
        let fields = performative.as_list().ok_or_else(|| AmqpError::decoding("ATTACH is not a list"))?;
        if let (Role::Receiver, Some(AmqpValue::Uint(count))) = (self.role, fields.get(9)) {
            self.delivery_count = *count;
        }
        self.state = match self.state {
            LinkState::Unattached => LinkState::HalfAttached,
            LinkState::HalfAttached => LinkState::Attached,
            ref other => return Err(AmqpError::protocol_violation(AmqpCondition::from(format!("ATTACH received in state {other:?}").as_str()))),
        };
        Ok(())
    }

    /// Promote a link that sent its own ATTACH first straight to `Attached`
    /// once the peer's ATTACH lands (the common case: both sides attach
    /// essentially simultaneously and we don't model a distinct "my ATTACH
    /// is still in flight" sub-state).
    pub fn mark_half_attached(&mut self) {
        if self.state == LinkState::Unattached {
            self.state = LinkState::HalfAttached;
        } else if self.state == LinkState::HalfAttached {
            self.state = LinkState::Attached;
        }
    }

    pub fn build_detach(&self, condition: Option<AmqpCondition>) -> AmqpValue {
        let error = match condition {
            Some(cond) => {
                let mut map = AmqpMap::new();
                map.insert(AmqpSymbol::from("condition"), AmqpValue::Symbol(cond.as_str().into()));
                AmqpValue::described(AmqpValue::Ulong(0x1d), AmqpValue::List(vec![AmqpValue::Map(map)]))
            }
            None => AmqpValue::Null,
        };
        AmqpValue::described(
            AmqpValue::Ulong(descriptor::DETACH),
            AmqpValue::List(vec![AmqpValue::Uint(self.handle), AmqpValue::Boolean(true), error]),
        )
    }

    pub fn on_detach(&mut self, _performative: &AmqpValue) {
        self.state = LinkState::Detached;
    }

    pub fn build_flow(&self, next_incoming_id: u32, incoming_window: u32, next_outgoing_id: u32, outgoing_window: u32) -> AmqpValue {
        AmqpValue::described(
            AmqpValue::Ulong(descriptor::FLOW),
            AmqpValue::List(vec![
                AmqpValue::Uint(next_incoming_id),
                AmqpValue::Uint(incoming_window),
                AmqpValue::Uint(next_outgoing_id),
                AmqpValue::Uint(outgoing_window),
                AmqpValue::Uint(self.handle),
                AmqpValue::Uint(self.delivery_count),
                AmqpValue::Uint(self.link_credit),
                AmqpValue::Boolean(false), // drain
                AmqpValue::Boolean(false), // echo
                AmqpValue::Map(AmqpMap::new()),
            ]),
        )
    }

    pub fn on_flow(&mut self, performative: &AmqpValue) -> AmqpResult<()> {
        let fields = performative.as_list().ok_or_else(|| AmqpError::decoding("FLOW is not a list"))?;
        if let Some(AmqpValue::Uint(delivery_count)) = fields.get(5) {
            if let Some(AmqpValue::Uint(link_credit)) = fields.get(6) {
                self.link_credit = delivery_count.wrapping_add(*link_credit).wrapping_sub(self.delivery_count);
            }
        }
        Ok(())
    }

    pub fn build_transfer(&self, delivery_id: u32, message_format: u32, settled: bool) -> AmqpValue {
        AmqpValue::described(
            AmqpValue::Ulong(descriptor::TRANSFER),
            AmqpValue::List(vec![
                AmqpValue::Uint(self.handle),
                AmqpValue::Uint(delivery_id),
                AmqpValue::Binary(delivery_id.to_be_bytes().to_vec()),
                AmqpValue::Uint(message_format),
                AmqpValue::Boolean(settled),
                AmqpValue::Boolean(false), // more
            ]),
        )
    }

    /// Record an inbound TRANSFER, decoding its payload as a `Message` and
    /// queuing it for `poll_received`. Returns the delivery-id so the
    /// session can track settlement.
    pub fn on_transfer(&mut self, performative: &AmqpValue, payload: &[u8]) -> AmqpResult<u32> {
        let fields = performative.as_list().ok_or_else(|| AmqpError::decoding("TRANSFER is not a list"))?;
        let delivery_id = match fields.get(1) {
            Some(AmqpValue::Uint(id)) => *id,
            _ => return Err(AmqpError::decoding("TRANSFER missing delivery-id")),
        };
        self.delivery_count = self.delivery_count.wrapping_add(1);
        if self.link_credit > 0 {
            self.link_credit -= 1;
        }
        self.received.push(Message::decode(payload)?);
        Ok(delivery_id)
    }
}

/// Sends messages over one link handle. All mutation happens through the
/// owning `Session`'s registry; this is just a handle with a friendly API.
#[derive(Debug, Clone, Copy)]
pub struct Sender {
    handle: u32,
}

impl Sender {
    pub fn new(handle: u32) -> Self {
        Sender { handle }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }
}

/// Receives messages over one link handle.
#[derive(Debug, Clone, Copy)]
pub struct Receiver {
    handle: u32,
}

impl Receiver {
    pub fn new(handle: u32) -> Self {
        Receiver { handle }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }
}

/// Link Builder for constructing AMQP 1.0 link configurations.
#[derive(Debug, Clone, Default)]
pub struct LinkBuilder {
    config: LinkConfig,
}

impl LinkBuilder {
    pub fn new() -> Self {
        LinkBuilder { config: LinkConfig::default() }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.config.source = Some(source.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.config.target = Some(target.into());
        self
    }

    pub fn sender_settle_mode(mut self, mode: SenderSettleMode) -> Self {
        self.config.sender_settle_mode = mode;
        self
    }

    pub fn receiver_settle_mode(mut self, mode: ReceiverSettleMode) -> Self {
        self.config.receiver_settle_mode = mode;
        self
    }

    pub fn property(mut self, key: impl Into<AmqpSymbol>, value: AmqpValue) -> Self {
        self.config.properties.insert(key.into(), value);
        self
    }

    pub fn source_config(mut self, config: TerminusConfig) -> Self {
        self.config.source_config = Some(config);
        self
    }

    pub fn target_config(mut self, config: TerminusConfig) -> Self {
        self.config.target_config = Some(config);
        self
    }

    pub fn build(self) -> LinkConfig {
        self.config
    }
}

/// Terminus Builder for constructing AMQP 1.0 terminus configurations.
#[derive(Debug, Clone, Default)]
pub struct TerminusBuilder {
    config: TerminusConfig,
}

impl TerminusBuilder {
    pub fn new() -> Self {
        TerminusBuilder { config: TerminusConfig::default() }
    }

    pub fn durability(mut self, durability: TerminusDurability) -> Self {
        self.config.durability = durability;
        self
    }

    pub fn expiry_policy(mut self, policy: TerminusExpiryPolicy) -> Self {
        self.config.expiry_policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: u32) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn property(mut self, key: impl Into<AmqpSymbol>, value: AmqpValue) -> Self {
        self.config.properties.insert(key.into(), value);
        self
    }

    pub fn build(self) -> TerminusConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_builder_defaults() {
        let config = LinkBuilder::new().build();
        assert!(!config.name.is_empty());
        assert_eq!(config.sender_settle_mode, SenderSettleMode::Mixed);
        assert_eq!(config.receiver_settle_mode, ReceiverSettleMode::First);
    }

    #[test]
    fn test_attach_round_trip_sets_half_attached() {
        let config = LinkBuilder::new().name("test").source("src").target("tgt").build();
        let mut link = Link::new(7, Role::Sender, config);
        let attach = link.build_attach();
        assert_eq!(*link.state(), LinkState::Unattached);

        // Simulate the peer's reply landing.
        link.mark_half_attached();
        assert_eq!(*link.state(), LinkState::HalfAttached);
        link.on_attach(attach.strip_descriptor()).unwrap();
        assert_eq!(*link.state(), LinkState::Attached);
    }

    #[test]
    fn test_queue_send_then_take_next_send_respects_credit() {
        let config = LinkBuilder::new().build();
        let mut link = Link::new(1, Role::Sender, config);
        link.queue_send(Message::text("hello"), None);
        assert!(link.has_pending_sends());

        // No credit yet: nothing to send.
        assert!(link.take_next_send().is_none());

        link.mark_half_attached();
        link.mark_half_attached();
        link.add_credit(1);
        let sent = link.take_next_send();
        assert!(sent.is_some());
        assert_eq!(link.link_credit(), 0);
        assert!(!link.has_pending_sends());
    }

    #[test]
    fn test_transfer_round_trip_decodes_message() {
        let config = LinkBuilder::new().build();
        let mut sender_side = Link::new(2, Role::Sender, config.clone());
        sender_side.mark_half_attached();
        sender_side.mark_half_attached();
        sender_side.add_credit(1);

        let message = Message::text("payload");
        let payload = message.encode().unwrap();
        let performative = sender_side.build_transfer(1, 0, false);

        let mut receiver_side = Link::new(2, Role::Receiver, config);
        receiver_side.mark_half_attached();
        receiver_side.mark_half_attached();
        receiver_side.add_credit(1);
        let delivery_id = receiver_side.on_transfer(performative.strip_descriptor(), &payload).unwrap();
        assert_eq!(delivery_id, 1);

        let received = receiver_side.poll_received().unwrap();
        assert_eq!(received.body_as_text(), Some("payload"));
    }

    #[test]
    fn test_flow_updates_credit_from_peer_counts() {
        let config = LinkBuilder::new().build();
        let mut link = Link::new(3, Role::Sender, config);
        let flow = AmqpValue::List(vec![
            AmqpValue::Uint(0),
            AmqpValue::Uint(100),
            AmqpValue::Uint(0),
            AmqpValue::Uint(100),
            AmqpValue::Uint(3),
            AmqpValue::Uint(5),  // delivery-count
            AmqpValue::Uint(10), // link-credit
            AmqpValue::Boolean(false),
            AmqpValue::Boolean(false),
            AmqpValue::Map(AmqpMap::new()),
        ]);
        link.on_flow(&flow).unwrap();
        assert_eq!(link.link_credit(), 15);
    }
}
