//! AMQP 1.0 Session Engine
//!
//! Drives the session state machine (§2.5.1): BEGIN/END lifecycle,
//! delivery-id bookkeeping, and a link registry keyed by handle. A `Session`
//! holds its channel number, not a pointer back to its `Connection` — every
//! method that needs to put bytes on the wire takes `&mut Connection`
//! explicitly, the same non-reentrancy discipline `Connection` itself uses
//! for its transport.

use crate::condition::AmqpCondition;
use crate::connection::{Connection, ConnectionEvent};
use crate::link::{descriptor as link_descriptor, Link, LinkConfig, OnSendComplete, Receiver, Role, Sender};
use crate::types::{AmqpList, AmqpMap, AmqpSymbol, AmqpValue};
use crate::{AmqpError, AmqpResult, Message};
use std::collections::HashMap;

mod descriptor {
    pub const BEGIN: u64 = 0x11;
    pub const END: u64 = 0x17;
}

/// AMQP 1.0 session state (§2.5.1), collapsed the same way `ConnectionState`
/// is: a session that receives BEGIN before sending its own jumps straight
/// from `Unmapped` to `Mapped` rather than sitting in a distinct
/// begin-rcvd sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unmapped,
    BeginSent,
    Mapped,
    EndSent,
    Discarding,
    End,
}

/// AMQP 1.0 session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub properties: AmqpMap,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig { incoming_window: 2048, outgoing_window: 2048, properties: AmqpMap::new() }
    }
}

/// An event surfaced from a session's link registry to the application:
/// a link finished attaching, a message arrived, or a link detached.
#[derive(Debug)]
pub enum SessionEvent {
    LinkAttached { handle: u32 },
    LinkDetached { handle: u32, condition: Option<AmqpCondition> },
    MessageAvailable { handle: u32 },
}

/// AMQP 1.0 session engine.
pub struct Session {
    id: String,
    channel: u16,
    config: SessionConfig,
    state: SessionState,
    next_outgoing_id: u32,
    next_incoming_id: u32,
    next_delivery_id: u32,
    next_handle: u32,
    links: HashMap<u32, Link>,
    /// delivery-id -> handle, so an inbound DISPOSITION (which only carries
    /// delivery-id ranges, not a handle) can be routed back to the link
    /// that sent the TRANSFER.
    unsettled: HashMap<u32, u32>,
    pending_completions: HashMap<u32, OnSendComplete>,
    close_condition: Option<AmqpCondition>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            channel: 0,
            config,
            state: SessionState::Unmapped,
            next_outgoing_id: 0,
            next_incoming_id: 0,
            next_delivery_id: 0,
            next_handle: 0,
            links: HashMap::new(),
            unsettled: HashMap::new(),
            pending_completions: HashMap::new(),
            close_condition: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Allocate a channel on `connection`, send BEGIN, and pump the
    /// connection until the peer's BEGIN (or END) arrives.
    pub async fn begin(&mut self, connection: &mut Connection) -> AmqpResult<()> {
        if self.state != SessionState::Unmapped {
            return Err(AmqpError::invalid_state("session has already begun"));
        }
        self.channel = connection.allocate_channel()?;
        self.send_begin(connection).await?;
        self.state = SessionState::BeginSent;

        loop {
            match self.state {
                SessionState::Mapped => return Ok(()),
                SessionState::End => return Err(AmqpError::connection("session ended before BEGIN completed")),
                _ => {}
            }
            let events = connection.drive().await?;
            self.process_events(connection, events).await?;
        }
    }

    /// Send END (with an optional error condition) and pump until the
    /// peer's END arrives, then release the channel.
    pub async fn end(&mut self, connection: &mut Connection, condition: Option<AmqpCondition>) -> AmqpResult<()> {
        if self.state != SessionState::Mapped {
            return Err(AmqpError::invalid_state("session is not Mapped"));
        }
        self.send_end(connection, condition.clone()).await?;
        self.state = if condition.is_some() { SessionState::Discarding } else { SessionState::EndSent };

        loop {
            if self.state == SessionState::End {
                connection.release_channel(self.channel);
                return Ok(());
            }
            let events = connection.drive().await?;
            self.process_events(connection, events).await?;
        }
    }

    /// Route `ConnectionEvent`s addressed to this session's channel.
    /// Events for other channels are silently ignored — the caller is
    /// expected to dispatch a connection's events to every live session.
    /// Takes `&mut Connection` so a peer-initiated END can be answered with
    /// our own END before the session is torn down, mirroring
    /// `Connection`'s CLOSE-before-reply ordering (§2.4.6's session-level
    /// analogue, §2.5.1).
    pub async fn process_events(&mut self, connection: &mut Connection, events: Vec<ConnectionEvent>) -> AmqpResult<Vec<SessionEvent>> {
        let mut out = Vec::new();
        for event in events {
            if event.channel != self.channel {
                continue;
            }
            let code = event
                .performative
                .descriptor()
                .and_then(|d| match d {
                    AmqpValue::Ulong(code) => Some(*code),
                    _ => None,
                })
                .ok_or_else(|| AmqpError::protocol("session frame missing a described performative"))?;
            let body = event.performative.strip_descriptor();

            match code {
                descriptor::BEGIN => self.handle_begin(body)?,
                descriptor::END => self.handle_end(connection, body).await?,
                link_descriptor::ATTACH => {
                    if let Some(handle) = self.handle_attach(body)? {
                        out.push(SessionEvent::LinkAttached { handle });
                    }
                }
                link_descriptor::FLOW => self.handle_flow(body)?,
                link_descriptor::TRANSFER => {
                    if let Some(handle) = self.handle_transfer(body, &event.payload)? {
                        out.push(SessionEvent::MessageAvailable { handle });
                    }
                }
                link_descriptor::DISPOSITION => self.handle_disposition(body)?,
                link_descriptor::DETACH => {
                    if let Some((handle, condition)) = self.handle_detach(body)? {
                        out.push(SessionEvent::LinkDetached { handle, condition });
                    }
                }
                other => return Err(AmqpError::protocol(format!("unexpected performative 0x{other:x} on session"))),
            }
        }
        Ok(out)
    }

    fn handle_begin(&mut self, fields: &AmqpValue) -> AmqpResult<()> {
        let fields = fields.as_list().ok_or_else(|| AmqpError::decoding("BEGIN is not a list"))?;
        if let Some(AmqpValue::Uint(remote_next)) = fields.get(1) {
            self.next_incoming_id = *remote_next;
        }
        self.state = match self.state {
            SessionState::BeginSent => SessionState::Mapped,
            SessionState::Unmapped => SessionState::Mapped,
            _ => return Err(AmqpError::protocol_violation(AmqpCondition::AmqpErrorIllegalState)),
        };
        Ok(())
    }

    async fn handle_end(&mut self, connection: &mut Connection, fields: &AmqpValue) -> AmqpResult<()> {
        let condition = fields.as_list().and_then(|f| f.first()).and_then(extract_condition);
        match self.state {
            SessionState::Mapped => {
                // §2.5.1's close-before-teardown: answer with our own END
                // before the channel is released, not after.
                self.send_end(connection, condition.clone()).await?;
                self.close_condition = condition;
                self.state = SessionState::End;
                connection.release_channel(self.channel);
            }
            SessionState::EndSent | SessionState::Discarding => {
                self.close_condition = condition;
                self.state = SessionState::End;
            }
            _ => return Err(AmqpError::protocol_violation(AmqpCondition::AmqpErrorIllegalState)),
        }
        Ok(())
    }

    fn handle_attach(&mut self, fields: &AmqpValue) -> AmqpResult<Option<u32>> {
        let handle = fields
            .as_list()
            .and_then(|f| f.get(1))
            .and_then(|v| match v {
                AmqpValue::Uint(h) => Some(*h),
                _ => None,
            })
            .ok_or_else(|| AmqpError::decoding("ATTACH missing handle"))?;
        let link = self.links.get_mut(&handle).ok_or_else(|| AmqpError::link(format!("ATTACH for unknown handle {handle}")))?;
        link.on_attach(fields)?;
        Ok(Some(handle))
    }

    fn handle_flow(&mut self, fields: &AmqpValue) -> AmqpResult<()> {
        let handle = fields.as_list().and_then(|f| f.get(4)).and_then(|v| match v {
            AmqpValue::Uint(h) => Some(*h),
            _ => None,
        });
        if let Some(handle) = handle {
            if let Some(link) = self.links.get_mut(&handle) {
                link.on_flow(fields)?;
            }
        }
        Ok(())
    }

    fn handle_transfer(&mut self, fields: &AmqpValue, payload: &[u8]) -> AmqpResult<Option<u32>> {
        let handle = fields
            .as_list()
            .and_then(|f| f.first())
            .and_then(|v| match v {
                AmqpValue::Uint(h) => Some(*h),
                _ => None,
            })
            .ok_or_else(|| AmqpError::decoding("TRANSFER missing handle"))?;
        let link = self.links.get_mut(&handle).ok_or_else(|| AmqpError::link(format!("TRANSFER for unknown handle {handle}")))?;
        link.on_transfer(fields, payload)?;
        self.next_incoming_id = self.next_incoming_id.wrapping_add(1);
        Ok(Some(handle))
    }

    fn handle_disposition(&mut self, fields: &AmqpValue) -> AmqpResult<()> {
        let fields = fields.as_list().ok_or_else(|| AmqpError::decoding("DISPOSITION is not a list"))?;
        let first = match fields.get(1) {
            Some(AmqpValue::Uint(v)) => *v,
            _ => return Ok(()),
        };
        let last = match fields.get(2) {
            Some(AmqpValue::Uint(v)) => *v,
            None => first,
            _ => first,
        };
        for delivery_id in first..=last {
            if let Some(_handle) = self.unsettled.remove(&delivery_id) {
                if let Some(on_complete) = self.pending_completions.remove(&delivery_id) {
                    on_complete(Ok(()));
                }
            }
        }
        Ok(())
    }

    fn handle_detach(&mut self, fields: &AmqpValue) -> AmqpResult<Option<(u32, Option<AmqpCondition>)>> {
        let list = fields.as_list().ok_or_else(|| AmqpError::decoding("DETACH is not a list"))?;
        let handle = match list.first() {
            Some(AmqpValue::Uint(h)) => *h,
            _ => return Err(AmqpError::decoding("DETACH missing handle")),
        };
        let condition = list.get(2).and_then(extract_condition);
        if let Some(link) = self.links.get_mut(&handle) {
            link.on_detach(fields);
        }
        Ok(Some((handle, condition)))
    }

    /// Attach a new sending link and pump until its ATTACH completes.
    pub async fn create_sender(&mut self, connection: &mut Connection, config: LinkConfig) -> AmqpResult<Sender> {
        let handle = self.attach_new_link(connection, Role::Sender, config).await?;
        Ok(Sender::new(handle))
    }

    /// Attach a new receiving link and pump until its ATTACH completes.
    pub async fn create_receiver(&mut self, connection: &mut Connection, config: LinkConfig) -> AmqpResult<Receiver> {
        let handle = self.attach_new_link(connection, Role::Receiver, config).await?;
        Ok(Receiver::new(handle))
    }

    async fn attach_new_link(&mut self, connection: &mut Connection, role: Role, config: LinkConfig) -> AmqpResult<u32> {
        if self.state != SessionState::Mapped {
            return Err(AmqpError::invalid_state("session is not Mapped"));
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        let link = Link::new(handle, role, config);
        let attach = link.build_attach();
        self.links.insert(handle, link);

        connection.send_performative(self.channel, &attach, &[]).await?;
        self.links.get_mut(&handle).unwrap().mark_half_attached();

        loop {
            if matches!(self.links.get(&handle).map(|l| l.state()), Some(crate::link::LinkState::Attached)) {
                return Ok(handle);
            }
            let events = connection.drive().await?;
            self.process_events(connection, events).await?;
        }
    }

    /// Queue a message on `sender`'s link and, if credit allows, send it
    /// immediately; otherwise it waits for the next `pump_sends` call
    /// (typically triggered by an inbound FLOW).
    pub async fn send(
        &mut self,
        connection: &mut Connection,
        sender: &Sender,
        message: Message,
        on_complete: Option<OnSendComplete>,
    ) -> AmqpResult<()> {
        let link = self.links.get_mut(&sender.handle()).ok_or_else(|| AmqpError::link("unknown sender handle"))?;
        link.queue_send(message, on_complete);
        self.pump_sends(connection, sender.handle()).await
    }

    /// Drain as many pending sends on `handle` as the link's credit allows.
    pub async fn pump_sends(&mut self, connection: &mut Connection, handle: u32) -> AmqpResult<()> {
        loop {
            let (performative, payload, delivery_id, on_complete) = {
                let link = match self.links.get_mut(&handle) {
                    Some(l) => l,
                    None => return Ok(()),
                };
                let pending = match link.take_next_send() {
                    Some(p) => p,
                    None => return Ok(()),
                };
                let delivery_id = self.next_delivery_id;
                self.next_delivery_id = self.next_delivery_id.wrapping_add(1);
                let payload = match pending.message.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        if let Some(on_complete) = pending.on_complete {
                            on_complete(Err(e));
                        }
                        continue;
                    }
                };
                (link.build_transfer(delivery_id, 0, false), payload, delivery_id, pending.on_complete)
            };

            match connection.send_performative(self.channel, &performative, &payload).await {
                Ok(()) => {
                    self.unsettled.insert(delivery_id, handle);
                    if let Some(on_complete) = on_complete {
                        self.pending_completions.insert(delivery_id, on_complete);
                    }
                    self.next_outgoing_id = self.next_outgoing_id.wrapping_add(1);
                }
                Err(e) => {
                    if let Some(on_complete) = on_complete {
                        on_complete(Err(e));
                    }
                }
            }
        }
    }

    pub fn poll_received(&mut self, receiver: &Receiver) -> Option<Message> {
        self.links.get_mut(&receiver.handle()).and_then(|link| link.poll_received())
    }

    /// Grant credit to a receiving link and notify the peer via FLOW.
    pub async fn add_credit(&mut self, connection: &mut Connection, receiver: &Receiver, credit: u32) -> AmqpResult<()> {
        let flow = {
            let link = self.links.get_mut(&receiver.handle()).ok_or_else(|| AmqpError::link("unknown receiver handle"))?;
            link.add_credit(credit);
            link.build_flow(self.next_incoming_id, self.config.incoming_window, self.next_outgoing_id, self.config.outgoing_window)
        };
        connection.send_performative(self.channel, &flow, &[]).await
    }

    async fn send_begin(&mut self, connection: &mut Connection) -> AmqpResult<()> {
        let fields: AmqpList = vec![
            AmqpValue::Null, // remote-channel
            AmqpValue::Uint(self.next_outgoing_id),
            AmqpValue::Uint(self.config.incoming_window),
            AmqpValue::Uint(self.config.outgoing_window),
            AmqpValue::Null, // handle-max
            AmqpValue::Null, // offered-capabilities
            AmqpValue::Null, // desired-capabilities
            AmqpValue::Map(self.config.properties.clone()),
        ];
        let begin = AmqpValue::described(AmqpValue::Ulong(descriptor::BEGIN), AmqpValue::List(fields));
        connection.send_performative(self.channel, &begin, &[]).await
    }

    async fn send_end(&mut self, connection: &mut Connection, condition: Option<AmqpCondition>) -> AmqpResult<()> {
        let error_field = match condition {
            Some(cond) => {
                let mut map = AmqpMap::new();
                map.insert(AmqpSymbol::from("condition"), AmqpValue::Symbol(cond.as_str().into()));
                AmqpValue::described(AmqpValue::Ulong(0x1d), AmqpValue::List(vec![AmqpValue::Map(map)]))
            }
            None => AmqpValue::Null,
        };
        let end = AmqpValue::described(AmqpValue::Ulong(descriptor::END), AmqpValue::List(vec![error_field]));
        connection.send_performative(self.channel, &end, &[]).await
    }
}

fn extract_condition(value: &AmqpValue) -> Option<AmqpCondition> {
    let fields = value.as_list()?;
    let error_map = fields.first()?.as_map()?;
    let condition = error_map.get(&AmqpSymbol::from("condition"))?;
    condition.as_str().map(AmqpCondition::from)
}

/// Session Builder for constructing AMQP 1.0 sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        SessionBuilder { config: SessionConfig::default() }
    }

    pub fn incoming_window(mut self, window: u32) -> Self {
        self.config.incoming_window = window;
        self
    }

    pub fn outgoing_window(mut self, window: u32) -> Self {
        self.config.outgoing_window = window;
        self
    }

    pub fn property(mut self, key: impl Into<AmqpSymbol>, value: AmqpValue) -> Self {
        self.config.properties.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Session {
        Session::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_builder_defaults() {
        let session = SessionBuilder::new().build();
        assert_eq!(session.state(), SessionState::Unmapped);
        assert_eq!(session.channel(), 0);
    }

    #[test]
    fn test_begin_fields_are_well_formed() {
        let mut session = SessionBuilder::new().incoming_window(10).outgoing_window(20).build();
        session.channel = 3;
        let fields: AmqpList = vec![
            AmqpValue::Null,
            AmqpValue::Uint(session.next_outgoing_id),
            AmqpValue::Uint(session.config.incoming_window),
            AmqpValue::Uint(session.config.outgoing_window),
        ];
        assert_eq!(fields[2], AmqpValue::Uint(10));
        assert_eq!(fields[3], AmqpValue::Uint(20));
    }

    #[test]
    fn test_handle_begin_transitions_to_mapped() {
        let mut session = SessionBuilder::new().build();
        session.state = SessionState::BeginSent;
        let begin_body = AmqpValue::List(vec![
            AmqpValue::Null,
            AmqpValue::Uint(0),
            AmqpValue::Uint(100),
            AmqpValue::Uint(100),
        ]);
        session.handle_begin(&begin_body).unwrap();
        assert_eq!(session.state(), SessionState::Mapped);
    }

    #[test]
    fn test_disposition_settles_pending_completion() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let mut session = SessionBuilder::new().build();
        session.unsettled.insert(5, 1);
        let settled = Arc::new(AtomicBool::new(false));
        let settled_clone = settled.clone();
        session.pending_completions.insert(5, Box::new(move |result| {
            settled_clone.store(result.is_ok(), Ordering::SeqCst);
        }));

        let disposition = AmqpValue::List(vec![
            AmqpValue::Boolean(false),
            AmqpValue::Uint(5),
            AmqpValue::Uint(5),
            AmqpValue::Boolean(true),
        ]);
        session.handle_disposition(&disposition).unwrap();
        assert!(settled.load(Ordering::SeqCst));
        assert!(!session.unsettled.contains_key(&5));
    }
}
