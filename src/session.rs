//! One opened pedal device: identification, loading, editing and saving of
//! its pedal configuration.
//!
//! ```text
//! Closed -> Opening -> Identifying -> Ready
//!                  \-> Failed (transport could not be opened)
//! ```
//!
//! A `Ready` session keeps one slot per pedal with the last loaded or set
//! action and two dirty flags, so `save` only writes what changed.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::action::{PedalAction, Trigger};
use crate::capabilities::Capabilities;
use crate::error::{Error, Result, TransportError};
use crate::protocol::{
    self, ConfigPacket, CONFIG_INTERFACE, ENDPOINT_IN, ENDPOINT_OUT, PACKET_SIZE, PAGE_SIZE,
    TRANSFER_TIMEOUT,
};
use crate::transport::{InterfaceLock, Transport, TransportResult};

/// Reads attempted while waiting for the identification string.
pub const IDENTIFY_ATTEMPTS: usize = 10;
/// Maximum number of 8-byte pages in the identification string.
pub const IDENTIFY_SECTIONS: usize = 4;
/// Delay between reads while the device has not answered yet.
pub const IDENTIFY_BACKOFF: Duration = Duration::from_millis(50);

/// Trigger table responses are at most two pages.
const TRIGGER_TABLE_SIZE: usize = 2 * PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Identifying,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Default)]
struct PedalSlot {
    action: Option<PedalAction>,
    modified: bool,
    trigger_modified: bool,
}

pub struct PedalSession<T: Transport> {
    id: usize,
    transport: Option<T>,
    state: SessionState,
    model: Option<String>,
    version: Option<String>,
    capabilities: Capabilities,
    pedals: Vec<PedalSlot>,
    loaded: bool,
    identified: bool,
    last_error: Option<TransportError>,
}

impl<T: Transport> PedalSession<T> {
    /// Start a session on a freshly opened transport and identify the
    /// device. Never fails: check [`is_valid`](Self::is_valid) and
    /// [`last_error`](Self::last_error) instead.
    pub fn open(id: usize, transport: TransportResult<T>) -> Self {
        let capabilities = Capabilities::default();
        let mut session = Self {
            id,
            transport: None,
            state: SessionState::Opening,
            model: None,
            version: None,
            capabilities,
            pedals: vec![PedalSlot::default(); capabilities.pedal_count],
            loaded: false,
            identified: false,
            last_error: None,
        };

        match transport {
            Ok(transport) => {
                session.transport = Some(transport);
                session.state = SessionState::Identifying;
                session.identify();
                session.state = SessionState::Ready;
            }
            Err(e) => {
                warn!(device = id, "device inaccessible: {}", e);
                session.last_error = Some(e);
                session.state = SessionState::Failed;
            }
        }

        session
    }

    /// Ask the device for its model string. On failure the session keeps
    /// the single-pedal defaults and stays usable, but is not identified.
    fn identify(&mut self) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };

        let identity = match read_identity(transport) {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!(device = self.id, "device did not report its model");
                return;
            }
            Err(e) => {
                self.record_failure(e);
                return;
            }
        };

        let Some((model, version)) = parse_identity(&identity) else {
            warn!(device = self.id, identity = %identity, "unrecognised identification string");
            return;
        };

        if !Capabilities::is_known_model(model) {
            warn!(device = self.id, model, "unknown model, assuming a single pedal");
        }
        self.capabilities = Capabilities::lookup(model);
        self.pedals = vec![PedalSlot::default(); self.capabilities.pedal_count];
        info!(
            device = self.id,
            model,
            version,
            pedals = self.capabilities.pedal_count,
            "identified device"
        );
        self.model = Some(model.to_string());
        self.version = Some(version.to_string());
        self.identified = true;
    }

    /// Read every pedal's configuration and trigger mode from the device.
    pub fn load(&mut self) -> Result<()> {
        let transport = self.ready_transport()?;
        let result = read_pedals(transport, &self.capabilities);
        self.loaded = false;

        let actions = result.map_err(|e| self.record_failure(e))?;
        for (slot, action) in self.pedals.iter_mut().zip(actions) {
            *slot = PedalSlot {
                action,
                ..Default::default()
            };
        }
        self.loaded = true;
        Ok(())
    }

    /// Replace one pedal's action in memory. Nothing is sent until
    /// [`save`](Self::save).
    pub fn set_configuration(&mut self, index: usize, action: PedalAction) -> Result<()> {
        self.ready_transport()?;
        self.check_index(index)?;
        action.validate()?;

        let slot = &mut self.pedals[index];
        // An empty slot counts as press, the mode the device reports for
        // it, so giving it a release action also rewrites the trigger table.
        let previous = slot.action.as_ref().map_or(Trigger::OnPress, |a| a.trigger);
        if previous != action.trigger {
            slot.trigger_modified = true;
        }
        slot.modified = true;
        slot.action = Some(action.normalized());
        Ok(())
    }

    /// Write modified pedals to the device.
    ///
    /// On failure the dirty flags are kept so the call can be retried.
    /// Pedals written before the failing transfer stay written.
    pub fn save(&mut self) -> Result<()> {
        let transport = self.ready_transport()?;
        if !self.loaded {
            return Err(Error::NotLoaded);
        }
        if !self.is_modified() {
            debug!(device = self.id, "nothing to save");
            return Ok(());
        }

        let mut writes = Vec::new();
        for (pedal, slot) in self.pedals.iter().enumerate() {
            if let (true, Some(action)) = (slot.modified, &slot.action) {
                writes.push((self.capabilities.protocol_index(pedal), protocol::encode(action)?));
            }
        }
        let triggers = self
            .pedals
            .iter()
            .any(|slot| slot.trigger_modified)
            .then(|| self.trigger_table());

        let result = write_pedals(transport, &writes, triggers.as_deref());
        result.map_err(|e| self.record_failure(e))?;

        for slot in &mut self.pedals {
            slot.modified = false;
            slot.trigger_modified = false;
        }
        info!(device = self.id, pedals = writes.len(), "saved configuration");

        self.resync_triggers();
        Ok(())
    }

    /// Re-read the trigger table after a save. Failure only logs.
    fn resync_triggers(&mut self) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let table = InterfaceLock::claim(transport, CONFIG_INTERFACE)
            .and_then(|lock| read_trigger_table(&*lock));
        match table {
            Ok(table) => {
                for (pedal, slot) in self.pedals.iter_mut().enumerate() {
                    if let Some(action) = slot.action.as_mut() {
                        apply_trigger(action, &table, self.capabilities.protocol_index(pedal));
                    }
                }
            }
            Err(e) => warn!(device = self.id, "could not re-read trigger modes: {}", e),
        }
    }

    /// The trigger table written to the device: byte 0 is the payload size,
    /// then one byte per protocol pedal index.
    fn trigger_table(&self) -> Vec<u8> {
        let payload_size = self.capabilities.pedal_count + self.capabilities.first_pedal_index + 1;
        let mut table = vec![0u8; protocol::page_count(payload_size) * PAGE_SIZE];
        table[0] = payload_size as u8;
        for (pedal, slot) in self.pedals.iter().enumerate() {
            let trigger = slot.action.as_ref().map_or(Trigger::OnPress, |a| a.trigger);
            table[1 + self.capabilities.protocol_index(pedal)] = protocol::trigger_to_byte(trigger);
        }
        table
    }

    /// The loaded action of a pedal, `None` if the pedal is not configured.
    pub fn configuration(&self, index: usize) -> Result<Option<&PedalAction>> {
        if self.state != SessionState::Ready {
            return Err(Error::NotReady(self.state));
        }
        if !self.loaded {
            return Err(Error::NotLoaded);
        }
        self.check_index(index)?;
        Ok(self.pedals[index].action.as_ref())
    }

    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!(device = self.id, "closed device");
        }
        self.loaded = false;
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn pedal_count(&self) -> usize {
        self.capabilities.pedal_count
    }

    pub fn is_valid(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Whether the device reported a usable model string when opened.
    pub fn is_identified(&self) -> bool {
        self.identified
    }

    pub fn is_modified(&self) -> bool {
        self.pedals.iter().any(|slot| slot.modified)
    }

    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    fn ready_transport(&self) -> Result<&T> {
        match (&self.transport, self.state) {
            (Some(transport), SessionState::Ready) => Ok(transport),
            _ => Err(Error::NotReady(self.state)),
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.capabilities.pedal_count {
            return Err(Error::InvalidPedal {
                index,
                count: self.capabilities.pedal_count,
            });
        }
        Ok(())
    }

    fn record_failure(&mut self, e: TransportError) -> Error {
        warn!(device = self.id, "transfer failed: {}", e);
        self.last_error = Some(e.clone());
        Error::Transport(e)
    }
}

/// Split `MODEL_Vversion` on its last underscore.
pub fn parse_identity(identity: &str) -> Option<(&str, &str)> {
    let (model, version) = identity.rsplit_once('_')?;
    Some((model, version.strip_prefix('V').unwrap_or(version)))
}

fn send<T: Transport + ?Sized>(transport: &T, data: &[u8]) -> TransportResult<()> {
    let written = transport.write_interrupt(ENDPOINT_OUT, data, TRANSFER_TIMEOUT)?;
    if written != data.len() {
        warn!(written, expected = data.len(), "short write");
        return Err(TransportError::Io);
    }
    Ok(())
}

fn receive<T: Transport + ?Sized>(transport: &T, buf: &mut [u8]) -> TransportResult<usize> {
    transport.read_interrupt(ENDPOINT_IN, buf, TRANSFER_TIMEOUT)
}

/// The identification string, or `None` if the device never answered.
fn read_identity<T: Transport>(transport: &T) -> TransportResult<Option<String>> {
    let lock = InterfaceLock::claim(transport, CONFIG_INTERFACE)?;
    send(&*lock, &protocol::identify_request())?;

    let mut data = [0u8; IDENTIFY_SECTIONS * PAGE_SIZE];
    let mut sections = 0;
    for attempt in 0..IDENTIFY_ATTEMPTS {
        if sections == IDENTIFY_SECTIONS {
            break;
        }
        let page = &mut data[sections * PAGE_SIZE..(sections + 1) * PAGE_SIZE];
        match receive(&*lock, page) {
            Ok(n) if n > 0 => sections += 1,
            // An empty or failed read after data marks the end.
            _ if sections > 0 => break,
            _ => {
                debug!(attempt, "no identification yet");
                thread::sleep(IDENTIFY_BACKOFF);
            }
        }
    }

    if sections == 0 {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&data[..sections * PAGE_SIZE]);
    Ok(Some(text.trim_end_matches('\0').to_string()))
}

fn read_pedals<T: Transport>(
    transport: &T,
    capabilities: &Capabilities,
) -> TransportResult<Vec<Option<PedalAction>>> {
    let lock = InterfaceLock::claim(transport, CONFIG_INTERFACE)?;

    let mut actions = Vec::with_capacity(capabilities.pedal_count);
    for pedal in 0..capabilities.pedal_count {
        let packet = read_packet(&*lock, capabilities.protocol_index(pedal))?;
        let action = protocol::decode(&packet);
        debug!(pedal, ?packet, ?action, "read pedal");
        actions.push(action);
    }

    let table = read_trigger_table(&*lock)?;
    for (pedal, action) in actions.iter_mut().enumerate() {
        if let Some(action) = action {
            apply_trigger(action, &table, capabilities.protocol_index(pedal));
        }
    }

    Ok(actions)
}

fn read_packet<T: Transport + ?Sized>(transport: &T, index: usize) -> TransportResult<ConfigPacket> {
    send(transport, &protocol::read_config_request(index))?;

    let mut bytes = [0u8; PACKET_SIZE];
    receive(transport, &mut bytes[..PAGE_SIZE])?;
    let size = (bytes[0] as usize).min(PACKET_SIZE);
    for page in 1..protocol::page_count(size) {
        receive(transport, &mut bytes[page * PAGE_SIZE..(page + 1) * PAGE_SIZE])?;
    }
    Ok(ConfigPacket::from_bytes(bytes))
}

fn read_trigger_table<T: Transport + ?Sized>(
    transport: &T,
) -> TransportResult<[u8; TRIGGER_TABLE_SIZE]> {
    send(transport, &protocol::read_triggers_request())?;

    let mut table = [0u8; TRIGGER_TABLE_SIZE];
    receive(transport, &mut table[..PAGE_SIZE])?;
    if table[0] as usize > PAGE_SIZE {
        receive(transport, &mut table[PAGE_SIZE..])?;
    }
    debug!(table = %hex::encode(table), "trigger modes");
    Ok(table)
}

fn apply_trigger(action: &mut PedalAction, table: &[u8], protocol_index: usize) {
    let byte = table.get(1 + protocol_index).copied().unwrap_or_default();
    match protocol::trigger_from_byte(byte) {
        Some(trigger) => action.trigger = trigger,
        None => warn!(protocol_index, byte, "unknown trigger mode"),
    }
}

fn write_pedals<T: Transport>(
    transport: &T,
    writes: &[(usize, ConfigPacket)],
    triggers: Option<&[u8]>,
) -> TransportResult<()> {
    let lock = InterfaceLock::claim(transport, CONFIG_INTERFACE)?;

    send(&*lock, &protocol::begin_write_request())?;
    for (index, packet) in writes {
        debug!(pedal = index, ?packet, "writing pedal");
        send(&*lock, &protocol::write_config_request(packet.size(), *index))?;
        for page in packet.pages() {
            send(&*lock, page)?;
        }
    }

    if let Some(table) = triggers {
        send(&*lock, &protocol::write_triggers_request(table[0]))?;
        for page in table.chunks(PAGE_SIZE) {
            send(&*lock, page)?;
        }
    }

    Ok(())
}
