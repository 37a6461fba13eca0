//! Wire format of the pedal configuration protocol.
//!
//! Every transfer on the configuration endpoint is an 8-byte page. Requests
//! are a single page starting with `0x01` followed by a command byte. Pedal
//! configurations travel as a [`ConfigPacket`] of up to 40 bytes split into
//! pages:
//!
//! ```text
//! Byte 0:     size (meaningful bytes, header included)
//! Byte 1:     config type
//! Byte 2-39:  payload
//!
//! keyboard:   [modifiers, key1 .. key6]
//! mouse:      [reserved, reserved, buttons, x, y, wheel]
//! text:       [scan code | 0x80 when shifted] .. up to 38, zero terminated
//! media:      [key (1-based)]
//! gamepad:    [button (1-based)]
//! ```

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::action::{
    ActionKind, GamepadButton, KeyMode, KeyboardAction, MediaButton, MouseAction, MouseButton,
    PedalAction, Trigger, MAX_KEYS, MAX_TEXT_LENGTH,
};
use crate::error::{Error, Result};
use crate::scancodes::{self, Modifier, SHIFT_FLAG, SPACE_SCAN_CODE};

pub const VENDOR_ID: u16 = 0x1a86;
pub const PRODUCT_ID: u16 = 0xe026;

/// Interface carrying the configuration endpoint.
pub const CONFIG_INTERFACE: u8 = 1;
pub const ENDPOINT_OUT: u8 = 0x02;
pub const ENDPOINT_IN: u8 = 0x82;

pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(100);

pub const PAGE_SIZE: usize = 8;
pub const PACKET_SIZE: usize = 40;
pub const HEADER_SIZE: usize = 2;

/// Size reported for packets that fill exactly one page.
const SINGLE_PAGE_SIZE: u8 = PAGE_SIZE as u8;

pub type Page = [u8; PAGE_SIZE];

/// Config type byte (packet byte 1).
pub mod config_type {
    pub const NONE: u8 = 0x00;
    pub const KEYBOARD: u8 = 0x01;
    pub const KEYBOARD_MULTI: u8 = 0x11;
    pub const KEYBOARD_ONCE: u8 = 0x81;
    pub const KEYBOARD_ONCE_MULTI: u8 = 0x91;
    pub const MOUSE: u8 = 0x02;
    pub const TEXT: u8 = 0x04;
    pub const MEDIA: u8 = 0x07;
    pub const GAMEPAD: u8 = 0x08;

    pub const ONE_SHOT_FLAG: u8 = 0x80;
}

/// Command byte of a request page.
pub mod command {
    pub const BEGIN_WRITE: u8 = 0x80;
    pub const WRITE_CONFIG: u8 = 0x81;
    pub const READ_CONFIG: u8 = 0x82;
    pub const READ_MODEL: u8 = 0x83;
    pub const WRITE_TRIGGERS: u8 = 0x85;
    pub const READ_TRIGGERS: u8 = 0x86;
}

/// Per-pedal byte in the trigger table.
pub mod trigger_mode {
    pub const RELEASE: u8 = 0x00;
    pub const PRESS: u8 = 0x01;
}

// Keyboard payload layout
const KEYBOARD_MODIFIERS: usize = 0;
const KEYBOARD_KEYS: usize = 1;
/// Header plus modifier byte.
const KEYBOARD_FIXED_SIZE: usize = HEADER_SIZE + 1;

// Mouse payload layout
const MOUSE_BUTTONS: usize = 2;
const MOUSE_X: usize = 3;
const MOUSE_Y: usize = 4;
const MOUSE_WHEEL: usize = 5;

fn request(command: u8, length: u8, argument: u8) -> Page {
    [0x01, command, length, argument, 0, 0, 0, 0]
}

pub fn identify_request() -> Page {
    request(command::READ_MODEL, 0x08, 0)
}

/// `pedal` is the protocol-level index (offset already applied).
pub fn read_config_request(pedal: usize) -> Page {
    request(command::READ_CONFIG, 0x08, pedal as u8 + 1)
}

pub fn read_triggers_request() -> Page {
    request(command::READ_TRIGGERS, 0, 0)
}

pub fn begin_write_request() -> Page {
    request(command::BEGIN_WRITE, 0x08, 0x01)
}

pub fn write_config_request(size: u8, pedal: usize) -> Page {
    request(command::WRITE_CONFIG, size, pedal as u8 + 1)
}

pub fn write_triggers_request(payload_size: u8) -> Page {
    request(command::WRITE_TRIGGERS, payload_size, 0)
}

/// Number of 8-byte pages needed for `size` bytes.
pub fn page_count(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE)
}

pub fn trigger_to_byte(trigger: Trigger) -> u8 {
    match trigger {
        Trigger::OnPress => trigger_mode::PRESS,
        Trigger::OnRelease => trigger_mode::RELEASE,
    }
}

pub fn trigger_from_byte(byte: u8) -> Option<Trigger> {
    match byte {
        trigger_mode::PRESS => Some(Trigger::OnPress),
        trigger_mode::RELEASE => Some(Trigger::OnRelease),
        _ => None,
    }
}

fn mouse_button_bit(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 0x01,
        MouseButton::Right => 0x02,
        MouseButton::Middle => 0x04,
        MouseButton::Back => 0x08,
        MouseButton::Forward => 0x10,
    }
}

/// One pedal's configuration as stored by the firmware.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigPacket {
    bytes: [u8; PACKET_SIZE],
}

impl ConfigPacket {
    fn new(kind: u8, size: u8) -> Self {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[0] = size;
        bytes[1] = kind;
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; PACKET_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn size(&self) -> u8 {
        self.bytes[0]
    }

    pub fn kind(&self) -> u8 {
        self.bytes[1]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[HEADER_SIZE..]
    }

    /// The pages that carry this packet, as sent after a write request.
    pub fn pages(&self) -> impl Iterator<Item = &[u8]> {
        let count = page_count(self.size() as usize).min(PACKET_SIZE / PAGE_SIZE);
        self.bytes.chunks(PAGE_SIZE).take(count)
    }
}

impl fmt::Debug for ConfigPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = (self.size() as usize).clamp(HEADER_SIZE, PACKET_SIZE);
        f.debug_struct("ConfigPacket")
            .field("size", &self.size())
            .field("kind", &format_args!("0x{:02X}", self.kind()))
            .field("bytes", &hex::encode(&self.bytes[..len]))
            .finish()
    }
}

/// Decode a packet read from the device.
///
/// Returns `None` for an unconfigured pedal or a packet that does not make
/// sense (oversized, unknown type, out-of-range enum value). The returned
/// action triggers on press; the trigger table is read separately.
pub fn decode(packet: &ConfigPacket) -> Option<PedalAction> {
    if packet.size() as usize > PACKET_SIZE {
        warn!(size = packet.size(), "config packet larger than {} bytes", PACKET_SIZE);
        return None;
    }

    let kind = match packet.kind() {
        config_type::KEYBOARD
        | config_type::KEYBOARD_MULTI
        | config_type::KEYBOARD_ONCE
        | config_type::KEYBOARD_ONCE_MULTI => decode_keyboard(packet).map(ActionKind::Keyboard),
        config_type::MOUSE => decode_mouse(packet).map(ActionKind::Mouse),
        config_type::TEXT => Some(ActionKind::Text(decode_text(packet))),
        config_type::MEDIA => {
            let value = packet.payload()[0];
            let button = value
                .checked_sub(1)
                .and_then(|index| MediaButton::from_index(index as usize));
            if button.is_none() {
                warn!(value, "unknown media key");
            }
            button.map(ActionKind::Media)
        }
        config_type::GAMEPAD => {
            let value = packet.payload()[0];
            let button = value
                .checked_sub(1)
                .and_then(|index| GamepadButton::from_index(index as usize));
            if button.is_none() {
                warn!(value, "unknown gamepad button");
            }
            button.map(ActionKind::Gamepad)
        }
        config_type::NONE => {
            debug!("pedal is not configured");
            None
        }
        other => {
            warn!("unknown config type 0x{:02X}", other);
            None
        }
    }?;

    Some(PedalAction::new(kind, Trigger::OnPress))
}

fn decode_keyboard(packet: &ConfigPacket) -> Option<KeyboardAction> {
    let mode = if packet.kind() & config_type::ONE_SHOT_FLAG != 0 {
        KeyMode::OneShot
    } else {
        KeyMode::Standard
    };

    let payload = packet.payload();
    let modifiers = payload[KEYBOARD_MODIFIERS];
    let mut keys: Vec<&str> = Modifier::ALL
        .into_iter()
        .filter(|m| modifiers & m.bit() != 0)
        .map(Modifier::name)
        .collect();

    let slots = (packet.size() as usize)
        .saturating_sub(KEYBOARD_FIXED_SIZE)
        .min(MAX_KEYS);
    for &code in &payload[KEYBOARD_KEYS..KEYBOARD_KEYS + slots] {
        if code == 0 {
            break;
        }
        match scancodes::scan_code_to_key_name(code) {
            Some(name) => keys.push(name),
            None => warn!("skipping unknown scan code 0x{:02X}", code),
        }
    }

    match KeyboardAction::new(mode, keys) {
        Ok(keyboard) => Some(keyboard),
        Err(e) => {
            warn!("unusable keyboard config: {}", e);
            None
        }
    }
}

fn decode_mouse(packet: &ConfigPacket) -> Option<MouseAction> {
    let payload = packet.payload();
    let bits = payload[MOUSE_BUTTONS];
    let buttons: std::collections::BTreeSet<MouseButton> = MouseButton::ALL
        .into_iter()
        .filter(|b| bits & mouse_button_bit(*b) != 0)
        .collect();

    if !buttons.is_empty() {
        return Some(MouseAction::Buttons(buttons));
    }

    let axis = MouseAction::axis(
        (payload[MOUSE_X] as i8).into(),
        (payload[MOUSE_Y] as i8).into(),
        (payload[MOUSE_WHEEL] as i8).into(),
    );
    match axis {
        Ok(mouse) => Some(mouse),
        Err(e) => {
            warn!("unusable mouse config: {}", e);
            None
        }
    }
}

fn decode_text(packet: &ConfigPacket) -> String {
    packet
        .payload()
        .iter()
        .take_while(|&&b| b != 0)
        .filter_map(|&b| scancodes::scan_code_to_printable(b & !SHIFT_FLAG, b & SHIFT_FLAG != 0))
        .collect()
}

/// Encode an action for writing to the device. The trigger is not part of
/// the packet.
pub fn encode(action: &PedalAction) -> Result<ConfigPacket> {
    match &action.kind {
        ActionKind::Keyboard(keyboard) => encode_keyboard(keyboard),
        ActionKind::Mouse(mouse) => Ok(encode_mouse(mouse)),
        ActionKind::Text(text) => Ok(encode_text(text)),
        ActionKind::Media(button) => {
            let mut packet = ConfigPacket::new(config_type::MEDIA, SINGLE_PAGE_SIZE);
            packet.payload_mut()[0] = button.index() as u8 + 1;
            Ok(packet)
        }
        ActionKind::Gamepad(button) => {
            let mut packet = ConfigPacket::new(config_type::GAMEPAD, SINGLE_PAGE_SIZE);
            packet.payload_mut()[0] = button.index() as u8 + 1;
            Ok(packet)
        }
    }
}

fn encode_keyboard(keyboard: &KeyboardAction) -> Result<ConfigPacket> {
    if keyboard.keys().is_empty() {
        return Err(Error::NoKeys);
    }
    let count = keyboard.non_modifier_count();
    if count > MAX_KEYS {
        return Err(Error::TooManyKeys(count));
    }

    let kind = match (keyboard.mode, count > 1) {
        (KeyMode::Standard, false) => config_type::KEYBOARD,
        (KeyMode::Standard, true) => config_type::KEYBOARD_MULTI,
        (KeyMode::OneShot, false) => config_type::KEYBOARD_ONCE,
        (KeyMode::OneShot, true) => config_type::KEYBOARD_ONCE_MULTI,
    };

    // The firmware expects a full page when exactly one key is set.
    let size = if count == 1 {
        SINGLE_PAGE_SIZE
    } else {
        (KEYBOARD_FIXED_SIZE + count) as u8
    };

    let mut packet = ConfigPacket::new(kind, size);
    let payload = packet.payload_mut();
    payload[KEYBOARD_MODIFIERS] = keyboard.modifiers().fold(0, |acc, m| acc | m.bit());
    for (slot, key) in keyboard.regular_keys().enumerate() {
        payload[KEYBOARD_KEYS + slot] = scancodes::key_name_to_scan_code(key)
            .ok_or_else(|| Error::UnknownKey(key.to_string()))?;
    }

    Ok(packet)
}

fn encode_mouse(mouse: &MouseAction) -> ConfigPacket {
    let mut packet = ConfigPacket::new(config_type::MOUSE, SINGLE_PAGE_SIZE);
    let payload = packet.payload_mut();
    match mouse {
        MouseAction::Buttons(buttons) => {
            payload[MOUSE_BUTTONS] = buttons.iter().fold(0, |acc, b| acc | mouse_button_bit(*b));
        }
        MouseAction::Axis { x, y, wheel } => {
            payload[MOUSE_X] = *x as u8;
            payload[MOUSE_Y] = *y as u8;
            payload[MOUSE_WHEEL] = *wheel as u8;
        }
    }
    packet
}

fn encode_text(text: &str) -> ConfigPacket {
    let codes: Vec<u8> = text
        .chars()
        .take(MAX_TEXT_LENGTH)
        .map(|c| {
            scancodes::printable_to_scan_code(c).unwrap_or_else(|| {
                warn!("character {:?} cannot be typed, using a space", c);
                SPACE_SCAN_CODE
            })
        })
        .collect();

    let mut packet = ConfigPacket::new(config_type::TEXT, (HEADER_SIZE + codes.len()) as u8);
    packet.payload_mut()[..codes.len()].copy_from_slice(&codes);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyboard(mode: KeyMode, keys: &str) -> PedalAction {
        PedalAction::keyboard(KeyboardAction::parse(mode, keys).unwrap(), Trigger::OnPress)
    }

    fn round_trip(action: &PedalAction) -> PedalAction {
        decode(&encode(action).unwrap()).unwrap()
    }

    #[test]
    fn single_key_with_modifier_uses_full_page() {
        let packet = encode(&keyboard(KeyMode::Standard, "lcontrol+s")).unwrap();
        assert_eq!(packet.size(), 8);
        assert_eq!(packet.kind(), config_type::KEYBOARD);
        assert_eq!(packet.pages().next(), Some(&[0x08, 0x01, 0x01, 0x16, 0, 0, 0, 0][..]));
        assert_eq!(packet.pages().count(), 1);
    }

    #[test]
    fn single_key_one_shot_type() {
        let packet = encode(&keyboard(KeyMode::OneShot, "a")).unwrap();
        assert_eq!(packet.size(), 8);
        assert_eq!(packet.kind(), config_type::KEYBOARD_ONCE);
    }

    #[test]
    fn multi_key_size_and_type() {
        let packet = encode(&keyboard(KeyMode::Standard, "a+b")).unwrap();
        assert_eq!(packet.size(), 5);
        assert_eq!(packet.kind(), config_type::KEYBOARD_MULTI);

        let packet = encode(&keyboard(KeyMode::OneShot, "lshift+a+b+c+d+e+f")).unwrap();
        assert_eq!(packet.size(), 9);
        assert_eq!(packet.kind(), config_type::KEYBOARD_ONCE_MULTI);
        assert_eq!(packet.payload()[0], 0x02);
        assert_eq!(&packet.payload()[1..7], &[0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);
        assert_eq!(packet.pages().count(), 2);
    }

    #[test]
    fn modifier_only_keyboard() {
        let action = keyboard(KeyMode::Standard, "lcontrol+rsuper");
        let packet = encode(&action).unwrap();
        assert_eq!(packet.size(), 3);
        assert_eq!(packet.payload()[0], 0x81);
        assert_eq!(round_trip(&action), action);
    }

    #[test]
    fn keyboard_round_trip_is_canonical() {
        let action = keyboard(KeyMode::OneShot, "s+ralt+lcontrol");
        let decoded = round_trip(&action);
        let ActionKind::Keyboard(ref keys) = decoded.kind else {
            panic!("expected keyboard, got {decoded:?}");
        };
        assert_eq!(keys.keys(), ["lcontrol", "ralt", "s"]);
        assert_eq!(keys.mode, KeyMode::OneShot);

        let ActionKind::Keyboard(ref original) = action.kind else {
            unreachable!()
        };
        assert_eq!(keys, &original.canonical());
    }

    #[test]
    fn keyboard_round_trip_six_keys() {
        let action = keyboard(KeyMode::Standard, "lsuper+f1+f2+page_up+num7+return+escape");
        assert_eq!(round_trip(&action), action);
    }

    #[test]
    fn decode_stops_key_slots_at_size() {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[..8].copy_from_slice(&[0x04, config_type::KEYBOARD_MULTI, 0, 0x04, 0x05, 0, 0, 0]);
        let decoded = decode(&ConfigPacket::from_bytes(bytes)).unwrap();
        assert_eq!(decoded, keyboard(KeyMode::Standard, "a"));
    }

    #[test]
    fn mouse_buttons_win_over_movement() {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[..8].copy_from_slice(&[0x08, config_type::MOUSE, 0, 0, 0x11, 0x10, 0xF0, 0x01]);
        let decoded = decode(&ConfigPacket::from_bytes(bytes)).unwrap();
        assert_eq!(
            decoded.kind,
            ActionKind::Mouse(MouseAction::Buttons(
                [MouseButton::Left, MouseButton::Forward].into()
            ))
        );
    }

    #[test]
    fn mouse_without_buttons_is_axis() {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[..8].copy_from_slice(&[0x08, config_type::MOUSE, 0, 0, 0, 0x64, 0x9C, 0xFF]);
        let decoded = decode(&ConfigPacket::from_bytes(bytes)).unwrap();
        assert_eq!(
            decoded.kind,
            ActionKind::Mouse(MouseAction::Axis { x: 100, y: -100, wheel: -1 })
        );
    }

    #[test]
    fn mouse_movement_out_of_range_is_rejected() {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[..8].copy_from_slice(&[0x08, config_type::MOUSE, 0, 0, 0, 0x80, 0x7F, 0x00]);
        assert_eq!(decode(&ConfigPacket::from_bytes(bytes)), None);

        bytes[7] = 0x65;
        bytes[5] = 0;
        bytes[6] = 0;
        assert_eq!(decode(&ConfigPacket::from_bytes(bytes)), None);
    }

    #[test]
    fn mouse_round_trips() {
        let buttons = PedalAction::mouse(
            MouseAction::parse_buttons("right+middle+back").unwrap(),
            Trigger::OnPress,
        );
        assert_eq!(round_trip(&buttons), buttons);

        let axis = PedalAction::mouse(MouseAction::axis(-5, 42, 3).unwrap(), Trigger::OnPress);
        assert_eq!(round_trip(&axis), axis);
    }

    #[test]
    fn text_encoding_and_round_trip() {
        let action = PedalAction::text("Hi, world!", Trigger::OnPress);
        let packet = encode(&action).unwrap();
        assert_eq!(packet.kind(), config_type::TEXT);
        assert_eq!(packet.size(), 12);
        assert_eq!(packet.payload()[0], 0x0B | SHIFT_FLAG);
        assert_eq!(packet.payload()[1], 0x0C);
        assert_eq!(round_trip(&action), action);
    }

    #[test]
    fn text_uses_at_most_38_characters() {
        let long = "x".repeat(50);
        let action = PedalAction::new(ActionKind::Text(long), Trigger::OnPress);
        let packet = encode(&action).unwrap();
        assert_eq!(packet.size() as usize, PACKET_SIZE);
        assert_eq!(packet.pages().count(), 5);
        assert_eq!(
            round_trip(&action).kind,
            ActionKind::Text("x".repeat(MAX_TEXT_LENGTH))
        );

        let exact = PedalAction::text(&"y".repeat(38), Trigger::OnPress);
        assert_eq!(round_trip(&exact), exact);
    }

    #[test]
    fn untypable_characters_become_spaces() {
        let action = PedalAction::text("a\u{e9}b", Trigger::OnPress);
        let packet = encode(&action).unwrap();
        assert_eq!(&packet.payload()[..3], &[0x04, SPACE_SCAN_CODE, 0x05]);
    }

    #[test]
    fn decode_text_skips_unprintable_codes() {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[..6].copy_from_slice(&[0x06, config_type::TEXT, 0x04, 0x3A, 0x05 | SHIFT_FLAG, 0]);
        let decoded = decode(&ConfigPacket::from_bytes(bytes)).unwrap();
        assert_eq!(decoded.kind, ActionKind::Text("aB".into()));
    }

    #[test]
    fn media_and_gamepad_are_one_based() {
        for &button in MediaButton::ALL {
            let action = PedalAction::media(button, Trigger::OnPress);
            let packet = encode(&action).unwrap();
            assert_eq!(packet.payload()[0] as usize, button.index() + 1);
            assert_eq!(round_trip(&action), action);
        }
        for &button in GamepadButton::ALL {
            let action = PedalAction::gamepad(button, Trigger::OnPress);
            assert_eq!(round_trip(&action), action);
        }

        let packet = encode(&PedalAction::gamepad(GamepadButton::Left, Trigger::OnPress)).unwrap();
        assert_eq!(packet.size(), 8);
        assert_eq!(packet.kind(), config_type::GAMEPAD);
        assert_eq!(packet.payload()[0], 0x01);
    }

    #[test]
    fn framing_errors_decode_to_nothing() {
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[0] = 41;
        bytes[1] = config_type::KEYBOARD;
        assert_eq!(decode(&ConfigPacket::from_bytes(bytes)), None);

        bytes[0] = 8;
        bytes[1] = 0x42;
        assert_eq!(decode(&ConfigPacket::from_bytes(bytes)), None);

        bytes[1] = config_type::MEDIA;
        bytes[2] = 0;
        assert_eq!(decode(&ConfigPacket::from_bytes(bytes)), None);
        bytes[2] = 20;
        assert_eq!(decode(&ConfigPacket::from_bytes(bytes)), None);

        assert_eq!(decode(&ConfigPacket::from_bytes([0u8; PACKET_SIZE])), None);
    }

    #[test]
    fn request_pages() {
        assert_eq!(identify_request(), [0x01, 0x83, 0x08, 0, 0, 0, 0, 0]);
        assert_eq!(read_config_request(1), [0x01, 0x82, 0x08, 0x02, 0, 0, 0, 0]);
        assert_eq!(read_triggers_request(), [0x01, 0x86, 0, 0, 0, 0, 0, 0]);
        assert_eq!(begin_write_request(), [0x01, 0x80, 0x08, 0x01, 0, 0, 0, 0]);
        assert_eq!(write_config_request(9, 0), [0x01, 0x81, 0x09, 0x01, 0, 0, 0, 0]);
        assert_eq!(write_triggers_request(4), [0x01, 0x85, 0x04, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn trigger_bytes() {
        assert_eq!(trigger_to_byte(Trigger::OnPress), 1);
        assert_eq!(trigger_to_byte(Trigger::OnRelease), 0);
        assert_eq!(trigger_from_byte(0), Some(Trigger::OnRelease));
        assert_eq!(trigger_from_byte(1), Some(Trigger::OnPress));
        assert_eq!(trigger_from_byte(7), None);
    }
}
