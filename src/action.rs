//! Semantic model of what a pedal does.
//!
//! A [`PedalAction`] is one of five kinds (keyboard, mouse, text, media,
//! gamepad) plus the trigger polarity shared by all of them. Constructors
//! validate their input so that an action that exists can always be encoded.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::scancodes::{self, Modifier};

/// Longest text the firmware can store.
pub const MAX_TEXT_LENGTH: usize = 38;

/// Key slots available for non-modifier keys.
pub const MAX_KEYS: usize = 6;

/// Mouse movement range accepted for each axis.
pub const AXIS_RANGE: std::ops::RangeInclusive<i64> = -100..=100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    OnPress,
    OnRelease,
}

impl Trigger {
    /// `--invert` on the command line selects release.
    pub fn from_inverted(inverted: bool) -> Self {
        if inverted {
            Trigger::OnRelease
        } else {
            Trigger::OnPress
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::OnPress => write!(f, "on press"),
            Trigger::OnRelease => write!(f, "on release"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Keys stay down (and repeat) while the pedal is held.
    #[default]
    Standard,
    /// Keys are pressed and released once per activation.
    OneShot,
}

/// Keyboard keys pressed together.
///
/// Keys are kept in the order given; modifier names may appear anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyboardAction {
    pub mode: KeyMode,
    keys: Vec<String>,
}

impl KeyboardAction {
    pub fn new<I, S>(mode: KeyMode, keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut validated: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into();
            if !scancodes::is_valid_key(&key) {
                return Err(Error::UnknownKey(key));
            }
            if validated.contains(&key) {
                return Err(Error::DuplicateKey(key));
            }
            validated.push(key);
        }

        if validated.is_empty() {
            return Err(Error::NoKeys);
        }

        let action = Self {
            mode,
            keys: validated,
        };
        let count = action.non_modifier_count();
        if count > MAX_KEYS {
            return Err(Error::TooManyKeys(count));
        }

        Ok(action)
    }

    /// Parse a `+`-separated combination such as `lcontrol+s`.
    pub fn parse(mode: KeyMode, combination: &str) -> Result<Self> {
        if combination.trim().is_empty() {
            return Err(Error::NoKeys);
        }

        let mut keys: Vec<String> = Vec::new();
        for part in combination.split('+').map(str::trim) {
            match keys.last_mut() {
                // `num+` contains the separator itself.
                Some(last)
                    if part.is_empty()
                        && !last.ends_with('+')
                        && scancodes::is_valid_key(&format!("{last}+")) =>
                {
                    last.push('+')
                }
                _ => keys.push(part.to_string()),
            }
        }
        Self::new(mode, keys)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn modifiers(&self) -> impl Iterator<Item = Modifier> + '_ {
        self.keys.iter().filter_map(|key| Modifier::from_name(key))
    }

    /// Non-modifier keys in the order given.
    pub fn regular_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys
            .iter()
            .map(String::as_str)
            .filter(|key| !scancodes::is_modifier_key(key))
    }

    pub fn non_modifier_count(&self) -> usize {
        self.regular_keys().count()
    }

    /// Modifiers first (in bitmask order), then regular keys: the order the
    /// device reports them back in.
    pub fn canonical(&self) -> Self {
        let mut keys: Vec<String> = Modifier::ALL
            .into_iter()
            .filter(|m| self.keys.iter().any(|k| k == m.name()))
            .map(|m| m.name().to_string())
            .collect();
        keys.extend(self.regular_keys().map(str::to_string));
        Self {
            mode: self.mode,
            keys,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

impl MouseButton {
    pub const ALL: [MouseButton; 5] = [
        MouseButton::Left,
        MouseButton::Right,
        MouseButton::Middle,
        MouseButton::Back,
        MouseButton::Forward,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::Back => "back",
            MouseButton::Forward => "forward",
        }
    }
}

impl FromStr for MouseButton {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.name() == s)
            .ok_or_else(|| Error::UnknownName {
                kind: "mouse button",
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseAction {
    Buttons(BTreeSet<MouseButton>),
    Axis { x: i8, y: i8, wheel: i8 },
}

impl MouseAction {
    pub fn buttons<I: IntoIterator<Item = MouseButton>>(buttons: I) -> Result<Self> {
        let mut set = BTreeSet::new();
        for button in buttons {
            if !set.insert(button) {
                return Err(Error::DuplicateKey(button.name().to_string()));
            }
        }
        if set.is_empty() {
            return Err(Error::NoMouseButtons);
        }
        Ok(MouseAction::Buttons(set))
    }

    /// Parse a `+`-separated button list such as `left+forward`.
    pub fn parse_buttons(list: &str) -> Result<Self> {
        let buttons = list
            .split('+')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(MouseButton::from_str)
            .collect::<Result<Vec<_>>>()?;
        Self::buttons(buttons)
    }

    pub fn axis(x: i64, y: i64, wheel: i64) -> Result<Self> {
        Ok(MouseAction::Axis {
            x: checked_axis("X", x)?,
            y: checked_axis("Y", y)?,
            wheel: checked_axis("wheel", wheel)?,
        })
    }
}

fn checked_axis(axis: &'static str, value: i64) -> Result<i8> {
    if !AXIS_RANGE.contains(&value) {
        return Err(Error::AxisOutOfRange { axis, value });
    }
    Ok(value as i8)
}

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $text:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Every value, in wire order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            /// Zero-based position in wire order.
            pub fn index(self) -> usize {
                Self::ALL.iter().position(|v| *v == self).unwrap_or_default()
            }

            pub fn from_index(index: usize) -> Option<Self> {
                Self::ALL.get(index).copied()
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name() == s)
                    .ok_or_else(|| Error::UnknownName {
                        kind: $kind,
                        name: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_enum! {
    /// Multimedia and application-launch keys.
    MediaButton, "media key" {
        DecreaseVolume => "decrease_volume",
        IncreaseVolume => "increase_volume",
        Mute => "mute",
        Play => "play",
        Forward => "forward",
        Next => "next",
        Stop => "stop",
        OpenPlayer => "open_player",
        OpenHomepage => "open_homepage",
        StopWebpage => "stop_webpage",
        NavigateBack => "navigate_back",
        NavigateForward => "navigate_forward",
        Refresh => "refresh",
        OpenMyComputer => "open_my_computer",
        OpenMail => "open_mail",
        OpenCalc => "open_calc",
        OpenSearch => "open_search",
        Shutdown => "shutdown",
        Sleep => "sleep",
    }
}

named_enum! {
    /// Game controller directions and buttons.
    GamepadButton, "gamepad button" {
        Left => "left",
        Right => "right",
        Up => "up",
        Down => "down",
        Button1 => "button1",
        Button2 => "button2",
        Button3 => "button3",
        Button4 => "button4",
        Button5 => "button5",
        Button6 => "button6",
        Button7 => "button7",
        Button8 => "button8",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum ActionKind {
    Keyboard(KeyboardAction),
    Mouse(MouseAction),
    Text(String),
    Media(MediaButton),
    Gamepad(GamepadButton),
}

/// The configured behaviour of one pedal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PedalAction {
    pub trigger: Trigger,
    pub kind: ActionKind,
}

impl PedalAction {
    pub fn new(kind: ActionKind, trigger: Trigger) -> Self {
        Self { trigger, kind }
    }

    pub fn keyboard(keyboard: KeyboardAction, trigger: Trigger) -> Self {
        Self::new(ActionKind::Keyboard(keyboard), trigger)
    }

    pub fn mouse(mouse: MouseAction, trigger: Trigger) -> Self {
        Self::new(ActionKind::Mouse(mouse), trigger)
    }

    /// Text longer than [`MAX_TEXT_LENGTH`] characters is cut down, with a
    /// warning.
    pub fn text(text: &str, trigger: Trigger) -> Self {
        let length = text.chars().count();
        let text = if length > MAX_TEXT_LENGTH {
            warn!(
                length,
                "text is limited to {} characters, only the first {} will be used",
                MAX_TEXT_LENGTH,
                MAX_TEXT_LENGTH
            );
            text.chars().take(MAX_TEXT_LENGTH).collect()
        } else {
            text.to_string()
        };
        Self::new(ActionKind::Text(text), trigger)
    }

    pub fn media(button: MediaButton, trigger: Trigger) -> Self {
        Self::new(ActionKind::Media(button), trigger)
    }

    pub fn gamepad(button: GamepadButton, trigger: Trigger) -> Self {
        Self::new(ActionKind::Gamepad(button), trigger)
    }

    /// The form the device reports the action back in.
    pub fn normalized(self) -> Self {
        match self.kind {
            ActionKind::Keyboard(ref keyboard) => {
                Self::new(ActionKind::Keyboard(keyboard.canonical()), self.trigger)
            }
            _ => self,
        }
    }

    /// Re-check the invariants of an action that may have been assembled by
    /// hand rather than through the validating constructors.
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            ActionKind::Keyboard(keyboard) => {
                KeyboardAction::new(keyboard.mode, keyboard.keys.iter().cloned())?;
            }
            ActionKind::Mouse(MouseAction::Buttons(buttons)) if buttons.is_empty() => {
                return Err(Error::NoMouseButtons);
            }
            ActionKind::Mouse(MouseAction::Axis { x, y, wheel }) => {
                MouseAction::axis(*x as i64, *y as i64, *wheel as i64)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ActionKind::Keyboard(_) => "keyboard",
            ActionKind::Mouse(_) => "mouse",
            ActionKind::Text(_) => "text",
            ActionKind::Media(_) => "media",
            ActionKind::Gamepad(_) => "gamepad",
        }
    }

    /// Short description without the trigger, e.g. `lcontrol+s (once)`.
    pub fn summary(&self) -> String {
        match &self.kind {
            ActionKind::Keyboard(keyboard) => {
                let keys = keyboard.keys().join("+");
                match keyboard.mode {
                    KeyMode::Standard => keys,
                    KeyMode::OneShot => format!("{keys} (once)"),
                }
            }
            ActionKind::Mouse(MouseAction::Buttons(buttons)) => buttons
                .iter()
                .map(|b| b.name())
                .collect::<Vec<_>>()
                .join("+"),
            ActionKind::Mouse(MouseAction::Axis { x, y, wheel }) => {
                format!("move x={x} y={y} wheel={wheel}")
            }
            ActionKind::Text(text) => format!("{text:?}"),
            ActionKind::Media(button) => button.name().to_string(),
            ActionKind::Gamepad(button) => button.name().to_string(),
        }
    }
}

impl fmt::Display for PedalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.type_name(), self.summary(), self.trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_accepts_combination() {
        let keyboard = KeyboardAction::parse(KeyMode::Standard, "lcontrol+s").unwrap();
        assert_eq!(keyboard.keys(), ["lcontrol", "s"]);
        assert_eq!(keyboard.non_modifier_count(), 1);
        assert_eq!(keyboard.modifiers().collect::<Vec<_>>(), [Modifier::LeftControl]);
    }

    #[test]
    fn keyboard_accepts_six_keys_and_all_modifiers() {
        let keys = "lcontrol+rcontrol+lshift+rshift+lalt+ralt+lsuper+rsuper+a+b+c+d+e+f";
        let keyboard = KeyboardAction::parse(KeyMode::OneShot, keys).unwrap();
        assert_eq!(keyboard.non_modifier_count(), 6);
        assert_eq!(keyboard.modifiers().count(), 8);
    }

    #[test]
    fn keyboard_rejects_seven_keys() {
        let err = KeyboardAction::parse(KeyMode::Standard, "a+b+c+d+e+f+g").unwrap_err();
        assert_eq!(err, Error::TooManyKeys(7));
    }

    #[test]
    fn keyboard_rejects_unknown_duplicate_and_empty() {
        assert_eq!(
            KeyboardAction::parse(KeyMode::Standard, "ctrl+s").unwrap_err(),
            Error::UnknownKey("ctrl".into())
        );
        assert_eq!(
            KeyboardAction::parse(KeyMode::Standard, "a+a").unwrap_err(),
            Error::DuplicateKey("a".into())
        );
        assert_eq!(
            KeyboardAction::parse(KeyMode::Standard, "  ").unwrap_err(),
            Error::NoKeys
        );
        assert_eq!(
            KeyboardAction::new(KeyMode::Standard, Vec::<String>::new()).unwrap_err(),
            Error::NoKeys
        );
    }

    #[test]
    fn keypad_plus_survives_splitting() {
        let keyboard = KeyboardAction::parse(KeyMode::Standard, "lshift+num+").unwrap();
        assert_eq!(keyboard.keys(), ["lshift", "num+"]);
        let keyboard = KeyboardAction::parse(KeyMode::Standard, "num++a").unwrap();
        assert_eq!(keyboard.keys(), ["num+", "a"]);
        assert_eq!(
            KeyboardAction::parse(KeyMode::Standard, "a+").unwrap_err(),
            Error::UnknownKey(String::new())
        );
    }

    #[test]
    fn modifier_only_keyboard_is_valid() {
        let keyboard = KeyboardAction::parse(KeyMode::Standard, "lshift").unwrap();
        assert_eq!(keyboard.non_modifier_count(), 0);
    }

    #[test]
    fn canonical_orders_modifiers_first() {
        let keyboard = KeyboardAction::parse(KeyMode::Standard, "s+lalt+lcontrol").unwrap();
        assert_eq!(keyboard.canonical().keys(), ["lcontrol", "lalt", "s"]);
    }

    #[test]
    fn mouse_buttons_parse() {
        let mouse = MouseAction::parse_buttons("left+forward").unwrap();
        assert_eq!(
            mouse,
            MouseAction::Buttons([MouseButton::Left, MouseButton::Forward].into())
        );
        assert_eq!(
            MouseAction::parse_buttons("left+left").unwrap_err(),
            Error::DuplicateKey("left".into())
        );
        assert_eq!(MouseAction::parse_buttons("").unwrap_err(), Error::NoMouseButtons);
        assert!(matches!(
            MouseAction::parse_buttons("thumb").unwrap_err(),
            Error::UnknownName { kind: "mouse button", .. }
        ));
    }

    #[test]
    fn mouse_axis_range() {
        assert_eq!(
            MouseAction::axis(-100, 100, 0).unwrap(),
            MouseAction::Axis { x: -100, y: 100, wheel: 0 }
        );
        assert_eq!(
            MouseAction::axis(101, 0, 0).unwrap_err(),
            Error::AxisOutOfRange { axis: "X", value: 101 }
        );
        assert_eq!(
            MouseAction::axis(0, 0, -101).unwrap_err(),
            Error::AxisOutOfRange { axis: "wheel", value: -101 }
        );
    }

    #[test]
    fn text_is_truncated_to_capacity() {
        let long = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJKLMN";
        assert_eq!(long.len(), 50);
        let action = PedalAction::text(long, Trigger::OnPress);
        assert_eq!(action.kind, ActionKind::Text(long[..38].to_string()));

        let exact = &long[..38];
        let action = PedalAction::text(exact, Trigger::OnPress);
        assert_eq!(action.kind, ActionKind::Text(exact.to_string()));
    }

    #[test]
    fn named_enums_parse_and_index() {
        assert_eq!("open_calc".parse::<MediaButton>().unwrap(), MediaButton::OpenCalc);
        assert_eq!(MediaButton::ALL.len(), 19);
        assert_eq!(MediaButton::Sleep.index(), 18);
        assert_eq!(GamepadButton::ALL.len(), 12);
        assert_eq!(GamepadButton::from_index(4), Some(GamepadButton::Button1));
        assert_eq!(GamepadButton::from_index(12), None);
        assert!("jump".parse::<GamepadButton>().is_err());
    }

    #[test]
    fn display_includes_trigger() {
        let keyboard = KeyboardAction::parse(KeyMode::OneShot, "lcontrol+s").unwrap();
        let action = PedalAction::keyboard(keyboard, Trigger::OnRelease);
        assert_eq!(action.to_string(), "keyboard lcontrol+s (once) (on release)");
    }

    #[test]
    fn serializes_with_type_tag() {
        let action = PedalAction::media(MediaButton::Mute, Trigger::OnPress);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["trigger"], "on_press");
        assert_eq!(json["kind"]["type"], "media");
        assert_eq!(json["kind"]["config"], "mute");
    }
}
