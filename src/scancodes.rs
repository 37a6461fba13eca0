//! Scan-code tables used by the pedal firmware.
//!
//! Scan codes are USB HID keyboard usage IDs (HID Usage Tables, section 10).
//! Two parallel 128-entry tables are kept: key names for the keyboard action
//! and printable characters for the text action. Modifier keys are not part
//! of either table; they travel as a bitmask and are handled by [`Modifier`].

use std::sync::OnceLock;

/// Number of entries in each scan-code table.
pub const TABLE_SIZE: usize = 128;

/// High bit on a text byte: the character needs shift.
pub const SHIFT_FLAG: u8 = 0x80;

/// Scan code substituted for characters the text action cannot type.
pub const SPACE_SCAN_CODE: u8 = 0x2C;

const LETTERS: [&str; 26] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r", "s",
    "t", "u", "v", "w", "x", "y", "z",
];
const UPPER_LETTERS: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: [&str; 10] = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "0"];
const FUNCTION_KEYS: [&str; 12] = [
    "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
];
const EXTENDED_FUNCTION_KEYS: [&str; 12] = [
    "f13", "f14", "f15", "f16", "f17", "f18", "f19", "f20", "f21", "f22", "f23", "f24",
];
const KEYPAD_DIGITS: [&str; 10] = [
    "num1", "num2", "num3", "num4", "num5", "num6", "num7", "num8", "num9", "num0",
];

/// Scan code -> key name. `None` marks reserved or unsupported codes.
const SCAN_CODE_NAMES: [Option<&str>; TABLE_SIZE] = {
    let mut table: [Option<&str>; TABLE_SIZE] = [None; TABLE_SIZE];

    let mut i = 0;
    while i < LETTERS.len() {
        table[0x04 + i] = Some(LETTERS[i]);
        i += 1;
    }
    let mut i = 0;
    while i < DIGITS.len() {
        table[0x1E + i] = Some(DIGITS[i]);
        i += 1;
    }

    table[0x28] = Some("return");
    table[0x29] = Some("escape");
    table[0x2A] = Some("backspace");
    table[0x2B] = Some("tab");
    table[0x2C] = Some("space");
    table[0x2D] = Some("-");
    table[0x2E] = Some("=");
    table[0x2F] = Some("[");
    table[0x30] = Some("]");
    table[0x31] = Some("\\");
    // 0x32 is the non-US hash key
    table[0x33] = Some(";");
    table[0x34] = Some("'");
    table[0x35] = Some("`");
    table[0x36] = Some(",");
    table[0x37] = Some(".");
    table[0x38] = Some("/");
    table[0x39] = Some("caps_lock");

    let mut i = 0;
    while i < FUNCTION_KEYS.len() {
        table[0x3A + i] = Some(FUNCTION_KEYS[i]);
        i += 1;
    }

    table[0x46] = Some("print_screen");
    table[0x47] = Some("scroll_lock");
    table[0x48] = Some("pause");
    table[0x49] = Some("insert");
    table[0x4A] = Some("home");
    table[0x4B] = Some("page_up");
    table[0x4C] = Some("delete");
    table[0x4D] = Some("end");
    table[0x4E] = Some("page_down");
    table[0x4F] = Some("right");
    table[0x50] = Some("left");
    table[0x51] = Some("down");
    table[0x52] = Some("up");
    table[0x53] = Some("num_lock");
    table[0x54] = Some("num/");
    table[0x55] = Some("num*");
    table[0x56] = Some("num-");
    table[0x57] = Some("num+");
    table[0x58] = Some("num_enter");

    let mut i = 0;
    while i < KEYPAD_DIGITS.len() {
        table[0x59 + i] = Some(KEYPAD_DIGITS[i]);
        i += 1;
    }

    table[0x63] = Some("num.");
    table[0x67] = Some("num=");

    let mut i = 0;
    while i < EXTENDED_FUNCTION_KEYS.len() {
        table[0x68 + i] = Some(EXTENDED_FUNCTION_KEYS[i]);
        i += 1;
    }

    table
};

/// Scan code -> (unshifted, shifted) character typed by the text action.
const PRINTABLE_SCAN_CODES: [Option<(char, char)>; TABLE_SIZE] = {
    let mut table: [Option<(char, char)>; TABLE_SIZE] = [None; TABLE_SIZE];

    let mut i = 0;
    while i < 26 {
        table[0x04 + i] = Some(((b'a' + i as u8) as char, UPPER_LETTERS[i] as char));
        i += 1;
    }

    table[0x1E] = Some(('1', '!'));
    table[0x1F] = Some(('2', '@'));
    table[0x20] = Some(('3', '#'));
    table[0x21] = Some(('4', '$'));
    table[0x22] = Some(('5', '%'));
    table[0x23] = Some(('6', '^'));
    table[0x24] = Some(('7', '&'));
    table[0x25] = Some(('8', '*'));
    table[0x26] = Some(('9', '('));
    table[0x27] = Some(('0', ')'));
    table[0x28] = Some(('\n', '\n'));
    table[0x2B] = Some(('\t', '\t'));
    table[0x2C] = Some((' ', ' '));
    table[0x2D] = Some(('-', '_'));
    table[0x2E] = Some(('=', '+'));
    table[0x2F] = Some(('[', '{'));
    table[0x30] = Some((']', '}'));
    table[0x31] = Some(('\\', '|'));
    table[0x33] = Some((';', ':'));
    table[0x34] = Some(('\'', '"'));
    table[0x35] = Some(('`', '~'));
    table[0x36] = Some((',', '<'));
    table[0x37] = Some(('.', '>'));
    table[0x38] = Some(('/', '?'));

    // Keypad
    table[0x54] = Some(('/', '/'));
    table[0x55] = Some(('*', '*'));
    table[0x56] = Some(('-', '-'));
    table[0x57] = Some(('+', '+'));
    table[0x58] = Some(('\n', '\n'));
    table[0x59] = Some(('1', '1'));
    table[0x5A] = Some(('2', '2'));
    table[0x5B] = Some(('3', '3'));
    table[0x5C] = Some(('4', '4'));
    table[0x5D] = Some(('5', '5'));
    table[0x5E] = Some(('6', '6'));
    table[0x5F] = Some(('7', '7'));
    table[0x60] = Some(('8', '8'));
    table[0x61] = Some(('9', '9'));
    table[0x62] = Some(('0', '0'));
    table[0x63] = Some(('.', '.'));
    table[0x67] = Some(('=', '='));

    table
};

/// Look up the scan code for a key name.
///
/// Modifier names are not in this table, see [`Modifier::from_name`].
pub fn key_name_to_scan_code(name: &str) -> Option<u8> {
    SCAN_CODE_NAMES
        .iter()
        .position(|entry| *entry == Some(name))
        .map(|code| code as u8)
}

pub fn scan_code_to_key_name(code: u8) -> Option<&'static str> {
    SCAN_CODE_NAMES.get(code as usize).copied().flatten()
}

pub fn scan_code_to_printable(code: u8, shift: bool) -> Option<char> {
    PRINTABLE_SCAN_CODES
        .get(code as usize)
        .copied()
        .flatten()
        .map(|(plain, shifted)| if shift { shifted } else { plain })
}

/// Reverse of [`PRINTABLE_SCAN_CODES`], indexed by ASCII value.
///
/// The lowest scan code wins when several keys type the same character, and
/// the unshifted form wins over the shifted one, so `'1'` maps to the main
/// row rather than the keypad.
fn printable_lookup() -> &'static [Option<u8>; TABLE_SIZE] {
    static LOOKUP: OnceLock<[Option<u8>; TABLE_SIZE]> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut lookup = [None; TABLE_SIZE];
        for (code, entry) in PRINTABLE_SCAN_CODES.iter().enumerate() {
            let Some((plain, shifted)) = *entry else {
                continue;
            };
            let slot = &mut lookup[plain as usize];
            if slot.is_none() {
                *slot = Some(code as u8);
            }
            let slot = &mut lookup[shifted as usize];
            if slot.is_none() {
                *slot = Some(code as u8 | SHIFT_FLAG);
            }
        }
        lookup
    })
}

/// Encode a character for the text action: the scan code, with
/// [`SHIFT_FLAG`] set when the character is typed with shift.
pub fn printable_to_scan_code(c: char) -> Option<u8> {
    if !c.is_ascii() {
        return None;
    }
    printable_lookup()[c as usize]
}

/// The eight keyboard modifiers, carried as a bitmask in keyboard packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    LeftControl,
    RightControl,
    LeftShift,
    RightShift,
    LeftAlt,
    RightAlt,
    LeftSuper,
    RightSuper,
}

impl Modifier {
    /// All modifiers in the order they are reported when decoding.
    pub const ALL: [Modifier; 8] = [
        Modifier::LeftControl,
        Modifier::RightControl,
        Modifier::LeftShift,
        Modifier::RightShift,
        Modifier::LeftAlt,
        Modifier::RightAlt,
        Modifier::LeftSuper,
        Modifier::RightSuper,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Modifier::LeftControl => "lcontrol",
            Modifier::RightControl => "rcontrol",
            Modifier::LeftShift => "lshift",
            Modifier::RightShift => "rshift",
            Modifier::LeftAlt => "lalt",
            Modifier::RightAlt => "ralt",
            Modifier::LeftSuper => "lsuper",
            Modifier::RightSuper => "rsuper",
        }
    }

    /// Bit in the modifier byte (HID boot keyboard layout).
    pub fn bit(self) -> u8 {
        match self {
            Modifier::LeftControl => 0x01,
            Modifier::LeftShift => 0x02,
            Modifier::LeftAlt => 0x04,
            Modifier::LeftSuper => 0x08,
            Modifier::RightControl => 0x10,
            Modifier::RightShift => 0x20,
            Modifier::RightAlt => 0x40,
            Modifier::RightSuper => 0x80,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            Modifier::LeftControl => "Left control key",
            Modifier::RightControl => "Right control key",
            Modifier::LeftShift => "Left shift key",
            Modifier::RightShift => "Right shift key",
            Modifier::LeftAlt => "Left alt key",
            Modifier::RightAlt => "Right alt key",
            Modifier::LeftSuper => "Left super / windows / gui key",
            Modifier::RightSuper => "Right super / windows / gui key",
        }
    }
}

pub fn is_modifier_key(name: &str) -> bool {
    Modifier::from_name(name).is_some()
}

/// A key name is valid if it is either a modifier or in the scan-code table.
pub fn is_valid_key(name: &str) -> bool {
    is_modifier_key(name) || key_name_to_scan_code(name).is_some()
}

/// Every non-modifier key name, in scan-code order.
pub fn key_names() -> impl Iterator<Item = &'static str> {
    SCAN_CODE_NAMES.iter().filter_map(|entry| *entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_digits_and_function_keys() {
        assert_eq!(key_name_to_scan_code("a"), Some(0x04));
        assert_eq!(key_name_to_scan_code("s"), Some(0x16));
        assert_eq!(key_name_to_scan_code("z"), Some(0x1D));
        assert_eq!(key_name_to_scan_code("1"), Some(0x1E));
        assert_eq!(key_name_to_scan_code("0"), Some(0x27));
        assert_eq!(key_name_to_scan_code("f1"), Some(0x3A));
        assert_eq!(key_name_to_scan_code("f12"), Some(0x45));
        assert_eq!(key_name_to_scan_code("f13"), Some(0x68));
        assert_eq!(key_name_to_scan_code("f24"), Some(0x73));
    }

    #[test]
    fn named_special_keys() {
        assert_eq!(key_name_to_scan_code("return"), Some(0x28));
        assert_eq!(key_name_to_scan_code("backspace"), Some(0x2A));
        assert_eq!(key_name_to_scan_code("delete"), Some(0x4C));
        assert_eq!(key_name_to_scan_code("page_down"), Some(0x4E));
        assert_eq!(key_name_to_scan_code("num="), Some(0x67));
        assert_eq!(key_name_to_scan_code("notakey"), None);
        assert_eq!(key_name_to_scan_code("A"), None);
    }

    #[test]
    fn names_round_trip_through_codes() {
        for name in key_names() {
            let code = key_name_to_scan_code(name).unwrap();
            assert_eq!(scan_code_to_key_name(code), Some(name));
        }
    }

    #[test]
    fn reserved_codes_have_no_name() {
        assert_eq!(scan_code_to_key_name(0x00), None);
        assert_eq!(scan_code_to_key_name(0x32), None);
        assert_eq!(scan_code_to_key_name(0x7F), None);
        assert_eq!(scan_code_to_key_name(0xFF), None);
    }

    #[test]
    fn printable_lookup_prefers_main_row_and_unshifted() {
        assert_eq!(printable_to_scan_code('a'), Some(0x04));
        assert_eq!(printable_to_scan_code('A'), Some(0x04 | SHIFT_FLAG));
        assert_eq!(printable_to_scan_code('1'), Some(0x1E));
        assert_eq!(printable_to_scan_code('!'), Some(0x1E | SHIFT_FLAG));
        assert_eq!(printable_to_scan_code('/'), Some(0x38));
        assert_eq!(printable_to_scan_code('*'), Some(0x25 | SHIFT_FLAG));
        assert_eq!(printable_to_scan_code(' '), Some(SPACE_SCAN_CODE));
        assert_eq!(printable_to_scan_code('\n'), Some(0x28));
        assert_eq!(printable_to_scan_code('é'), None);
        assert_eq!(printable_to_scan_code('\u{7}'), None);
    }

    #[test]
    fn printable_forward_and_reverse_agree() {
        for c in (0x20u8..0x7F).map(char::from) {
            let encoded = printable_to_scan_code(c).unwrap();
            let shift = encoded & SHIFT_FLAG != 0;
            assert_eq!(scan_code_to_printable(encoded & !SHIFT_FLAG, shift), Some(c));
        }
    }

    #[test]
    fn modifiers_are_valid_keys_but_not_in_table() {
        for modifier in Modifier::ALL {
            assert!(is_modifier_key(modifier.name()));
            assert!(is_valid_key(modifier.name()));
            assert_eq!(key_name_to_scan_code(modifier.name()), None);
        }
        assert!(is_valid_key("s"));
        assert!(!is_valid_key("ctrl"));
    }

    #[test]
    fn modifier_bits_are_distinct() {
        let mask = Modifier::ALL.iter().fold(0u8, |acc, m| {
            assert_eq!(acc & m.bit(), 0);
            acc | m.bit()
        });
        assert_eq!(mask, 0xFF);
    }
}
