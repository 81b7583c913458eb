//! Fixed key/button symbol table.
//!
//! Configuration files refer to keys by name; this module resolves those names
//! to integer codes exactly once at load time. Accepted spellings:
//! - canonical `KEY_*` / `BTN_*` names (case-insensitive)
//! - single characters `a`-`z` and `0`-`9`
//! - friendly mouse-button aliases: `left`, `right`, `middle`, `side`,
//!   `extra`, `forward`, `back`
//! - bare integers (`"276"`)
//!
//! Unresolvable names are a configuration error, not a runtime one.

use crate::event::KeyCode;

/// Canonical name table (Linux input-event-codes numbering).
///
/// Deliberately not exhaustive: it covers the alphanumeric block, common
/// modifiers/navigation keys, function keys and mouse buttons. Codes outside
/// the table still work when given numerically.
static NAMES: &[(&str, KeyCode)] = &[
    ("KEY_ESC", 1),
    ("KEY_1", 2),
    ("KEY_2", 3),
    ("KEY_3", 4),
    ("KEY_4", 5),
    ("KEY_5", 6),
    ("KEY_6", 7),
    ("KEY_7", 8),
    ("KEY_8", 9),
    ("KEY_9", 10),
    ("KEY_0", 11),
    ("KEY_MINUS", 12),
    ("KEY_EQUAL", 13),
    ("KEY_BACKSPACE", 14),
    ("KEY_TAB", 15),
    ("KEY_Q", 16),
    ("KEY_W", 17),
    ("KEY_E", 18),
    ("KEY_R", 19),
    ("KEY_T", 20),
    ("KEY_Y", 21),
    ("KEY_U", 22),
    ("KEY_I", 23),
    ("KEY_O", 24),
    ("KEY_P", 25),
    ("KEY_ENTER", 28),
    ("KEY_LEFTCTRL", 29),
    ("KEY_A", 30),
    ("KEY_S", 31),
    ("KEY_D", 32),
    ("KEY_F", 33),
    ("KEY_G", 34),
    ("KEY_H", 35),
    ("KEY_J", 36),
    ("KEY_K", 37),
    ("KEY_L", 38),
    ("KEY_SEMICOLON", 39),
    ("KEY_APOSTROPHE", 40),
    ("KEY_GRAVE", 41),
    ("KEY_LEFTSHIFT", 42),
    ("KEY_BACKSLASH", 43),
    ("KEY_Z", 44),
    ("KEY_X", 45),
    ("KEY_C", 46),
    ("KEY_V", 47),
    ("KEY_B", 48),
    ("KEY_N", 49),
    ("KEY_M", 50),
    ("KEY_COMMA", 51),
    ("KEY_DOT", 52),
    ("KEY_SLASH", 53),
    ("KEY_RIGHTSHIFT", 54),
    ("KEY_LEFTALT", 56),
    ("KEY_SPACE", 57),
    ("KEY_CAPSLOCK", 58),
    ("KEY_F1", 59),
    ("KEY_F2", 60),
    ("KEY_F3", 61),
    ("KEY_F4", 62),
    ("KEY_F5", 63),
    ("KEY_F6", 64),
    ("KEY_F7", 65),
    ("KEY_F8", 66),
    ("KEY_F9", 67),
    ("KEY_F10", 68),
    ("KEY_F11", 87),
    ("KEY_F12", 88),
    ("KEY_RIGHTCTRL", 97),
    ("KEY_RIGHTALT", 100),
    ("KEY_HOME", 102),
    ("KEY_UP", 103),
    ("KEY_PAGEUP", 104),
    ("KEY_LEFT", 105),
    ("KEY_RIGHT", 106),
    ("KEY_END", 107),
    ("KEY_DOWN", 108),
    ("KEY_PAGEDOWN", 109),
    ("KEY_INSERT", 110),
    ("KEY_DELETE", 111),
    ("KEY_LEFTMETA", 125),
    ("BTN_LEFT", 272),
    ("BTN_RIGHT", 273),
    ("BTN_MIDDLE", 274),
    ("BTN_SIDE", 275),
    ("BTN_EXTRA", 276),
    ("BTN_FORWARD", 277),
    ("BTN_BACK", 278),
];

/// Friendly mouse-button aliases used by macro configs.
static BUTTON_ALIASES: &[(&str, KeyCode)] = &[
    ("left", 272),
    ("right", 273),
    ("middle", 274),
    ("side", 275),
    ("extra", 276),
    ("forward", 277),
    ("back", 278),
];

/// Key range spanned by `BTN_MISC..=BTN_GEAR_UP`; codes in here are routed to
/// the mouse-shaped virtual device, everything else to the keyboard.
pub const BTN_RANGE: std::ops::RangeInclusive<KeyCode> = 0x100..=0x151;

pub const KEY_A: KeyCode = 30;
pub const KEY_Z: KeyCode = 44;
pub const BTN_LEFT: KeyCode = 272;
pub const BTN_EXTRA: KeyCode = 276;

/// Resolve a configured key/button name to its code.
pub fn lookup(name: &str) -> Option<KeyCode> {
    let s = name.trim();
    if s.is_empty() {
        return None;
    }
    if s.len() == 1 {
        let c = s.chars().next().unwrap();
        if c.is_ascii_alphanumeric() {
            let canon = format!("KEY_{}", c.to_ascii_uppercase());
            return NAMES
                .iter()
                .find(|(n, _)| *n == canon)
                .map(|(_, code)| *code);
        }
        return match c {
            ' ' => lookup("KEY_SPACE"),
            '\t' => lookup("KEY_TAB"),
            '\n' => lookup("KEY_ENTER"),
            _ => None,
        };
    }
    if let Some((_, code)) = BUTTON_ALIASES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(s))
    {
        return Some(*code);
    }
    if let Some((_, code)) = NAMES.iter().find(|(n, _)| n.eq_ignore_ascii_case(s)) {
        return Some(*code);
    }
    s.parse::<KeyCode>().ok()
}

/// Reverse lookup for diagnostics; falls back to the numeric spelling.
pub fn name_of(code: KeyCode) -> String {
    NAMES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(n, _)| (*n).to_string())
        .unwrap_or_else(|| code.to_string())
}

/// True when the code lands on the mouse-button block.
pub fn is_button(code: KeyCode) -> bool {
    BTN_RANGE.contains(&code)
}
