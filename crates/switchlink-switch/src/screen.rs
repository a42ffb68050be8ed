//! The platform capability the core switching logic drives: reading a
//! screen's geometry and cursor, synthesising input on it, and moving the
//! clipboard through it. A concrete implementation (X11, Win32, Quartz) is
//! out of scope here; this crate only defines and drives the interface.

use switchlink_clipboard::Clipboard;
use switchlink_wire::{ClipboardSlot, KeyModifierMask};

/// Capability interface the switching core consumes. One implementation per
/// platform backend; the switcher only ever holds a `&mut dyn Screen`.
pub trait Screen {
    /// `(x, y, width, height)` of the screen in its own coordinate space.
    fn get_shape(&self) -> (i32, i32, i32, i32);
    fn get_cursor_pos(&self) -> (i32, i32);
    fn get_cursor_center(&self) -> (i32, i32);

    /// The cursor has entered this screen at `(x, y)` with entry sequence
    /// `seq` and modifier state `mask`.
    fn enter(&mut self, x: i32, y: i32, seq: u32, mask: KeyModifierMask);
    /// The cursor is leaving this screen. Returns whether the screen
    /// release succeeded (a platform backend may refuse, e.g. mid-drag).
    fn leave(&mut self) -> bool;

    fn fake_key_down(&mut self, id: u16, mask: KeyModifierMask, button: u16);
    fn fake_key_repeat(&mut self, id: u16, mask: KeyModifierMask, button: u16, count: u16);
    fn fake_key_up(&mut self, id: u16, mask: KeyModifierMask, button: u16);
    fn fake_mouse_button(&mut self, id: u8, pressed: bool);
    fn fake_mouse_move(&mut self, x: i32, y: i32);
    fn fake_mouse_relative_move(&mut self, dx: i32, dy: i32);
    fn fake_mouse_wheel(&mut self, dx: i32, dy: i32);

    fn get_clipboard(&self, slot: ClipboardSlot) -> Clipboard;
    fn set_clipboard(&mut self, slot: ClipboardSlot, clipboard: &Clipboard) -> bool;
    fn grab_clipboard(&mut self, slot: ClipboardSlot);

    fn set_options(&mut self, options: &[u8]);
    fn reset_options(&mut self);
}

/// Events a [`Screen`] implementation reports back up to the switcher —
/// the half of the interface that flows from platform to core rather than
/// core to platform.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenEvent {
    Entered,
    Left,
    MotionOnPrimary { x: i32, y: i32 },
    MotionOnSecondary { dx: i32, dy: i32 },
    ButtonDown(u8),
    ButtonUp(u8),
    Wheel { dx: i32, dy: i32 },
    KeyDown { id: u16, mask: KeyModifierMask, button: u16 },
    KeyRepeat { id: u16, mask: KeyModifierMask, button: u16, count: u16 },
    KeyUp { id: u16, mask: KeyModifierMask, button: u16 },
}
