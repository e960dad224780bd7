//! `minifb` window implementing [`Display`].

use image::RgbImage;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

use crate::ui::{Display, DisplayError, KeyPress};

pub struct WindowDisplay {
    window: Window,
    buffer: Vec<u32>,
    pending: Vec<KeyPress>,
}

impl WindowDisplay {
    pub fn open(title: &str, width: u32, height: u32) -> Result<Self, DisplayError> {
        let mut window = Window::new(title, width as usize, height as usize, WindowOptions::default())
            .map_err(|e| DisplayError::Window(e.to_string()))?;
        // Pacing comes from the camera.
        window.set_target_fps(0);
        tracing::info!(width, height, "display window opened");
        Ok(Self { window, buffer: Vec::new(), pending: Vec::new() })
    }
}

impl Display for WindowDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<(), DisplayError> {
        self.buffer.clear();
        self.buffer.extend(frame.pixels().map(|p| pack_rgb(p.0)));
        self.window
            .update_with_buffer(&self.buffer, frame.width() as usize, frame.height() as usize)
            .map_err(|e| DisplayError::Window(e.to_string()))?;

        if !self.window.is_open() {
            self.pending.push(KeyPress::Close);
            return Ok(());
        }
        // Stored reversed so `pop` yields them in press order.
        let mut keys: Vec<KeyPress> = self
            .window
            .get_keys_pressed(KeyRepeat::No)
            .into_iter()
            .filter_map(map_key)
            .collect();
        keys.reverse();
        keys.extend(self.pending.drain(..));
        self.pending = keys;
        Ok(())
    }

    fn poll_key(&mut self) -> Option<KeyPress> {
        self.pending.pop()
    }
}

fn pack_rgb([r, g, b]: [u8; 3]) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

fn map_key(key: Key) -> Option<KeyPress> {
    let press = match key {
        Key::Escape => KeyPress::Escape,
        Key::Minus | Key::NumPadMinus => KeyPress::Char('-'),
        Key::Equal => KeyPress::Char('='),
        Key::NumPadPlus => KeyPress::Char('+'),
        Key::Q => KeyPress::Char('q'),
        Key::R => KeyPress::Char('r'),
        Key::A => KeyPress::Char('a'),
        _ => return None,
    };
    Some(press)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rgb() {
        assert_eq!(pack_rgb([0x12, 0x34, 0x56]), 0x0012_3456);
        assert_eq!(pack_rgb([255, 255, 255]), 0x00FF_FFFF);
    }

    #[test]
    fn test_map_key() {
        assert_eq!(map_key(Key::Escape), Some(KeyPress::Escape));
        assert_eq!(map_key(Key::NumPadMinus), Some(KeyPress::Char('-')));
        assert_eq!(map_key(Key::Equal), Some(KeyPress::Char('=')));
        assert_eq!(map_key(Key::Q), Some(KeyPress::Char('q')));
        assert_eq!(map_key(Key::Z), None);
    }
}
