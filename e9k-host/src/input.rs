use crate::abi;

/// Joypad id of the START button (`RETRO_DEVICE_ID_JOYPAD_START`).
pub const JOYPAD_START: u32 = 3;

/// Host-side input state served to the core's `input_state` callback.
///
/// User input is a 32-bit button mask per port plus a keyboard down-map.
/// `auto_mask` is a side channel the host itself drives, currently only to
/// hold START for a few frames when skipping the BIOS logo.
#[derive(Clone, Debug)]
pub(crate) struct InputPorts {
    pub masks: [u32; abi::MAX_PORTS],
    pub auto_masks: [u32; abi::MAX_PORTS],
    pub keyboard: [bool; abi::KEY_LAST],
    pub auto_press_delay_frames: u32,
    pub auto_press_hold_frames: u32,
}

impl Default for InputPorts {
    fn default() -> Self {
        Self {
            masks: [0; abi::MAX_PORTS],
            auto_masks: [0; abi::MAX_PORTS],
            keyboard: [false; abi::KEY_LAST],
            auto_press_delay_frames: 0,
            auto_press_hold_frames: 0,
        }
    }
}

impl InputPorts {
    pub fn set_joypad(&mut self, port: u32, id: u32, pressed: bool) {
        let (port, id) = (port as usize, id);
        if port >= abi::MAX_PORTS || id >= 32 {
            return;
        }
        let bit = 1u32 << id;
        if pressed {
            self.masks[port] |= bit;
        } else {
            self.masks[port] &= !bit;
        }
    }

    pub fn clear_joypads(&mut self) {
        self.masks = [0; abi::MAX_PORTS];
    }

    pub fn set_key(&mut self, keycode: u32, pressed: bool) {
        if let Some(down) = self.keyboard.get_mut(keycode as usize) {
            *down = pressed;
        }
    }

    /// Serves one `input_state` query.
    pub fn state(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        if device == abi::DEVICE_KEYBOARD {
            return self
                .keyboard
                .get(id as usize)
                .map_or(0, |&down| down as i16);
        }
        if device != abi::DEVICE_JOYPAD || index != 0 {
            return 0;
        }
        let port = port as usize;
        if port >= abi::MAX_PORTS || id >= 32 {
            return 0;
        }
        let mask = self.masks[port] | self.auto_masks[port];
        ((mask >> id) & 1) as i16
    }

    /// Advances the auto-press channel once per `input_poll`.
    pub fn poll(&mut self) {
        if self.auto_press_delay_frames > 0 {
            self.auto_press_delay_frames -= 1;
            return;
        }
        if self.auto_press_hold_frames > 0 {
            let bit = 1u32 << JOYPAD_START;
            self.auto_masks[0] |= bit;
            self.auto_press_hold_frames -= 1;
            if self.auto_press_hold_frames == 0 {
                self.auto_masks[0] &= !bit;
            }
        }
    }

    pub fn schedule_auto_press(&mut self, delay_frames: u32, hold_frames: u32) {
        self.auto_press_delay_frames = delay_frames;
        self.auto_press_hold_frames = hold_frames;
        if delay_frames == 0 && hold_frames == 0 {
            self.auto_masks[0] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joypad_mask() {
        let mut ports = InputPorts::default();
        ports.set_joypad(0, 4, true);
        assert_eq!(ports.state(0, abi::DEVICE_JOYPAD, 0, 4), 1);
        ports.set_joypad(0, 4, false);
        assert_eq!(ports.state(0, abi::DEVICE_JOYPAD, 0, 4), 0);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut ports = InputPorts::default();
        ports.set_joypad(9, 4, true);
        ports.set_joypad(0, 40, true);
        assert!(ports.masks.iter().all(|&m| m == 0));
        assert_eq!(ports.state(9, abi::DEVICE_JOYPAD, 0, 4), 0);
    }

    #[test]
    fn test_auto_press_start_after_delay() {
        let mut ports = InputPorts::default();
        ports.schedule_auto_press(2, 2);
        ports.poll();
        ports.poll();
        assert_eq!(ports.state(0, abi::DEVICE_JOYPAD, 0, JOYPAD_START), 0);
        ports.poll();
        assert_eq!(ports.state(0, abi::DEVICE_JOYPAD, 0, JOYPAD_START), 1);
        ports.poll();
        assert_eq!(ports.state(0, abi::DEVICE_JOYPAD, 0, JOYPAD_START), 0);
    }

    #[test]
    fn test_keyboard_state() {
        let mut ports = InputPorts::default();
        ports.set_key(65, true);
        assert_eq!(ports.state(0, abi::DEVICE_KEYBOARD, 0, 65), 1);
        ports.set_key(65, false);
        assert_eq!(ports.state(0, abi::DEVICE_KEYBOARD, 0, 65), 0);
    }
}
