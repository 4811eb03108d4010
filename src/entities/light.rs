//! `GenericLight` device class (type_id 101).
//!
//! Grounded directly in
//! `original_source/src/entities/light_generic.py`: a one-byte brightness
//! state payload (0x00..0xFF mapped to 0..100), and on/off/set-level
//! commands.

use crate::error::HubError;

use super::{DeviceClass, EntityClass, EntityCommand, EntityType, ParameterType, COMMAND_OFF, COMMAND_ON, COMMAND_SET_LEVEL, STATE_OFF, STATE_ON, TYPE_GENERIC_LIGHT};

pub struct GenericLight;

impl DeviceClass for GenericLight {
    fn on_state_frame(&self, _current_state: u16, current_value: Option<&str>, payload: &[u8]) -> Option<(u16, Option<String>)> {
        let raw = *payload.first()?;
        let current: Option<u8> = current_value.and_then(|v| v.parse().ok());

        if raw > 0x00 && raw < 0xFF {
            let level = ((raw as f64 * 100.0) / 255.0).round() as u8;
            if current != Some(level) {
                return Some((STATE_ON, Some(level.to_string())));
            }
        } else if raw == 0x00 && current != Some(0) {
            return Some((STATE_OFF, Some("0".to_string())));
        } else if raw == 0xFF && current != Some(100) {
            return Some((STATE_ON, Some("100".to_string())));
        }
        None
    }

    fn encode_command(&self, cmd_id: u16, value: Option<&str>) -> Result<Vec<u8>, HubError> {
        match cmd_id {
            COMMAND_ON => Ok(vec![0x00, 0x01]),
            COMMAND_OFF => Ok(vec![0x00, 0x00]),
            COMMAND_SET_LEVEL => {
                let pct: u32 = value
                    .ok_or_else(|| HubError::Protocol("set level requires a value".to_string()))?
                    .parse()
                    .map_err(|_| HubError::Protocol("set level value must be an integer".to_string()))?;
                let level = ((pct * 255) as f64 / 100.0).round() as u8;
                Ok(vec![0x00, 0x02, level])
            }
            other => Err(HubError::NoSuchCommand(other.to_string())),
        }
    }

    fn describe_state(&self, state_name: &str, value: Option<&str>) -> String {
        match value.and_then(|v| v.parse::<u8>().ok()) {
            Some(v) if v > 0 && v < 100 => format!("{} ({}%)", state_name, v),
            _ => state_name.to_string(),
        }
    }

    fn describe_command(&self, _cmd_name: &str, cmd_id: u16, value: Option<&str>) -> String {
        match cmd_id {
            COMMAND_ON => "Turning the light on".to_string(),
            COMMAND_OFF => "Turning the light off".to_string(),
            COMMAND_SET_LEVEL => format!("Setting light level to {}", value.unwrap_or("")),
            _ => format!("Discarding command {}", cmd_id),
        }
    }
}

pub fn register() {
    EntityType::register(
        TYPE_GENERIC_LIGHT,
        "Light",
        EntityClass::GenericLight,
        vec![
            EntityCommand::new(COMMAND_ON, "Turn On", None),
            EntityCommand::new(COMMAND_OFF, "Turn Off", None),
            EntityCommand::new(COMMAND_SET_LEVEL, "Set level", Some(ParameterType::Range0To100)),
        ],
        Some("#CCCC00"),
        Some("light.png"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_state_frame_rounds_brightness_to_percent() {
        let dc = GenericLight;
        assert_eq!(dc.on_state_frame(1, None, &[0x80]), Some((STATE_ON, Some("50".into()))));
        assert_eq!(dc.on_state_frame(1, None, &[0xFF]), Some((STATE_ON, Some("100".into()))));
        assert_eq!(dc.on_state_frame(1, None, &[0x00]), Some((STATE_OFF, Some("0".into()))));
        assert_eq!(dc.on_state_frame(1, Some("50"), &[0x80]), None);
    }

    #[test]
    fn encode_set_level_scales_percent_to_byte() {
        let dc = GenericLight;
        assert_eq!(dc.encode_command(COMMAND_SET_LEVEL, Some("40")).unwrap(), vec![0x00, 0x02, 102]);
    }

    #[test]
    fn describe_state_shows_percent_only_between_bounds() {
        let dc = GenericLight;
        assert_eq!(dc.describe_state("On", Some("50")), "On (50%)");
        assert_eq!(dc.describe_state("On", Some("100")), "On");
        assert_eq!(dc.describe_state("Off", Some("0")), "Off");
    }

    #[test]
    fn describe_command_matches_original_wording() {
        let dc = GenericLight;
        assert_eq!(dc.describe_command("Set level", COMMAND_SET_LEVEL, Some("40")), "Setting light level to 40");
        assert_eq!(dc.describe_command("Turn On", COMMAND_ON, None), "Turning the light on");
    }
}
