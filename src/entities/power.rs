//! `GenericPower` device class (type_id 100).
//!
//! Grounded directly in
//! `original_source/src/entities/power_generic.py`: a one-byte on/off state
//! payload and two fixed commands.

use crate::error::HubError;

use super::{DeviceClass, EntityClass, EntityCommand, EntityType, COMMAND_OFF, COMMAND_ON, STATE_OFF, STATE_ON, TYPE_GENERIC_POWER};

pub struct GenericPower;

impl DeviceClass for GenericPower {
    fn on_state_frame(&self, _current_state: u16, current_value: Option<&str>, payload: &[u8]) -> Option<(u16, Option<String>)> {
        let state = *payload.first()?;
        let current: Option<u8> = current_value.and_then(|v| v.parse().ok());
        match state {
            0x00 if current != Some(0) => Some((STATE_OFF, Some("0".to_string()))),
            0x01 if current != Some(1) => Some((STATE_ON, Some("1".to_string()))),
            _ => None,
        }
    }

    fn encode_command(&self, cmd_id: u16, _value: Option<&str>) -> Result<Vec<u8>, HubError> {
        match cmd_id {
            COMMAND_ON => Ok(vec![0x00, 0x01]),
            COMMAND_OFF => Ok(vec![0x00, 0x00]),
            other => Err(HubError::NoSuchCommand(other.to_string())),
        }
    }

    fn describe_state(&self, state_name: &str, _value: Option<&str>) -> String {
        state_name.to_string()
    }

    fn describe_command(&self, _cmd_name: &str, cmd_id: u16, _value: Option<&str>) -> String {
        match cmd_id {
            COMMAND_ON => "Turning the power on".to_string(),
            COMMAND_OFF => "Turning the power off".to_string(),
            _ => format!("Discarding command {}", cmd_id),
        }
    }
}

pub fn register() {
    EntityType::register(
        TYPE_GENERIC_POWER,
        "Power",
        EntityClass::GenericPower,
        vec![EntityCommand::new(COMMAND_ON, "Turn On", None), EntityCommand::new(COMMAND_OFF, "Turn Off", None)],
        Some("#99CC00"),
        Some("power.png"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_state_frame_reports_change_only_when_value_differs() {
        let dc = GenericPower;
        assert_eq!(dc.on_state_frame(1, None, &[0x01]), Some((STATE_ON, Some("1".into()))));
        assert_eq!(dc.on_state_frame(1, Some("1"), &[0x01]), None);
        assert_eq!(dc.on_state_frame(1, Some("1"), &[0x00]), Some((STATE_OFF, Some("0".into()))));
    }

    #[test]
    fn encode_command_matches_spec_bytes() {
        let dc = GenericPower;
        assert_eq!(dc.encode_command(COMMAND_ON, None).unwrap(), vec![0x00, 0x01]);
        assert_eq!(dc.encode_command(COMMAND_OFF, None).unwrap(), vec![0x00, 0x00]);
        assert!(dc.encode_command(999, None).is_err());
    }
}
