//! Controller protocol definitions and encoding.
//!
//! Protocol structure:
//! - Outbound frame: fields joined by `:` and terminated by `;\n`
//!   (e.g. `setMotorPower:50:-50;\n`)
//! - Inbound frame: one `\n`-terminated line per reply
//!   (e.g. `getSonic:123;`)

use crate::Error;
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;

/// Separator between frame fields.
pub const FIELD_SEPARATOR: char = ':';

/// Terminator appended to every outbound frame.
pub const FRAME_TERMINATOR: &str = ";\n";

/// Line delimiter for inbound frames.
pub const LINE_DELIMITER: u8 = b'\n';

/// Commands understood by the controller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Drive motor power (left, right).
    SetMotorPower,
    /// Head light brightness.
    SetHeadLight,
    /// Blinker lights (left, right).
    SetBlinker,
    /// Rear light color (red, green, blue).
    SetRearLight,
    /// Text shown on the LCD.
    SetLcd,
    /// Ultrasonic distance sensor read.
    GetSonic,
}

impl Command {
    /// Every command, in table order.
    pub const ALL: [Command; 6] = [
        Command::SetMotorPower,
        Command::SetHeadLight,
        Command::SetBlinker,
        Command::SetRearLight,
        Command::SetLcd,
        Command::GetSonic,
    ];

    /// Name used both by the host and on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetMotorPower => "setMotorPower",
            Command::SetHeadLight => "setHeadLight",
            Command::SetBlinker => "setBlinker",
            Command::SetRearLight => "setRearLight",
            Command::SetLcd => "setLCD",
            Command::GetSonic => "getSonic",
        }
    }

    /// Argument names consumed by the command, in frame order.
    pub fn params(&self) -> &'static [&'static str] {
        match self {
            Command::SetMotorPower => &["left", "right"],
            Command::SetHeadLight => &["brightness"],
            Command::SetBlinker => &["left", "right"],
            Command::SetRearLight => &["red", "green", "blue"],
            Command::SetLcd => &["str"],
            Command::GetSonic => &[],
        }
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| Error::UnknownCommand(s.to_string()))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds an outbound frame from its fields.
///
/// Returns `None` when there are no fields, in which case nothing is sent.
pub fn encode_frame<I, S>(fields: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut fields = fields.into_iter().peekable();
    fields.peek()?;

    let mut frame = String::new();
    for (i, field) in fields.enumerate() {
        if i > 0 {
            frame.push(FIELD_SEPARATOR);
        }
        frame.push_str(field.as_ref());
    }
    frame.push_str(FRAME_TERMINATOR);
    Some(frame)
}

fn sonic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"getSonic:(\d+);").expect("valid sonic reply pattern"))
}

/// Extracts the distance digits from a sensor reply line.
///
/// The reply may appear anywhere in the line; the value is kept as text.
pub fn parse_sonic_reply(line: &str) -> Option<&str> {
    sonic_pattern()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_motor_power() {
        let frame = encode_frame(["setMotorPower", "50", "-50"]).unwrap();
        assert_eq!(frame, "setMotorPower:50:-50;\n");
    }

    #[test]
    fn test_encode_single_field() {
        assert_eq!(encode_frame(["getSonic"]).unwrap(), "getSonic;\n");
    }

    #[test]
    fn test_encode_empty_is_none() {
        assert!(encode_frame(Vec::<String>::new()).is_none());
    }

    #[test]
    fn test_encode_keeps_empty_fields() {
        let frame = encode_frame(["setBlinker", "", "1"]).unwrap();
        assert_eq!(frame, "setBlinker::1;\n");
    }

    #[test]
    fn test_parse_sonic_reply() {
        assert_eq!(parse_sonic_reply("getSonic:123;"), Some("123"));
        assert_eq!(parse_sonic_reply("getSonic:007;\r"), Some("007"));
        assert_eq!(parse_sonic_reply("noise getSonic:42; tail"), Some("42"));
    }

    #[test]
    fn test_parse_rejects_other_lines() {
        assert_eq!(parse_sonic_reply("getSonic:;"), None);
        assert_eq!(parse_sonic_reply("getSonic:-5;"), None);
        assert_eq!(parse_sonic_reply("setLCD:ok;"), None);
        assert_eq!(parse_sonic_reply(""), None);
    }

    #[test]
    fn test_command_names_round_trip() {
        for command in Command::ALL {
            assert_eq!(command.name().parse::<Command>().unwrap(), command);
        }
        assert_eq!("setLCD".parse::<Command>().unwrap(), Command::SetLcd);
        assert!("setlcd".parse::<Command>().is_err());
    }

    #[test]
    fn test_command_params() {
        assert_eq!(Command::SetRearLight.params(), &["red", "green", "blue"]);
        assert!(Command::GetSonic.params().is_empty());
    }
}
