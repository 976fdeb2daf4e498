//! VATP/1.0 wire protocol shared between the server and its clients.
//!
//! A message is a three-token header line (`VATP/1.0 <TYPE> <byte-length>`),
//! zero or more `Key: Value` header lines, a blank line, then an optional
//! body of exactly the declared byte length. The blank-line terminator ends
//! the header section; the declared length only governs how many body bytes
//! follow it.

use std::fmt;

pub const PROTOCOL_VERSION: &str = "VATP/1.0";

/// Upper bound on a declared body length. Declared lengths come from the
/// peer and cannot be trusted; anything above this is a frame error.
pub const MAX_BODY_LEN: usize = 8192;

pub const SPEED_MAX: f32 = 100.0;
pub const SPEED_STEP: f32 = 10.0;
pub const BATTERY_MAX: f32 = 100.0;
pub const BATTERY_DRAIN: f32 = 0.5;
pub const BATTERY_COMMAND_MIN: f32 = 10.0;
pub const BATTERY_SAFETY_STOP: f32 = 5.0;
pub const TEMP_MIN: f32 = 15.0;
pub const TEMP_MAX: f32 = 45.0;
pub const TEMP_JITTER: f32 = 1.0;

/// Closed set of message types. Unrecognized type tokens fail parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Connect,
    Auth,
    GetTelemetry,
    Command,
    ListUsers,
    Disconnect,
    ResponseOk,
    ResponseError,
    TelemetryData,
}

impl MessageType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "CONNECT" => Some(Self::Connect),
            "AUTH" => Some(Self::Auth),
            "GET_TELEMETRY" => Some(Self::GetTelemetry),
            "COMMAND" => Some(Self::Command),
            "LIST_USERS" => Some(Self::ListUsers),
            "DISCONNECT" => Some(Self::Disconnect),
            "RESPONSE_OK" => Some(Self::ResponseOk),
            "RESPONSE_ERROR" => Some(Self::ResponseError),
            "TELEMETRY_DATA" => Some(Self::TelemetryData),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Auth => "AUTH",
            Self::GetTelemetry => "GET_TELEMETRY",
            Self::Command => "COMMAND",
            Self::ListUsers => "LIST_USERS",
            Self::Disconnect => "DISCONNECT",
            Self::ResponseOk => "RESPONSE_OK",
            Self::ResponseError => "RESPONSE_ERROR",
            Self::TelemetryData => "TELEMETRY_DATA",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vehicle control commands carried in the `Command` header.
///
/// Unrecognized names map to `Unknown`, which is a policy rejection for the
/// dispatcher, not a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    SpeedUp,
    SlowDown,
    TurnLeft,
    TurnRight,
    Unknown,
}

impl CommandType {
    /// Accepts both underscore and space variants ("SPEED_UP" / "SPEED UP").
    pub fn parse(name: &str) -> Self {
        match name {
            "SPEED_UP" | "SPEED UP" => Self::SpeedUp,
            "SLOW_DOWN" | "SLOW DOWN" => Self::SlowDown,
            "TURN_LEFT" | "TURN LEFT" => Self::TurnLeft,
            "TURN_RIGHT" | "TURN RIGHT" => Self::TurnRight,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpeedUp => "SPEED_UP",
            Self::SlowDown => "SLOW_DOWN",
            Self::TurnLeft => "TURN_LEFT",
            Self::TurnRight => "TURN_RIGHT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client role selected by the `User-Type` header of a CONNECT message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Observer,
    Admin,
}

impl Role {
    /// The exact string "ADMIN" selects the admin role, anything else
    /// (including a missing header) is an observer.
    pub fn from_user_type(value: &str) -> Self {
        if value == "ADMIN" {
            Self::Admin
        } else {
            Self::Observer
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Observer => "OBSERVER",
            Self::Admin => "ADMIN",
        })
    }
}

/// The four discrete headings. Turning left cycles NORTH→WEST→SOUTH→EAST,
/// turning right the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub fn left(&self) -> Self {
        match self {
            Self::North => Self::West,
            Self::West => Self::South,
            Self::South => Self::East,
            Self::East => Self::North,
        }
    }

    pub fn right(&self) -> Self {
        match self {
            Self::North => Self::East,
            Self::East => Self::South,
            Self::South => Self::West,
            Self::West => Self::North,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::North => "NORTH",
            Self::East => "EAST",
            Self::South => "SOUTH",
            Self::West => "WEST",
        })
    }
}

/// Snapshot of the simulated vehicle. `is_moving` is derived from speed and
/// stays consistent with it on every mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub speed: f32,
    pub battery: f32,
    pub temperature: f32,
    pub direction: Direction,
    pub is_moving: bool,
}

impl VehicleState {
    pub fn new() -> Self {
        Self {
            speed: 0.0,
            battery: 100.0,
            temperature: 25.0,
            direction: Direction::North,
            is_moving: false,
        }
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that make a frame unparseable. These are answered with
/// RESPONSE_ERROR and never terminate the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Header line did not split into exactly three tokens, or the length
    /// token was not an integer.
    BadHeader,
    /// Type token outside the closed message type set.
    UnknownType(String),
    /// Declared body length above [`MAX_BODY_LEN`].
    BodyTooLarge(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHeader => write!(f, "malformed header line"),
            Self::UnknownType(t) => write!(f, "unknown message type '{}'", t),
            Self::BodyTooLarge(n) => write!(f, "declared body length {} exceeds limit", n),
        }
    }
}

impl std::error::Error for FrameError {}

/// A decoded protocol unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: String,
    pub kind: MessageType,
    /// Length from the header line. Informational for inbound messages; the
    /// framing itself decides how many body bytes belong to the message.
    pub declared_len: usize,
    pub username: Option<String>,
    pub auth_token: Option<String>,
    pub command: Option<String>,
    pub user_type: Option<String>,
    pub body: Option<String>,
}

impl Message {
    /// Tries to extract one complete message from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the buffer holds no complete frame yet (the
    /// caller keeps reading), or `Ok(Some((message, consumed)))` where
    /// `consumed` is the number of bytes to drain from the buffer.
    pub fn parse(buf: &[u8]) -> Result<Option<(Message, usize)>, FrameError> {
        let (term_pos, term_len) = match find_terminator(buf) {
            Some(t) => t,
            None => return Ok(None),
        };

        let header = String::from_utf8_lossy(&buf[..term_pos]);
        let mut lines = header.lines();

        let first = lines.next().unwrap_or("");
        let tokens: Vec<&str> = first.split_whitespace().collect();
        if tokens.len() != 3 {
            return Err(FrameError::BadHeader);
        }
        let version = tokens[0].to_string();
        let kind = MessageType::from_token(tokens[1])
            .ok_or_else(|| FrameError::UnknownType(tokens[1].to_string()))?;
        let declared_len: usize = tokens[2].parse().map_err(|_| FrameError::BadHeader)?;
        if declared_len > MAX_BODY_LEN {
            return Err(FrameError::BodyTooLarge(declared_len));
        }

        let mut msg = Message {
            version,
            kind,
            declared_len,
            username: None,
            auth_token: None,
            command: None,
            user_type: None,
            body: None,
        };

        for line in lines {
            if line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                let value = value.trim().to_string();
                match key.trim() {
                    "Username" => msg.username = Some(value),
                    "Password" | "Auth-Token" => msg.auth_token = Some(value),
                    "Command" => msg.command = Some(value),
                    "User-Type" => msg.user_type = Some(value),
                    _ => {}
                }
            }
        }

        let body_start = term_pos + term_len;
        let consumed = if declared_len > 0 {
            if buf.len() < body_start + declared_len {
                // Headers are complete but the body is still in flight.
                return Ok(None);
            }
            let body = &buf[body_start..body_start + declared_len];
            msg.body = Some(String::from_utf8_lossy(body).into_owned());
            body_start + declared_len
        } else {
            body_start
        };

        Ok(Some((msg, consumed)))
    }
}

/// Finds the earliest blank-line terminator, `\r\n\r\n` or `\n\n`.
fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    for i in 0..buf.len() {
        if buf[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        if buf[i..].starts_with(b"\n\n") {
            return Some((i, 2));
        }
    }
    None
}

/// Formats a server response: header line with the actual payload byte
/// length, blank line, then the payload.
pub fn encode_response(kind: MessageType, data: &str) -> String {
    format!("{} {} {}\r\n\r\n{}", PROTOCOL_VERSION, kind, data.len(), data)
}

/// Formats the fixed five-field telemetry body and wraps it in a
/// TELEMETRY_DATA response.
pub fn encode_telemetry(state: &VehicleState) -> String {
    let data = format!(
        "Speed: {:.2} km/h\r\nBattery: {:.2}%\r\nTemperature: {:.2} C\r\nDirection: {}\r\nMoving: {}",
        state.speed,
        state.battery,
        state.temperature,
        state.direction,
        if state.is_moving { "Yes" } else { "No" }
    );
    encode_response(MessageType::TelemetryData, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_message() {
        let raw = b"VATP/1.0 CONNECT 0\r\nUser-Type: ADMIN\r\n\r\n";
        let (msg, consumed) = Message::parse(raw).unwrap().unwrap();

        assert_eq!(msg.version, "VATP/1.0");
        assert_eq!(msg.kind, MessageType::Connect);
        assert_eq!(msg.declared_len, 0);
        assert_eq!(msg.user_type.as_deref(), Some("ADMIN"));
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn test_parse_auth_headers() {
        let raw = b"VATP/1.0 AUTH 0\r\nUsername: admin\r\nPassword: admin123\r\n\r\n";
        let (msg, _) = Message::parse(raw).unwrap().unwrap();

        assert_eq!(msg.kind, MessageType::Auth);
        assert_eq!(msg.username.as_deref(), Some("admin"));
        assert_eq!(msg.auth_token.as_deref(), Some("admin123"));
    }

    #[test]
    fn test_parse_auth_token_header_alias() {
        let raw = b"VATP/1.0 COMMAND 0\r\nAuth-Token: TOKEN_abc\r\nCommand: SPEED_UP\r\n\r\n";
        let (msg, _) = Message::parse(raw).unwrap().unwrap();

        assert_eq!(msg.auth_token.as_deref(), Some("TOKEN_abc"));
        assert_eq!(msg.command.as_deref(), Some("SPEED_UP"));
    }

    #[test]
    fn test_parse_incomplete_is_not_an_error() {
        // No blank-line terminator yet: keep buffering, even if the header
        // line would be malformed once complete.
        assert_eq!(Message::parse(b"VATP/1.0 CONNECT 0\r\n"), Ok(None));
        assert_eq!(Message::parse(b"garbage with several tokens"), Ok(None));
        assert_eq!(Message::parse(b""), Ok(None));
    }

    #[test]
    fn test_parse_two_token_header_is_malformed() {
        let result = Message::parse(b"VATP/1.0 CONNECT\r\n\r\n");
        assert_eq!(result, Err(FrameError::BadHeader));
    }

    #[test]
    fn test_parse_unknown_type_is_malformed() {
        let result = Message::parse(b"VATP/1.0 BOGUS 0\r\n\r\n");
        assert_eq!(result, Err(FrameError::UnknownType("BOGUS".to_string())));
    }

    #[test]
    fn test_parse_non_numeric_length_is_malformed() {
        let result = Message::parse(b"VATP/1.0 CONNECT abc\r\n\r\n");
        assert_eq!(result, Err(FrameError::BadHeader));
    }

    #[test]
    fn test_parse_oversized_declared_length() {
        let raw = format!("VATP/1.0 COMMAND {}\r\n\r\n", MAX_BODY_LEN + 1);
        let result = Message::parse(raw.as_bytes());
        assert_eq!(result, Err(FrameError::BodyTooLarge(MAX_BODY_LEN + 1)));
    }

    #[test]
    fn test_parse_body_waits_for_declared_length() {
        let raw = b"VATP/1.0 RESPONSE_OK 5\r\n\r\nhel";
        assert_eq!(Message::parse(raw), Ok(None));

        let raw = b"VATP/1.0 RESPONSE_OK 5\r\n\r\nhello";
        let (msg, consumed) = Message::parse(raw).unwrap().unwrap();
        assert_eq!(msg.body.as_deref(), Some("hello"));
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn test_parse_leaves_following_message_in_buffer() {
        let raw = b"VATP/1.0 GET_TELEMETRY 0\n\nVATP/1.0 DISCONNECT 0\n\n";
        let (msg, consumed) = Message::parse(raw).unwrap().unwrap();
        assert_eq!(msg.kind, MessageType::GetTelemetry);

        let (msg2, consumed2) = Message::parse(&raw[consumed..]).unwrap().unwrap();
        assert_eq!(msg2.kind, MessageType::Disconnect);
        assert_eq!(consumed + consumed2, raw.len());
    }

    #[test]
    fn test_parse_bare_newline_terminator() {
        let raw = b"VATP/1.0 CONNECT 0\nUser-Type: OBSERVER\n\n";
        let (msg, _) = Message::parse(raw).unwrap().unwrap();
        assert_eq!(msg.kind, MessageType::Connect);
        assert_eq!(msg.user_type.as_deref(), Some("OBSERVER"));
    }

    #[test]
    fn test_encode_response_uses_actual_length() {
        let encoded = encode_response(MessageType::ResponseOk, "hello");
        assert_eq!(encoded, "VATP/1.0 RESPONSE_OK 5\r\n\r\nhello");

        let empty = encode_response(MessageType::ResponseOk, "");
        assert_eq!(empty, "VATP/1.0 RESPONSE_OK 0\r\n\r\n");
    }

    #[test]
    fn test_encode_response_roundtrip() {
        let encoded = encode_response(MessageType::ResponseError, "Invalid credentials");
        let (msg, consumed) = Message::parse(encoded.as_bytes()).unwrap().unwrap();

        assert_eq!(msg.kind, MessageType::ResponseError);
        assert_eq!(msg.body.as_deref(), Some("Invalid credentials"));
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_encode_telemetry_format() {
        let state = VehicleState::new();
        let encoded = encode_telemetry(&state);
        let (msg, _) = Message::parse(encoded.as_bytes()).unwrap().unwrap();

        assert_eq!(msg.kind, MessageType::TelemetryData);
        let body = msg.body.unwrap();
        assert!(body.contains("Speed: 0.00 km/h"));
        assert!(body.contains("Battery: 100.00%"));
        assert!(body.contains("Temperature: 25.00 C"));
        assert!(body.contains("Direction: NORTH"));
        assert!(body.contains("Moving: No"));
    }

    #[test]
    fn test_command_parse_variants() {
        assert_eq!(CommandType::parse("SPEED_UP"), CommandType::SpeedUp);
        assert_eq!(CommandType::parse("SPEED UP"), CommandType::SpeedUp);
        assert_eq!(CommandType::parse("SLOW_DOWN"), CommandType::SlowDown);
        assert_eq!(CommandType::parse("SLOW DOWN"), CommandType::SlowDown);
        assert_eq!(CommandType::parse("TURN_LEFT"), CommandType::TurnLeft);
        assert_eq!(CommandType::parse("TURN LEFT"), CommandType::TurnLeft);
        assert_eq!(CommandType::parse("TURN_RIGHT"), CommandType::TurnRight);
        assert_eq!(CommandType::parse("TURN RIGHT"), CommandType::TurnRight);
        assert_eq!(CommandType::parse("FLY"), CommandType::Unknown);
        assert_eq!(CommandType::parse(""), CommandType::Unknown);
    }

    #[test]
    fn test_direction_cycles_close() {
        let mut dir = Direction::North;
        for _ in 0..4 {
            dir = dir.left();
        }
        assert_eq!(dir, Direction::North);

        let mut dir = Direction::East;
        for _ in 0..4 {
            dir = dir.right();
        }
        assert_eq!(dir, Direction::East);
    }

    #[test]
    fn test_direction_left_order() {
        assert_eq!(Direction::North.left(), Direction::West);
        assert_eq!(Direction::West.left(), Direction::South);
        assert_eq!(Direction::South.left(), Direction::East);
        assert_eq!(Direction::East.left(), Direction::North);
    }

    #[test]
    fn test_role_from_user_type() {
        assert_eq!(Role::from_user_type("ADMIN"), Role::Admin);
        assert_eq!(Role::from_user_type("admin"), Role::Observer);
        assert_eq!(Role::from_user_type("OBSERVER"), Role::Observer);
        assert_eq!(Role::from_user_type(""), Role::Observer);
    }

    #[test]
    fn test_message_type_tokens_roundtrip() {
        let all = [
            MessageType::Connect,
            MessageType::Auth,
            MessageType::GetTelemetry,
            MessageType::Command,
            MessageType::ListUsers,
            MessageType::Disconnect,
            MessageType::ResponseOk,
            MessageType::ResponseError,
            MessageType::TelemetryData,
        ];
        for kind in all {
            assert_eq!(MessageType::from_token(kind.as_str()), Some(kind));
        }
    }
}
