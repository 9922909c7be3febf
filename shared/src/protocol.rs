/// Port a VNC server listens on when the descriptor does not name one
pub const DEFAULT_VNC_PORT: u16 = 5900;

/// WebSocket sub-protocol noVNC offers for raw RFB traffic
pub const WS_BINARY_PROTOCOL: &str = "binary";

/// API path prefix
pub const API_PREFIX: &str = "/v1";
