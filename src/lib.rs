pub mod api;
pub mod config;
pub mod dispatch;
pub mod monitor;
pub mod tracker;
pub mod transport;
pub mod types;

/// USGS FDSN event service host (public, no auth required)
pub const USGS_HOST: &str = "earthquake.usgs.gov";

/// Meshtastic UDP multicast group shared by all nodes on the local mesh
pub const MCAST_GRP: &str = "224.0.0.69";

/// Meshtastic UDP multicast port
pub const MCAST_PORT: u16 = 4403;

/// Default mesh channel name
pub const DEFAULT_CHANNEL: &str = "LongFast";

/// Default mesh channel key (base64)
pub const DEFAULT_KEY: &str = "AQ==";
