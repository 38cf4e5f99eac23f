pub mod air;
pub mod battery;
pub mod config;
pub mod credentials;
pub mod datalog;
pub mod device;
pub mod discovery;
pub mod error;
pub mod firmware;
pub mod history;
pub mod input;
pub mod link;
pub mod render;
pub mod severity;
pub mod sim;
pub mod state;
pub mod storage;
pub mod sync;
pub mod topics;
pub mod types;

pub use config::{BrokerConfig, LinkTimings, PersistedState, RuntimeConfig};
pub use credentials::{WifiCredential, WifiCredentialSet};
pub use device::{access_point_name, Board, Device, TickReport};
pub use firmware::FIRMWARE_VERSION;
pub use history::GraphHistory;
pub use input::InputEvent;
pub use link::NetworkLinkManager;
pub use render::DisplayDiffRenderer;
pub use state::DeviceState;
pub use topics::*;
pub use types::{GraphMode, LinkState, MenuMode, WifiStatus};
