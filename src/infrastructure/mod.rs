pub mod bridge;
pub mod gui;
pub mod session;
pub mod simulator;

pub use bridge::BridgeConnector;
pub use gui::{GuiFault, GuiResult, GuiSession, MessageType, StatusBar, VKey, WindowInfo};
pub use session::{ConnectionError, Connector, SessionHandle};
pub use simulator::{HostFixture, SimulatedConnector, SimulatedHost};
