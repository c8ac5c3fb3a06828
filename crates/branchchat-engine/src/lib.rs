pub mod config;
pub mod controller;
pub mod stream;
pub mod turn;

pub use config::ControllerConfig;
pub use controller::{ConversationController, ConversationView};
pub use turn::{PreparedTurn, TurnKind, TurnOutcome};
