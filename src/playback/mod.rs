//! Playback of single songs and the navigation across them.

pub mod coordinator;
pub mod session;

pub use coordinator::{
    ChainExit, CoordinatorParts, NavigationCoordinator, QueueEnd, QueueEvent, QueueObserver,
};
pub use session::SessionOptions;
