pub mod booking;
pub mod calendar;
pub mod collaborators;
pub mod conflict;
pub mod interval;
pub mod lifecycle;
pub mod locks;
pub mod notification;
pub mod store;

pub use booking::*;
pub use calendar::*;
pub use collaborators::*;
pub use conflict::*;
pub use interval::*;
pub use lifecycle::*;
pub use locks::*;
pub use notification::*;
pub use store::*;
