pub mod notification;
pub mod patient;
pub mod schedule;
pub mod vital;

pub use notification::*;
pub use patient::*;
pub use schedule::*;
pub use vital::*;
