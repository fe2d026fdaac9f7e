pub mod actor;
pub mod geo;
pub mod ledger;
pub mod notification;
pub mod report;

pub use actor::*;
pub use geo::*;
pub use ledger::*;
pub use notification::*;
pub use report::*;
