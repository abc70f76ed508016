//! Work queue scheduling
//!
//! - `Priority`: Scheduling weight of a queue item
//! - `PriorityRules`: Compiled ignore/low/high URL rules
//! - `DomainRules`: Configured allow/deny answer for a hostname
//! - `QueueScanner`: Serves ready items while spreading work across hostnames

mod priority;
mod scanner;

pub use priority::{DomainRules, Priority, PriorityRules};
pub use scanner::{
    QueueScanner, BATCH_SIZE, MAX_BATCH_BUILD_TIME, MAX_BUFFER_SIZE, SOURCE_BUFFER_SIZE,
};
