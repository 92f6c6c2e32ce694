mod absence_events;
mod change_handler;
mod cleanup;
mod complaint_events;
mod dispatcher;
mod formatter;
mod heartbeat;
mod queue_worker;
mod snapshot_differ;
mod student_events;
mod trip_events;

pub use absence_events::*;
pub use change_handler::*;
pub use cleanup::*;
pub use complaint_events::*;
pub use dispatcher::*;
pub use formatter::*;
pub use heartbeat::*;
pub use queue_worker::*;
pub use snapshot_differ::*;
pub use student_events::*;
pub use trip_events::*;
