pub mod change_feed;
pub mod domain;
pub mod fcm;
pub mod garde;
pub mod memory;
pub mod telemetry;

pub use domain::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockBusRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockChangeFeed;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockNotificationRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockPushProvider;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockQueueRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockStudentRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockUserRepository;
