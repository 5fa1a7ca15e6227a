pub mod error;
pub mod publisher;
pub mod signer;
pub mod types;

pub use error::{NotifyError, Result};
pub use publisher::{spawn_publisher, PublisherHandle};
pub use types::{DeliveryOutcome, NotificationEvent};
