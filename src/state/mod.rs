pub mod snapshot_store;
pub mod subscriber_directory;

pub use snapshot_store::{create_shared_snapshot_store, SharedSnapshotStore, SnapshotStore};
pub use subscriber_directory::{
    create_shared_subscriber_directory, JsonSubscriberDirectory, NotificationPreferences,
    SharedSubscriberDirectory, Subscriber, SubscriberDirectory,
};
