mod cleanup;
mod outbox_forwarder;

pub use cleanup::spawn_cleanup_task;
pub use outbox_forwarder::{spawn_outbox_forwarder, OutboxForwarder};
