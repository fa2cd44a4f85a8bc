pub mod notifier;
pub mod redpanda;

pub use notifier::{LogNotifier, RecordingNotifier, RedpandaNotifier, StatusNotifier, ORDER_STATUS_TOPIC};
pub use redpanda::RedpandaClient;
