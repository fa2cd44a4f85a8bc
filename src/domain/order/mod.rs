// ============================================================================
// Order Domain - Business Logic for Orders
// ============================================================================
//
// - Value objects (Order, OrderLine, OrderStatus state machine)
// - Events (status changes published to the notifier)
// - Commands (CreateOrder)
// - Errors (OrderError enum)
// - Lifecycle (OrderLifecycle service: checkout, transitions, queries)
//
// ============================================================================

pub mod commands;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod value_objects;

// Re-export for convenience
pub use commands::*;
pub use errors::*;
pub use events::*;
pub use lifecycle::{generate_order_no, OrderConfig, OrderLifecycle, OrderPorts};
pub use value_objects::*;
