pub mod escalation;
pub mod registry;
pub mod router;
pub mod store;

pub use escalation::EscalationMonitor;
pub use registry::ThreadRegistry;
pub use router::{MessageRouter, RoutingAction, RoutingError, RoutingResult};
pub use store::{
    AppendOutcome, NewResponse, PgTicketStore, StaffAppend, StoreError, TicketStore,
};
