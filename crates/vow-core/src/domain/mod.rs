//! Domain model: ids, states, errors, actions, events.

pub mod action;
pub mod errors;
pub mod events;
pub mod ids;
pub mod state;

pub use self::action::{ActionKind, Primary, Step, Task, Transmute};
pub use self::errors::{BoxError, CancelReason, Outcome, TaskFailure, VowError};
pub use self::events::{CompletionEvent, EventKind};
pub use self::ids::{JobId, PromiseId, SubscriptionId};
pub use self::state::{LifecycleState, PromiseState};
