//! Ports - 差し替え可能な境界
//!
//! - **Dispatcher**: worker 戦略（fixed / per-task / virtual-ceiling）
//! - **Subscriber**: 完了イベントの受け手

pub mod dispatcher;
pub mod subscriber;

pub use self::dispatcher::Dispatcher;
pub use self::subscriber::Subscriber;
