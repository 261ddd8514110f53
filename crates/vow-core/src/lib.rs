//! vow-core
//!
//! Promise chains on a managed worker pool.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, errors, action, events）
//! - **ports**: 抽象化レイヤー（Dispatcher, Subscriber）
//! - **pool**: WorkerPool とライフサイクル（submit, stop, signal_terminate）
//! - **impls**: worker 戦略の実装（fixed / per-task / virtual-ceiling）
//! - **app**: Promise, PromiseFactory, CompletionNotifier
//! - **config**: PoolConfig（JSON / 環境変数）
//! - **observability**: PoolCounts
//!
//! ```no_run
//! use std::time::Duration;
//! use vow_core::{PoolConfig, PoolStrategy, Primary, PromiseFactory, Transmute, WorkerPool};
//!
//! let pool = WorkerPool::new(&PoolConfig::new(PoolStrategy::Fixed, 4))?;
//! let factory = PromiseFactory::new(pool.clone());
//! let answer = factory
//!     .create(Primary::of(|| 21))?
//!     .then(Transmute::of(|v: i32| v * 2))?;
//! assert_eq!(answer.get_result(), Some(42));
//! pool.stop(Duration::from_secs(1), false)?;
//! # Ok::<(), vow_core::VowError>(())
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod pool;
pub mod ports;

pub use self::app::{CompletionNotifier, Promise, PromiseFactory};
pub use self::config::{PoolConfig, PoolStrategy, TerminationHook};
pub use self::domain::{
    ActionKind, BoxError, CancelReason, CompletionEvent, EventKind, LifecycleState, Outcome,
    Primary, PromiseId, PromiseState, Step, SubscriptionId, Task, TaskFailure, Transmute, VowError,
};
pub use self::observability::PoolCounts;
pub use self::pool::{StopOutcome, WorkHandle, WorkerPool};
pub use self::ports::Subscriber;
