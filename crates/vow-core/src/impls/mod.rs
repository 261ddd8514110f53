//! Impls - Dispatcher の実装（worker 戦略）
//!
//! - **FixedWorkers**: 固定数 worker + FIFO キュー
//! - **PerTaskUnits**: submission ごとの使い捨て単位
//! - **PermitGated**: 使い捨て単位 + 同時実行数の上限

pub mod fixed;
pub mod per_task;
pub mod permit;

pub use self::fixed::FixedWorkers;
pub use self::per_task::PerTaskUnits;
pub use self::permit::PermitGated;
