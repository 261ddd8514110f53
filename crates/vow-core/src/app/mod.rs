//! App - アプリケーション層
//!
//! pool と domain を組み合わせて、利用者が触る API を提供します。
//!
//! # 主要コンポーネント
//! - **Promise**: action の結果と `then` による連鎖
//! - **PromiseFactory**: chain の起点（`create` / `create_all`）
//! - **CompletionNotifier**: 完了イベントの subscriber への配送

pub mod factory;
pub mod notifier;
pub mod promise;

// 主要な型を再エクスポート
pub use self::factory::PromiseFactory;
pub use self::notifier::CompletionNotifier;
pub use self::promise::Promise;
