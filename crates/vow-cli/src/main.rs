use async_trait::async_trait;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use vow_core::{
    BoxError, CompletionEvent, CompletionNotifier, EventKind, PoolConfig, Primary,
    PromiseFactory, Subscriber, Task, Transmute, VowError, WorkerPool,
};

/// 完了イベントをログに出すだけの subscriber
struct LogSubscriber;

#[async_trait]
impl Subscriber for LogSubscriber {
    async fn notify(&self, event: &CompletionEvent) -> Result<(), BoxError> {
        let value = event
            .value::<String>()
            .cloned()
            .or_else(|| event.value::<u32>().map(u32::to_string))
            .unwrap_or_else(|| "<opaque>".to_string());
        tracing::info!(kind = ?event.kind, promise = %event.promise, %value, "completed");
        Ok(())
    }
}

/// 最初の数回だけ失敗して、あとは黙って成功する subscriber（toxic になる）
struct FlakySubscriber {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl Subscriber for FlakySubscriber {
    async fn notify(&self, _event: &CompletionEvent) -> Result<(), BoxError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(format!("intentional failure (left={left})").into());
        }
        Ok(())
    }
}

fn run() -> Result<(), VowError> {
    // (A) 設定は VOW_POOL_* から（なければ fixed / CPU 数 / manual）
    let config = PoolConfig::from_env()?;
    let pool = WorkerPool::new(&config)?;

    // (B) notifier と subscriber を用意
    let notifier = CompletionNotifier::new(&pool);
    notifier.subscribe(Arc::new(LogSubscriber), EventKind::ALL)?;
    notifier.subscribe(
        Arc::new(FlakySubscriber {
            remaining_failures: AtomicU32::new(1),
        }),
        [EventKind::Transmuted],
    )?;
    let factory = PromiseFactory::new(pool.clone()).with_notifier(notifier.clone());

    // (C) chain: primary -> task -> transmute
    let greeting = factory
        .create(Primary::of(|| "vow".to_string()))?
        .then(Task::of(|name: &String| {
            tracing::info!(%name, "task saw the value");
        }))?
        .then(Transmute::of(|name: String| format!("Hello, {name}!")))?;

    // (D) 失敗する chain は handle で受ける
    let broken = factory
        .create(Primary::<u32>::try_of(|| Err("sensor offline")))?
        .then(Transmute::of(|reading: u32| reading * 2))?;

    // (E) まとめて投入して全部待つ
    let batch = factory.create_all((1..=3_u32).map(|n| Primary::of(move || n * n)).collect())?;

    println!("{}", greeting.get_result().unwrap_or_default());
    broken.handle(|cause| println!("broken chain: {cause}"));
    if let Some(promises) = batch.get_result() {
        let squares: Vec<_> = promises.iter().map(|p| p.get_result()).collect();
        println!("squares: {squares:?}");
    }

    let counts = serde_json::to_string(&pool.counts()).unwrap_or_default();
    println!("counts: {counts}");

    // (F) graceful shutdown（配送も待つ）
    let outcome = pool.stop(Duration::from_secs(5), false)?;
    println!(
        "stop: {outcome:?} state={} subscribers={}",
        pool.state(),
        notifier.subscriber_count()
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "vow demo failed");
            ExitCode::FAILURE
        }
    }
}
