//! Job Module Tests
//!
//! Covers the handler registry mechanics, the per-task log capture through
//! `JobContext`, and the single-resolution semantics of `JobFuture`.

#[cfg(test)]
mod tests {
    use crate::environment::shared::SharedEnvironment;
    use crate::environment::types::CounterEnvironment;
    use crate::job::future::{JobFuture, JobResolution};
    use crate::job::registry::{JobContext, JobHandlerRegistry};
    use crate::job::types::{TaskId, TaskResult};

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn context() -> Arc<JobContext> {
        JobContext::new(SharedEnvironment::new(Box::new(CounterEnvironment::default())))
    }

    // ============================================================
    // TEST 1: JobHandlerRegistry - Registration and Execution
    // ============================================================

    #[tokio::test]
    async fn test_registry_register_and_execute() {
        // ARRANGE: Create registry and call counter
        let registry = JobHandlerRegistry::new();
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        // ACT: Register handler
        registry.register("test_handler", move |_payload, _ctx| {
            let count = call_count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1])
            }
        });

        // ASSERT: Handler is registered
        assert!(registry.has_handler("test_handler"));
        assert_eq!(registry.handler_count(), 1);

        // ACT: Execute
        let output = registry
            .execute("test_handler", vec![], context())
            .await
            .unwrap();

        // ASSERT: Handler was called and produced its output
        assert_eq!(output, vec![1]);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_unknown_handler_returns_error() {
        let registry = JobHandlerRegistry::new();

        let result = registry
            .execute("non_existent_handler", vec![], context())
            .await;

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Unknown job handler")
        );
    }

    #[tokio::test]
    async fn test_registry_handler_can_fail() {
        let registry = JobHandlerRegistry::new();

        registry.register("failing_handler", |_payload, _ctx| async {
            Err(anyhow::anyhow!("Intentional error"))
        });

        let result = registry.execute("failing_handler", vec![], context()).await;

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Intentional error")
        );
    }

    #[tokio::test]
    async fn test_registry_handler_receives_payload() {
        let registry = JobHandlerRegistry::new();

        registry.register("echo", |payload, _ctx| async move { Ok(payload) });

        let output = registry
            .execute("echo", vec![9, 8, 7], context())
            .await
            .unwrap();
        assert_eq!(output, vec![9, 8, 7]);
    }

    // ============================================================
    // TEST 2: JobContext log capture
    // ============================================================

    #[tokio::test]
    async fn test_context_captures_handler_log() {
        let registry = JobHandlerRegistry::new();
        registry.register("chatty", |_payload, ctx: Arc<JobContext>| async move {
            ctx.log("starting");
            ctx.log("done");
            Ok(vec![])
        });

        let ctx = context();
        registry.execute("chatty", vec![], ctx.clone()).await.unwrap();

        assert_eq!(ctx.take_log(), "starting\ndone\n");
        // Drained: a second take yields nothing.
        assert_eq!(ctx.take_log(), "");
    }

    // ============================================================
    // TEST 3: JobFuture resolution
    // ============================================================

    #[tokio::test]
    async fn test_future_resolves_with_output_and_worker() {
        // ARRANGE
        let (tx, future) = JobFuture::new(TaskId(1));

        // ACT
        tx.send(JobResolution {
            result: TaskResult::success(TaskId(1), vec![6], "log line\n".to_string()),
            worker: "worker-a".to_string(),
        })
        .unwrap();

        // ASSERT
        let output = future.wait().await.unwrap();
        assert_eq!(output.output, vec![6]);
        assert_eq!(output.worker, "worker-a");
        assert_eq!(output.log, "log line\n");
    }

    #[tokio::test]
    async fn test_future_surfaces_task_failure_with_worker_name() {
        let (tx, future) = JobFuture::new(TaskId(2));

        tx.send(JobResolution {
            result: TaskResult::failure(TaskId(2), "boom".to_string(), String::new()),
            worker: "worker-b".to_string(),
        })
        .unwrap();

        let err = future.wait().await.unwrap_err().to_string();
        assert!(err.contains("worker-b"));
        assert!(err.contains("boom"));
    }

    #[tokio::test]
    async fn test_future_timed_wait_returns_none_while_unresolved() {
        let (tx, future) = JobFuture::new(TaskId(3));

        let pending = future.wait_timeout(Duration::from_millis(20)).await.unwrap();
        assert!(pending.is_none());

        // Sender still alive; dropping it afterwards is the abandonment case.
        drop(tx);
    }

    #[tokio::test]
    async fn test_future_errors_when_abandoned() {
        let (tx, future) = JobFuture::new(TaskId(4));
        drop(tx);

        let err = future.wait().await.unwrap_err().to_string();
        assert!(err.contains("abandoned"));
    }
}
