//! Worker Module Tests
//!
//! Unit tests for pool slot occupancy and result flow, plus protocol-level
//! tests that drive a `WorkerAgent` over an in-memory duplex stream, playing
//! the coordinator's side by hand.

#[cfg(test)]
mod tests {
    use crate::environment::shared::SharedEnvironment;
    use crate::environment::types::CounterEnvironment;
    use crate::job::registry::{JobContext, JobHandlerRegistry};
    use crate::job::types::{Task, TaskId, TaskResult};
    use crate::protocol::codec::{read_envelope, write_envelope};
    use crate::protocol::types::{Command, Envelope, SeqId};
    use crate::worker::agent::{ServeExit, WorkerAgent, WorkerConfig};
    use crate::worker::pool::LocalWorkerPool;

    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    fn task(id: u64, handler: &str) -> Task {
        Task {
            id: TaskId(id),
            handler: handler.to_string(),
            payload: vec![],
        }
    }

    fn test_env() -> Arc<SharedEnvironment> {
        SharedEnvironment::new(Box::new(CounterEnvironment::default()))
    }

    /// Registry with a handler that parks until released, for occupancy tests.
    fn blocking_registry() -> (Arc<JobHandlerRegistry>, Arc<Notify>) {
        let registry = JobHandlerRegistry::new();
        let release = Arc::new(Notify::new());
        let release_clone = release.clone();
        registry.register("block", move |_payload, _ctx: Arc<JobContext>| {
            let release = release_clone.clone();
            async move {
                release.notified().await;
                Ok(vec![])
            }
        });
        (registry, release)
    }

    // ============================================================
    // TEST 1: LocalWorkerPool occupancy and results
    // ============================================================

    #[tokio::test]
    async fn test_pool_executes_and_reports_result() {
        // ARRANGE
        let registry = JobHandlerRegistry::new();
        registry.register("echo", |payload, _ctx| async move { Ok(payload) });

        let (results_tx, mut results_rx) = mpsc::channel::<TaskResult>(4);
        let pool = LocalWorkerPool::start(2, registry, test_env(), results_tx);
        assert_eq!(pool.free_count(), 2);

        // ACT
        assert!(pool.execute(Task {
            id: TaskId(1),
            handler: "echo".to_string(),
            payload: vec![5]
        }));

        // ASSERT
        let result = results_rx.recv().await.unwrap();
        assert_eq!(result.task_id, TaskId(1));
        assert_eq!(result.output, Some(vec![5]));
        assert!(result.error.is_none());
        assert_eq!(pool.free_count(), 2);
    }

    #[tokio::test]
    async fn test_pool_rejects_when_every_slot_busy() {
        // ARRANGE: One slot, held open by a parked handler
        let (registry, release) = blocking_registry();
        let (results_tx, mut results_rx) = mpsc::channel::<TaskResult>(4);
        let pool = LocalWorkerPool::start(1, registry, test_env(), results_tx);

        assert!(pool.execute(task(1, "block")));
        assert_eq!(pool.free_count(), 0);
        assert!(!pool.all_free());

        // ACT + ASSERT: Second task has nowhere to go
        assert!(!pool.execute(task(2, "block")));

        // Release the slot; it becomes free again after reporting
        release.notify_one();
        let result = results_rx.recv().await.unwrap();
        assert_eq!(result.task_id, TaskId(1));
        assert_eq!(pool.free_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_captures_handler_failure_as_result() {
        let registry = JobHandlerRegistry::new();
        registry.register("fail", |_payload, _ctx| async move {
            Err(anyhow::anyhow!("deliberate"))
        });

        let (results_tx, mut results_rx) = mpsc::channel::<TaskResult>(4);
        let pool = LocalWorkerPool::start(1, registry, test_env(), results_tx);

        assert!(pool.execute(task(3, "fail")));

        let result = results_rx.recv().await.unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("deliberate"));
        // The slot survives the failure
        assert_eq!(pool.free_count(), 1);
    }

    // ============================================================
    // TEST 2: WorkerAgent protocol over a duplex stream
    // ============================================================

    fn spawn_agent(
        registry: Arc<JobHandlerRegistry>,
        slots: usize,
    ) -> (
        Arc<WorkerAgent>,
        tokio::io::DuplexStream,
        tokio::task::JoinHandle<anyhow::Result<ServeExit>>,
    ) {
        let (coordinator_side, worker_side) = tokio::io::duplex(64 * 1024);
        let config = WorkerConfig::new("unused:0").slots(slots).name("test-worker");
        let agent = WorkerAgent::new(config, registry, Box::new(CounterEnvironment::default()));

        let serve_agent = agent.clone();
        let handle = tokio::spawn(async move { serve_agent.serve(worker_side).await });

        (agent, coordinator_side, handle)
    }

    #[tokio::test]
    async fn test_agent_announces_itself_and_answers_ping() {
        // ARRANGE
        let (_agent, mut stream, _handle) = spawn_agent(JobHandlerRegistry::new(), 3);

        // ASSERT: First frame is the capacity announcement
        let hello = read_envelope(&mut stream).await.unwrap();
        assert!(matches!(hello.command, Command::Summary));
        assert_eq!(hello.free_slots, Some(3));

        // ACT: Ping
        write_envelope(&mut stream, &Envelope::fire_and_forget(Command::Ping))
            .await
            .unwrap();

        // ASSERT: Bare ack, with the free-slot piggyback
        let reply = read_envelope(&mut stream).await.unwrap();
        assert!(matches!(reply.command, Command::Ack { seq: None }));
        assert_eq!(reply.free_slots, Some(3));
    }

    #[tokio::test]
    async fn test_agent_acks_work_then_returns_result() {
        // ARRANGE
        let registry = JobHandlerRegistry::new();
        registry.register("echo", |payload, _ctx| async move { Ok(payload) });
        let (_agent, mut stream, _handle) = spawn_agent(registry, 1);
        let _hello = read_envelope(&mut stream).await.unwrap();

        // ACT: Assign a task
        let work = Envelope::sequenced(
            SeqId(1),
            Command::Work {
                task: Task {
                    id: TaskId(11),
                    handler: "echo".to_string(),
                    payload: vec![4, 2],
                },
            },
        );
        write_envelope(&mut stream, &work).await.unwrap();

        // ASSERT: Ack first, matching the sequence id
        let ack = read_envelope(&mut stream).await.unwrap();
        assert!(matches!(ack.command, Command::Ack { seq: Some(SeqId(1)) }));

        // ASSERT: Then the result, with the freed slot reported
        let returned = read_envelope(&mut stream).await.unwrap();
        assert_eq!(returned.free_slots, Some(1));
        match returned.command {
            Command::Return { result } => {
                assert_eq!(result.task_id, TaskId(11));
                assert_eq!(result.output, Some(vec![4, 2]));
            }
            other => panic!("expected Return, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_agent_rejects_work_when_full_but_still_acks() {
        // ARRANGE: Single slot, parked handler
        let (registry, release) = blocking_registry();
        let (_agent, mut stream, _handle) = spawn_agent(registry, 1);
        let _hello = read_envelope(&mut stream).await.unwrap();

        write_envelope(
            &mut stream,
            &Envelope::sequenced(SeqId(1), Command::Work { task: task(1, "block") }),
        )
        .await
        .unwrap();
        let ack = read_envelope(&mut stream).await.unwrap();
        assert!(matches!(ack.command, Command::Ack { seq: Some(SeqId(1)) }));

        // ACT: Second assignment with no slot free
        write_envelope(
            &mut stream,
            &Envelope::sequenced(SeqId(2), Command::Work { task: task(2, "block") }),
        )
        .await
        .unwrap();

        // ASSERT: Rejection error names the task, then the ack clears the window
        let error = read_envelope(&mut stream).await.unwrap();
        match error.command {
            Command::Error { task_id, .. } => assert_eq!(task_id, Some(TaskId(2))),
            other => panic!("expected Error, got {:?}", other),
        }
        let ack = read_envelope(&mut stream).await.unwrap();
        assert!(matches!(ack.command, Command::Ack { seq: Some(SeqId(2)) }));

        release.notify_one();
    }

    #[tokio::test]
    async fn test_agent_installs_environment_only_when_idle() {
        // ARRANGE: Park a task so a slot is busy
        let (registry, release) = blocking_registry();
        let (agent, mut stream, _handle) = spawn_agent(registry, 1);
        let _hello = read_envelope(&mut stream).await.unwrap();

        write_envelope(
            &mut stream,
            &Envelope::sequenced(SeqId(1), Command::Work { task: task(1, "block") }),
        )
        .await
        .unwrap();
        let _ack = read_envelope(&mut stream).await.unwrap();

        // ACT: Push a snapshot while busy
        let snapshot = crate::environment::types::Environment::serialize(
            &CounterEnvironment::new(7),
        )
        .unwrap();
        write_envelope(
            &mut stream,
            &Envelope::sequenced(SeqId(2), Command::Environment { snapshot: snapshot.clone() }),
        )
        .await
        .unwrap();

        // ASSERT: Rejected while a slot is occupied
        let error = read_envelope(&mut stream).await.unwrap();
        assert!(matches!(error.command, Command::Error { .. }));
        let _ack = read_envelope(&mut stream).await.unwrap();

        // ACT: Drain the slot, retry
        release.notify_one();
        let _returned = read_envelope(&mut stream).await.unwrap();
        write_envelope(
            &mut stream,
            &Envelope::sequenced(SeqId(3), Command::Environment { snapshot }),
        )
        .await
        .unwrap();
        let ack = read_envelope(&mut stream).await.unwrap();
        assert!(matches!(ack.command, Command::Ack { seq: Some(SeqId(3)) }));

        // ASSERT: Replica replaced wholesale
        let x = agent
            .env()
            .read(|env| {
                env.as_any()
                    .downcast_ref::<CounterEnvironment>()
                    .map(|c| c.x)
            })
            .await;
        assert_eq!(x, Some(7));
    }

    #[tokio::test]
    async fn test_agent_stops_on_shutdown() {
        let (_agent, mut stream, handle) = spawn_agent(JobHandlerRegistry::new(), 1);
        let _hello = read_envelope(&mut stream).await.unwrap();

        write_envelope(
            &mut stream,
            &Envelope::sequenced(SeqId(1), Command::Shutdown),
        )
        .await
        .unwrap();
        let ack = read_envelope(&mut stream).await.unwrap();
        assert!(matches!(ack.command, Command::Ack { seq: Some(SeqId(1)) }));

        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, ServeExit::Shutdown);
    }
}
