use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use jobrelay::accessor::Accessor;
use jobrelay::broker::{Broker, FileBroker, JobRequest};
use jobrelay::config::Settings;
use jobrelay::context::{FileContext, JobContext, MemoryContext};
use jobrelay::dispatcher::Dispatcher;
use jobrelay::error::AccessError;
use jobrelay::intake;
use jobrelay::state_machine::JobState;
use jobrelay::store::StateStore;
use jobrelay::worker::csv_sum::read_artifact_total;
use jobrelay::worker::{CsvSum, Worker, WorkerPool};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;

const SAMPLE: &str = "value\n10\n,5\n\nabc\n7\n";

fn write_input(root: &Path, name: &str, contents: &str) -> PathBuf {
    let dir = root.join("uploads");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Drain everything currently queued with a single worker slot.
async fn drain<S: StateStore, B: Broker>(ctx: &Arc<JobContext<S, B>>) {
    let worker = Worker::new(Arc::clone(ctx), Arc::new(CsvSum::default()), 0);
    let delivery = ctx.broker.dequeue().await.unwrap();
    worker.handle(delivery).await;
}

#[tokio::test]
async fn memory_backend_full_lifecycle() {
    let root = tempfile::tempdir().unwrap();
    let ctx = MemoryContext::in_memory(Settings::rooted_at(root.path()));
    let dispatcher = Dispatcher::new(Arc::clone(&ctx));
    let accessor = Accessor::new(Arc::clone(&ctx));

    let input = write_input(root.path(), "data.csv", SAMPLE);
    let id = dispatcher.submit(&input).await.unwrap();

    let status = accessor.get_status(&id).await.unwrap();
    assert_eq!(status.state, JobState::Pending);
    assert!(matches!(
        accessor.get_result(&id).await,
        Err(AccessError::NotReady { .. })
    ));

    drain(&ctx).await;

    let status = accessor.get_status(&id).await.unwrap();
    assert_eq!(status.state, JobState::Success);
    assert_eq!(status.detail.as_deref(), Some("Summed 2 of 4 rows"));

    let mut artifact = accessor.get_result(&id).await.unwrap();
    assert_eq!(artifact.path, root.path().join("results").join("data_result.csv"));
    let mut body = String::new();
    artifact.file.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, "Sum\n17\n");
    assert_eq!(read_artifact_total(&artifact.path).await.unwrap(), 17.0);
}

#[tokio::test]
async fn unknown_id_is_rejected_by_both_reads() {
    let root = tempfile::tempdir().unwrap();
    let ctx = MemoryContext::in_memory(Settings::rooted_at(root.path()));
    let accessor = Accessor::new(Arc::clone(&ctx));

    assert!(matches!(
        accessor.get_status("no-such-job").await,
        Err(AccessError::UnknownJob(_))
    ));
    assert!(matches!(
        accessor.get_result("no-such-job").await,
        Err(AccessError::UnknownJob(_))
    ));
}

#[tokio::test]
async fn missing_input_fails_the_job() {
    let root = tempfile::tempdir().unwrap();
    let ctx = MemoryContext::in_memory(Settings::rooted_at(root.path()));
    let dispatcher = Dispatcher::new(Arc::clone(&ctx));
    let accessor = Accessor::new(Arc::clone(&ctx));

    let id = dispatcher
        .submit(&root.path().join("uploads").join("gone.csv"))
        .await
        .unwrap();
    drain(&ctx).await;

    let status = accessor.get_status(&id).await.unwrap();
    assert_eq!(status.state, JobState::Failure);
    assert!(status.detail.unwrap().starts_with("I/O failure:"));
    assert!(matches!(
        accessor.get_result(&id).await,
        Err(AccessError::Failed { .. })
    ));
}

#[tokio::test]
async fn duplicate_delivery_leaves_job_untouched() {
    let root = tempfile::tempdir().unwrap();
    let ctx = MemoryContext::in_memory(Settings::rooted_at(root.path()));
    let dispatcher = Dispatcher::new(Arc::clone(&ctx));

    let input = write_input(root.path(), "data.csv", SAMPLE);
    let id = dispatcher.submit(&input).await.unwrap();
    drain(&ctx).await;
    let finished = ctx.store.get(&id).await.unwrap().unwrap();

    ctx.broker
        .enqueue(&JobRequest {
            job_id: id.clone(),
            input_reference: input,
        })
        .await
        .unwrap();
    drain(&ctx).await;

    let after = ctx.store.get(&id).await.unwrap().unwrap();
    assert_eq!(after, finished);
    assert_eq!(after.history, vec![JobState::Pending, JobState::Running]);
}

#[tokio::test]
async fn deleted_artifact_is_reported_missing() {
    let root = tempfile::tempdir().unwrap();
    let ctx = MemoryContext::in_memory(Settings::rooted_at(root.path()));
    let dispatcher = Dispatcher::new(Arc::clone(&ctx));
    let accessor = Accessor::new(Arc::clone(&ctx));

    let input = write_input(root.path(), "data.csv", SAMPLE);
    let id = dispatcher.submit(&input).await.unwrap();
    drain(&ctx).await;

    std::fs::remove_file(root.path().join("results").join("data_result.csv")).unwrap();
    assert!(matches!(
        accessor.get_result(&id).await,
        Err(AccessError::ArtifactMissing { .. })
    ));
}

#[tokio::test]
async fn file_backend_is_shared_between_handles() {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings::rooted_at(root.path());

    // Two independent contexts over the same directories, as a client
    // process and a worker process would have.
    let client = FileContext::open(settings.clone()).await.unwrap();
    let server = FileContext::open(settings).await.unwrap();

    let source = write_input(root.path(), "incoming.csv", SAMPLE);
    let stored = intake::accept(&source, &client.settings.input_dir).await.unwrap();
    let id = Dispatcher::new(Arc::clone(&client)).submit(&stored).await.unwrap();

    let accessor = Accessor::new(Arc::clone(&client));
    assert_eq!(accessor.get_status(&id).await.unwrap().state, JobState::Pending);

    drain(&server).await;

    assert_eq!(accessor.get_status(&id).await.unwrap().state, JobState::Success);
    let artifact = accessor.get_result(&id).await.unwrap();
    assert_eq!(read_artifact_total(&artifact.path).await.unwrap(), 17.0);
    assert_eq!(server.broker.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn file_backend_pool_runs_each_job_once() {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings::rooted_at(root.path());
    let ctx = FileContext::open(settings.clone()).await.unwrap();
    let dispatcher = Dispatcher::new(Arc::clone(&ctx));

    let mut ids = Vec::new();
    for n in 0..6 {
        let input = write_input(root.path(), &format!("batch{n}.csv"), &format!("value\n{n}\n1\n"));
        ids.push(dispatcher.submit(&input).await.unwrap());
    }
    // Every request delivered twice.
    let extra = FileBroker::open(&settings.broker_dir, settings.poll_interval).await.unwrap();
    for id in &ids {
        let job = ctx.store.get(id).await.unwrap().unwrap();
        extra
            .enqueue(&JobRequest {
                job_id: id.clone(),
                input_reference: job.input_reference,
            })
            .await
            .unwrap();
    }

    let (tx, rx) = watch::channel(false);
    let pool = WorkerPool::new(Arc::clone(&ctx), CsvSum::default()).with_slots(3);
    let running = tokio::spawn(pool.run(rx));

    let accessor = Accessor::new(Arc::clone(&ctx));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut done = 0;
        for id in &ids {
            if accessor.get_status(id).await.unwrap().state.is_terminal() {
                done += 1;
            }
        }
        if done == ids.len() && ctx.broker.pending().await.unwrap() == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tx.send(true).unwrap();
    running.await.unwrap().unwrap();

    for (n, id) in ids.iter().enumerate() {
        let job = ctx.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.history, vec![JobState::Pending, JobState::Running]);
        let total = read_artifact_total(job.result_reference.as_deref().unwrap()).await.unwrap();
        assert_eq!(total, n as f64 + 1.0);
    }
}
