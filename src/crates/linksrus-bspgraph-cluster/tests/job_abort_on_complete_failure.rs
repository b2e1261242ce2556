//! One worker's `CompleteJob` failing must abort the whole job: the master
//! observes `JobAborted` and every worker's `AbortJob` runs, even the
//! workers whose own partition finished cleanly.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use linksrus_bspgraph::{BspExecutorHooks, ComputeFn, Graph, InMemoryQueueFactory, NoopHooks};
use linksrus_bspgraph_cluster::coordinator::{master, worker};
use linksrus_bspgraph_cluster::error::{ClusterError, Result};
use linksrus_bspgraph_cluster::job_runner::{ExecutorFactory, JobRunner, StartedJob};
use linksrus_bspgraph_cluster::messages::{JobDetails, MasterPayload, WorkerPayload};
use linksrus_bspgraph_cluster::stream::Stream;
use linksrus_bspgraph_cluster::worker_pool::WorkerHandle;

struct RecordingJobRunner {
    partition_index: usize,
    fail_complete: bool,
    completed: Arc<StdMutex<Vec<(usize, bool)>>>,
    aborted: Arc<StdMutex<Vec<usize>>>,
}

#[async_trait]
impl JobRunner for RecordingJobRunner {
    async fn start_job(&self, _details: &JobDetails, executor_factory: ExecutorFactory) -> Result<StartedJob> {
        let graph = Graph::new(1, Arc::new(InMemoryQueueFactory));
        let compute: ComputeFn = Arc::new(|_g, _v, _m| Ok(()));
        let hooks = executor_factory(Arc::new(NoopHooks) as Arc<dyn BspExecutorHooks>);
        Ok(StartedJob { graph, compute, hooks })
    }

    async fn complete_job(&self, _details: &JobDetails) -> Result<()> {
        if self.fail_complete {
            self.completed.lock().unwrap().push((self.partition_index, false));
            Err(ClusterError::job_runner(std::io::Error::other("disk full")))
        } else {
            self.completed.lock().unwrap().push((self.partition_index, true));
            Ok(())
        }
    }

    async fn abort_job(&self, _details: &JobDetails) {
        self.aborted.lock().unwrap().push(self.partition_index);
    }
}

#[tokio::test]
async fn job_aborts_when_one_workers_complete_job_fails() {
    const NUM_WORKERS: usize = 3;
    let completed = Arc::new(StdMutex::new(Vec::new()));
    let aborted = Arc::new(StdMutex::new(Vec::new()));
    let cancel = CancellationToken::new();

    let mut master_handles = Vec::new();
    let mut worker_join_handles = Vec::new();

    for partition_index in 0..NUM_WORKERS {
        // master -> worker transport
        let (to_worker_tx, to_worker_rx) = mpsc::channel::<MasterPayload>(16);
        // worker -> master transport
        let (to_master_tx, to_master_rx) = mpsc::channel::<WorkerPayload>(16);

        let master_stream = Stream::new(to_worker_tx);
        let worker_stream = Stream::new(to_master_tx);

        master_handles.push(WorkerHandle { id: partition_index as u64, stream: master_stream, inbound: to_master_rx });

        let job_runner = Arc::new(RecordingJobRunner {
            partition_index,
            fail_complete: partition_index == 1,
            completed: completed.clone(),
            aborted: aborted.clone(),
        });

        let worker_cancel = cancel.clone();
        worker_join_handles.push(tokio::spawn(async move {
            worker::run_job(worker_stream, to_worker_rx, job_runner, &worker_cancel).await
        }));
    }

    let master_completed = Arc::new(StdMutex::new(Vec::new()));
    let master_aborted = Arc::new(StdMutex::new(Vec::new()));
    let master_job_runner = Arc::new(RecordingJobRunner {
        partition_index: NUM_WORKERS,
        fail_complete: false,
        completed: master_completed.clone(),
        aborted: master_aborted.clone(),
    });

    let master_cancel = cancel.clone();
    let master_result = timeout(
        Duration::from_secs(5),
        master::run_job("job-1", (Uuid::nil(), Uuid::max()), master_handles, master_job_runner, &master_cancel),
    )
    .await
    .expect("master job timed out");

    assert!(matches!(master_result, Err(ClusterError::JobAborted)), "master should observe JobAborted, got {master_result:?}");
    assert_eq!(
        master_aborted.lock().unwrap().len(),
        1,
        "the master's own AbortJob must run once a worker's CompleteJob fails"
    );

    for handle in worker_join_handles {
        let _ = timeout(Duration::from_secs(5), handle).await;
    }

    let aborted = aborted.lock().unwrap();
    assert_eq!(aborted.len(), NUM_WORKERS, "every worker's AbortJob must run, got {aborted:?}");

    let completed = completed.lock().unwrap();
    let failing = completed.iter().find(|(idx, _)| *idx == 1).expect("the failing worker must have attempted CompleteJob");
    assert!(!failing.1, "the failing worker's CompleteJob must not be counted as success");
}
