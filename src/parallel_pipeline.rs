// THEORY:
// The `parallel_pipeline` wraps the synchronous `EventPipeline` for async hosts
// and moves descriptor computation off the frame path.
//
// Key architectural principles:
// 1.  **One Mutation Lock**: The engine, the frame cache and the reporter live
//     behind a single `tokio::sync::Mutex`. Frames are processed one at a time,
//     so association never observes a half-applied lifecycle transition.
// 2.  **Engine Steps Leave the Async Workers**: The synchronous engine step is
//     moved onto the blocking thread pool and hands the engine back when done.
//     The lock stays held across that await, so no caller sees it missing.
// 3.  **Snapshot In, Descriptor Out**: A finalized event's descriptor is computed
//     by the worker pool from a copied bounding box and a shared frame. Workers
//     never see the event set.
// 4.  **Round-Robin Workers**: A dispatcher hands tasks to `num_cpus` workers in
//     turn; the CPU-heavy extraction itself runs on the blocking thread pool and
//     answers through a oneshot channel.
// 5.  **Finalized Means Reported**: `finish` and `abort` both expire every live
//     event, wait for in-flight descriptors and flush the reporter before they
//     return. A fatal reporting error still flushes what was already recorded.

use crate::core_modules::event::{Event, EventId};
use crate::core_modules::features::{FeatureCollection, FeatureDescriptor};
use crate::core_modules::geometry::BoundingBox;
use crate::core_modules::image_data::ImageData;
use crate::core_modules::winner::Detection;
use crate::error::{EventError, Result};
use crate::pipeline::{EventPipeline, FrameReport, RunStatistics};
use crate::reporting::{FeatureOutcome, FinalizedEvent, ReportPaths, Reporter};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Frames kept beyond the expiration budget: the current frame and the last
/// matched one.
const FRAME_CACHE_SLACK: usize = 2;

type DescriptorReceiver = oneshot::Receiver<Result<FeatureDescriptor>>;

pub struct FeatureTask {
    pub event: EventId,
    pub bbox: BoundingBox,
    pub frame: Arc<ImageData>,
    pub result_sender: oneshot::Sender<Result<FeatureDescriptor>>,
}

pub struct FeatureWorkerPool {
    task_sender: mpsc::UnboundedSender<FeatureTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl FeatureWorkerPool {
    /// Spawns the dispatcher and `worker_count` workers. Must be called from
    /// inside a tokio runtime.
    pub fn new(collection: FeatureCollection, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let collection = Arc::new(collection);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<FeatureTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) =
            (0..worker_count).map(|_| mpsc::unbounded_channel::<FeatureTask>()).unzip();

        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if worker_senders[worker_idx].send(task).is_err() {
                    warn!(worker = worker_idx, "feature worker is gone, dropping task");
                }
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let mut workers = Vec::with_capacity(worker_count);
        for mut worker_receiver in worker_receivers {
            let collection = Arc::clone(&collection);
            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let FeatureTask {
                        event,
                        bbox,
                        frame,
                        result_sender,
                    } = task;
                    let collection = Arc::clone(&collection);
                    let extracted =
                        tokio::task::spawn_blocking(move || collection.extract(event, bbox, &frame)).await;
                    match extracted {
                        Ok(result) => {
                            let _ = result_sender.send(result);
                        }
                        Err(e) => warn!(event, error = %e, "feature extraction task failed"),
                    }
                }
            }));
        }

        Self { task_sender, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a descriptor computation for `event` and returns where its result
    /// will arrive.
    pub fn submit(&self, event: EventId, bbox: BoundingBox, frame: Arc<ImageData>) -> Result<DescriptorReceiver> {
        let (result_sender, result_receiver) = oneshot::channel();
        let task = FeatureTask {
            event,
            bbox,
            frame,
            result_sender,
        };
        self.task_sender.send(task).map_err(|_| EventError::ResourceExhaustion {
            event,
            reason: "feature worker pool has shut down".to_string(),
        })?;
        Ok(result_receiver)
    }

    /// Computes one descriptor and waits for it.
    pub async fn extract(&self, event: EventId, bbox: BoundingBox, frame: Arc<ImageData>) -> Result<FeatureDescriptor> {
        let receiver = self.submit(event, bbox, frame)?;
        receiver.await.unwrap_or_else(|_| Err(worker_dropped(event)))
    }
}

fn worker_dropped(event: EventId) -> EventError {
    EventError::ResourceExhaustion {
        event,
        reason: "feature worker dropped the task".to_string(),
    }
}

fn engine_lost() -> EventError {
    EventError::EngineLost("a frame step did not complete".to_string())
}

fn outcome(result: Result<FeatureDescriptor>) -> FeatureOutcome {
    match result {
        Ok(descriptor) => FeatureOutcome::Available(descriptor),
        Err(e) => FeatureOutcome::Unavailable(e.to_string()),
    }
}

/// A finalized event waiting for its descriptor before it is recorded.
struct PendingEvent {
    event: Event,
    receiver: Option<DescriptorReceiver>,
    features: FeatureOutcome,
}

impl PendingEvent {
    fn ready(event: Event, features: FeatureOutcome) -> Self {
        Self {
            event,
            receiver: None,
            features,
        }
    }

    async fn settle(self) -> FinalizedEvent {
        let id = self.event.id();
        let features = match self.receiver {
            Some(receiver) => outcome(receiver.await.unwrap_or_else(|_| Err(worker_dropped(id)))),
            None => self.features,
        };
        FinalizedEvent {
            event: self.event,
            features,
        }
    }
}

struct EngineState {
    /// `None` only after an engine step panicked or was cancelled mid-frame.
    pipeline: Option<EventPipeline>,
    reporter: Reporter,
    frame_cache: VecDeque<Arc<ImageData>>,
    cache_capacity: usize,
    pending: VecDeque<PendingEvent>,
    closed: bool,
}

impl EngineState {
    fn remember(&mut self, frame: Arc<ImageData>) {
        while self.frame_cache.len() >= self.cache_capacity {
            self.frame_cache.pop_front();
        }
        self.frame_cache.push_back(frame);
    }

    fn pipeline(&self) -> Result<&EventPipeline> {
        self.pipeline.as_ref().ok_or_else(engine_lost)
    }

    fn cached_frame(&self, frame_num: u32) -> Option<Arc<ImageData>> {
        self.frame_cache.iter().rev().find(|f| f.frame_num == frame_num).cloned()
    }

    /// Records finalized events in order, up to the first one whose
    /// descriptor is still being computed.
    fn record_ready(&mut self) -> Result<()> {
        loop {
            let Some(front) = self.pending.front_mut() else {
                break;
            };
            if let Some(receiver) = front.receiver.as_mut() {
                match receiver.try_recv() {
                    Ok(result) => front.features = outcome(result),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Closed) => {
                        front.features = outcome(Err(worker_dropped(front.event.id())));
                    }
                }
                front.receiver = None;
            }
            if let Some(pending) = self.pending.pop_front() {
                self.reporter.record(FinalizedEvent {
                    event: pending.event,
                    features: pending.features,
                })?;
            }
        }
        Ok(())
    }

    async fn record_all(&mut self) -> Result<()> {
        let pending: Vec<PendingEvent> = self.pending.drain(..).collect();
        for finalized in join_all(pending.into_iter().map(PendingEvent::settle)).await {
            self.reporter.record(finalized)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<ReportPaths> {
        let pipeline = self.pipeline()?;
        self.reporter.flush(pipeline.params().tracking_mode, &pipeline.statistics())
    }

    /// Flushes what has been recorded so far and hands back the original error.
    fn fail(&mut self, err: EventError) -> EventError {
        self.closed = true;
        error!(error = %err, "fatal error, flushing reported events");
        if let Err(flush_err) = self.flush() {
            error!(error = %flush_err, "flush after fatal error failed");
        }
        err
    }
}

/// Async, feature-extracting front end of the event engine.
pub struct ParallelPipeline {
    state: Mutex<EngineState>,
    pool: Option<FeatureWorkerPool>,
}

impl ParallelPipeline {
    /// Wraps `pipeline`. When its parameters ask for event features, a worker
    /// pool with the default descriptor collection is spawned, so this must run
    /// inside a tokio runtime.
    pub fn new(pipeline: EventPipeline, reporter: Reporter) -> Self {
        let collection = pipeline
            .params()
            .save_event_features
            .then(FeatureCollection::default);
        Self::with_features(pipeline, reporter, collection)
    }

    pub fn with_features(pipeline: EventPipeline, reporter: Reporter, collection: Option<FeatureCollection>) -> Self {
        let pool = collection.map(|c| FeatureWorkerPool::new(c, num_cpus::get()));
        let cache_capacity = pipeline.params().event_expiration_frames as usize + FRAME_CACHE_SLACK;
        if let Some(pool) = &pool {
            info!(workers = pool.worker_count(), cache_capacity, "feature worker pool started");
        }
        Self {
            state: Mutex::new(EngineState {
                pipeline: Some(pipeline),
                reporter,
                frame_cache: VecDeque::with_capacity(cache_capacity),
                cache_capacity,
                pending: VecDeque::new(),
                closed: false,
            }),
            pool,
        }
    }

    pub async fn statistics(&self) -> RunStatistics {
        let state = self.state.lock().await;
        state.pipeline.as_ref().map(EventPipeline::statistics).unwrap_or_default()
    }

    /// Events recorded with the reporter so far.
    pub async fn reported_ids(&self) -> Vec<EventId> {
        let state = self.state.lock().await;
        state.reporter.reported().iter().map(|f| f.event.id()).collect()
    }

    pub async fn process_frame(&self, frame: ImageData, detections: Vec<Detection>) -> Result<FrameReport> {
        let frame = Arc::new(frame);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.closed {
            return Err(EventError::DataQuality {
                frame: frame.frame_num,
                reason: "pipeline is closed".to_string(),
            });
        }

        // --- 1. Association & Lifecycle ---
        let Some(mut pipeline) = state.pipeline.take() else {
            return Err(engine_lost());
        };
        let step_frame = Arc::clone(&frame);
        let step = tokio::task::spawn_blocking(move || {
            let report = pipeline.process_frame(&step_frame, detections);
            (pipeline, report)
        })
        .await;
        let report = match step {
            Ok((pipeline, report)) => {
                state.pipeline = Some(pipeline);
                report
            }
            Err(e) => {
                state.closed = true;
                error!(frame = frame.frame_num, error = %e, "engine step failed");
                return Err(engine_lost());
            }
        };
        let report = match report {
            Ok(report) => report,
            Err(e) if e.is_fatal() => return Err(state.fail(e)),
            Err(e) => return Err(e),
        };
        if matches!(report, FrameReport::Skipped { .. }) {
            return Ok(report);
        }
        state.remember(Arc::clone(&frame));

        // --- 2. Clip Capture & Feature Scheduling ---
        if let FrameReport::Activity(data) = &report {
            if let Some(pipeline) = &state.pipeline {
                state.reporter.capture_clips(&frame, pipeline.events(), &data.applied);
            }
            for event in &data.finalized {
                let pending = self.schedule(state, event.clone());
                state.pending.push_back(pending);
            }
        }

        // --- 3. Reporting ---
        if let Err(e) = state.record_ready() {
            return Err(state.fail(e));
        }
        Ok(report)
    }

    /// Ends the run: expires every live event, waits for all descriptors and
    /// writes the run-level reports.
    pub async fn finish(&self) -> Result<ReportPaths> {
        self.close(false).await
    }

    /// Stops the run early. Events expired by the abort are reported without
    /// descriptors; descriptors already in flight are still awaited.
    pub async fn abort(&self) -> Result<ReportPaths> {
        warn!("aborting run");
        self.close(true).await
    }

    async fn close(&self, aborted: bool) -> Result<ReportPaths> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.closed = true;

        let Some(pipeline) = state.pipeline.as_mut() else {
            return Err(engine_lost());
        };
        let (applied, finalized) = match pipeline.finish() {
            Ok(done) => done,
            Err(e) => return Err(state.fail(e)),
        };
        state.reporter.discard_clips(&applied.discarded);
        for event in finalized {
            let pending = if aborted {
                PendingEvent::ready(event, FeatureOutcome::Unavailable("run aborted".to_string()))
            } else {
                self.schedule(state, event)
            };
            state.pending.push_back(pending);
        }

        debug!(pending = state.pending.len(), "waiting for descriptors");
        if let Err(e) = state.record_all().await {
            return Err(state.fail(e));
        }
        state.frame_cache.clear();
        state.flush()
    }

    fn schedule(&self, state: &EngineState, event: Event) -> PendingEvent {
        let Some(pool) = &self.pool else {
            return PendingEvent::ready(event, FeatureOutcome::NotRequested);
        };
        let Some(frame) = state.cached_frame(event.last_frame()) else {
            let reason = format!("frame {} is no longer cached", event.last_frame());
            return PendingEvent::ready(event, FeatureOutcome::Unavailable(reason));
        };
        match pool.submit(event.id(), event.bounding_box(), frame) {
            Ok(receiver) => PendingEvent {
                event,
                receiver: Some(receiver),
                features: FeatureOutcome::NotRequested,
            },
            Err(e) => PendingEvent::ready(event, FeatureOutcome::Unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectionParameters, TrackingMode};
    use crate::core_modules::features::FeatureType;
    use crate::core_modules::lifecycle::InterestScorer;
    use crate::core_modules::geometry::Vector2D;
    use crate::core_modules::region::Region;
    use crate::core_modules::winner::AttentionPoint;
    use crate::reporting::ReportConfig;
    use crate::reporting::event_document::read_event_set;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    const SIDE: u32 = 12;

    fn frame(n: u32, x0: u32) -> ImageData {
        ImageData::new(
            n,
            RgbImage::from_fn(64, 64, |x, y| {
                if (x0..x0 + SIDE).contains(&x) && (20..20 + SIDE).contains(&y) {
                    Rgb([230, 210, 190])
                } else {
                    Rgb([10, 20, 30])
                }
            }),
        )
    }

    fn square(x0: u32, side: u32) -> Detection {
        let mut px = Vec::new();
        for y in 20..20 + side {
            for x in x0..x0 + side {
                px.push((x, y, 210u8));
            }
        }
        let region = Region::from_pixels(&px);
        Detection {
            point: AttentionPoint {
                position: region.as_ref().map_or(Vector2D::default(), |r| r.centroid),
                saliency: 1.0,
                rank: 0,
            },
            region,
        }
    }

    fn params(save_event_features: bool) -> DetectionParameters {
        DetectionParameters {
            tracking_mode: TrackingMode::NearestNeighbor,
            min_event_area: 1,
            max_event_area: 400,
            gating_radius: 6.0,
            save_event_features,
            ..DetectionParameters::default()
        }
    }

    fn engine(dir: &std::path::Path, p: &DetectionParameters) -> ParallelPipeline {
        let pipeline = EventPipeline::new(p, 64, 64).unwrap();
        ParallelPipeline::new(pipeline, Reporter::new(ReportConfig::new(dir)).unwrap())
    }

    #[tokio::test]
    async fn pool_answers_every_task() {
        let pool = FeatureWorkerPool::new(FeatureCollection::new(vec![FeatureType::Hog3]), 3);
        assert_eq!(pool.worker_count(), 3);
        let frame = Arc::new(frame(1, 20));
        let receivers: Vec<_> = (0..7)
            .map(|id| pool.submit(id, BoundingBox::new(16, 16, 35, 35), Arc::clone(&frame)).unwrap())
            .collect();
        for r in join_all(receivers).await {
            assert_eq!(r.unwrap().unwrap().groups.len(), 1);
        }
        let err = pool.extract(9, BoundingBox::new(0, 0, 3, 3), frame).await.unwrap_err();
        assert!(matches!(err, EventError::ResourceExhaustion { event: 9, .. }));
    }

    #[tokio::test]
    async fn finalized_events_get_descriptor_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &params(true));
        engine.process_frame(frame(1, 20), vec![square(20, SIDE)]).await.unwrap();
        engine.process_frame(frame(2, 22), vec![square(22, SIDE)]).await.unwrap();
        let report = engine.process_frame(frame(3, 22), Vec::new()).await.unwrap();
        assert_eq!(report.finalized().len(), 1);

        let paths = engine.finish().await.unwrap();
        assert!(dir.path().join("event0.dat").exists());
        let doc = read_event_set(&paths.event_set).unwrap();
        assert_eq!(doc.events.len(), 1);
        assert_eq!(doc.events[0].observations.len(), 2);
    }

    #[tokio::test]
    async fn small_events_are_reported_without_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &params(true));
        engine.process_frame(frame(1, 20), vec![square(20, 3)]).await.unwrap();
        engine.finish().await.unwrap();
        assert_eq!(engine.reported_ids().await, vec![0]);
        assert!(!dir.path().join("event0.dat").exists());
    }

    #[tokio::test]
    async fn abort_flushes_live_events_and_closes_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &params(true));
        engine.process_frame(frame(1, 20), vec![square(20, SIDE)]).await.unwrap();

        let paths = engine.abort().await.unwrap();
        assert_eq!(read_event_set(&paths.event_set).unwrap().events.len(), 1);
        assert!(!dir.path().join("event0.dat").exists());
        assert!(engine.process_frame(frame(2, 20), Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn without_features_no_pool_is_started() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &params(false));
        assert!(engine.pool.is_none());
        engine.process_frame(frame(1, 20), vec![square(20, SIDE)]).await.unwrap();
        engine.finish().await.unwrap();
        assert!(!dir.path().join("event0.dat").exists());
        assert_eq!(engine.statistics().await.events_finalized, 1);
    }

    struct SlowScore;
    impl InterestScorer for SlowScore {
        fn score(&self, event: &Event) -> f64 {
            std::thread::sleep(Duration::from_millis(50));
            event.last_winner().score()
        }
    }

    #[tokio::test]
    async fn other_tasks_run_while_a_frame_is_processed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = EventPipeline::new(&params(false), 64, 64)
            .unwrap()
            .with_scorer(Box::new(SlowScore));
        let engine = ParallelPipeline::new(pipeline, Reporter::new(ReportConfig::new(dir.path())).unwrap());

        // Single-threaded runtime: the spawned task only runs if the frame
        // step gives the worker back.
        let (tx, mut rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(());
        });
        engine.process_frame(frame(1, 20), vec![square(20, SIDE)]).await.unwrap();
        assert!(rx.try_recv().is_ok());

        engine.process_frame(frame(2, 21), vec![square(21, SIDE)]).await.unwrap();
        assert_eq!(engine.statistics().await.frames_processed, 2);
        assert_eq!(engine.finish().await.unwrap().event_set, dir.path().join("events.json"));
    }
}
