//! Capture-side controller.
//!
//! `CaptureScheduler` samples a `FrameSource` on three cadences:
//! - detection (default 200 ms): extract hands and append to the `FeatureBuffer`
//! - static (default 1500 ms): classify the newest hand of the current frame
//! - dynamic (default 2500 ms, after a warm-up): classify the recent history
//!
//! Detection and dynamic classification each have an in-flight guard. A tick that
//! finds its guard set is dropped, never queued.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::buffer::FeatureBuffer;
use crate::classify::{DynamicClassifier, ModelVariant, StaticClassifier};
use crate::config::CaptureSettings;
use crate::extract::LandmarkExtractor;
use crate::frame::FrameSource;
use crate::sequence::{FeatureSequence, DYNAMIC_WINDOW_FRAMES, MIN_DYNAMIC_FRAMES};
use crate::{now_millis, FeatureVector};

/// Predictions each subscriber may leave unread before new ones are dropped for it.
pub const SUBSCRIBER_BACKLOG: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    pub detection_every: Duration,
    pub static_every: Duration,
    pub dynamic_every: Duration,
    /// Delay before the first dynamic tick so the buffer can fill.
    pub warmup: Duration,
    pub model_variant: ModelVariant,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_settings(&CaptureSettings::default(), ModelVariant::default())
    }
}

impl CaptureConfig {
    pub fn from_settings(settings: &CaptureSettings, model_variant: ModelVariant) -> Self {
        Self {
            detection_every: settings.detection,
            static_every: settings.static_every,
            dynamic_every: settings.dynamic_every,
            warmup: settings.warmup,
            model_variant,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.detection_every.is_zero()
            || self.static_every.is_zero()
            || self.dynamic_every.is_zero()
        {
            return Err(anyhow!("capture cadences must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionKind {
    Static,
    Dynamic,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PublishedPrediction {
    pub kind: PredictionKind,
    pub label: String,
    pub confidence: f32,
    pub timestamp_ms: u64,
    /// Vectors that went into the request (1 for static).
    pub frames_used: usize,
}

/// Result of a single tick, mostly for tests and the capture binary.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// The in-flight guard was held; the tick was shed.
    Busy,
    NoFrame,
    NoHands,
    Buffered(usize),
    /// Fewer than `MIN_DYNAMIC_FRAMES` buffered.
    WaitingForHistory(usize),
    Published(PublishedPrediction),
    Failed(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub detection_ticks: u64,
    pub detection_skipped: u64,
    pub static_ticks: u64,
    pub dynamic_ticks: u64,
    pub dynamic_skipped: u64,
    /// Cadence deadlines passed while a tick was still running.
    pub missed_deadlines: u64,
    pub failures: u64,
    /// Predictions not delivered to a subscriber whose backlog was full.
    pub subscriber_drops: u64,
}

#[derive(Default)]
struct StatCounters {
    detection_ticks: AtomicU64,
    detection_skipped: AtomicU64,
    static_ticks: AtomicU64,
    dynamic_ticks: AtomicU64,
    dynamic_skipped: AtomicU64,
    missed_deadlines: AtomicU64,
    failures: AtomicU64,
    subscriber_drops: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            detection_ticks: self.detection_ticks.load(Ordering::Relaxed),
            detection_skipped: self.detection_skipped.load(Ordering::Relaxed),
            static_ticks: self.static_ticks.load(Ordering::Relaxed),
            dynamic_ticks: self.dynamic_ticks.load(Ordering::Relaxed),
            dynamic_skipped: self.dynamic_skipped.load(Ordering::Relaxed),
            missed_deadlines: self.missed_deadlines.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            subscriber_drops: self.subscriber_drops.load(Ordering::Relaxed),
        }
    }
}

/// Single-slot flag; at most one holder at a time.
#[derive(Default)]
struct InFlight(AtomicBool);

struct InFlightGuard<'a>(&'a AtomicBool);

impl InFlight {
    fn try_acquire(&self) -> Option<InFlightGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(&self.0))
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared stop signal. Sleeping workers wake as soon as it is raised.
#[derive(Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shutdown {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn raise(&self) {
        *self.lock() = true;
        self.wake.notify_all();
    }

    fn reset(&self) {
        *self.lock() = false;
    }

    fn is_raised(&self) -> bool {
        *self.lock()
    }

    /// Sleep for `timeout` unless stopped first. Returns true when stopped.
    fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.lock();
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match self.wake.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

#[derive(Default)]
struct Published {
    last_static: Option<PublishedPrediction>,
    last_dynamic: Option<PublishedPrediction>,
}

struct Inner {
    config: CaptureConfig,
    source: Mutex<Box<dyn FrameSource>>,
    extractor: Arc<dyn LandmarkExtractor>,
    static_classifier: Arc<dyn StaticClassifier>,
    dynamic_classifier: Arc<dyn DynamicClassifier>,
    buffer: Mutex<FeatureBuffer>,
    detecting: InFlight,
    classifying: InFlight,
    published: Mutex<Published>,
    subscribers: Mutex<Vec<SyncSender<PublishedPrediction>>>,
    stats: StatCounters,
    shutdown: Shutdown,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn current_vectors(&self) -> Result<Option<Vec<FeatureVector>>> {
        let frame = {
            let mut source = relock(&self.source);
            source.current_frame()?
        };
        let Some(frame) = frame else {
            return Ok(None);
        };
        let extraction = self.extractor.extract(&frame)?;
        Ok(Some(extraction.into_vectors()?))
    }

    fn failed(&self, kind: &str, err: anyhow::Error) -> TickOutcome {
        StatCounters::bump(&self.stats.failures);
        log::warn!("{} tick abandoned: {:#}", kind, err);
        TickOutcome::Failed(format!("{:#}", err))
    }

    fn tick(&self) -> TickOutcome {
        let Some(_guard) = self.detecting.try_acquire() else {
            StatCounters::bump(&self.stats.detection_skipped);
            log::debug!("detection still in flight, tick dropped");
            return TickOutcome::Busy;
        };
        StatCounters::bump(&self.stats.detection_ticks);
        match self.current_vectors() {
            Ok(None) => TickOutcome::NoFrame,
            Ok(Some(vectors)) if vectors.is_empty() => TickOutcome::NoHands,
            Ok(Some(vectors)) => {
                let mut buffer = relock(&self.buffer);
                buffer.extend(vectors);
                TickOutcome::Buffered(buffer.len())
            }
            Err(e) => self.failed("detection", e),
        }
    }

    fn static_tick(&self) -> TickOutcome {
        StatCounters::bump(&self.stats.static_ticks);
        let vectors = match self.current_vectors() {
            Ok(Some(vectors)) => vectors,
            Ok(None) => return TickOutcome::NoFrame,
            Err(e) => return self.failed("static", e),
        };
        let Some(latest) = vectors.last() else {
            return TickOutcome::NoHands;
        };
        match self.static_classifier.classify(latest) {
            Ok(result) => self.publish(PublishedPrediction {
                kind: PredictionKind::Static,
                label: result.label,
                confidence: result.confidence,
                timestamp_ms: now_millis(),
                frames_used: 1,
            }),
            Err(e) => self.failed("static", e),
        }
    }

    fn dynamic_tick(&self) -> TickOutcome {
        let Some(_guard) = self.classifying.try_acquire() else {
            StatCounters::bump(&self.stats.dynamic_skipped);
            log::debug!("dynamic classification still in flight, tick dropped");
            return TickOutcome::Busy;
        };
        StatCounters::bump(&self.stats.dynamic_ticks);
        let recent = {
            let buffer = relock(&self.buffer);
            if buffer.len() < MIN_DYNAMIC_FRAMES {
                return TickOutcome::WaitingForHistory(buffer.len());
            }
            buffer.latest(DYNAMIC_WINDOW_FRAMES)
        };
        let sequence = match FeatureSequence::prepare(&recent) {
            Ok(sequence) => sequence,
            Err(e) => return self.failed("dynamic (rejected sequence)", e),
        };
        match self
            .dynamic_classifier
            .classify(&sequence, self.config.model_variant)
        {
            Ok(result) => self.publish(PublishedPrediction {
                kind: PredictionKind::Dynamic,
                label: result.label,
                confidence: result.confidence,
                timestamp_ms: now_millis(),
                frames_used: sequence.observed_len(),
            }),
            Err(e) => self.failed("dynamic", e),
        }
    }

    fn publish(&self, prediction: PublishedPrediction) -> TickOutcome {
        log::info!(
            "{:?} prediction: {} ({:.2})",
            prediction.kind,
            prediction.label,
            prediction.confidence
        );
        {
            let mut published = relock(&self.published);
            match prediction.kind {
                PredictionKind::Static => published.last_static = Some(prediction.clone()),
                PredictionKind::Dynamic => published.last_dynamic = Some(prediction.clone()),
            }
        }
        relock(&self.subscribers).retain(|tx| match tx.try_send(prediction.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                StatCounters::bump(&self.stats.subscriber_drops);
                log::debug!("subscriber backlog full, {:?} prediction dropped", prediction.kind);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        TickOutcome::Published(prediction)
    }

    /// Run `tick` on a fixed cadence until shutdown. Deadlines that pass while a
    /// tick is running are skipped, not replayed.
    fn run_cadence(&self, first: Duration, period: Duration, tick: fn(&Inner) -> TickOutcome) {
        let mut next = Instant::now() + first;
        loop {
            let now = Instant::now();
            let stopped = if next > now {
                self.shutdown.sleep(next - now)
            } else {
                self.shutdown.is_raised()
            };
            if stopped {
                break;
            }
            tick(self);
            next += period;
            let now = Instant::now();
            while next <= now {
                next += period;
                StatCounters::bump(&self.stats.missed_deadlines);
            }
        }
    }
}

pub struct CaptureScheduler {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureScheduler {
    pub fn new(
        config: CaptureConfig,
        source: Box<dyn FrameSource>,
        extractor: Arc<dyn LandmarkExtractor>,
        static_classifier: Arc<dyn StaticClassifier>,
        dynamic_classifier: Arc<dyn DynamicClassifier>,
    ) -> Result<Self> {
        config.validate()?;
        if !dynamic_classifier.supports(config.model_variant) {
            return Err(anyhow!(
                "dynamic classifier '{}' does not support model variant {}",
                dynamic_classifier.name(),
                config.model_variant
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                source: Mutex::new(source),
                extractor,
                static_classifier,
                dynamic_classifier,
                buffer: Mutex::new(FeatureBuffer::new()),
                detecting: InFlight::default(),
                classifying: InFlight::default(),
                published: Mutex::new(Published::default()),
                subscribers: Mutex::new(Vec::new()),
                stats: StatCounters::default(),
                shutdown: Shutdown::default(),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        !relock(&self.workers).is_empty()
    }

    /// Spawn the detection, static and dynamic workers.
    pub fn start(&self) -> Result<()> {
        let mut workers = relock(&self.workers);
        if !workers.is_empty() {
            return Err(anyhow!("capture already running"));
        }
        self.inner.shutdown.reset();
        let config = self.inner.config.clone();
        let cadences: [(&str, Duration, Duration, fn(&Inner) -> TickOutcome); 3] = [
            (
                "capture-detect",
                config.detection_every,
                config.detection_every,
                Inner::tick,
            ),
            (
                "capture-static",
                config.static_every,
                config.static_every,
                Inner::static_tick,
            ),
            (
                "capture-dynamic",
                config.warmup,
                config.dynamic_every,
                Inner::dynamic_tick,
            ),
        ];
        for (name, first, period, tick) in cadences {
            let inner = Arc::clone(&self.inner);
            let spawned = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || inner.run_cadence(first, period, tick));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    self.inner.shutdown.raise();
                    for handle in workers.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(anyhow!("spawn {} worker: {}", name, e));
                }
            }
        }
        log::info!(
            "capture started: detection {:?}, static {:?}, dynamic {:?} after {:?} ({})",
            config.detection_every,
            config.static_every,
            config.dynamic_every,
            config.warmup,
            config.model_variant
        );
        Ok(())
    }

    /// Cancel all cadences, wait for the workers, and clear capture state.
    pub fn stop(&self) {
        self.inner.shutdown.raise();
        let handles: Vec<JoinHandle<()>> = relock(&self.workers).drain(..).collect();
        let was_running = !handles.is_empty();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("capture worker panicked");
            }
        }
        self.inner.detecting.clear();
        self.inner.classifying.clear();
        relock(&self.inner.buffer).clear();
        *relock(&self.inner.published) = Published::default();
        if was_running {
            log::info!("capture stopped");
        }
    }

    pub fn tick(&self) -> TickOutcome {
        self.inner.tick()
    }

    pub fn static_tick(&self) -> TickOutcome {
        self.inner.static_tick()
    }

    pub fn dynamic_tick(&self) -> TickOutcome {
        self.inner.dynamic_tick()
    }

    /// Latest static and dynamic predictions, if any.
    pub fn published(&self) -> (Option<PublishedPrediction>, Option<PublishedPrediction>) {
        let published = relock(&self.inner.published);
        (published.last_static.clone(), published.last_dynamic.clone())
    }

    /// Receive predictions published from now on. At most `SUBSCRIBER_BACKLOG`
    /// are held for a receiver that is not drained; later ones are dropped.
    pub fn subscribe(&self) -> Receiver<PublishedPrediction> {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_BACKLOG);
        relock(&self.inner.subscribers).push(tx);
        rx
    }

    pub fn stats(&self) -> CaptureStats {
        self.inner.stats.snapshot()
    }

    pub fn buffered_len(&self) -> usize {
        relock(&self.inner.buffer).len()
    }

    pub fn detection_in_flight(&self) -> bool {
        self.inner.detecting.is_set()
    }

    pub fn dynamic_in_flight(&self) -> bool {
        self.inner.classifying.is_set()
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classification, StubDynamicClassifier, StubStaticClassifier};
    use crate::extract::{Extraction, StubExtractor};
    use crate::frame::{Frame, SyntheticSource};
    use crate::sequence::SEQUENCE_FRAMES;
    use crate::FEATURE_LEN;
    use std::sync::Barrier;

    fn scheduler_with(
        extractor: Arc<dyn LandmarkExtractor>,
        dynamic: Arc<dyn DynamicClassifier>,
    ) -> CaptureScheduler {
        CaptureScheduler::new(
            CaptureConfig::default(),
            Box::new(SyntheticSource::new("test")),
            extractor,
            Arc::new(StubStaticClassifier::new()),
            dynamic,
        )
        .unwrap()
    }

    struct RecordingDynamic {
        seen: Mutex<Vec<(usize, usize)>>,
    }

    impl DynamicClassifier for RecordingDynamic {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn supports(&self, _variant: ModelVariant) -> bool {
            true
        }

        fn classify(
            &self,
            sequence: &FeatureSequence,
            _variant: ModelVariant,
        ) -> Result<Classification> {
            assert!(sequence
                .frames()
                .iter()
                .all(|f| f.values().len() == FEATURE_LEN));
            self.seen
                .lock()
                .unwrap()
                .push((sequence.len(), sequence.observed_len()));
            Classification::new("Halo", 0.8)
        }
    }

    /// Blocks inside `extract` until released.
    struct GatedExtractor {
        entered: Barrier,
        release: Barrier,
    }

    impl LandmarkExtractor for GatedExtractor {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn extract(&self, _frame: &Frame) -> Result<Extraction> {
            self.entered.wait();
            self.release.wait();
            Ok(Extraction::hands(vec![FeatureVector::zeros()]))
        }
    }

    #[test]
    fn detection_tick_fills_buffer_up_to_capacity() {
        let scheduler = scheduler_with(
            Arc::new(StubExtractor::with_hands(2)),
            Arc::new(StubDynamicClassifier::new()),
        );
        assert_eq!(scheduler.tick(), TickOutcome::Buffered(2));
        for _ in 0..20 {
            scheduler.tick();
        }
        assert_eq!(scheduler.buffered_len(), 30);
        assert!(!scheduler.detection_in_flight());
    }

    #[test]
    fn dynamic_tick_waits_for_five_vectors() {
        let recorder = Arc::new(RecordingDynamic {
            seen: Mutex::new(Vec::new()),
        });
        let scheduler = scheduler_with(Arc::new(StubExtractor::new()), recorder.clone());
        for _ in 0..4 {
            scheduler.tick();
        }
        assert_eq!(scheduler.dynamic_tick(), TickOutcome::WaitingForHistory(4));
        scheduler.tick();
        assert!(matches!(scheduler.dynamic_tick(), TickOutcome::Published(_)));
        for _ in 0..20 {
            scheduler.tick();
        }
        scheduler.dynamic_tick();
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(SEQUENCE_FRAMES, 5), (SEQUENCE_FRAMES, 15)]);
        let (_, dynamic) = scheduler.published();
        assert_eq!(dynamic.unwrap().frames_used, 15);
    }

    #[test]
    fn static_tick_publishes_unsmoothed() {
        let scheduler = scheduler_with(
            Arc::new(StubExtractor::new()),
            Arc::new(StubDynamicClassifier::new()),
        );
        let rx = scheduler.subscribe();
        let TickOutcome::Published(prediction) = scheduler.static_tick() else {
            panic!("expected a static prediction");
        };
        assert_eq!(prediction.kind, PredictionKind::Static);
        assert_eq!(rx.try_recv().unwrap(), prediction);
        assert_eq!(scheduler.published().0, Some(prediction));
        // Static ticks never touch the history.
        assert_eq!(scheduler.buffered_len(), 0);
    }

    #[test]
    fn overlapping_detection_is_shed() {
        let extractor = Arc::new(GatedExtractor {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let scheduler = Arc::new(scheduler_with(
            extractor.clone(),
            Arc::new(StubDynamicClassifier::new()),
        ));
        let worker = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.tick())
        };
        extractor.entered.wait();
        assert!(scheduler.detection_in_flight());
        assert_eq!(scheduler.tick(), TickOutcome::Busy);
        extractor.release.wait();
        assert_eq!(worker.join().unwrap(), TickOutcome::Buffered(1));
        assert!(!scheduler.detection_in_flight());
        assert_eq!(scheduler.stats().detection_skipped, 1);
    }

    #[test]
    fn failed_extraction_clears_guard() {
        struct Broken;
        impl LandmarkExtractor for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn extract(&self, _frame: &Frame) -> Result<Extraction> {
                Err(anyhow!("extractor crashed"))
            }
        }
        let scheduler = scheduler_with(Arc::new(Broken), Arc::new(StubDynamicClassifier::new()));
        assert!(matches!(scheduler.tick(), TickOutcome::Failed(_)));
        assert!(!scheduler.detection_in_flight());
        assert!(matches!(scheduler.tick(), TickOutcome::Failed(_)));
        assert_eq!(scheduler.stats().failures, 2);
    }

    #[test]
    fn stop_clears_everything() {
        let scheduler = scheduler_with(
            Arc::new(StubExtractor::new()),
            Arc::new(StubDynamicClassifier::new()),
        );
        for _ in 0..6 {
            scheduler.tick();
        }
        scheduler.dynamic_tick();
        assert!(scheduler.published().1.is_some());
        scheduler.stop();
        assert_eq!(scheduler.buffered_len(), 0);
        assert_eq!(scheduler.published(), (None, None));
    }

    #[test]
    fn start_stop_is_prompt() {
        let scheduler = CaptureScheduler::new(
            CaptureConfig {
                detection_every: Duration::from_secs(3600),
                static_every: Duration::from_secs(3600),
                dynamic_every: Duration::from_secs(3600),
                warmup: Duration::from_secs(3600),
                model_variant: ModelVariant::Lstm,
            },
            Box::new(SyntheticSource::new("idle")),
            Arc::new(StubExtractor::new()),
            Arc::new(StubStaticClassifier::new()),
            Arc::new(StubDynamicClassifier::new()),
        )
        .unwrap();
        scheduler.start().unwrap();
        assert!(scheduler.start().is_err());
        let started = Instant::now();
        scheduler.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn slow_subscriber_backlog_is_bounded() {
        let scheduler = scheduler_with(
            Arc::new(StubExtractor::new()),
            Arc::new(StubDynamicClassifier::new()),
        );
        let idle = scheduler.subscribe();
        for _ in 0..SUBSCRIBER_BACKLOG + 8 {
            assert!(matches!(scheduler.static_tick(), TickOutcome::Published(_)));
        }
        assert_eq!(idle.try_iter().count(), SUBSCRIBER_BACKLOG);
        assert_eq!(scheduler.stats().subscriber_drops, 8);

        // Draining makes room again.
        scheduler.static_tick();
        assert!(idle.try_recv().is_ok());

        // Dropped receivers are forgotten.
        drop(idle);
        scheduler.static_tick();
        assert_eq!(scheduler.stats().subscriber_drops, 8);
    }

    /// Blocks inside `classify` until released.
    struct GatedDynamic {
        entered: Barrier,
        release: Barrier,
    }

    impl DynamicClassifier for GatedDynamic {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn supports(&self, _variant: ModelVariant) -> bool {
            true
        }

        fn classify(
            &self,
            _sequence: &FeatureSequence,
            _variant: ModelVariant,
        ) -> Result<Classification> {
            self.entered.wait();
            self.release.wait();
            Classification::new("Halo", 0.9)
        }
    }

    #[test]
    fn overlapping_dynamic_classification_is_shed() {
        let classifier = Arc::new(GatedDynamic {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let scheduler = Arc::new(scheduler_with(
            Arc::new(StubExtractor::new()),
            classifier.clone(),
        ));
        for _ in 0..MIN_DYNAMIC_FRAMES {
            scheduler.tick();
        }
        let worker = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.dynamic_tick())
        };
        classifier.entered.wait();
        assert!(scheduler.dynamic_in_flight());
        assert_eq!(scheduler.dynamic_tick(), TickOutcome::Busy);
        // Detection is guarded separately and keeps running.
        assert!(matches!(scheduler.tick(), TickOutcome::Buffered(_)));
        classifier.release.wait();
        assert!(matches!(worker.join().unwrap(), TickOutcome::Published(_)));
        assert!(!scheduler.dynamic_in_flight());
        let stats = scheduler.stats();
        assert_eq!(stats.dynamic_skipped, 1);
        assert_eq!(stats.dynamic_ticks, 1);
    }

    #[test]
    fn failed_dynamic_classification_clears_guard() {
        struct Broken;
        impl DynamicClassifier for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn supports(&self, _variant: ModelVariant) -> bool {
                true
            }
            fn classify(&self, _: &FeatureSequence, _: ModelVariant) -> Result<Classification> {
                Err(anyhow!("model service unavailable"))
            }
        }
        let scheduler = scheduler_with(Arc::new(StubExtractor::new()), Arc::new(Broken));
        let rx = scheduler.subscribe();
        for _ in 0..MIN_DYNAMIC_FRAMES {
            scheduler.tick();
        }
        assert!(
            matches!(scheduler.dynamic_tick(), TickOutcome::Failed(ref e) if e.contains("unavailable"))
        );
        assert!(!scheduler.dynamic_in_flight());
        assert!(matches!(scheduler.dynamic_tick(), TickOutcome::Failed(_)));
        assert_eq!(scheduler.stats().failures, 2);
        assert_eq!(scheduler.published().1, None);
        assert!(rx.try_recv().is_err());
    }
}
