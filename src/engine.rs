//! Background removal engine
//!
//! [`BackgroundRemovalEngine`] turns an image into a cutout: segment with the
//! configured [`SegmentationBackend`], then composite the mask into the alpha
//! channel with [`MaskCompositor`].
//!
//! Requests are fire-and-forget. The caller supplies a [`SchedulingContext`]
//! (tokio runtime handle plus cancellation token) and an `on_finish`
//! callback. The engine spawns the work onto that runtime, keeps CPU work on
//! its blocking pool, and invokes the callback exactly once per request that
//! was not cancelled. The returned [`RemovalHandle`] cancels the request and
//! reports its [`RequestState`].

use crate::{
    backend_factory::{BackendFactory, DefaultBackendFactory},
    backends::UnavailableBackend,
    compositor::MaskCompositor,
    config::EngineConfig,
    error::{BgRemovalError, Result},
    inference::SegmentationBackend,
    tracing_config::{events, spans},
    types::{
        Mask, PixelBuffer, ProcessingTimings, RemovalRequest, RemovalResult, RequestId,
        RequestState,
    },
};
use futures::future::join_all;
use instant::Instant;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::{
    runtime::Handle,
    sync::{oneshot, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, Instrument};

/// Where request work runs and how it is torn down
///
/// Cancelling the context token cancels every request submitted through it.
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    handle: Handle,
    token: CancellationToken,
}

impl SchedulingContext {
    #[must_use]
    pub fn new(handle: Handle, token: CancellationToken) -> Self {
        Self { handle, token }
    }

    /// Context on the current tokio runtime with a fresh token
    ///
    /// # Errors
    /// - Called outside a tokio runtime
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            BgRemovalError::invalid_config(format!("no tokio runtime available: {e}"))
        })?;
        Ok(Self::new(handle, CancellationToken::new()))
    }

    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every request submitted through this context
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Caller-side view of one submitted request
///
/// Dropping the handle does not cancel the request.
#[derive(Debug)]
pub struct RemovalHandle {
    id: RequestId,
    token: CancellationToken,
    state: watch::Receiver<RequestState>,
}

impl RemovalHandle {
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Request cancellation
    ///
    /// Takes effect at the next stage boundary. A request cancelled before
    /// delivery never invokes its callback. Segmentation already running on
    /// the blocking pool finishes in the background and is discarded.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    /// Wait until the request reaches a terminal state
    ///
    /// For delivered requests the callback has already returned when this
    /// resolves. If the request task died without finishing (runtime shut
    /// down, callback panicked) the last observed state is returned.
    pub async fn wait(&mut self) -> RequestState {
        if let Ok(state) = self.state.wait_for(|state| state.is_terminal()).await {
            return *state;
        }
        *self.state.borrow()
    }
}

/// Publishes state transitions of one request to its handle
struct StateReporter {
    current: RequestState,
    sender: watch::Sender<RequestState>,
}

impl StateReporter {
    fn new(sender: watch::Sender<RequestState>) -> Self {
        Self {
            current: RequestState::Pending,
            sender,
        }
    }

    fn advance(&mut self, request_id: &RequestId, next: RequestState) {
        match self.current.advance(next) {
            Ok(()) => {
                self.sender.send_replace(next);
            },
            Err(e) => events::invariant_violation(request_id, &e),
        }
    }
}

/// Removes a request id from the in-flight set when the request ends
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<RequestId>>>,
    id: RequestId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// How far a request got before delivery
enum Execution {
    Completed(Result<PixelBuffer>),
    Cancelled(&'static str),
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Background removal engine
///
/// Cheap to clone; clones share the backend, the compositor and the
/// in-flight request set.
#[derive(Clone)]
pub struct BackgroundRemovalEngine {
    backend: Arc<dyn SegmentationBackend>,
    compositor: Arc<MaskCompositor>,
    in_flight: Arc<Mutex<HashSet<RequestId>>>,
    debug: bool,
}

impl std::fmt::Debug for BackgroundRemovalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalEngine")
            .field("backend", &self.backend.name())
            .field("compositor", &self.compositor)
            .field("in_flight", &self.in_flight_count())
            .field("debug", &self.debug)
            .finish()
    }
}

impl BackgroundRemovalEngine {
    /// Engine over an already constructed backend
    #[must_use]
    pub fn new(backend: Arc<dyn SegmentationBackend>, compositor: MaskCompositor) -> Self {
        Self {
            backend,
            compositor: Arc::new(compositor),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            debug: false,
        }
    }

    /// Engine for builds without segmentation
    ///
    /// Every well-formed request fails with `UnsupportedOperation`.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::new(Arc::new(UnavailableBackend::new()), MaskCompositor::default())
    }

    /// Build an engine from configuration with the default backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Model loading or backend initialization failures
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::with_factory(config, &DefaultBackendFactory)
    }

    /// Build an engine from configuration with a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Backend creation failures reported by `factory`
    pub fn with_factory(config: &EngineConfig, factory: &dyn BackendFactory) -> Result<Self> {
        config.validate()?;
        let backend = factory.create_backend(config)?;
        let compositor = MaskCompositor::new(config.compositor)?;

        info!(
            backend = %backend.name(),
            available = backend.is_available(),
            threshold = ?config.compositor.threshold,
            "Background removal engine initialized"
        );

        Ok(Self {
            debug: config.debug,
            ..Self::new(backend, compositor)
        })
    }

    /// Name of the configured segmentation backend
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Whether this engine can produce cutouts at all
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    #[must_use]
    pub fn compositor(&self) -> &MaskCompositor {
        &self.compositor
    }

    /// Number of requests currently registered as in flight
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Remove the background on the current thread
    ///
    /// Runs the same validate, segment and composite steps as
    /// [`remove_background`](Self::remove_background), without scheduling,
    /// cancellation or in-flight tracking. Intended for callers already on a
    /// worker thread.
    ///
    /// # Errors
    /// - `InvalidInput` for malformed buffers
    /// - `UnsupportedOperation` from the unavailable backend
    /// - `Inference`/`Model` from a failing backend
    /// - `InvariantViolation` when the mask does not match the image
    #[instrument(
        skip_all,
        fields(backend = %self.backend.name(), width = image.width, height = image.height)
    )]
    pub fn process(&self, image: &PixelBuffer) -> Result<PixelBuffer> {
        image.validate()?;
        let mask = {
            let _span = spans::segmentation(self.backend.name()).entered();
            self.backend.infer(image)?
        };
        self.log_mask(&mask);
        let _span = spans::compositing(self.compositor.config().threshold).entered();
        self.compositor.apply(image, &mask)
    }

    /// Submit a request; `on_finish` receives its result
    ///
    /// Returns immediately. The work and the callback run on tasks of
    /// `context`'s runtime, never on the calling thread. The callback fires
    /// exactly once unless the request is cancelled first, in which case it
    /// never fires. A request whose id is already in flight is not run; its
    /// own callback receives an `InvalidInput` failure.
    pub fn remove_background<F>(
        &self,
        request: RemovalRequest,
        context: &SchedulingContext,
        on_finish: F,
    ) -> RemovalHandle
    where
        F: FnOnce(RemovalResult) + Send + 'static,
    {
        let token = context.token.child_token();
        let (sender, receiver) = watch::channel(RequestState::Pending);
        let handle = RemovalHandle {
            id: request.id.clone(),
            token: token.clone(),
            state: receiver,
        };
        let reporter = StateReporter::new(sender);

        match self.register(&request.id) {
            Some(guard) => {
                let span =
                    spans::request(&request.id, self.backend.name(), request.image.dimensions());
                let engine = self.clone();
                let runtime = context.handle.clone();
                context.handle.spawn(
                    engine
                        .run(request, token, reporter, guard, runtime, on_finish)
                        .instrument(span),
                );
            },
            None => {
                debug!(request_id = %request.id, "Duplicate request id rejected");
                context
                    .handle
                    .spawn(Self::reject_duplicate(request.id, token, reporter, on_finish));
            },
        }

        handle
    }

    /// Submit an image under a freshly generated request id
    pub fn remove_background_image<F>(
        &self,
        image: impl Into<Arc<PixelBuffer>>,
        context: &SchedulingContext,
        on_finish: F,
    ) -> RemovalHandle
    where
        F: FnOnce(RemovalResult) + Send + 'static,
    {
        self.remove_background(RemovalRequest::new(image), context, on_finish)
    }

    /// Submit several images and collect their results
    ///
    /// Requests run concurrently; results come back in submission order.
    /// Cancelled requests produce no result and are omitted.
    pub async fn remove_background_batch(
        &self,
        images: Vec<PixelBuffer>,
        context: &SchedulingContext,
    ) -> Vec<RemovalResult> {
        let span = spans::batch(images.len());
        let receivers: Vec<_> = images
            .into_iter()
            .map(|image| {
                let (sender, receiver) = oneshot::channel();
                self.remove_background_image(image, context, move |result| {
                    // receiver only goes away if the batch future is dropped
                    let _ = sender.send(result);
                });
                receiver
            })
            .collect();

        join_all(receivers)
            .instrument(span)
            .await
            .into_iter()
            .filter_map(std::result::Result::ok)
            .collect()
    }

    fn register(&self, id: &RequestId) -> Option<InFlightGuard> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(id.clone()).then(|| InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            id: id.clone(),
        })
    }

    fn log_mask(&self, mask: &Mask) {
        if self.debug {
            let stats = mask.statistics();
            debug!(
                foreground_ratio = stats.foreground_ratio,
                foreground_pixels = stats.foreground_pixels,
                total_pixels = stats.total_pixels,
                "Mask statistics"
            );
        }
    }

    async fn run<F>(
        self,
        request: RemovalRequest,
        token: CancellationToken,
        mut reporter: StateReporter,
        guard: InFlightGuard,
        runtime: Handle,
        on_finish: F,
    ) where
        F: FnOnce(RemovalResult) + Send + 'static,
    {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let id = request.id.clone();

        let execution = self
            .execute(&request, &token, &mut reporter, &runtime, &mut timings)
            .await;

        // a cancel after compositing finished still suppresses the callback
        let outcome = match execution {
            Execution::Completed(outcome) if !token.is_cancelled() => outcome,
            Execution::Completed(_) => {
                Self::finish_cancelled(&id, "delivery", guard, &mut reporter);
                return;
            },
            Execution::Cancelled(stage) => {
                Self::finish_cancelled(&id, stage, guard, &mut reporter);
                return;
            },
        };

        timings.total_ms = elapsed_ms(total_start);
        let (result, state) = match outcome {
            Ok(image) => {
                events::request_succeeded(&id, &timings);
                (
                    RemovalResult::succeeded(id.clone(), image, timings),
                    RequestState::Succeeded,
                )
            },
            Err(e) => {
                events::request_failed(&id, &e);
                let kind = e.kind();
                (
                    RemovalResult::failed(id.clone(), e, timings),
                    RequestState::Failed(kind),
                )
            },
        };

        drop(guard);
        on_finish(result);
        reporter.advance(&id, state);
    }

    fn finish_cancelled(
        id: &RequestId,
        stage: &str,
        guard: InFlightGuard,
        reporter: &mut StateReporter,
    ) {
        events::request_cancelled(id, stage);
        drop(guard);
        reporter.advance(id, RequestState::Cancelled);
    }

    async fn execute(
        &self,
        request: &RemovalRequest,
        token: &CancellationToken,
        reporter: &mut StateReporter,
        runtime: &Handle,
        timings: &mut ProcessingTimings,
    ) -> Execution {
        if let Err(e) = request.image.validate() {
            return Execution::Completed(Err(e));
        }
        if token.is_cancelled() {
            return Execution::Cancelled("segmentation");
        }
        reporter.advance(&request.id, RequestState::Running);

        let segmentation_start = Instant::now();
        let backend = Arc::clone(&self.backend);
        let image = Arc::clone(&request.image);
        let span = spans::segmentation(backend.name());
        let segmentation = runtime.spawn_blocking(move || {
            let _span = span.entered();
            backend.infer(&image)
        });
        let mask = tokio::select! {
            biased;
            () = token.cancelled() => return Execution::Cancelled("segmentation"),
            joined = segmentation => match joined {
                Ok(Ok(mask)) => mask,
                Ok(Err(e)) => return Execution::Completed(Err(e)),
                Err(e) => {
                    error!(request_id = %request.id, error = %e, "Segmentation task aborted");
                    return Execution::Completed(Err(BgRemovalError::inference(format!(
                        "segmentation backend '{}' panicked: {e}",
                        self.backend.name()
                    ))));
                },
            },
        };
        timings.segmentation_ms = elapsed_ms(segmentation_start);
        self.log_mask(&mask);

        // the biased select catches a cancel that lands during inference;
        // this covers one that lands after the select resolved
        if token.is_cancelled() {
            return Execution::Cancelled("compositing");
        }

        let compositing_start = Instant::now();
        let compositor = Arc::clone(&self.compositor);
        let image = Arc::clone(&request.image);
        let span = spans::compositing(compositor.config().threshold);
        let compositing = runtime.spawn_blocking(move || {
            let _span = span.entered();
            compositor.apply(&image, &mask)
        });
        let output = tokio::select! {
            biased;
            () = token.cancelled() => return Execution::Cancelled("compositing"),
            joined = compositing => match joined {
                Ok(result) => result,
                Err(e) => Err(BgRemovalError::invariant(format!("compositing panicked: {e}"))),
            },
        };
        timings.compositing_ms = elapsed_ms(compositing_start);

        Execution::Completed(output)
    }

    async fn reject_duplicate<F>(
        id: RequestId,
        token: CancellationToken,
        mut reporter: StateReporter,
        on_finish: F,
    ) where
        F: FnOnce(RemovalResult) + Send + 'static,
    {
        if token.is_cancelled() {
            events::request_cancelled(&id, "delivery");
            reporter.advance(&id, RequestState::Cancelled);
            return;
        }

        let e = BgRemovalError::invalid_input(format!("request '{id}' is already in flight"));
        events::request_failed(&id, &e);
        let kind = e.kind();
        on_finish(RemovalResult::failed(id.clone(), e, ProcessingTimings::default()));
        reporter.advance(&id, RequestState::Failed(kind));
    }
}
