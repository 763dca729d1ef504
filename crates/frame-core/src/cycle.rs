//! One wake cycle: join, fetch, render, record stats, sleep.
//!
//! Every step returns a [`Result`]; the first error ends the step sequence and
//! the finalize step (diagnostics, stats, panel off) runs on every path.
//! Retries only exist inside the join machine.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant, with_timeout};
use log::{error, info, warn};

use crate::diag::DiagnosticLog;
use crate::error::{CycleError, Result};
use crate::headers::{Header, request_headers};
use crate::join::{JoinMachine, JoinOutcome, MAX_RETRIES, Radio};
use crate::settings::Settings;
use crate::sleep::{SleepScheduler, sleep_interval};
use crate::stats::{CycleStats, StatsStore};

/// Downloads the image into a caller-provided buffer.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    async fn fetch<'b>(
        &mut self,
        url: &str,
        headers: &[Header<'_>],
        buf: &'b mut [u8],
    ) -> Result<&'b [u8]>;
}

/// The panel, as far as the cycle cares.
#[allow(async_fn_in_trait)]
pub trait Renderer {
    /// Bring up the panel while the join is still running.
    async fn init(&mut self) -> Result<()>;

    async fn render(&mut self, image: &[u8]) -> Result<()>;

    /// Show the cycle's log lines instead of the image. `frame` is free
    /// scratch space at this point.
    async fn render_diagnostics(&mut self, log: &DiagnosticLog, frame: &mut [u8]) -> Result<()>;

    async fn power_off(&mut self);
}

/// Timestamps of the current cycle.
#[derive(Clone, Copy, Debug)]
pub struct CycleTiming {
    cycle_started: Instant,
    join_started: Option<Instant>,
    join_finished: Option<Instant>,
    display_on: Duration,
}

impl CycleTiming {
    pub fn begin() -> Self {
        Self::begin_at(Instant::now())
    }

    pub fn begin_at(now: Instant) -> Self {
        Self {
            cycle_started: now,
            join_started: None,
            join_finished: None,
            display_on: Duration::from_ticks(0),
        }
    }

    pub fn mark_join_started(&mut self, at: Instant) {
        self.join_started = Some(at);
    }

    pub fn mark_join_finished(&mut self, at: Instant) {
        self.join_finished = Some(at);
    }

    pub fn add_display_time(&mut self, spent: Duration) {
        self.display_on += spent;
    }

    /// Zero unless the join both started and finished.
    pub fn connecting(&self) -> Duration {
        match (self.join_started, self.join_finished) {
            (Some(started), Some(finished)) => finished.saturating_duration_since(started),
            _ => Duration::from_ticks(0),
        }
    }

    /// Stats contribution of this cycle, with awake time measured up to `now`.
    pub fn delta(&self, succeeded: bool, now: Instant) -> CycleStats {
        CycleStats {
            success_count: u32::from(succeeded),
            fail_count: u32::from(!succeeded),
            awake_time_ms: millis(now.saturating_duration_since(self.cycle_started)),
            connecting_time_ms: millis(self.connecting()),
            display_on_time_ms: millis(self.display_on),
        }
    }
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// What a cycle did, handed to the sleep step.
#[derive(Clone, Copy, Debug)]
pub struct CycleReport {
    pub outcome: Result<()>,
    pub delta: CycleStats,
    /// Lifetime totals after the merge, if it was saved.
    pub totals: Option<CycleStats>,
    pub sleep_for: Duration,
}

pub struct WakeCycle<'a, M: RawMutex, R, F, D, S> {
    settings: Settings<'a>,
    join: &'a JoinMachine<M>,
    radio: R,
    fetcher: F,
    renderer: D,
    stats: S,
    frame: &'a mut [u8],
    log: DiagnosticLog,
}

impl<'a, M, R, F, D, S> WakeCycle<'a, M, R, F, D, S>
where
    M: RawMutex,
    R: Radio,
    F: Fetcher,
    D: Renderer,
    S: StatsStore,
{
    pub fn new(
        settings: Settings<'a>,
        join: &'a JoinMachine<M>,
        radio: R,
        fetcher: F,
        renderer: D,
        stats: S,
        frame: &'a mut [u8],
    ) -> Self {
        Self {
            settings,
            join,
            radio,
            fetcher,
            renderer,
            stats,
            frame,
            log: DiagnosticLog::new(),
        }
    }

    /// Run the cycle and go to sleep.
    pub async fn run<Z: SleepScheduler>(mut self, sleeper: &mut Z) -> ! {
        let report = self.run_cycle().await;
        info!(
            "sleeping {} min after {} cycle",
            report.sleep_for.as_secs() / 60,
            if report.outcome.is_ok() { "a good" } else { "a failed" }
        );
        sleeper.schedule_next(report.sleep_for).await
    }

    /// Everything up to, but not including, the sleep hand-off.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut timing = CycleTiming::begin();
        self.log.clear();
        let outcome = self.execute(&mut timing).await;
        self.finalize(outcome, &mut timing).await
    }

    async fn execute(&mut self, timing: &mut CycleTiming) -> Result<()> {
        let totals = self.stats.load()?;
        info!(
            "{} cycles so far ({} ok, {} failed)",
            totals.cycles(),
            totals.success_count,
            totals.fail_count
        );
        self.log.record(format_args!(
            "Runs: {} ok, {} failed",
            totals.success_count, totals.fail_count
        ));

        let credentials = self.settings.credentials()?;
        timing.mark_join_started(Instant::now());
        let join = self.join;
        let mut session = join.start(&mut self.radio, credentials)?;
        self.log
            .record(format_args!("Connecting to {}...", credentials.ssid));

        // Not on the deadline: the timeout starts when we begin waiting.
        let display_ready = self.renderer.init().await;
        if let Err(err) = display_ready {
            warn!("display init failed: {err}");
        }

        let outcome = session.wait(self.settings.connect_timeout).await;
        timing.mark_join_finished(Instant::now());
        if let Some(reason) = join.last_disconnect_reason() {
            let retries = join.retries().unwrap_or(0);
            self.log.record(format_args!(
                "Disconnected, reason {reason} ({retries}/{MAX_RETRIES} retries)"
            ));
        }
        let connecting_ms = millis(timing.connecting());
        match outcome {
            JoinOutcome::Connected => {
                info!("WiFi connected in {connecting_ms} ms");
                self.log
                    .record(format_args!("Connected in {connecting_ms} ms"));
            }
            JoinOutcome::Failed => {
                session.stop();
                return Err(CycleError::JoinFailed);
            }
            JoinOutcome::TimedOut => {
                session.stop();
                return Err(CycleError::JoinTimedOut);
            }
        }

        let fetched = fetch_image(&self.settings, &mut self.fetcher, &mut self.log, self.frame).await;
        session.stop();
        let image = fetched?;
        display_ready?;

        info!("Rendering...");
        let started = Instant::now();
        let rendered = self.renderer.render(image).await;
        timing.add_display_time(started.elapsed());
        rendered
    }

    async fn finalize(&mut self, outcome: Result<()>, timing: &mut CycleTiming) -> CycleReport {
        if let Err(err) = outcome {
            error!("cycle failed: {err}");
            self.log.record(format_args!("Error: {err}"));
            let started = Instant::now();
            if let Err(diag_err) = self
                .renderer
                .render_diagnostics(&self.log, self.frame)
                .await
            {
                warn!("diagnostics not shown: {diag_err}");
            }
            timing.add_display_time(started.elapsed());
        }

        let delta = timing.delta(outcome.is_ok(), Instant::now());
        let totals = match self.stats.merge(&delta) {
            Ok(totals) => {
                info!(
                    "stats: {} ok, {} failed, awake {} ms, connecting {} ms, display {} ms",
                    totals.success_count,
                    totals.fail_count,
                    totals.awake_time_ms,
                    totals.connecting_time_ms,
                    totals.display_on_time_ms
                );
                Some(totals)
            }
            Err(err) => {
                warn!("stats not saved: {err}");
                None
            }
        };

        self.renderer.power_off().await;

        CycleReport {
            outcome,
            delta,
            totals,
            sleep_for: sleep_interval(self.settings.refresh_interval_min),
        }
    }
}

async fn fetch_image<'b, F: Fetcher>(
    settings: &Settings<'_>,
    fetcher: &mut F,
    log: &mut DiagnosticLog,
    frame: &'b mut [u8],
) -> Result<&'b [u8]> {
    let headers = request_headers(settings)?;
    let url = settings.image_url()?;

    info!("Downloading {url}");
    log.record(format_args!("Downloading..."));
    let image = with_timeout(settings.download_timeout, fetcher.fetch(url, &headers, frame))
        .await
        .map_err(|_| CycleError::TransportError("download timed out"))??;
    info!("Downloaded {} bytes", image.len());
    Ok(image)
}
