// Playback driver: runs a scheduler against a timeline until told to stop.
//
// `drive` is the loop shared by offline and live playback. It starts the
// scheduler (first batch), then repeatedly lets the timeline deliver its
// earliest dispatch: notes go straight to the output, and a due wake-up runs
// the next batch. Exactly one wake-up is pending at any time, so batches are
// strictly sequential.
//
// Two entry points:
// - `render` drives a `VirtualClock` for a fixed span and returns everything
//   that was played. Nothing sleeps; an hour of music renders instantly.
// - `start_playback` drives a `WallClock` on a background thread and returns
//   a `PlaybackHandle`. `stop()` sends on the clock's stop channel, which
//   interrupts whatever wait is in progress; the thread tears the scheduler
//   and sink down and hands back its report.
//
// Notes already queued when playback stops are dropped rather than played
// out; the output gets a single all-notes-off at teardown.

use endless_prng::ChainRng;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread;

use crate::config::PlaybackConfig;
use crate::error::{PlayerError, Result};
use crate::learner::LearnedModel;
use crate::output::{NoteOutput, OutputEvent, RecordingOutput};
use crate::scheduler::{Scheduler, SchedulerState};
use crate::sink::{Clock, EventSink, Fired, Timeline, Timestamp, VirtualClock, WallClock};

/// Counters for one playback run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub batches: u64,
    /// Note-ons generated (scheduled), whether or not they were played.
    pub notes_scheduled: u64,
    /// Note-ons and note-offs actually delivered to the output.
    pub dispatches: u64,
    pub end_time: Timestamp,
}

/// Run the scheduler until `until` (if given), until a stop request, or
/// until a fatal error. The scheduler is Stopped and the sink torn down on
/// return, on every path.
pub fn drive<C: Clock, O: NoteOutput>(
    scheduler: &mut Scheduler,
    timeline: &mut Timeline<C, O>,
    until: Option<Timestamp>,
) -> Result<PlaybackReport> {
    let mut report = PlaybackReport::default();
    let result = drive_inner(scheduler, timeline, until, &mut report);
    scheduler.stop(timeline);
    report.end_time = timeline.now();
    log::info!(
        "playback ended at {} ms: {} batches, {} notes scheduled",
        report.end_time,
        report.batches,
        report.notes_scheduled
    );
    result.map(|()| report)
}

fn drive_inner<C: Clock, O: NoteOutput>(
    scheduler: &mut Scheduler,
    timeline: &mut Timeline<C, O>,
    until: Option<Timestamp>,
    report: &mut PlaybackReport,
) -> Result<()> {
    if scheduler.state() == SchedulerState::Idle {
        let batch = scheduler.generate_batch(timeline)?;
        report.batches += 1;
        report.notes_scheduled += batch.notes as u64;
    }

    loop {
        let Some(due) = timeline.next_due() else {
            return Ok(());
        };
        if let Some(limit) = until.filter(|&limit| due > limit) {
            timeline.wait_until(limit);
            return Ok(());
        }
        match timeline.advance() {
            Some(Fired::Note(_)) => report.dispatches += 1,
            Some(Fired::Wakeup(_)) => {
                let batch = scheduler.generate_batch(timeline)?;
                report.batches += 1;
                report.notes_scheduled += batch.notes as u64;
            }
            Some(Fired::Interrupted) | None => return Ok(()),
        }
    }
}

/// Play `duration_ms` of the stream on a virtual clock and return what the
/// output received.
pub fn render(
    model: Arc<LearnedModel>,
    config: PlaybackConfig,
    rng: ChainRng,
    duration_ms: Timestamp,
) -> Result<(PlaybackReport, Vec<OutputEvent>)> {
    let recording = RecordingOutput::new();
    let mut timeline = Timeline::new(VirtualClock::new(), recording.clone());
    let mut scheduler = Scheduler::new(model, config, rng)?;
    let report = drive(&mut scheduler, &mut timeline, Some(duration_ms))?;
    Ok((report, recording.events()))
}

/// Handle to a live playback thread.
pub struct PlaybackHandle {
    stop_tx: Sender<()>,
    thread: Option<thread::JoinHandle<Result<PlaybackReport>>>,
}

impl PlaybackHandle {
    /// Stop playback and wait for the thread to finish. Returns the run's
    /// report, or the error that ended it early.
    pub fn stop(mut self) -> Result<PlaybackReport> {
        let _ = self.stop_tx.send(());
        self.join()
    }

    /// Wait for playback to end on its own (time limit or fatal error).
    pub fn wait(mut self) -> Result<PlaybackReport> {
        self.join()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    fn join(&mut self) -> Result<PlaybackReport> {
        match self.thread.take() {
            Some(handle) => handle.join().unwrap_or(Err(PlayerError::ThreadPanicked)),
            None => Err(PlayerError::Stopped),
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Start real-time playback on a background thread. With `limit_ms` the run
/// ends by itself after that many milliseconds; otherwise it runs until
/// `stop()`.
pub fn start_playback<O: NoteOutput + 'static>(
    model: Arc<LearnedModel>,
    config: PlaybackConfig,
    rng: ChainRng,
    output: O,
    limit_ms: Option<Timestamp>,
) -> Result<PlaybackHandle> {
    let mut scheduler = Scheduler::new(model, config, rng)?;
    let (stop_tx, stop_rx) = mpsc::channel();

    let thread = thread::Builder::new()
        .name("endless-playback".into())
        .spawn(move || {
            let mut timeline = Timeline::new(WallClock::new(stop_rx), output);
            drive(&mut scheduler, &mut timeline, limit_ms)
        })?;

    Ok(PlaybackHandle {
        stop_tx,
        thread: Some(thread),
    })
}
