// Event sinks: the clock and timer the scheduler runs against.
//
// `EventSink` is the contract the scheduler sees: read the clock, queue a
// note for later, ask to be woken at a time, tear down. `Timeline` is the
// sink implementation. It keeps every pending dispatch in a min-heap keyed by
// `(time, sequence)` and delivers them in order through a `NoteOutput`.
//
// A note becomes two dispatches (on at its time, off after its duration). A
// wake-up request becomes a `Wakeup` dispatch; when it fires, `advance`
// returns it to the driver (player.rs), which calls back into the scheduler.
// The scheduler never holds a callback into itself, so there is no shared
// mutable state between sink and scheduler.
//
// The clock is pluggable:
// - `VirtualClock` jumps straight to each dispatch time. Runs are
//   deterministic and instant; used for offline rendering and tests.
// - `WallClock` measures real time since construction and waits on a stop
//   channel with `recv_timeout`, so a stop request cuts a wait short.
//
// Sequence numbers break ties within a millisecond: dispatches queued earlier
// fire first, which keeps a note's off ahead of a later note's on at the same
// instant.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use crate::output::NoteOutput;

/// Milliseconds on the sink's clock.
pub type Timestamp = u64;

/// A note the scheduler wants played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub time: Timestamp,
    pub channel: u8,
    pub pitch: u8,
    pub duration_ms: Timestamp,
    pub velocity: u8,
}

pub trait EventSink {
    fn now(&self) -> Timestamp;
    fn schedule_note(&mut self, note: NoteEvent);
    /// Ask for the scheduler to be invoked again at `at`.
    fn schedule_wakeup(&mut self, at: Timestamp);
    /// Release the sink. Later schedule calls are ignored. Idempotent.
    fn teardown(&mut self);
}

pub trait Clock {
    fn now(&self) -> Timestamp;
    /// Block until `at`. Returns `false` if a stop request interrupted the wait.
    fn wait_until(&mut self, at: Timestamp) -> bool;
}

/// Simulated clock that advances only when waited on.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now: Timestamp,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: Timestamp) -> Self {
        Self { now }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn wait_until(&mut self, at: Timestamp) -> bool {
        self.now = self.now.max(at);
        true
    }
}

/// Real-time clock, zeroed at construction.
#[derive(Debug)]
pub struct WallClock {
    start: Instant,
    stop_rx: Receiver<()>,
}

impl WallClock {
    /// `stop_rx` interrupts waits: a message or a dropped sender both count
    /// as a stop request.
    pub fn new(stop_rx: Receiver<()>) -> Self {
        Self {
            start: Instant::now(),
            stop_rx,
        }
    }
}

impl Clock for WallClock {
    fn now(&self) -> Timestamp {
        self.start.elapsed().as_millis() as Timestamp
    }

    fn wait_until(&mut self, at: Timestamp) -> bool {
        loop {
            let now = self.now();
            if now >= at {
                return true;
            }
            match self.stop_rx.recv_timeout(Duration::from_millis(at - now)) {
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    Wakeup,
}

#[derive(Debug, Clone)]
struct Dispatch {
    time: Timestamp,
    sequence: u64,
    kind: DispatchKind,
}

impl PartialEq for Dispatch {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for Dispatch {}

// BinaryHeap is a max-heap; reverse so the earliest (time, sequence) pops first.
impl Ord for Dispatch {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Dispatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What `Timeline::advance` delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired {
    /// A note on or off went to the output.
    Note(Timestamp),
    /// A wake-up came due; the driver should run the scheduler.
    Wakeup(Timestamp),
    /// The wait was cut short by a stop request.
    Interrupted,
}

pub struct Timeline<C: Clock, O: NoteOutput> {
    clock: C,
    output: O,
    heap: BinaryHeap<Dispatch>,
    next_sequence: u64,
    closed: bool,
}

impl<C: Clock, O: NoteOutput> Timeline<C, O> {
    pub fn new(clock: C, output: O) -> Self {
        Self {
            clock,
            output,
            heap: BinaryHeap::new(),
            next_sequence: 0,
            closed: false,
        }
    }

    fn push(&mut self, time: Timestamp, kind: DispatchKind) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Dispatch { time, sequence, kind });
    }

    /// Time of the earliest pending dispatch.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.heap.peek().map(|d| d.time)
    }

    pub fn pending(&self) -> usize {
        self.heap.len()
    }

    pub fn pending_wakeups(&self) -> usize {
        self.heap.iter().filter(|d| d.kind == DispatchKind::Wakeup).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait on the clock without dispatching anything.
    pub fn wait_until(&mut self, at: Timestamp) -> bool {
        self.clock.wait_until(at)
    }

    /// Wait for the earliest dispatch and deliver it. Returns `None` when
    /// nothing is pending or the timeline is closed.
    pub fn advance(&mut self) -> Option<Fired> {
        if self.closed {
            return None;
        }
        let due = self.next_due()?;
        if !self.clock.wait_until(due) {
            return Some(Fired::Interrupted);
        }
        let dispatch = self.heap.pop()?;
        let fired = match dispatch.kind {
            DispatchKind::NoteOn { channel, pitch, velocity } => {
                self.output.note_on(dispatch.time, channel, pitch, velocity);
                Fired::Note(dispatch.time)
            }
            DispatchKind::NoteOff { channel, pitch } => {
                self.output.note_off(dispatch.time, channel, pitch);
                Fired::Note(dispatch.time)
            }
            DispatchKind::Wakeup => Fired::Wakeup(dispatch.time),
        };
        Some(fired)
    }
}

impl<C: Clock, O: NoteOutput> EventSink for Timeline<C, O> {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn schedule_note(&mut self, note: NoteEvent) {
        if self.closed {
            log::debug!("sink closed; dropping note {} at {}", note.pitch, note.time);
            return;
        }
        self.push(
            note.time,
            DispatchKind::NoteOn {
                channel: note.channel,
                pitch: note.pitch,
                velocity: note.velocity,
            },
        );
        self.push(
            note.time.saturating_add(note.duration_ms),
            DispatchKind::NoteOff {
                channel: note.channel,
                pitch: note.pitch,
            },
        );
    }

    fn schedule_wakeup(&mut self, at: Timestamp) {
        if self.closed {
            return;
        }
        self.push(at, DispatchKind::Wakeup);
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let now = self.clock.now();
        self.output.all_notes_off(now);
        log::info!(
            "sink torn down at {now} ms with {} dispatches still queued",
            self.heap.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputEventKind, RecordingOutput};

    fn note(time: Timestamp, pitch: u8, duration_ms: Timestamp) -> NoteEvent {
        NoteEvent {
            time,
            channel: 0,
            pitch,
            duration_ms,
            velocity: 90,
        }
    }

    #[test]
    fn dispatches_in_time_order() {
        let recording = RecordingOutput::new();
        let mut timeline = Timeline::new(VirtualClock::new(), recording.clone());
        timeline.schedule_note(note(500, 64, 100));
        timeline.schedule_note(note(100, 60, 100));
        timeline.schedule_wakeup(300);

        let mut fired = Vec::new();
        while let Some(f) = timeline.advance() {
            fired.push(f);
        }
        assert_eq!(
            fired,
            vec![
                Fired::Note(100),
                Fired::Note(200),
                Fired::Wakeup(300),
                Fired::Note(500),
                Fired::Note(600),
            ]
        );
        assert_eq!(recording.onsets(), vec![(100, 60), (500, 64)]);
        assert_eq!(timeline.now(), 600);
    }

    #[test]
    fn earlier_queued_dispatch_wins_a_tie() {
        let recording = RecordingOutput::new();
        let mut timeline = Timeline::new(VirtualClock::new(), recording.clone());
        // First note ends exactly when the second starts.
        timeline.schedule_note(note(0, 60, 250));
        timeline.schedule_note(note(250, 60, 250));
        while timeline.advance().is_some() {}

        let kinds: Vec<OutputEventKind> = recording.events().iter().map(|e| e.kind).collect();
        assert!(matches!(kinds[1], OutputEventKind::Off { pitch: 60, .. }));
        assert!(matches!(kinds[2], OutputEventKind::On { pitch: 60, .. }));
    }

    #[test]
    fn virtual_clock_never_goes_backwards() {
        let mut clock = VirtualClock::starting_at(1_000);
        assert!(clock.wait_until(500));
        assert_eq!(clock.now(), 1_000);
        assert!(clock.wait_until(1_500));
        assert_eq!(clock.now(), 1_500);
    }

    #[test]
    fn teardown_silences_and_ignores_new_work() {
        let recording = RecordingOutput::new();
        let mut timeline = Timeline::new(VirtualClock::new(), recording.clone());
        timeline.schedule_note(note(100, 60, 100));
        timeline.teardown();
        timeline.teardown();
        timeline.schedule_wakeup(50);

        assert!(timeline.is_closed());
        assert_eq!(timeline.pending(), 2);
        assert_eq!(timeline.pending_wakeups(), 0);
        assert_eq!(timeline.advance(), None);
        let events = recording.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, OutputEventKind::AllOff);
    }

    #[test]
    fn wall_clock_wait_is_interrupted_by_stop() {
        let (tx, rx) = mpsc::channel();
        let mut clock = WallClock::new(rx);
        tx.send(()).unwrap();
        let started = Instant::now();
        assert!(!clock.wait_until(60_000));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn wall_clock_waits_until_due() {
        let (_tx, rx) = mpsc::channel();
        let mut clock = WallClock::new(rx);
        assert!(clock.wait_until(30));
        assert!(clock.now() >= 30);
    }
}
