//! Gapless playback scheduling with instant barge-in flush.
//!
//! [`PlaybackScheduler`] is a pure state machine over an injected clock and
//! sink: each decoded buffer is scheduled at `max(next_start, now + margin)`
//! in strict receipt order, and `next_start` advances by the buffer's
//! duration so consecutive chunks butt-join exactly. The safety margin only
//! applies when the queue has drained; it never opens gaps between queued
//! chunks. An interruption stops the sink and resets the cursor to `now`.
//!
//! The real sink is a `rodio::Sink` on a dedicated thread (the output
//! stream is not `Send` on every platform); `Sink::stop()` empties the
//! queue synchronously, which is what makes barge-in effectively
//! instantaneous.

use crate::clock::{AudioClock, SystemClock};
use crate::error::{VoiceError, VoiceResult};
use crate::pcm::OUTPUT_SAMPLE_RATE;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Start chunks this far ahead of the clock when the queue is empty.
const START_MARGIN_SECS: f64 = 0.02;

/// Where scheduled audio actually goes. Implemented by the rodio sink in
/// production and by a recording double in tests.
pub trait PlaybackSink {
    /// Queue `duration` of silence before the next buffer (fresh start).
    fn lead_in(&mut self, duration: Duration);
    /// Queue a buffer for playback immediately after whatever is pending.
    fn play(&mut self, samples: Vec<f32>, sample_rate: u32);
    /// Stop and discard everything queued or playing. Must be immediate.
    fn stop(&mut self);
}

/// Timeline slot assigned to one scheduled chunk, in clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Orders server chunks onto a monotonic playback timeline.
pub struct PlaybackScheduler<S: PlaybackSink> {
    clock: Arc<dyn AudioClock>,
    sink: S,
    next_start: f64,
}

impl<S: PlaybackSink> PlaybackScheduler<S> {
    pub fn new(clock: Arc<dyn AudioClock>, sink: S) -> Self {
        Self {
            clock,
            sink,
            next_start: 0.0,
        }
    }

    /// Schedules a decoded buffer. Chunks are placed strictly in call
    /// order; the returned slot never overlaps the previous one.
    pub fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32) -> ScheduledChunk {
        let duration = samples.len() as f64 / sample_rate as f64;
        let now = self.clock.now();
        let start = self.next_start.max(now + START_MARGIN_SECS);

        if self.next_start <= now {
            // Queue has drained: bridge the sink up to the start deadline.
            self.sink.lead_in(Duration::from_secs_f64(start - now));
        }
        self.sink.play(samples, sample_rate);
        self.next_start = start + duration;
        debug!("chunk scheduled at {start:.3}s (+{duration:.3}s)");
        ScheduledChunk { start, duration }
    }

    /// Barge-in: discard every queued/playing buffer and reset the cursor
    /// to the current clock time.
    pub fn flush(&mut self) {
        self.sink.stop();
        self.next_start = self.clock.now();
        info!("playback flushed (interruption)");
    }

    /// Current value of the next-start cursor, in clock seconds.
    pub fn next_start(&self) -> f64 {
        self.next_start
    }
}

/// Rodio-backed sink. Keep the output stream alive for the sink's lifetime.
struct RodioSink {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    sink: Sink,
}

impl RodioSink {
    fn new() -> VoiceResult<Self> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        Ok(Self {
            _stream: stream,
            _handle: handle,
            sink,
        })
    }
}

impl PlaybackSink for RodioSink {
    fn lead_in(&mut self, duration: Duration) {
        let silence = rodio::source::Zero::<f32>::new(1, OUTPUT_SAMPLE_RATE).take_duration(duration);
        self.sink.append(silence);
    }

    fn play(&mut self, samples: Vec<f32>, sample_rate: u32) {
        self.sink.append(SamplesBuffer::new(1, sample_rate, samples));
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}

/// Commands accepted by the playback thread.
pub enum PlaybackCmd {
    Play(Vec<f32>),
    Flush,
    Close,
}

/// Cloneable sender side of the playback thread. Commands are processed
/// strictly in send order, so a flush lands exactly between the chunks it
/// separates.
#[derive(Clone)]
pub struct PlaybackQueue {
    cmd_tx: mpsc::UnboundedSender<PlaybackCmd>,
}

impl PlaybackQueue {
    /// Queue decoded 24kHz samples for scheduling.
    pub fn enqueue(&self, samples: Vec<f32>) {
        let _ = self.cmd_tx.send(PlaybackCmd::Play(samples));
    }

    /// Flush everything scheduled (barge-in).
    pub fn flush(&self) {
        let _ = self.cmd_tx.send(PlaybackCmd::Flush);
    }
}

/// Handle to the playback thread. Dropping without [`close`](Self::close)
/// also shuts the thread down (the channel closes).
pub struct PlaybackHandle {
    cmd_tx: mpsc::UnboundedSender<PlaybackCmd>,
    join: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    /// A cloneable queue handle for producers.
    pub fn queue(&self) -> PlaybackQueue {
        PlaybackQueue {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Flush everything scheduled (barge-in).
    pub fn flush(&self) {
        let _ = self.cmd_tx.send(PlaybackCmd::Flush);
    }

    /// Stop playback and join the thread. Idempotent.
    pub fn close(&mut self) {
        let _ = self.cmd_tx.send(PlaybackCmd::Close);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("playback thread panicked during shutdown");
            }
        }
    }
}

/// Spawns the playback thread: opens the output device there (the stream is
/// not `Send`), runs a scheduler over the system clock, and processes
/// commands in order so flushes land between the right chunks.
pub fn spawn_playback() -> VoiceResult<PlaybackHandle> {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<PlaybackCmd>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<VoiceResult<()>>();

    let join = std::thread::spawn(move || {
        let sink = match RodioSink::new() {
            Ok(s) => {
                let _ = ready_tx.send(Ok(()));
                s
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let clock: Arc<dyn AudioClock> = Arc::new(SystemClock::new());
        let mut scheduler = PlaybackScheduler::new(clock, sink);

        while let Some(cmd) = cmd_rx.blocking_recv() {
            match cmd {
                PlaybackCmd::Play(samples) => {
                    scheduler.schedule(samples, OUTPUT_SAMPLE_RATE);
                }
                PlaybackCmd::Flush => scheduler.flush(),
                PlaybackCmd::Close => break,
            }
        }
        scheduler.flush();
    });

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(PlaybackHandle {
            cmd_tx,
            join: Some(join),
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(VoiceError::Playback("playback thread died".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum SinkEvent {
        LeadIn(Duration),
        Play(usize),
        Stop,
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<SinkEvent>>>,
    }

    impl PlaybackSink for RecordingSink {
        fn lead_in(&mut self, duration: Duration) {
            self.events.lock().unwrap().push(SinkEvent::LeadIn(duration));
        }
        fn play(&mut self, samples: Vec<f32>, _sample_rate: u32) {
            self.events.lock().unwrap().push(SinkEvent::Play(samples.len()));
        }
        fn stop(&mut self) {
            self.events.lock().unwrap().push(SinkEvent::Stop);
        }
    }

    fn chunk_100ms() -> Vec<f32> {
        vec![0.0; (OUTPUT_SAMPLE_RATE / 10) as usize]
    }

    #[test]
    fn back_to_back_chunks_are_gapless_and_ordered() {
        let clock = ManualClock::new();
        let sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new(Arc::new(clock), sink.clone());

        let c1 = scheduler.schedule(chunk_100ms(), OUTPUT_SAMPLE_RATE);
        let c2 = scheduler.schedule(chunk_100ms(), OUTPUT_SAMPLE_RATE);
        let c3 = scheduler.schedule(chunk_100ms(), OUTPUT_SAMPLE_RATE);

        // No overlap, no reordering.
        assert!(c2.start >= c1.end());
        assert!(c3.start >= c2.end());
        // No gaps over 5ms between consecutive chunks.
        assert!(c2.start - c1.end() < 0.005);
        assert!(c3.start - c2.end() < 0.005);
        // Total timeline spans ~300ms.
        assert!((c3.end() - c1.start - 0.3).abs() < 1e-9);

        // Only the fresh start bridges silence; queued chunks butt-join.
        let events = sink.events.lock().unwrap();
        let lead_ins = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::LeadIn(_)))
            .count();
        assert_eq!(lead_ins, 1);
    }

    #[test]
    fn flush_resets_cursor_to_clock() {
        let clock = ManualClock::new();
        let sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new(Arc::new(clock.clone()), sink.clone());

        scheduler.schedule(chunk_100ms(), OUTPUT_SAMPLE_RATE);
        scheduler.schedule(chunk_100ms(), OUTPUT_SAMPLE_RATE);
        clock.advance(0.05);
        scheduler.flush();

        assert!(sink.events.lock().unwrap().contains(&SinkEvent::Stop));
        assert!((scheduler.next_start() - clock.now()).abs() < 1e-9);

        // Audio after the flush starts fresh relative to the clock.
        let resumed = scheduler.schedule(chunk_100ms(), OUTPUT_SAMPLE_RATE);
        assert!(resumed.start >= clock.now());
        assert!(resumed.start - clock.now() <= START_MARGIN_SECS + 1e-9);
    }

    #[test]
    fn drained_queue_gets_fresh_lead_in() {
        let clock = ManualClock::new();
        let sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new(Arc::new(clock.clone()), sink.clone());

        let c1 = scheduler.schedule(chunk_100ms(), OUTPUT_SAMPLE_RATE);
        // Clock passes the end of the queue: next chunk is a fresh start.
        clock.set(c1.end() + 1.0);
        let c2 = scheduler.schedule(chunk_100ms(), OUTPUT_SAMPLE_RATE);
        assert!(c2.start >= clock.now());

        let events = sink.events.lock().unwrap();
        let lead_ins = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::LeadIn(_)))
            .count();
        assert_eq!(lead_ins, 2);
    }
}
