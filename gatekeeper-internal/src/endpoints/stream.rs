//! Time-paced delivery of a greeting as newline-delimited JSON frames.
//!
//! [`StreamPacer`] is the state machine: each tick either yields the next frame
//! or closes. [`paced_body`] drives it on a tokio task that writes frames into a
//! channel. The receiving end becomes the HTTP response body, and dropping that
//! body aborts the task along with whatever timer it is waiting on.

use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::endpoints::greeting::GreetingPayload;
use crate::error::{Error, ErrorDetails};
use crate::metrics::GatekeeperMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Idle,
    Emitting { next_sequence: u32 },
    Closed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Tick {
    Frame { sequence: u32, bytes: Bytes },
    Close,
}

/// Emits `frame_count` copies of a payload, each stamped with its sequence number.
#[derive(Debug)]
pub struct StreamPacer {
    payload: GreetingPayload,
    frame_count: u32,
    state: PacerState,
}

impl StreamPacer {
    pub fn new(payload: GreetingPayload, frame_count: u32) -> Self {
        Self {
            payload,
            frame_count,
            state: PacerState::Idle,
        }
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    /// Advance by one tick.
    ///
    /// Yields frames `0..frame_count` in order, then `Tick::Close` exactly
    /// once and on every tick after that.
    pub fn tick(&mut self) -> Result<Tick, Error> {
        let sequence = match self.state {
            PacerState::Idle => 0,
            PacerState::Emitting { next_sequence } => next_sequence,
            PacerState::Closed => return Ok(Tick::Close),
        };
        if sequence >= self.frame_count {
            self.state = PacerState::Closed;
            return Ok(Tick::Close);
        }

        self.payload.stream_sequence = sequence;
        let mut frame = serde_json::to_vec(&self.payload).map_err(|e| {
            self.state = PacerState::Closed;
            Error::new(ErrorDetails::Serialization {
                message: format!("Failed to serialize stream frame {sequence}: {e}"),
            })
        })?;
        frame.push(b'\n');
        self.state = PacerState::Emitting {
            next_sequence: sequence + 1,
        };
        Ok(Tick::Frame {
            sequence,
            bytes: Bytes::from(frame),
        })
    }
}

/// Run `pacer` to completion, writing each frame to `sink` and waiting `interval`
/// between ticks. Returns true if the pacer reached `Closed` normally.
///
/// The next timer is only armed after the previous write has been accepted,
/// so at most one frame per stream is ever in flight.
pub async fn drive(mut pacer: StreamPacer, sink: mpsc::Sender<Bytes>, interval: Duration) -> bool {
    loop {
        match pacer.tick() {
            Ok(Tick::Frame { sequence, bytes }) => {
                if sink.send(bytes).await.is_err() {
                    ErrorDetails::StreamSinkClosed { sequence }.log();
                    return false;
                }
                tokio::time::sleep(interval).await;
            }
            // Dropping `sink` here ends the response body
            Ok(Tick::Close) => return true,
            Err(_) => return false,
        }
    }
}

/// Records how a stream ended. Owned by the pacer task so it also fires when
/// the task is aborted.
struct StreamOutcomeGuard {
    metrics: Arc<GatekeeperMetrics>,
    completed: bool,
}

impl Drop for StreamOutcomeGuard {
    fn drop(&mut self) {
        if self.completed {
            self.metrics.record_stream_completed();
        } else {
            self.metrics.record_stream_disconnected();
        }
    }
}

/// Aborts the pacer task when dropped, cancelling any pending tick.
#[derive(Debug)]
pub struct CancelHandle {
    task: JoinHandle<()>,
}

impl CancelHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            debug!("Response body dropped mid-stream, cancelling pacer");
            self.task.abort();
        }
    }
}

/// Response body fed by a running [`StreamPacer`]
#[derive(Debug)]
pub struct PacedBody {
    // Declared first so the task is aborted before the receiver goes away
    cancel: CancelHandle,
    frames: ReceiverStream<Bytes>,
}

impl PacedBody {
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }
}

impl Stream for PacedBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames)
            .poll_next(cx)
            .map(|frame| frame.map(Ok))
    }
}

/// Start pacing `pacer` on its own task and return the body that receives its frames.
pub fn paced_body(
    pacer: StreamPacer,
    interval: Duration,
    metrics: Arc<GatekeeperMetrics>,
) -> PacedBody {
    let (sink, frames) = mpsc::channel(1);
    metrics.record_stream_started();
    // Built outside the task so it is dropped with the future even if the
    // task is aborted before its first poll
    let mut outcome = StreamOutcomeGuard {
        metrics,
        completed: false,
    };
    let task = tokio::spawn(async move {
        outcome.completed = drive(pacer, sink, interval).await;
    });
    PacedBody {
        cancel: CancelHandle { task },
        frames: ReceiverStream::new(frames),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::time::Instant;

    fn payload() -> GreetingPayload {
        GreetingPayload {
            message: "Welcome USER_42, this is your visit #1".to_string(),
            cohort: 3,
            rate_limit_remaining: 3,
            stream_sequence: 0,
        }
    }

    fn parse(bytes: &[u8]) -> GreetingPayload {
        assert_eq!(bytes.last(), Some(&b'\n'));
        serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap()
    }

    #[test]
    fn test_pacer_state_machine() {
        let mut pacer = StreamPacer::new(payload(), 5);
        assert_eq!(pacer.state(), PacerState::Idle);

        for expected in 0..5 {
            match pacer.tick().unwrap() {
                Tick::Frame { sequence, bytes } => {
                    assert_eq!(sequence, expected);
                    let frame = parse(&bytes);
                    assert_eq!(frame.stream_sequence, expected);
                    assert_eq!(frame.message, payload().message);
                }
                Tick::Close => panic!("closed early at {expected}"),
            }
            assert_eq!(
                pacer.state(),
                PacerState::Emitting {
                    next_sequence: expected + 1
                }
            );
        }

        assert_eq!(pacer.tick().unwrap(), Tick::Close);
        assert_eq!(pacer.state(), PacerState::Closed);
        // Closed is terminal
        assert_eq!(pacer.tick().unwrap(), Tick::Close);
    }

    #[test]
    fn test_frame_is_single_line_json() {
        let mut pacer = StreamPacer::new(payload(), 1);
        let Tick::Frame { bytes, .. } = pacer.tick().unwrap() else {
            panic!("expected a frame");
        };
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(text.matches('\n').count(), 1);
        assert_eq!(
            text,
            "{\"message\":\"Welcome USER_42, this is your visit #1\",\"cohort\":3,\"rate_limit_remaining\":3,\"stream_sequence\":0}\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_body_emits_frames_one_tick_apart() {
        let metrics = Arc::new(GatekeeperMetrics::default());
        let mut body = paced_body(
            StreamPacer::new(payload(), 5),
            Duration::from_secs(1),
            Arc::clone(&metrics),
        );

        let start = Instant::now();
        let mut arrivals = Vec::new();
        while let Some(frame) = body.next().await {
            let frame = parse(&frame.unwrap());
            arrivals.push((frame.stream_sequence, start.elapsed()));
        }

        let sequences: Vec<u32> = arrivals.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        for pair in arrivals.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(1));
        }
        // The stream closes one tick after the last frame
        assert!(start.elapsed() >= Duration::from_secs(5));

        tokio::task::yield_now().await;
        assert!(body.cancel_handle().is_finished());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.streams_started, 1);
        assert_eq!(snapshot.streams_completed, 1);
        assert_eq!(snapshot.streams_disconnected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_body_cancels_pacer() {
        let metrics = Arc::new(GatekeeperMetrics::default());
        let mut body = paced_body(
            StreamPacer::new(payload(), 5),
            Duration::from_secs(1),
            Arc::clone(&metrics),
        );

        let first = body.next().await.unwrap().unwrap();
        assert_eq!(parse(&first).stream_sequence, 0);
        drop(body);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.streams_completed, 0);
        assert_eq!(snapshot.streams_disconnected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_dropped_before_first_frame_counts_disconnect() {
        let metrics = Arc::new(GatekeeperMetrics::default());
        let body = paced_body(
            StreamPacer::new(payload(), 5),
            Duration::from_secs(1),
            Arc::clone(&metrics),
        );
        drop(body);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.streams_started, 1);
        assert_eq!(snapshot.streams_completed, 0);
        assert_eq!(snapshot.streams_disconnected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_stops_when_sink_closes() {
        let (sink, mut frames) = mpsc::channel(1);
        let pacer = tokio::spawn(drive(
            StreamPacer::new(payload(), 5),
            sink,
            Duration::from_secs(1),
        ));

        assert!(frames.recv().await.is_some());
        drop(frames);

        assert!(!pacer.await.unwrap());
    }
}
