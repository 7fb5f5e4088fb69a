use log::{debug, warn};

use crate::error::ActuatorResult;
use crate::event::Sample;

/// Drive a general-purpose output to `value` (0 or 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gpo {
    pub channel: String,
    pub value: u8,
}

impl Gpo {
    pub fn new(channel: &str, value: u8) -> Self {
        Self {
            channel: channel.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartActions {
    pub ram_capture: bool,
    pub record_to_file: bool,
    pub gpo: Option<Gpo>,
}

impl Default for StartActions {
    fn default() -> Self {
        Self {
            ram_capture: true,
            record_to_file: false,
            gpo: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopActions {
    pub gpo: Option<Gpo>,
    pub single_marker: bool,
    pub dual_marker: bool,
    /// Seconds the RAM capture keeps running past the stop match.
    pub buffer_stop: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    Ram,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Marker {
    Single(f64),
    Dual(f64, f64),
}

/// Recording side of the device. Calls are requests; the recorder completes
/// them asynchronously against the sample stream it is fed with `ingest`.
pub trait Recorder {
    /// Keep the trailing `duration` seconds of samples for pre-roll.
    fn arm_buffer(&mut self, duration: f64) -> ActuatorResult<()>;

    fn release_buffer(&mut self) -> ActuatorResult<()>;

    fn start(&mut self, target: CaptureTarget, timestamp: f64, pre_roll: f64) -> ActuatorResult<()>;

    fn stop(&mut self, target: CaptureTarget, timestamp: f64, post_roll: f64) -> ActuatorResult<()>;

    fn marker(&mut self, marker: Marker) -> ActuatorResult<()>;

    fn ingest(&mut self, _signal: &str, _sample: &Sample) {}
}

pub trait Gpio {
    fn set(&mut self, channel: &str, value: u8) -> ActuatorResult<()>;
}

/// Timing for one transition.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionContext {
    pub timestamp: f64,
    pub pre_roll: Option<f64>,
    pub post_roll: Option<f64>,
}

fn report(what: &str, result: ActuatorResult<()>) {
    if let Err(e) = result {
        warn!("{what} failed: {e}");
    }
}

/// Issues start/stop side effects and remembers which sessions are open so
/// that stop only closes what start opened. Captures stopped with a
/// post-roll stay pending until `settle` sees their deadline pass.
#[derive(Debug, Default)]
pub struct ActionExecutor {
    buffer: bool,
    ram: bool,
    file: bool,
    started_at: Option<f64>,
    pending: Vec<CaptureTarget>,
    pending_until: Option<f64>,
}

impl ActionExecutor {
    pub fn new() -> Self {
        Default::default()
    }

    /// True when no buffer, capture or recording is open.
    pub fn is_idle(&self) -> bool {
        !self.buffer
            && !self.ram
            && !self.file
            && self.started_at.is_none()
            && self.pending.is_empty()
    }

    /// Sample time at which the last post-roll ends.
    pub fn pending_until(&self) -> Option<f64> {
        self.pending_until
    }

    /// Forget post-roll captures whose deadline is at or before `now`; the
    /// recorder closes them itself. True once nothing is pending.
    pub fn settle(&mut self, now: f64) -> bool {
        if self.pending_until.is_some_and(|until| now >= until) {
            self.pending.clear();
            self.pending_until = None;
        }
        self.pending.is_empty()
    }

    /// Cut every pending post-roll short at `timestamp`.
    pub fn close_pending<R: Recorder>(&mut self, recorder: &mut R, timestamp: f64) {
        for target in self.pending.drain(..) {
            report("post-roll stop", recorder.stop(target, timestamp, 0.0));
        }
        self.pending_until = None;
    }

    fn defer(&mut self, target: CaptureTarget, until: f64) {
        self.pending.push(target);
        self.pending_until = Some(self.pending_until.map_or(until, |u| u.max(until)));
    }

    pub fn arm_buffer<R: Recorder>(&mut self, recorder: &mut R, pre_roll: Option<f64>) {
        if let Some(duration) = pre_roll {
            debug!("pre-roll buffer armed for {duration}s");
            report("arm buffer", recorder.arm_buffer(duration));
            self.buffer = true;
        }
    }

    pub fn release_buffer<R: Recorder>(&mut self, recorder: &mut R) {
        if self.buffer {
            report("release buffer", recorder.release_buffer());
            self.buffer = false;
        }
    }

    pub fn execute_start<R: Recorder, G: Gpio>(
        &mut self,
        actions: &StartActions,
        ctx: ActionContext,
        recorder: &mut R,
        gpio: &mut G,
    ) {
        let pre_roll = ctx.pre_roll.unwrap_or(0.0);
        self.started_at = Some(ctx.timestamp);

        // sessions count as open even if the request failed, so stop still
        // reaches the recorder
        if actions.ram_capture {
            report(
                "RAM capture start",
                recorder.start(CaptureTarget::Ram, ctx.timestamp, pre_roll),
            );
            self.ram = true;
        }
        if actions.record_to_file {
            report(
                "recording start",
                recorder.start(CaptureTarget::File, ctx.timestamp, pre_roll),
            );
            self.file = true;
        }
        // captures copied what they need from the pre-roll buffer
        self.release_buffer(recorder);

        if let Some(gpo) = &actions.gpo {
            report("output", gpio.set(&gpo.channel, gpo.value));
        }
    }

    /// Close everything `execute_start` opened. A no-op when nothing was
    /// started.
    pub fn execute_stop<R: Recorder, G: Gpio>(
        &mut self,
        actions: &StopActions,
        ctx: ActionContext,
        recorder: &mut R,
        gpio: &mut G,
    ) {
        let Some(started_at) = self.started_at else {
            self.release_buffer(recorder);
            return;
        };
        let post_roll = ctx.post_roll.unwrap_or(0.0);

        if self.ram {
            let delay = actions.buffer_stop.unwrap_or(post_roll);
            report(
                "RAM capture stop",
                recorder.stop(CaptureTarget::Ram, ctx.timestamp, delay),
            );
            if delay > 0.0 {
                self.defer(CaptureTarget::Ram, ctx.timestamp + delay);
            }
        }
        if self.file {
            report(
                "recording stop",
                recorder.stop(CaptureTarget::File, ctx.timestamp, post_roll),
            );
            if post_roll > 0.0 {
                self.defer(CaptureTarget::File, ctx.timestamp + post_roll);
            }
        }
        if actions.single_marker {
            report("marker", recorder.marker(Marker::Single(ctx.timestamp)));
        }
        if actions.dual_marker {
            report(
                "marker",
                recorder.marker(Marker::Dual(started_at, ctx.timestamp)),
            );
        }
        if let Some(gpo) = &actions.gpo {
            report("output", gpio.set(&gpo.channel, gpo.value));
        }

        self.release_buffer(recorder);
        self.ram = false;
        self.file = false;
        self.started_at = None;
    }
}
