//! `ScriptedChannel` — deterministic in-memory `SourceChannel`.
//!
//! Replays a queue of `Step`s, one per `read()`. A `Data` step larger than
//! the buffer's free space is split; the rest stays queued. `Eof` is
//! sticky. An empty script reads as `WouldBlock`.
//!
//! Readiness is fired by hand through a `ScriptHandle`, which also exposes
//! what the publisher did to the channel (resume / suspend / close).

use byteflow_core::buffer::PooledBuffer;
use byteflow_core::channel::{ChannelSource, ReadListener, ReadStatus, SourceChannel};
use byteflow_core::error::{FlowError, Result};

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// One scripted read outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
    Error(io::ErrorKind),
}

impl Step {
    pub fn data(bytes: impl AsRef<[u8]>) -> Self {
        Step::Data(bytes.as_ref().to_vec())
    }
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    listener: Option<ReadListener>,
    armed: bool,
    reads: usize,
    resumes: usize,
    suspends: usize,
    closes: usize,
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ScriptedChannel {
    script: Arc<Mutex<Script>>,
}

/// Test-side view of a `ScriptedChannel`.
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedChannel {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script {
            steps: steps.into_iter().collect(),
            ..Script::default()
        }));
        (
            Self { script: Arc::clone(&script) },
            ScriptHandle { script },
        )
    }
}

impl SourceChannel for ScriptedChannel {
    fn read(&mut self, buffer: &mut PooledBuffer) -> io::Result<ReadStatus> {
        let mut s = lock(&self.script);
        s.reads += 1;
        if s.closes > 0 {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        if buffer.remaining() == 0 {
            return Ok(ReadStatus::WouldBlock);
        }
        match s.steps.pop_front() {
            None => Ok(ReadStatus::WouldBlock),
            Some(Step::WouldBlock) => Ok(ReadStatus::WouldBlock),
            Some(Step::Eof) => {
                s.steps.push_front(Step::Eof);
                Ok(ReadStatus::Eof)
            }
            Some(Step::Error(kind)) => Err(io::Error::new(kind, "scripted failure")),
            Some(Step::Data(mut bytes)) => {
                let n = buffer.put_slice(&bytes);
                if n < bytes.len() {
                    s.steps.push_front(Step::Data(bytes.split_off(n)));
                }
                if n == 0 {
                    Ok(ReadStatus::WouldBlock)
                } else {
                    Ok(ReadStatus::Data(n))
                }
            }
        }
    }

    fn set_read_listener(&mut self, listener: ReadListener) -> io::Result<()> {
        lock(&self.script).listener = Some(listener);
        Ok(())
    }

    fn suspend_reads(&mut self) -> io::Result<()> {
        let mut s = lock(&self.script);
        s.suspends += 1;
        s.armed = false;
        Ok(())
    }

    fn resume_reads(&mut self) -> io::Result<()> {
        let mut s = lock(&self.script);
        s.resumes += 1;
        s.armed = true;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut s = lock(&self.script);
        s.closes += 1;
        s.armed = false;
        s.listener = None;
        Ok(())
    }
}

impl ScriptHandle {
    /// Queue more steps.
    pub fn push(&self, step: Step) {
        lock(&self.script).steps.push_back(step);
    }

    /// Fire the readiness listener if reads are armed. One-shot: the
    /// channel is disarmed before the listener runs, as with
    /// `EPOLLONESHOT`. Returns whether the listener ran.
    pub fn fire_readable(&self) -> bool {
        let listener = {
            let mut s = lock(&self.script);
            if !s.armed {
                return false;
            }
            s.armed = false;
            s.listener.clone()
        };
        match listener {
            Some(l) => {
                l();
                true
            }
            None => false,
        }
    }

    /// Fire the listener regardless of the armed state.
    pub fn fire_unarmed(&self) -> bool {
        let listener = lock(&self.script).listener.clone();
        match listener {
            Some(l) => {
                l();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.script).armed
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.script).listener.is_some()
    }

    pub fn reads(&self) -> usize {
        lock(&self.script).reads
    }

    pub fn resumes(&self) -> usize {
        lock(&self.script).resumes
    }

    pub fn suspends(&self) -> usize {
        lock(&self.script).suspends
    }

    pub fn closes(&self) -> usize {
        lock(&self.script).closes
    }

    pub fn pending_steps(&self) -> usize {
        lock(&self.script).steps.len()
    }
}

enum SourceMode {
    Channel(Mutex<Option<ScriptedChannel>>),
    Complete,
    Unavailable,
}

/// `ChannelSource` over a scripted channel.
pub struct ScriptedSource {
    mode: SourceMode,
}

impl ScriptedSource {
    /// Hands out `channel` on the first open; later opens report the body
    /// as complete.
    pub fn new(channel: ScriptedChannel) -> Self {
        Self { mode: SourceMode::Channel(Mutex::new(Some(channel))) }
    }

    /// Body already consumed: every open yields `Ok(None)`.
    pub fn complete() -> Self {
        Self { mode: SourceMode::Complete }
    }

    /// Every open fails with `ChannelUnavailable`.
    pub fn unavailable() -> Self {
        Self { mode: SourceMode::Unavailable }
    }
}

impl ChannelSource for ScriptedSource {
    fn open_channel(&self) -> Result<Option<Box<dyn SourceChannel>>> {
        match &self.mode {
            SourceMode::Channel(slot) => {
                let channel = slot
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                Ok(channel.map(|c| Box::new(c) as Box<dyn SourceChannel>))
            }
            SourceMode::Complete => Ok(None),
            SourceMode::Unavailable => Err(FlowError::ChannelUnavailable),
        }
    }
}
