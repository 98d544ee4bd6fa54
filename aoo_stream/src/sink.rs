//! The receiving end of a stream.

use crate::{
    Endpoint, Error, Result,
    block::{Block, BlockQueue},
    wire,
};
use aoo_proto::{
    Id, MAX_FRAGMENTS, Recipient, SILENCE, Salt, Sample,
    format::{BlockSize, ChannelCount, Format, SampleRate},
    message::{DataHeader, Message},
};
use aoo_utils::{
    dll::{DEFAULT_BANDWIDTH, TimeDll},
    queue::{self, Reader, Writer},
    resampler::DynamicResampler,
    snapshot::{Published, Snapshot},
    time::TimeTag,
};
use core::{
    sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    time::Duration,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const EVENT_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Nominal sample rate of the audio callback.
    pub sample_rate: SampleRate,
    /// Number of output channels.
    pub channels: ChannelCount,
    /// Number of frames produced by every [`Sink::process`] call.
    pub block_size: BlockSize,
    /// Jitter buffer depth.
    pub buffer: Duration,
    pub dll_bandwidth: f64,
    /// Compensate for clock drift between sources and this sink.
    pub dynamic_resampling: bool,
    /// Number of consecutive cycles without audio after which a source is considered
    /// stopped.
    pub stop_after: u32,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            sample_rate: Format::standard().sample_rate,
            channels: Format::standard().channel_count,
            block_size: Format::standard().block_size,
            buffer: Duration::from_millis(50),
            dll_bandwidth: DEFAULT_BANDWIDTH,
            dynamic_resampling: true,
            stop_after: 8,
        }
    }
}

impl SinkSettings {
    fn validate(&self) -> Result<()> {
        if !(self.dll_bandwidth.is_finite() && self.dll_bandwidth > 0.) {
            return Err(Error::InvalidSettings("DLL bandwidth must be positive"));
        }

        if self.stop_after == 0 {
            return Err(Error::InvalidSettings("stop_after must be at least one cycle"));
        }

        Ok(())
    }
}

/// Playback state of a source stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamState {
    #[default]
    Stopped = 0,
    /// Audio just resumed, and is being faded in.
    Started = 1,
    Running = 2,
}

impl StreamState {
    #[inline(always)]
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Started,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Emitted from the audio thread, see [`Sink::poll_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEvent<E> {
    pub endpoint: E,
    pub source: Id,
    pub state: StreamState,
}

/// A snapshot of what a sink knows about one of its sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    pub format: Format,
    pub salt: Salt,
    pub state: StreamState,
    /// Sequence number of the next block expected.
    pub next_sequence: u32,
    /// Blocks given up on and replaced with silence.
    pub lost_blocks: u64,
    /// Fragments dropped for arriving too late, or being malformed.
    pub dropped_fragments: u64,
}

/// Called with one block of planar output (one slice per channel) on every cycle in which
/// a source produced audio.
pub type ProcessHook = Box<dyn FnMut(&[Box<[Sample]>]) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    /// Received audio.
    Data,
    /// Silence standing in for a block that never arrived.
    Lost,
    /// Silence priming the jitter buffer.
    Padding,
}

/// Travels alongside every block from the network thread to the audio thread.
#[derive(Debug, Clone, Copy)]
struct BlockInfo {
    sample_rate: f64,
    channel: u32,
    kind: BlockKind,
}

/// Network thread state of a source.
#[derive(Debug)]
struct Incoming {
    next: u32,
    /// Whether `next` was taken from an actual block yet.
    synced: bool,
    newest: Option<u32>,
    blocks: BlockQueue,
    audio_tx: Writer<Sample>,
    info_tx: Writer<BlockInfo>,
    decoded: Box<[Sample]>,
    last_rate: f64,
    last_channel: u32,
}

/// Audio thread state of a source.
#[derive(Debug)]
struct Playback {
    audio_rx: Reader<Sample>,
    info_rx: Reader<BlockInfo>,
    resampler: DynamicResampler,
    output: Box<[Sample]>,
    state: StreamState,
    empty_cycles: u32,
    source_rate: f64,
    channel: u32,
}

/// A source known to a [`Sink`], for one format.
///
/// A new format (or salt) replaces the whole descriptor.
#[derive(Debug)]
struct SourceDesc<E> {
    endpoint: E,
    id: Id,
    salt: Salt,
    format: Format,
    jitter_blocks: usize,
    incoming: Mutex<Incoming>,
    playback: Mutex<Playback>,
    /// Set by the audio thread when the stream stops, so the jitter buffer is primed
    /// again before it resumes.
    reprime: AtomicBool,
    state: AtomicU8,
    lost: AtomicU64,
    dropped: AtomicU64,
}

type Sources<E> = FxHashMap<(E, Id), Arc<SourceDesc<E>>>;

struct SinkAudio<E> {
    settings: SinkSettings,
    dll: TimeDll,
    start: Option<TimeTag>,
    output: Vec<Box<[Sample]>>,
    hook: ProcessHook,
    sources: Snapshot<Sources<E>>,
    events: Writer<SinkEvent<E>>,
}

/// Receives audio from any number of sources, and mixes it.
///
/// [`process`](Self::process) is meant to be called from the audio callback, and
/// [`handle_message`](Self::handle_message) from a network thread.
pub struct Sink<E> {
    id: Id,
    settings: Mutex<Option<SinkSettings>>,
    sources: Published<Sources<E>>,
    audio: Mutex<Option<SinkAudio<E>>>,
    events: Mutex<Option<Reader<SinkEvent<E>>>>,
    dropped_events: AtomicU64,
}

impl<E: core::fmt::Debug> core::fmt::Debug for Sink<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sink")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

#[inline(always)]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: Endpoint> SourceDesc<E> {
    fn new(endpoint: E, id: Id, salt: Salt, format: Format, settings: &SinkSettings) -> Self {
        let jitter_blocks = crate::blocks_for(settings.buffer, &format);
        let block_samples = format.block_samples();

        let (audio_tx, audio_rx) = queue::queue(2 * jitter_blocks * block_samples);
        let (info_tx, info_rx) = queue::queue(2 * jitter_blocks);

        let mut resampler = DynamicResampler::default();
        resampler.setup(
            format.block_size.get(),
            settings.block_size.get(),
            format.sample_rate.get(),
            settings.sample_rate.get(),
            format.channel_count.get(),
        );
        resampler.update(format.sample_rate.get(), settings.sample_rate.get());

        let mut incoming = Incoming {
            next: 0,
            synced: false,
            newest: None,
            blocks: BlockQueue::new(jitter_blocks),
            audio_tx,
            info_tx,
            decoded: vec![SILENCE; block_samples].into_boxed_slice(),
            last_rate: format.sample_rate.get(),
            last_channel: 0,
        };

        incoming.prime(jitter_blocks);

        let playback = Playback {
            audio_rx,
            info_rx,
            resampler,
            output: vec![SILENCE; settings.block_size.get() * format.channel_count.get()]
                .into_boxed_slice(),
            state: StreamState::Stopped,
            empty_cycles: 0,
            source_rate: format.sample_rate.get(),
            channel: 0,
        };

        Self {
            endpoint,
            id,
            salt,
            format,
            jitter_blocks,
            incoming: Mutex::new(incoming),
            playback: Mutex::new(playback),
            reprime: AtomicBool::new(false),
            state: AtomicU8::new(StreamState::Stopped as u8),
            lost: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            format: self.format,
            salt: self.salt,
            state: StreamState::from_u8(self.state.load(Ordering::Relaxed)),
            next_sequence: lock(&self.incoming).next,
            lost_blocks: self.lost.load(Ordering::Relaxed),
            dropped_fragments: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Handles one fragment, returns whether it was accepted.
    fn receive(&self, header: &DataHeader, bytes: &[u8]) -> bool {
        let accepted = self.try_receive(header, bytes);
        if !accepted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    fn try_receive(&self, header: &DataHeader, bytes: &[u8]) -> bool {
        let block_bytes = self.format.block_bytes();

        if header.total_size as usize != block_bytes
            || header.frame_count == 0
            || header.frame_count > MAX_FRAGMENTS
            || header.frame >= header.frame_count
        {
            log::debug!(
                "source {:?}: malformed fragment {}/{} of block {}",
                self.id,
                header.frame,
                header.frame_count,
                header.sequence,
            );
            return false;
        }

        let mut incoming = lock(&self.incoming);

        if self.reprime.swap(false, Ordering::AcqRel) {
            incoming.prime(self.jitter_blocks);
        }

        let seq = header.sequence;

        // a stream joined midway starts at whatever arrives first
        if !incoming.synced {
            incoming.next = seq;
            incoming.synced = true;
        }

        if seq < incoming.next {
            log::trace!("source {:?}: late block {seq}", self.id);
            return false;
        }

        if seq - incoming.next > incoming.blocks.capacity() as u32 {
            let skipped = seq - incoming.next;
            incoming.resync(seq);
            log::debug!(
                "source {:?}: skipped {skipped} blocks, resuming at {}",
                self.id,
                incoming.next
            );
        }

        if let Some(newest) = incoming.newest {
            if u64::from(seq) + (incoming.blocks.capacity() as u64) <= u64::from(newest) {
                log::trace!("source {:?}: block {seq} out of the jitter window", self.id);
                return false;
            }
        }

        incoming.newest = Some(incoming.newest.map_or(seq, |n| n.max(seq)));

        let added = match incoming.blocks.find(seq) {
            Some(block) => block.add_frame(header.frame, bytes),
            None => {
                let Some(mut block) = Block::new(
                    seq,
                    header.sample_rate,
                    header.channel,
                    block_bytes,
                    header.frame_count,
                ) else {
                    return false;
                };

                if !block.add_frame(header.frame, bytes) {
                    return false;
                }

                if incoming.blocks.is_full() {
                    // the audio side might have made room since
                    self.transfer(&mut incoming);
                }

                // the next block to play is only waiting for room on the audio side
                if incoming.blocks.is_full()
                    && incoming
                        .blocks
                        .front()
                        .is_some_and(|b| b.sequence() == incoming.next && b.complete())
                {
                    log::trace!("source {:?}: no room for block {seq}", self.id);
                    return false;
                }

                match incoming.blocks.insert(block) {
                    Some(b) if b.sequence() == seq => return false,
                    Some(evicted) => {
                        log::debug!(
                            "source {:?}: evicted incomplete block {}",
                            self.id,
                            evicted.sequence()
                        );
                    }
                    None => {}
                }

                true
            }
        };

        self.transfer(&mut incoming);

        added
    }

    fn transfer(&self, incoming: &mut Incoming) {
        let lost = incoming.transfer(&self.format);
        if lost > 0 {
            self.lost.fetch_add(lost, Ordering::Relaxed);
            log::debug!("source {:?}: lost {lost} blocks", self.id);
        }
    }
}

impl Incoming {
    /// Queues (up to) `n` blocks of silence.
    fn prime(&mut self, n: usize) {
        for _ in 0..n {
            if !self.push_silence(BlockKind::Padding) {
                break;
            }
        }
    }

    /// Drops every queued block too old to share the jitter window with `seq`, and
    /// resumes at the oldest remaining one.
    fn resync(&mut self, seq: u32) {
        let window = self.blocks.capacity() as u64;

        while let Some(front) = self.blocks.front() {
            if u64::from(front.sequence()) + window > u64::from(seq) {
                break;
            }
            self.blocks.pop_front();
        }

        self.next = self.blocks.front().map_or(seq, Block::sequence);
    }

    fn push_silence(&mut self, kind: BlockKind) -> bool {
        let block_samples = self.decoded.len();

        if self.audio_tx.write_available() < block_samples || self.info_tx.write_available() == 0
        {
            return false;
        }

        let _ = self.audio_tx.write_repeated(SILENCE, block_samples);
        let _ = self.info_tx.push(BlockInfo {
            sample_rate: self.last_rate,
            channel: self.last_channel,
            kind,
        });

        true
    }

    /// Moves completed blocks, in order, to the audio thread. Returns the number of blocks
    /// replaced with silence.
    fn transfer(&mut self, format: &Format) -> u64 {
        let block_samples = self.decoded.len();
        let mut lost = 0;

        while let Some(front) = self.blocks.front() {
            let seq = front.sequence();

            if seq < self.next {
                self.blocks.pop_front();
                continue;
            }

            if seq > self.next {
                // wait for the missing blocks, unless there is no more room
                if !self.blocks.is_full() {
                    break;
                }

                let missing = (seq - self.next).min(self.blocks.capacity() as u32);
                for _ in 0..missing {
                    // if there's no room either, the stream will simply skip ahead
                    if !self.push_silence(BlockKind::Lost) {
                        break;
                    }
                    lost += 1;
                }

                self.next = seq;
                continue;
            }

            if !front.complete()
                || self.audio_tx.write_available() < block_samples
                || self.info_tx.write_available() == 0
            {
                break;
            }

            let Some(block) = self.blocks.pop_front() else {
                break;
            };

            format.sample_type.decode(block.data(), &mut self.decoded);

            let _ = self.audio_tx.write(&self.decoded);
            let _ = self.info_tx.push(BlockInfo {
                sample_rate: block.sample_rate(),
                channel: block.channel(),
                kind: BlockKind::Data,
            });

            self.last_rate = block.sample_rate();
            self.last_channel = block.channel();
            self.next = seq.wrapping_add(1);
        }

        lost
    }
}

/// Per-cycle parameters shared by every source.
struct Cycle<'a> {
    sink_rate: f64,
    dynamic: bool,
    stop_after: u32,
    dropped_events: &'a AtomicU64,
}

impl Playback {
    /// Mixes one block of this source into `output`, returns whether it produced audio.
    fn process<E: Endpoint>(
        &mut self,
        desc: &SourceDesc<E>,
        cycle: &Cycle<'_>,
        output: &mut [Box<[Sample]>],
        events: &mut Writer<SinkEvent<E>>,
    ) -> bool {
        let format = &desc.format;
        let block_samples = format.block_samples();
        let needed = self.output.len();

        if cycle.dynamic {
            self.resampler.update(self.source_rate, cycle.sink_rate);
        } else {
            self.resampler.update(format.sample_rate.get(), cycle.sink_rate);
        }

        let mut got_data = false;

        while self.resampler.read_available() < needed
            && self.resampler.write_available() >= block_samples
            && self.audio_rx.read_available() >= block_samples
        {
            let Some(info) = self.info_rx.pop() else {
                break;
            };

            let resampler = &mut self.resampler;
            let _ = self.audio_rx.read_slices(block_samples, |start, end| {
                resampler.write(start);
                resampler.write(end);
            });

            got_data |= info.kind == BlockKind::Data;
            self.source_rate = info.sample_rate;
            self.channel = info.channel;
        }

        let produced = self.resampler.read_available() >= needed && self.resampler.read(&mut self.output);

        let previous = self.state;

        self.state = match (previous, produced) {
            (StreamState::Stopped, true) if got_data => StreamState::Started,
            (StreamState::Stopped, _) => StreamState::Stopped,
            (_, true) => {
                self.empty_cycles = 0;
                StreamState::Running
            }
            (_, false) => {
                self.empty_cycles += 1;
                if self.empty_cycles >= cycle.stop_after {
                    desc.reprime.store(true, Ordering::Release);
                    StreamState::Stopped
                } else {
                    previous
                }
            }
        };

        if self.state != previous {
            self.empty_cycles = 0;
            desc.state.store(self.state as u8, Ordering::Relaxed);
            let event = SinkEvent {
                endpoint: desc.endpoint.clone(),
                source: desc.id,
                state: self.state,
            };

            if events.push(event).is_err() {
                cycle.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }

        if !produced || self.state == StreamState::Stopped {
            return false;
        }

        let channels = format.channel_count.get();
        let frames = needed / channels;
        let fade_in = self.state == StreamState::Started;
        let offset = self.channel as usize;

        for (i, frame) in self.output.chunks_exact(channels).enumerate() {
            let gain = if fade_in {
                (i + 1) as f32 / frames as f32
            } else {
                1.
            };

            for (ch, &sample) in frame.iter().enumerate() {
                if let Some(dest) = output.get_mut(offset + ch) {
                    dest[i] += sample * gain;
                }
            }
        }

        true
    }
}

impl<E: Endpoint> Sink<E> {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            settings: Mutex::new(None),
            sources: Published::new(FxHashMap::default()),
            audio: Mutex::new(None),
            events: Mutex::new(None),
            dropped_events: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn id(&self) -> Id {
        self.id
    }

    /// Configures the audio callback side. `hook` receives the mixed output.
    ///
    /// Must be called before [`process`](Self::process) and
    /// [`handle_message`](Self::handle_message). Known sources are kept, but their
    /// buffers are reset.
    pub fn setup(
        &self,
        settings: SinkSettings,
        hook: impl FnMut(&[Box<[Sample]>]) + Send + 'static,
    ) -> Result<()> {
        settings.validate()?;

        let mut current = lock(&self.settings);

        self.sources.update(|sources| {
            for desc in sources.values_mut() {
                *desc = Arc::new(SourceDesc::new(
                    desc.endpoint.clone(),
                    desc.id,
                    desc.salt,
                    desc.format,
                    &settings,
                ));
            }
        });

        let (events_tx, events_rx) = queue::queue(EVENT_QUEUE_SIZE);

        let audio = SinkAudio {
            settings,
            dll: TimeDll::default(),
            start: None,
            output: (0..settings.channels.get())
                .map(|_| vec![SILENCE; settings.block_size.get()].into_boxed_slice())
                .collect(),
            hook: Box::new(hook),
            sources: self.sources.snapshot(),
            events: events_tx,
        };

        *lock(&self.audio) = Some(audio);
        *lock(&self.events) = Some(events_rx);
        *current = Some(settings);

        log::debug!("sink {:?}: setup {settings:?}", self.id);

        Ok(())
    }

    /// Returns the number of known sources.
    pub fn sources(&self) -> usize {
        self.sources.load().len()
    }

    pub fn source_info(&self, endpoint: &E, id: Id) -> Option<SourceInfo> {
        self.sources
            .load()
            .get(&(endpoint.clone(), id))
            .map(|desc| desc.info())
    }

    /// Forgets a source. Returns `false` if it wasn't known.
    pub fn remove_source(&self, endpoint: &E, id: Id) -> bool {
        let removed = self
            .sources
            .update(|sources| sources.remove(&(endpoint.clone(), id)).is_some());

        if removed {
            log::info!("sink {:?}: removed source {id:?}", self.id);
        }

        removed
    }

    pub fn remove_all(&self) {
        self.sources.update(|sources| sources.clear());
        log::info!("sink {:?}: removed all sources", self.id);
    }

    /// Number of events discarded because the event queue was full, since creation.
    ///
    /// When this increases, the last state of each source is still available through
    /// [`source_info`](Self::source_info).
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Passes every pending event to `f`, returns how many there were.
    ///
    /// At most 256 events are kept between two calls, see
    /// [`dropped_events`](Self::dropped_events).
    pub fn poll_events(&self, mut f: impl FnMut(SinkEvent<E>)) -> usize {
        let mut events = lock(&self.events);

        let Some(rx) = events.as_mut() else {
            return 0;
        };

        let mut n = 0;
        while let Some(event) = rx.pop() {
            f(event);
            n += 1;
        }
        n
    }

    /// Handles a datagram received from `endpoint`.
    ///
    /// Returns whether the message was accepted.
    pub fn handle_message(&self, bytes: &[u8], endpoint: &E) -> Result<bool> {
        let message = wire::decode(bytes)?;

        let Some(settings) = *lock(&self.settings) else {
            return Err(Error::NotSetUp);
        };

        match message {
            Message::Format {
                sink,
                source,
                salt,
                format,
            } if sink.matches(self.id) => {
                self.handle_format(endpoint, source, salt, format, &settings);
                Ok(true)
            }
            Message::Data {
                sink,
                source,
                salt,
                header,
                bytes,
            } if sink.matches(self.id) => Ok(self.handle_data(endpoint, source, salt, &header, bytes)),
            _ => Ok(false),
        }
    }

    fn handle_format(
        &self,
        endpoint: &E,
        source: Id,
        salt: Salt,
        format: Format,
        settings: &SinkSettings,
    ) {
        let key = (endpoint.clone(), source);

        if let Some(desc) = self.sources.load().get(&key) {
            if desc.salt == salt && desc.format == format {
                return;
            }
        }

        let desc = Arc::new(SourceDesc::new(
            endpoint.clone(),
            source,
            salt,
            format,
            settings,
        ));

        let replaced = self
            .sources
            .update(|sources| sources.insert(key, desc).is_some());

        if replaced {
            log::info!("sink {:?}: source {source:?} changed format to {format:?}", self.id);
        } else {
            log::info!("sink {:?}: added source {source:?} with format {format:?}", self.id);
        }
    }

    fn handle_data(
        &self,
        endpoint: &E,
        source: Id,
        salt: Salt,
        header: &DataHeader,
        bytes: &[u8],
    ) -> bool {
        let sources = self.sources.load();

        let Some(desc) = sources.get(&(endpoint.clone(), source)) else {
            log::debug!("sink {:?}: data from unknown source {source:?}", self.id);
            self.request_format(endpoint, source);
            return false;
        };

        if desc.salt != salt {
            // the format message for this salt was lost, or is yet to arrive
            log::debug!("sink {:?}: stale salt from source {source:?}", self.id);
            desc.dropped.fetch_add(1, Ordering::Relaxed);
            self.request_format(endpoint, source);
            return false;
        }

        desc.receive(header, bytes)
    }

    fn request_format(&self, endpoint: &E, source: Id) {
        let message = Message::FormatRequest {
            source: Recipient::One(source),
            sink: self.id,
        };

        let mut buf = [0; 16];
        match wire::encode(&message, &mut buf) {
            Ok(bytes) => endpoint.send(bytes),
            Err(e) => log::warn!("sink {:?}: couldn't encode format request: {e}", self.id),
        }
    }

    /// Produces one block of output, for the callback cycle processed at time `t`.
    ///
    /// Calls the hook if any source produced audio, and returns whether one did.
    ///
    /// Real-time safe: never blocks, allocates, or logs.
    pub fn process(&self, t: TimeTag) -> Result<bool> {
        let Ok(mut guard) = self.audio.try_lock() else {
            return Ok(false);
        };

        let Some(audio) = guard.as_mut() else {
            return Err(Error::NotSetUp);
        };

        let SinkAudio {
            settings,
            dll,
            start,
            output,
            hook,
            sources,
            events,
        } = audio;

        if let Some(start) = *start {
            // a rejected interval keeps the previous estimate
            let _ = dll.update(t.seconds_since(start));
        } else {
            dll.setup(
                settings.sample_rate.get(),
                settings.block_size.get(),
                settings.dll_bandwidth,
                0.,
            )?;
            *start = Some(t);
        }

        self.sources.refresh(sources);

        for channel in output.iter_mut() {
            channel.fill(SILENCE);
        }

        let cycle = Cycle {
            sink_rate: if settings.dynamic_resampling {
                dll.sample_rate()
            } else {
                settings.sample_rate.get()
            },
            dynamic: settings.dynamic_resampling,
            stop_after: settings.stop_after,
            dropped_events: &self.dropped_events,
        };

        let mut produced = false;

        for desc in sources.values() {
            let Ok(mut playback) = desc.playback.try_lock() else {
                continue;
            };

            produced |= playback.process(desc, &cycle, output, events);
        }

        if produced {
            hook(&output[..]);
        }

        Ok(produced)
    }
}
