//! The sending end of a stream.

use crate::{Endpoint, Error, Result, wire};
use aoo_proto::{
    Id, Recipient, SILENCE, Salt, Sample,
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
use atomic_float::AtomicF64;
use core::{
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    time::Duration,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// What to do when the network thread doesn't keep up with the audio thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Keep queued audio, reject new input until there is room again.
    #[default]
    DropNewest,
    /// Keep at most half of the queue, discarding the oldest blocks. Their sequence
    /// numbers are still consumed, so sinks see them as lost.
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Nominal sample rate of the audio callback.
    pub sample_rate: SampleRate,
    /// Number of input channels passed to [`Source::process`].
    pub channels: ChannelCount,
    /// Number of frames passed to every [`Source::process`] call.
    pub block_size: BlockSize,
    /// How much audio can be queued between the audio and network threads.
    pub buffer: Duration,
    /// Maximum size of the datagrams sent.
    pub packet_size: usize,
    pub dll_bandwidth: f64,
    pub overflow: OverflowPolicy,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            sample_rate: Format::standard().sample_rate,
            channels: Format::standard().channel_count,
            block_size: Format::standard().block_size,
            buffer: Duration::from_millis(10),
            packet_size: wire::DEFAULT_PACKET_SIZE,
            dll_bandwidth: DEFAULT_BANDWIDTH,
            overflow: OverflowPolicy::DropNewest,
        }
    }
}

impl SourceSettings {
    fn validate(&self) -> Result<()> {
        wire::max_payload(self.packet_size)?;

        if !(self.dll_bandwidth.is_finite() && self.dll_bandwidth > 0.) {
            return Err(Error::InvalidSettings("DLL bandwidth must be positive"));
        }

        Ok(())
    }
}

/// A sink registered with a [`Source`].
#[derive(Debug)]
struct SinkDesc<E> {
    endpoint: E,
    id: Recipient,
    channel: AtomicU32,
    format_pending: AtomicBool,
}

impl<E> SinkDesc<E> {
    #[inline(always)]
    fn is(&self, endpoint: &E, id: Recipient) -> bool
    where
        E: Eq,
    {
        self.endpoint == *endpoint && self.id == id
    }
}

type Sinks<E> = Vec<Arc<SinkDesc<E>>>;

/// State owned by the audio thread.
#[derive(Debug)]
struct AudioSide {
    settings: SourceSettings,
    dll: TimeDll,
    start: Option<TimeTag>,
    interleaved: Box<[Sample]>,
    stream: Option<AudioStream>,
}

#[derive(Debug)]
struct AudioStream {
    format: Format,
    resampler: DynamicResampler,
    block: Box<[Sample]>,
    audio_tx: Writer<Sample>,
    rate_tx: Writer<f64>,
}

/// State owned by the network thread.
#[derive(Debug)]
struct NetworkSide<E> {
    sequence: u32,
    packet_size: usize,
    overflow: OverflowPolicy,
    sinks: Snapshot<Sinks<E>>,
    stream: Option<NetworkStream>,
    packet: Box<[u8]>,
}

#[derive(Debug)]
struct NetworkStream {
    format: Format,
    salt: Salt,
    audio_rx: Reader<Sample>,
    rate_rx: Reader<f64>,
    block: Box<[Sample]>,
    encoded: Box<[u8]>,
}

#[derive(Debug, Default)]
struct Control {
    settings: Option<SourceSettings>,
    format: Option<Format>,
    salt: Salt,
}

/// Sends audio to any number of sinks.
///
/// [`process`](Self::process) is meant to be called from the audio callback, and
/// [`send`](Self::send) from a network thread, once per callback cycle as well.
#[derive(Debug)]
pub struct Source<E> {
    id: Id,
    control: Mutex<Control>,
    sinks: Published<Sinks<E>>,
    audio: Mutex<Option<AudioSide>>,
    network: Mutex<Option<NetworkSide<E>>>,
    measured_rate: AtomicF64,
}

fn make_salt() -> Salt {
    let now = TimeTag::now();
    Salt(now.fraction ^ now.seconds.rotate_left(16))
}

impl<E: Endpoint> Source<E> {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            control: Mutex::new(Control {
                salt: make_salt(),
                ..Control::default()
            }),
            sinks: Published::new(Vec::new()),
            audio: Mutex::new(None),
            network: Mutex::new(None),
            measured_rate: AtomicF64::new(0.),
        }
    }

    #[inline(always)]
    pub fn id(&self) -> Id {
        self.id
    }

    fn control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the salt of the current format.
    pub fn salt(&self) -> Salt {
        self.control().salt
    }

    pub fn format(&self) -> Option<Format> {
        self.control().format
    }

    /// Returns the number of registered sinks.
    pub fn sinks(&self) -> usize {
        self.sinks.load().len()
    }

    /// Returns the sample rate the audio callback effectively runs at.
    pub fn measured_sample_rate(&self) -> f64 {
        self.measured_rate.load(Ordering::Relaxed)
    }

    /// Changes the stream format.
    ///
    /// Sinks are sent the new format before any further data. Audio queued under the
    /// previous format is discarded.
    pub fn set_format(&self, format: Format) -> Result<()> {
        let mut control = self.control();

        let packet_size = control
            .settings
            .map_or(wire::DEFAULT_PACKET_SIZE, |s| s.packet_size);
        wire::fragment_count(&format, packet_size)?;

        control.format = Some(format);
        control.salt = control.salt.next();

        log::info!(
            "source {:?}: format set to {format:?}, salt {:?}",
            self.id,
            control.salt
        );

        self.rebuild(&control);
        self.invalidate_formats();

        Ok(())
    }

    /// Configures the audio callback side, and resets the stream.
    ///
    /// Must be called before [`process`](Self::process) and [`send`](Self::send). If a
    /// format is active, its salt is advanced so that sinks discard any data sent before.
    pub fn setup(&self, settings: SourceSettings) -> Result<()> {
        settings.validate()?;

        let mut control = self.control();

        if let Some(format) = control.format {
            wire::fragment_count(&format, settings.packet_size)?;
            control.salt = control.salt.next();
        }

        control.settings = Some(settings);

        log::debug!("source {:?}: setup {settings:?}", self.id);

        self.rebuild(&control);
        self.invalidate_formats();

        Ok(())
    }

    /// Replaces both thread sides with fresh state, if set up.
    fn rebuild(&self, control: &Control) {
        let Some(settings) = control.settings else {
            return;
        };

        let (audio_stream, network_stream) = match control.format {
            Some(format) => {
                let (a, n) = Self::make_streams(&settings, format, control.salt);
                (Some(a), Some(n))
            }
            None => (None, None),
        };

        let channels = control
            .format
            .map_or(0, |f| f.channel_count.get())
            .max(settings.channels.get());
        let input_samples = settings.block_size.get() * channels;

        let audio = AudioSide {
            settings,
            dll: TimeDll::default(),
            start: None,
            interleaved: vec![SILENCE; input_samples].into_boxed_slice(),
            stream: audio_stream,
        };

        let network = NetworkSide {
            sequence: 0,
            packet_size: settings.packet_size,
            overflow: settings.overflow,
            sinks: self.sinks.snapshot(),
            stream: network_stream,
            packet: vec![0; settings.packet_size].into_boxed_slice(),
        };

        // lock order: audio, then network
        let mut audio_guard = self.audio.lock().unwrap_or_else(PoisonError::into_inner);
        let mut network_guard = self.network.lock().unwrap_or_else(PoisonError::into_inner);

        *audio_guard = Some(audio);
        *network_guard = Some(network);

        self.measured_rate
            .store(settings.sample_rate.get(), Ordering::Relaxed);
    }

    fn make_streams(
        settings: &SourceSettings,
        format: Format,
        salt: Salt,
    ) -> (AudioStream, NetworkStream) {
        let n_blocks = crate::blocks_for(settings.buffer, &format);
        let block_samples = format.block_samples();

        let (audio_tx, audio_rx) = queue::queue(n_blocks * block_samples);
        let (rate_tx, rate_rx) = queue::queue(n_blocks);

        let mut resampler = DynamicResampler::default();
        resampler.setup(
            settings.block_size.get(),
            format.block_size.get(),
            settings.sample_rate.get(),
            format.sample_rate.get(),
            format.channel_count.get(),
        );
        resampler.update(settings.sample_rate.get(), format.sample_rate.get());

        let audio = AudioStream {
            format,
            resampler,
            block: vec![SILENCE; block_samples].into_boxed_slice(),
            audio_tx,
            rate_tx,
        };

        let network = NetworkStream {
            format,
            salt,
            audio_rx,
            rate_rx,
            block: vec![SILENCE; block_samples].into_boxed_slice(),
            encoded: vec![0; format.block_bytes()].into_boxed_slice(),
        };

        (audio, network)
    }

    fn invalidate_formats(&self) {
        for sink in self.sinks.load().iter() {
            sink.format_pending.store(true, Ordering::Release);
        }
    }

    /// Registers a sink, which is sent the current format on the next [`send`](Self::send).
    ///
    /// Returns `false` if it was already registered.
    pub fn add_sink(&self, endpoint: E, id: impl Into<Recipient>) -> bool {
        let id = id.into();

        let added = self.sinks.update(|sinks| {
            if sinks.iter().any(|s| s.is(&endpoint, id)) {
                return false;
            }

            sinks.push(Arc::new(SinkDesc {
                endpoint: endpoint.clone(),
                id,
                channel: AtomicU32::new(0),
                format_pending: AtomicBool::new(true),
            }));

            true
        });

        if added {
            log::info!("source {:?}: added sink {id:?}", self.id);
        } else {
            log::debug!("source {:?}: sink {id:?} already added", self.id);
        }

        added
    }

    /// Returns `false` if no such sink was registered.
    pub fn remove_sink(&self, endpoint: &E, id: impl Into<Recipient>) -> bool {
        let id = id.into();

        let removed = self.sinks.update(|sinks| {
            let len = sinks.len();
            sinks.retain(|s| !s.is(endpoint, id));
            sinks.len() != len
        });

        if removed {
            log::info!("source {:?}: removed sink {id:?}", self.id);
        }

        removed
    }

    pub fn remove_all(&self) {
        self.sinks.update(Vec::clear);
        log::info!("source {:?}: removed all sinks", self.id);
    }

    /// Sets the output channel offset at which a sink mixes this stream.
    ///
    /// Returns `false` if no such sink was registered.
    pub fn set_sink_channel(&self, endpoint: &E, id: impl Into<Recipient>, channel: u32) -> bool {
        let id = id.into();

        match self.sinks.load().iter().find(|s| s.is(endpoint, id)) {
            Some(sink) => {
                sink.channel.store(channel, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Feeds one callback's worth of audio, `n` frames per channel, processed at time `t`.
    ///
    /// Returns whether the audio was accepted. Channels missing from `data` are silent,
    /// extra ones are ignored.
    ///
    /// Real-time safe: never blocks, allocates, or logs.
    pub fn process(&self, data: &[&[Sample]], n: usize, t: TimeTag) -> Result<bool> {
        let Ok(mut guard) = self.audio.try_lock() else {
            return Ok(false);
        };

        let Some(audio) = guard.as_mut() else {
            return Err(Error::NotSetUp);
        };

        match audio.start {
            None => {
                audio.dll.setup(
                    audio.settings.sample_rate.get(),
                    audio.settings.block_size.get(),
                    audio.settings.dll_bandwidth,
                    0.,
                )?;
                audio.start = Some(t);
            }
            Some(start) => {
                // a rejected interval keeps the previous estimate
                if audio.dll.update(t.seconds_since(start)).is_ok() {
                    self.measured_rate
                        .store(audio.dll.sample_rate(), Ordering::Relaxed);
                }
            }
        }

        let Some(stream) = audio.stream.as_mut() else {
            return Ok(false);
        };

        let channels = stream.format.channel_count.get();
        let n_samples = n * channels;

        if n_samples > audio.interleaved.len() || stream.resampler.write_available() < n_samples
        {
            return Ok(false);
        }

        let interleaved = &mut audio.interleaved[..n_samples];

        for (i, frame) in interleaved.chunks_exact_mut(channels).enumerate() {
            for (ch, dest) in frame.iter_mut().enumerate() {
                *dest = data.get(ch).and_then(|c| c.get(i)).copied().unwrap_or(SILENCE);
            }
        }

        stream.resampler.write(interleaved);

        let rate = stream.format.sample_rate.get() * audio.dll.rate_ratio();
        let block_samples = stream.block.len();

        while stream.resampler.read_available() >= block_samples
            && stream.audio_tx.write_available() >= block_samples
            && stream.rate_tx.write_available() > 0
        {
            stream.resampler.read(&mut stream.block);
            // can't fail, availability was checked above
            let _ = stream.audio_tx.write(&stream.block);
            let _ = stream.rate_tx.push(rate);
        }

        Ok(true)
    }

    /// Sends every block completed by [`process`](Self::process) to every sink.
    ///
    /// Pending format messages are sent first. Returns whether anything was sent.
    /// Never blocks: returns `Ok(false)` if [`setup`](Self::setup) is running concurrently.
    pub fn send(&self) -> Result<bool> {
        let Ok(mut guard) = self.network.try_lock() else {
            return Ok(false);
        };

        let Some(net) = guard.as_mut() else {
            return Err(Error::NotSetUp);
        };

        self.sinks.refresh(&mut net.sinks);

        let Some(stream) = net.stream.as_mut() else {
            return Ok(false);
        };

        let mut sent = false;

        for sink in net.sinks.iter() {
            if sink.format_pending.swap(false, Ordering::AcqRel) {
                let message = Message::Format {
                    sink: sink.id,
                    source: self.id,
                    salt: stream.salt,
                    format: stream.format,
                };

                sink.endpoint.send(wire::encode(&message, &mut net.packet)?);
                sent = true;
            }
        }

        let block_samples = stream.block.len();

        if net.overflow == OverflowPolicy::DropOldest {
            let queued = stream.rate_rx.read_available();
            let keep = stream.rate_rx.capacity().div_ceil(2);

            if queued > keep {
                let dropped = queued - keep;
                stream.rate_rx.skip(dropped);
                stream.audio_rx.skip(dropped * block_samples);
                net.sequence = net.sequence.wrapping_add(dropped as u32);

                log::debug!("source {:?}: dropped {dropped} blocks", self.id);
            }
        }

        let max_payload = wire::max_payload(net.packet_size)?;

        while stream.audio_rx.read_available() >= block_samples {
            // rates are pushed after their block, so one is always there
            let Some(rate) = stream.rate_rx.pop() else {
                break;
            };

            if stream.audio_rx.read(&mut stream.block).is_err() {
                break;
            }

            let total = stream
                .format
                .sample_type
                .encode(&stream.block, &mut stream.encoded);

            let encoded = &stream.encoded[..total];
            let fragments = wire::fragments(encoded, max_payload);
            let frame_count = fragments.len() as u32;

            for (frame, bytes) in fragments {
                for sink in net.sinks.iter() {
                    let message = Message::Data {
                        sink: sink.id,
                        source: self.id,
                        salt: stream.salt,
                        header: DataHeader {
                            sequence: net.sequence,
                            sample_rate: rate,
                            channel: sink.channel.load(Ordering::Relaxed),
                            total_size: total as u32,
                            frame_count,
                            frame,
                        },
                        bytes,
                    };

                    sink.endpoint.send(wire::encode(&message, &mut net.packet)?);
                }
            }

            net.sequence = net.sequence.wrapping_add(1);
            sent = true;
        }

        Ok(sent)
    }

    /// Handles a datagram received from `endpoint`.
    ///
    /// Answers format requests from registered sinks. Returns whether the message was
    /// meant for this source.
    pub fn handle_message(&self, bytes: &[u8], endpoint: &E) -> Result<bool> {
        let Message::FormatRequest { source, sink } = wire::decode(bytes)? else {
            return Ok(false);
        };

        if !source.matches(self.id) {
            return Ok(false);
        }

        let sinks = self.sinks.load();

        let Some(desc) = sinks
            .iter()
            .find(|s| s.endpoint == *endpoint && s.id.matches(sink))
        else {
            log::debug!(
                "source {:?}: ignoring format request from unknown sink {sink:?}",
                self.id
            );
            return Ok(false);
        };

        let (format, salt) = {
            let control = self.control();
            match control.format {
                Some(format) => (format, control.salt),
                None => return Ok(true),
            }
        };

        log::debug!("source {:?}: sending format to sink {sink:?}", self.id);

        let message = Message::Format {
            sink: Recipient::One(sink),
            source: self.id,
            salt,
            format,
        };

        let mut buf = [0; wire::DATA_HEADER_RESERVE];
        desc.endpoint.send(wire::encode(&message, &mut buf)?);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;
    use aoo_proto::format::SampleType;
    use core::num::NonZeroU32;

    fn mono_512() -> Format {
        Format {
            sample_rate: SampleRate::new(48000.).unwrap(),
            channel_count: ChannelCount(NonZeroU32::MIN),
            block_size: BlockSize(NonZeroU32::new(512).unwrap()),
            sample_type: SampleType::IEEF32,
        }
    }

    fn settings(format: &Format) -> SourceSettings {
        SourceSettings {
            sample_rate: format.sample_rate,
            channels: format.channel_count,
            block_size: format.block_size,
            buffer: Duration::from_millis(50),
            ..SourceSettings::default()
        }
    }

    fn tick(n: u32) -> TimeTag {
        TimeTag::from_seconds(1000. + f64::from(n) * 512. / 48000.)
    }

    #[test]
    fn one_block_is_one_format_and_two_fragments() {
        let format = mono_512();
        let source = Source::new(Id(1));
        let sink = Recorder::new("sink");

        source.set_format(format).unwrap();
        source.setup(settings(&format)).unwrap();
        assert!(source.add_sink(sink.clone(), Id(2)));

        let input: Vec<Sample> = (0..512).map(|i| i as f32 / 512.).collect();
        assert!(source.process(&[&input], 512, tick(0)).unwrap());
        assert!(source.send().unwrap());

        let packets = sink.take();
        assert_eq!(packets.len(), 3);

        let Message::Format { sink: to, source: from, salt, format: f } =
            wire::decode(&packets[0]).unwrap()
        else {
            panic!("expected a format message first");
        };
        assert_eq!((to, from, f), (Recipient::One(Id(2)), Id(1), format));
        assert_eq!(salt, source.salt());

        let mut block = vec![0u8; 2048];

        for (i, packet) in packets[1..].iter().enumerate() {
            let Message::Data { salt: s, header, bytes, .. } = wire::decode(packet).unwrap()
            else {
                panic!("expected data");
            };

            assert_eq!(s, salt);
            assert_eq!(header.sequence, 0);
            assert_eq!(header.frame, i as u32);
            assert_eq!(header.frame_count, 2);
            assert_eq!(header.total_size, 2048);
            assert_eq!(header.sample_rate, 48000.);
            assert!(packet.len() <= wire::DEFAULT_PACKET_SIZE);

            let offset = if i == 0 { 0 } else { 2048 - bytes.len() };
            block[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        let mut decoded = vec![0.; 512];
        SampleType::IEEF32.decode(&block, &mut decoded);
        assert_eq!(decoded, input);

        // nothing new to send
        assert!(!source.send().unwrap());
    }

    #[test]
    fn sequence_numbers_increase_per_block() {
        let format = mono_512();
        let source = Source::new(Id(1));
        let sink = Recorder::new("sink");

        source.setup(settings(&format)).unwrap();
        source.set_format(format).unwrap();
        source.add_sink(sink.clone(), Id(2));

        let input = vec![0.25; 512];
        for i in 0..3 {
            assert!(source.process(&[&input], 512, tick(i)).unwrap());
        }
        source.send().unwrap();

        let sequences: Vec<u32> = sink
            .take()
            .iter()
            .filter_map(|p| match wire::decode(p).unwrap() {
                Message::Data { header, .. } => Some(header.sequence),
                _ => None,
            })
            .collect();

        assert_eq!(sequences, [0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn process_before_setup_is_an_error() {
        let source = Source::<Recorder>::new(Id(0));
        assert!(matches!(
            source.process(&[], 0, TimeTag::default()),
            Err(Error::NotSetUp)
        ));
        assert!(matches!(source.send(), Err(Error::NotSetUp)));
    }

    #[test]
    fn no_format_means_no_work() {
        let source = Source::<Recorder>::new(Id(0));
        source.setup(SourceSettings::default()).unwrap();

        let input = vec![0.; 256];
        assert!(!source.process(&[&input, &input], 256, tick(0)).unwrap());
        assert!(!source.send().unwrap());
    }

    #[test]
    fn salt_advances_on_reconfiguration() {
        let format = mono_512();
        let source = Source::<Recorder>::new(Id(0));

        let s0 = source.salt();
        source.set_format(format).unwrap();
        let s1 = source.salt();
        source.setup(settings(&format)).unwrap();
        let s2 = source.salt();

        assert_ne!(s0, s1);
        assert_ne!(s1, s2);

        let oversized = Format {
            block_size: BlockSize(NonZeroU32::new(65536).unwrap()),
            ..format
        };
        assert!(matches!(
            source.set_format(oversized),
            Err(Error::TooManyFragments { .. })
        ));
        // unchanged
        assert_eq!(source.salt(), s2);
        assert_eq!(source.format(), Some(format));
    }

    #[test]
    fn format_is_resent_after_reconfiguration() {
        let format = mono_512();
        let source = Source::new(Id(1));
        let sink = Recorder::new("sink");

        source.set_format(format).unwrap();
        source.setup(settings(&format)).unwrap();
        source.add_sink(sink.clone(), Id(2));

        source.send().unwrap();
        assert_eq!(sink.take().len(), 1);
        source.send().unwrap();
        assert!(sink.take().is_empty());

        source.setup(settings(&format)).unwrap();
        source.send().unwrap();

        let packets = sink.take();
        assert_eq!(packets.len(), 1);
        assert!(matches!(
            wire::decode(&packets[0]).unwrap(),
            Message::Format { salt, .. } if salt == source.salt()
        ));
    }

    #[test]
    fn full_queue_rejects_input() {
        let format = mono_512();
        let source = Source::<Recorder>::new(Id(1));

        source.set_format(format).unwrap();
        source.setup(SourceSettings {
            buffer: Duration::ZERO,
            ..settings(&format)
        })
        .unwrap();

        let input = vec![0.; 512];
        let accepted = (0..20)
            .map(|i| source.process(&[&input], 512, tick(i)).unwrap())
            .collect::<Vec<_>>();

        // one block in the queue, four in the resampler
        assert_eq!(accepted.iter().filter(|&&a| a).count(), 5);
        assert!(!accepted[19]);
    }

    #[test]
    fn drop_oldest_consumes_sequence_numbers() {
        let format = mono_512();
        let source = Source::new(Id(1));
        let sink = Recorder::new("sink");

        source.set_format(format).unwrap();
        source
            .setup(SourceSettings {
                // 4 blocks
                buffer: Duration::from_micros(42_667),
                overflow: OverflowPolicy::DropOldest,
                ..settings(&format)
            })
            .unwrap();
        source.add_sink(sink.clone(), Id(2));

        let input = vec![0.; 512];
        for i in 0..4 {
            source.process(&[&input], 512, tick(i)).unwrap();
        }
        source.send().unwrap();

        let sequences: Vec<u32> = sink
            .take()
            .iter()
            .filter_map(|p| match wire::decode(p).unwrap() {
                Message::Data { header, .. } => Some(header.sequence),
                _ => None,
            })
            .collect();

        assert_eq!(sequences, [2, 2, 3, 3]);
    }

    #[test]
    fn sink_management() {
        let source = Source::new(Id(1));
        let a = Recorder::new("a");
        let b = Recorder::new("b");

        assert!(source.add_sink(a.clone(), Id(1)));
        assert!(!source.add_sink(a.clone(), Id(1)));
        assert!(source.add_sink(a.clone(), Id(2)));
        assert!(source.add_sink(b.clone(), Recipient::All));
        assert_eq!(source.sinks(), 3);

        assert!(source.set_sink_channel(&b, Recipient::All, 4));
        assert!(!source.set_sink_channel(&b, Id(4), 4));

        assert!(source.remove_sink(&a, Id(1)));
        assert!(!source.remove_sink(&a, Id(1)));
        assert_eq!(source.sinks(), 2);

        source.remove_all();
        assert_eq!(source.sinks(), 0);
    }

    #[test]
    fn answers_format_requests_from_known_sinks() {
        let format = mono_512();
        let source = Source::new(Id(5));
        let known = Recorder::new("known");
        let stranger = Recorder::new("stranger");

        source.set_format(format).unwrap();
        source.add_sink(known.clone(), Id(1));

        let mut buf = [0; 16];
        let request = wire::encode(
            &Message::FormatRequest {
                source: Recipient::One(Id(5)),
                sink: Id(1),
            },
            &mut buf,
        )
        .unwrap()
        .to_vec();

        assert!(source.handle_message(&request, &known).unwrap());
        assert!(!source.handle_message(&request, &stranger).unwrap());

        let packets = known.take();
        assert_eq!(packets.len(), 1);
        assert!(matches!(
            wire::decode(&packets[0]).unwrap(),
            Message::Format { sink: Recipient::One(Id(1)), source: Id(5), .. }
        ));
        assert!(stranger.take().is_empty());

        // addressed to another source
        let other = wire::encode(
            &Message::FormatRequest {
                source: Recipient::One(Id(6)),
                sink: Id(1),
            },
            &mut buf,
        )
        .unwrap()
        .to_vec();
        assert!(!source.handle_message(&other, &known).unwrap());

        assert!(source.handle_message(&[0xff], &known).is_err());
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings = SourceSettings {
            packet_size: 512,
            ..SourceSettings::default()
        };

        let bytes = postcard::to_allocvec(&settings).unwrap();
        let decoded: SourceSettings = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, settings);

        let invalid = SourceSettings {
            packet_size: 32,
            ..SourceSettings::default()
        };
        assert!(matches!(
            Source::<Recorder>::new(Id(0)).setup(invalid),
            Err(Error::InvalidSettings(_))
        ));
    }
}
