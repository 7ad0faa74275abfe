// hvd command line
// Decode a raw H.264/HEVC elementary stream in hardware, optionally dumping raw frames

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::bitstream::{AccessUnits, StreamKind};
use crate::config::DecoderConfig;
use crate::decoder::{self, HardwareDecoder, VideoDecoder};
use crate::frame;

/// Parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub config: DecoderConfig,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub list_devices: bool,
    pub verbosity: u8,
}

pub fn command() -> Command {
    Command::new("hvd")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Raw H.264/HEVC Annex-B elementary stream")
                .required_unless_present("list-devices"),
        )
        .arg(
            Arg::new("output")
                .value_name("OUTPUT")
                .help("File receiving raw decoded frames"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON decoder config, flags override its values"),
        )
        .arg(
            Arg::new("hardware")
                .short('H')
                .long("hardware")
                .value_name("TYPE")
                .help("Hardware device type (vaapi, vdpau, d3d11va, videotoolbox, cuda...)"),
        )
        .arg(
            Arg::new("codec")
                .short('c')
                .long("codec")
                .value_name("NAME")
                .help("FFmpeg decoder name (h264, hevc...)"),
        )
        .arg(
            Arg::new("device")
                .short('d')
                .long("device")
                .value_name("DEVICE")
                .help("Device to open, e.g. /dev/dri/renderD128"),
        )
        .arg(
            Arg::new("pixel-format")
                .short('p')
                .long("pixel-format")
                .value_name("FORMAT")
                .help("Host pixel format of the dumped frames, e.g. nv12"),
        )
        .arg(
            Arg::new("list-devices")
                .long("list-devices")
                .action(ArgAction::SetTrue)
                .help("List hardware device types supported by the linked FFmpeg"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("More logging, repeat for more"),
        )
}

impl Args {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config = match matches.get_one::<String>("config") {
            Some(path) => DecoderConfig::from_json_file(path)?,
            None => DecoderConfig::default(),
        };

        if let Some(hardware) = matches.get_one::<String>("hardware") {
            config.hardware = hardware.clone();
        }
        if let Some(codec) = matches.get_one::<String>("codec") {
            config.codec = codec.clone();
        }
        if let Some(device) = matches.get_one::<String>("device") {
            config.device = Some(device.clone());
        }
        if let Some(pixel_format) = matches.get_one::<String>("pixel-format") {
            config.pixel_format = Some(pixel_format.clone());
        }

        Ok(Self {
            config,
            input: matches.get_one::<String>("input").map(PathBuf::from),
            output: matches.get_one::<String>("output").map(PathBuf::from),
            list_devices: matches.get_flag("list-devices"),
            verbosity: matches.get_count("verbose"),
        })
    }

    pub fn parse() -> Result<Self> {
        Self::from_matches(&command().get_matches())
    }

    /// Max log level for the subscriber
    pub fn log_level(&self) -> tracing::Level {
        match self.verbosity {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Totals of one decoding run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub packets: usize,
    pub frames: usize,
    pub bytes_written: usize,
}

/// Feed every access unit of `stream` to `decoder`, then flush it
pub fn decode_stream<D, W>(
    decoder: &mut D,
    stream: &[u8],
    kind: StreamKind,
    mut output: Option<&mut W>,
) -> Result<Summary>
where
    D: VideoDecoder + ?Sized,
    W: Write,
{
    let mut summary = Summary::default();

    let mut on_frame = |f: &ffmpeg_next::frame::Video| -> Result<()> {
        summary.frames += 1;
        log::debug!(
            "frame {}: {}x{} {:?} pts {:?}",
            summary.frames,
            f.width(),
            f.height(),
            f.format(),
            f.pts()
        );
        if let Some(out) = output.as_mut() {
            summary.bytes_written += frame::write_frame(f, out).context("Failed to write frame")?;
        }
        Ok(())
    };

    let mut packets = 0;
    for unit in AccessUnits::new(stream, kind) {
        packets += 1;
        decoder::decode(decoder, Some(unit), &mut on_frame)
            .with_context(|| format!("Failed to decode packet {}", packets))?;
    }

    // Flush, then the decoder is ready for another stream
    decoder::decode(decoder, None, &mut on_frame).context("Failed to flush decoder")?;

    summary.packets = packets;
    Ok(summary)
}

fn list_devices() {
    let devices = decoder::available_devices();
    if devices.is_empty() {
        println!("No hardware device types in the linked FFmpeg");
        return;
    }
    for device in devices {
        println!("{}", device);
    }
}

pub fn run(args: Args) -> Result<()> {
    if args.list_devices {
        ffmpeg_next::init().context("Failed to initialize FFmpeg")?;
        list_devices();
        return Ok(());
    }

    let Some(input) = args.input.as_ref() else {
        bail!("No input file given");
    };

    let kind = StreamKind::from_codec_name(&args.config.codec).with_context(|| {
        format!(
            "Raw input needs an H.264 or HEVC decoder, got {}",
            args.config.codec
        )
    })?;

    let stream = std::fs::read(input).with_context(|| format!("Cannot read {}", input.display()))?;

    let mut decoder =
        HardwareDecoder::new(&args.config).context("Failed to open hardware decoder")?;
    log::info!("Using {}", VideoDecoder::info(&decoder));

    let mut output = match args.output.as_ref() {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("Cannot create {}", path.display()))?,
        )),
        None => None,
    };

    let summary = decode_stream(&mut decoder, &stream, kind, output.as_mut())?;

    if let Some(out) = output.as_mut() {
        out.flush().context("Failed to flush output")?;
    }

    log::info!(
        "Decoded {} frames from {} packets ({} bytes written)",
        summary.frames,
        summary.packets,
        summary.bytes_written
    );

    Ok(())
}
