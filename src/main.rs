mod args;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use args::{Args, Command};
use video_ui_test::device::{DEFAULT_TIMEOUT, DeviceUnderTest, NullControl};
use video_ui_test::logging::{self, DirImageLogger};
use video_ui_test::sink::{PngSequenceOutput, SinkCompositor, SinkOptions};
use video_ui_test::source::{FramePlayer, FrameProvider, FrameSource, SourceOptions};
use video_ui_test::{Config, Frame, ImageLookup, Mask, MatchParameters, Matcher, Result};

/// A single saved frame standing in for live video.
struct StillFrame(Frame);

impl FrameProvider for StillFrame {
    fn get_frame(&self, _timeout: Duration, _since: Option<f64>) -> Result<Frame> {
        Ok(self.0.clone())
    }
}

fn main() -> ExitCode {
    let Some(args) = Args::parse() else {
        return ExitCode::SUCCESS;
    };
    logging::init(args.debug_mode);

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the check the command performs passed.
fn run(args: &Args) -> Result<bool> {
    let mut config = Config::load_from(args.config.as_deref())?;
    if let Some(dir) = &args.debug_images {
        config.debug.image_dir = Some(dir.clone());
    }
    let lookup = ImageLookup::new();

    match &args.command {
        Command::Match {
            frame,
            template,
            all,
        } => run_match(args, &config, &lookup, frame, template, *all),
        Command::IsBlack { frame, threshold } => {
            let frame = Frame::new(lookup.load_rgb(frame)?, 0.0);
            let mask = args
                .mask
                .as_deref()
                .map(|expr| Mask::parse(expr, &lookup))
                .transpose()?;
            let dut = DeviceUnderTest::new(StillFrame(frame.clone()), NullControl, config);
            let result = dut.is_screen_black(Some(&frame), mask.as_ref(), *threshold, args.region)?;
            if result.black {
                println!("⬛ Screen is black");
            } else {
                println!("🟩 Screen is not black");
            }
            Ok(result.black)
        }
        Command::Play {
            images,
            fps,
            frames,
            output,
            until,
        } => {
            let images = images
                .iter()
                .map(|path| lookup.load_rgb(path))
                .collect::<Result<Vec<_>>>()?;
            let recording = PngSequenceOutput::new(output)?;
            let mut sink = SinkCompositor::start(Box::new(recording), SinkOptions::from_config(&config))?;
            let source = FrameSource::start(
                FramePlayer::factory(images, *fps, true),
                SourceOptions::from_config(&config),
                Some(sink.handle()),
            )?;
            println!("▶️ Playing at {fps} fps, recording to {}", output.display());

            let params = parameters(args, &config)?;
            let dut = DeviceUnderTest::new(source, NullControl, config).with_sink(sink.handle());
            let outcome = match until {
                Some(path) => lookup.load_template(path).and_then(|template| {
                    dut.wait_for_match(&template, DEFAULT_TIMEOUT, 1, Some(params), args.region)
                        .map(|result| println!("✅ {result}"))
                }),
                None => dut.frames(None).take(*frames).try_for_each(|frame| {
                    let frame = frame?;
                    println!("🎞️ {:?}", frame);
                    Ok(())
                }),
            };
            // Stop capturing before the recording is flushed.
            drop(dut);
            let flushed = sink.shutdown();
            outcome?;
            flushed?;
            Ok(true)
        }
    }
}

fn run_match(
    args: &Args,
    config: &Config,
    lookup: &ImageLookup,
    frame: &Path,
    template: &Path,
    all: bool,
) -> Result<bool> {
    let frame = lookup.load_rgb(frame)?;
    let template = lookup.load_template(template)?;
    let params = parameters(args, config)?;

    let mut matcher = Matcher::new(config.matching.pyramid_levels)?;
    if let Some(dir) = &config.debug.image_dir {
        matcher = matcher.with_image_logger(Arc::new(DirImageLogger::new(dir, "match")));
    }

    let mut mask = args
        .mask
        .as_deref()
        .map(|expr| Mask::parse(expr, lookup))
        .transpose()?;
    if !args.region.is_all() {
        mask = Some(match mask {
            Some(mask) => mask - !Mask::from(args.region),
            None => Mask::from(args.region),
        });
    }

    let mut found = 0;
    for candidate in matcher.find_matches(&frame, &template.image, params, mask.as_ref())? {
        if candidate.matched {
            found += 1;
            println!("✅ Match for '{}' at {}", template.friendly_name(), candidate.region);
            if !all {
                break;
            }
        } else if found == 0 {
            println!(
                "❌ No match for '{}'. Closest: {} (certainty {:.4})",
                template.friendly_name(),
                candidate.region,
                candidate.first_pass_certainty
            );
        }
    }
    Ok(found > 0)
}

fn parameters(args: &Args, config: &Config) -> Result<MatchParameters> {
    let mut params = config.matching.parameters()?;
    if let Some(method) = args.match_method {
        params = params.with_match_method(method);
    }
    if let Some(threshold) = args.match_threshold {
        params = params.with_match_threshold(threshold)?;
    }
    if let Some(method) = args.confirm_method {
        params = params.with_confirm_method(method);
    }
    if let Some(threshold) = args.confirm_threshold {
        params = params.with_confirm_threshold(threshold)?;
    }
    Ok(params)
}
