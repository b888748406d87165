use std::env;
use std::path::PathBuf;

use video_ui_test::Region;
use video_ui_test::match_image::{ConfirmMethod, MatchMethod};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Search a saved frame for a template.
    Match {
        frame: PathBuf,
        template: PathBuf,
        all: bool,
    },
    /// Check whether a saved frame is black.
    IsBlack { frame: PathBuf, threshold: Option<u8> },
    /// Feed images through the capture and recording stack.
    Play {
        images: Vec<PathBuf>,
        fps: f64,
        frames: usize,
        output: PathBuf,
        until: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub debug_mode: bool,
    pub debug_images: Option<PathBuf>,
    pub mask: Option<String>,
    pub region: Region,
    pub match_method: Option<MatchMethod>,
    pub match_threshold: Option<f64>,
    pub confirm_method: Option<ConfirmMethod>,
    pub confirm_threshold: Option<f64>,
}

/// What the command line asked for.
#[derive(Debug, PartialEq)]
pub enum Parsed {
    Run(Box<Args>),
    Help,
    Version,
}

impl Args {
    pub fn parse() -> Option<Self> {
        match Self::parse_from(env::args().skip(1)) {
            Ok(Parsed::Run(args)) => Some(*args),
            Ok(Parsed::Help) => {
                print_help();
                None
            }
            Ok(Parsed::Version) => {
                println!(
                    "Video UI Test v{} (built {})",
                    env!("APP_VERSION_DISPLAY"),
                    env!("APP_BUILD_YEAR")
                );
                None
            }
            Err(message) => {
                eprintln!("❌ {message}");
                print_help();
                None
            }
        }
    }

    pub fn parse_from<I>(args: I) -> Result<Parsed, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut positional: Vec<String> = Vec::new();
        let mut config = None;
        let mut debug_mode = false;
        let mut debug_images = None;
        let mut mask = None;
        let mut region = Region::ALL;
        let mut match_method = None;
        let mut match_threshold = None;
        let mut confirm_method = None;
        let mut confirm_threshold = None;
        let mut threshold = None;
        let mut all = false;
        let mut fps: f64 = 25.0;
        let mut frames = 50;
        let mut output = PathBuf::from("video-ui-test-out");
        let mut until = None;

        for arg in args {
            if arg == "--help" || arg == "-h" {
                return Ok(Parsed::Help);
            } else if arg == "--version" || arg == "-v" {
                return Ok(Parsed::Version);
            } else if arg == "--debug" {
                debug_mode = true;
            } else if arg == "--all" {
                all = true;
            } else if let Some(val) = arg.strip_prefix("--config=") {
                config = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--debug-images=") {
                debug_images = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--mask=") {
                mask = Some(val.to_string());
            } else if let Some(val) = arg.strip_prefix("--region=") {
                region = parse_region(val)?;
            } else if let Some(val) = arg.strip_prefix("--method=") {
                match_method = Some(val.parse::<MatchMethod>().map_err(|e| e.to_string())?);
            } else if let Some(val) = arg.strip_prefix("--match-threshold=") {
                match_threshold = Some(parse_number(val, "match threshold")?);
            } else if let Some(val) = arg.strip_prefix("--confirm=") {
                confirm_method = Some(val.parse::<ConfirmMethod>().map_err(|e| e.to_string())?);
            } else if let Some(val) = arg.strip_prefix("--confirm-threshold=") {
                confirm_threshold = Some(parse_number(val, "confirm threshold")?);
            } else if let Some(val) = arg.strip_prefix("--threshold=") {
                threshold = Some(parse_number(val, "threshold")?);
            } else if let Some(val) = arg.strip_prefix("--fps=") {
                fps = parse_number(val, "fps")?;
            } else if let Some(val) = arg.strip_prefix("--frames=") {
                frames = parse_number(val, "frame count")?;
            } else if let Some(val) = arg.strip_prefix("--output=") {
                output = PathBuf::from(val);
            } else if let Some(val) = arg.strip_prefix("--until=") {
                until = Some(PathBuf::from(val));
            } else if arg.starts_with("--") {
                return Err(format!("Unknown argument: {arg}"));
            } else {
                positional.push(arg);
            }
        }

        let mut positional = positional.into_iter();
        let command = match positional.next().as_deref() {
            Some("match") => {
                let (Some(frame), Some(template), None) =
                    (positional.next(), positional.next(), positional.next())
                else {
                    return Err("match expects <frame> <template>".to_string());
                };
                Command::Match {
                    frame: frame.into(),
                    template: template.into(),
                    all,
                }
            }
            Some("is-black") => {
                let (Some(frame), None) = (positional.next(), positional.next()) else {
                    return Err("is-black expects <frame>".to_string());
                };
                Command::IsBlack {
                    frame: frame.into(),
                    threshold,
                }
            }
            Some("play") => {
                let images: Vec<PathBuf> = positional.map(PathBuf::from).collect();
                if images.is_empty() {
                    return Err("play expects at least one image".to_string());
                }
                if fps.is_nan() || fps <= 0.0 {
                    return Err(format!("Invalid fps value: {fps}"));
                }
                Command::Play {
                    images,
                    fps,
                    frames,
                    output,
                    until,
                }
            }
            Some(other) => return Err(format!("Unknown command: {other}")),
            None => return Err("No command given".to_string()),
        };

        Ok(Parsed::Run(Box::new(Args {
            command,
            config,
            debug_mode,
            debug_images,
            mask,
            region,
            match_method,
            match_threshold,
            confirm_method,
            confirm_threshold,
        })))
    }
}

fn parse_number<T: std::str::FromStr>(val: &str, what: &str) -> Result<T, String> {
    val.parse::<T>()
        .map_err(|_| format!("Invalid {what} value: {val}"))
}

/// `x,y,width,height`
fn parse_region(val: &str) -> Result<Region, String> {
    let parts: Vec<i32> = val
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("Invalid region value: {val}"))?;
    match parts.as_slice() {
        &[x, y, width, height] if width > 0 && height > 0 => Ok(Region::new(x, y, width, height)),
        _ => Err(format!("Invalid region value: {val} (expected x,y,width,height)")),
    }
}

fn print_help() {
    println!("📺 Video UI Test");
    println!();
    println!("USAGE:");
    println!("    video-ui-test [FLAGS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    match <frame> <template>     Search a saved frame for a template image");
    println!("    is-black <frame>             Check whether a saved frame is black");
    println!("    play <image>...              Play images as video, recording annotated frames");
    println!();
    println!("FLAGS:");
    println!("    --config=FILE                Load settings from a TOML file");
    println!("    --debug                      Enable debug logging");
    println!("    --debug-images=DIR           Save intermediate matching images under DIR");
    println!("    --mask=EXPR                  Restrict the search, e.g. \"Region.ALL - Mask('clock.png')\"");
    println!("    --region=X,Y,W,H             Only consider this part of the frame");
    println!("    --method=NAME                sqdiff-normed, ccorr-normed or ccoeff-normed");
    println!("    --match-threshold=N          First pass threshold (0 to 1)");
    println!("    --confirm=NAME               none, absdiff or normed-absdiff");
    println!("    --confirm-threshold=N        Confirmation threshold (0 to 1)");
    println!("    --all                        match: list every match, not just the best");
    println!("    --threshold=N                is-black: highest grey level counted as black");
    println!("    --fps=N                      play: frame rate (default: 25)");
    println!("    --frames=N                   play: frames to capture (default: 50)");
    println!("    --output=DIR                 play: directory for recorded PNG frames");
    println!("    --until=FILE                 play: wait for this template instead of counting frames");
    println!("    --help, -h                   Show this help message");
    println!("    --version, -v                Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    video-ui-test match screenshot.png button.png");
    println!("    video-ui-test --mask=\"Region(x=0, y=0, right=640, bottom=360)\" match screenshot.png logo.png");
    println!("    video-ui-test is-black --threshold=20 screenshot.png");
    println!("    video-ui-test play --fps=10 --until=logo.png a.png b.png");
}
