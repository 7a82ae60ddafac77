//! kanberra-play - play an event sound or file and wait for it to finish
//!
//! Run with `--help` for the flags.

use std::process::ExitCode;
use std::sync::mpsc;

use clap::{ArgGroup, Parser};
use kanberra::{props, Context, KaError, PropList};

/// Command-line arguments for kanberra-play
#[derive(Parser, Debug)]
#[command(name = "kanberra-play")]
#[command(about = "Play an event sound or file and wait for it to finish")]
#[command(version, disable_version_flag = true)]
#[command(group(ArgGroup::new("sound").required(true).multiple(true).args(["event_id", "filename"])))]
struct Args {
    /// Event sound identifier
    #[arg(short = 'i', long = "id", value_name = "NAME")]
    event_id: Option<String>,

    /// Play a file instead of (or as fallback for) an event sound
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    filename: Option<String>,

    /// Event description
    #[arg(short, long, value_name = "TEXT")]
    description: Option<String>,

    /// Cache control: never, permanent or volatile
    #[arg(short, long, value_name = "CONTROL")]
    cache_control: Option<String>,

    /// Number of times to play
    #[arg(short = 'l', long = "loop", value_name = "N", default_value_t = 1)]
    loops: u32,

    /// Sample volume in dB (ex: -6.0)
    #[arg(short = 'V', long, value_name = "DB", allow_hyphen_values = true)]
    volume: Option<String>,

    /// Arbitrary property, repeatable
    #[arg(long = "property", value_name = "KEY=VALUE", value_parser = parse_property)]
    properties: Vec<(String, String)>,

    /// Driver name or list (overrides the configuration)
    #[arg(long)]
    driver: Option<String>,

    /// Output device (overrides the configuration)
    #[arg(long)]
    device: Option<String>,

    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn parse_property(kv: &str) -> Result<(String, String), String> {
    kv.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", kv))
}

fn request_props(opts: &Args) -> Result<PropList, KaError> {
    let mut p = PropList::new();
    if let Some(id) = &opts.event_id {
        p.sets(props::EVENT_ID, id)?;
    }
    if let Some(file) = &opts.filename {
        p.sets(props::MEDIA_FILENAME, file)?;
    }
    if let Some(desc) = &opts.description {
        p.sets(props::EVENT_DESCRIPTION, desc)?;
    }
    if let Some(cc) = &opts.cache_control {
        p.sets(props::CACHE_CONTROL, cc)?;
    }
    if let Some(volume) = &opts.volume {
        p.sets(props::VOLUME, volume)?;
    }
    for (k, v) in &opts.properties {
        p.sets(k, v)?;
    }
    Ok(p)
}

fn run(opts: &Args) -> Result<(), KaError> {
    let ctx = Context::create()?;
    if let Some(driver) = &opts.driver {
        ctx.set_driver(Some(driver))?;
    }
    if let Some(device) = &opts.device {
        ctx.change_device(Some(device))?;
    }
    ctx.change_props(&PropList::from_strs(&[(props::APPLICATION_NAME, "kanberra-play")])?)?;

    let req = request_props(opts)?;
    let (tx, rx) = mpsc::channel();

    for round in 0..opts.loops {
        let tx = tx.clone();
        ctx.play_full(1, &req, move |id, result| {
            let _ = tx.send((id, result));
        })?;
        log::debug!("Playing round {}/{}", round + 1, opts.loops);

        match rx.recv() {
            Ok((_, Ok(()))) => {}
            Ok((_, Err(e))) => return Err(e),
            Err(_) => return Err(KaError::Internal),
        }
    }

    ctx.destroy()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let opts = Args::parse();

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Failed to play sound: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("kanberra-play").chain(list.iter().copied()))
    }

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_full_command_line() {
        let opts = parse(&[
            "-i", "bell", "--loop", "3", "--property", "media.name=Bell", "--driver", "null", "-V", "-6",
        ])
        .unwrap();
        assert_eq!(opts.event_id.as_deref(), Some("bell"));
        assert_eq!(opts.loops, 3);
        assert_eq!(opts.properties, vec![("media.name".to_string(), "Bell".to_string())]);
        assert_eq!(opts.driver.as_deref(), Some("null"));
        assert_eq!(opts.volume.as_deref(), Some("-6"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["--id"]).is_err());
        assert!(parse(&["-i", "x", "--loop", "x"]).is_err());
        assert!(parse(&["-i", "x", "--property", "novalue"]).is_err());
        assert!(parse(&["-i", "x", "--bogus"]).is_err());
        // Neither an event id nor a file
        assert!(parse(&["--driver", "null"]).is_err());
    }

    #[test]
    fn test_version_flag() {
        let err = parse(&["-v"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_request_props() {
        let opts = parse(&["-f", "/tmp/a.wav", "-c", "volatile", "-V", "-3.5"]).unwrap();
        assert_eq!(opts.loops, 1);
        let p = request_props(&opts).unwrap();
        assert_eq!(p.gets(props::MEDIA_FILENAME), Some("/tmp/a.wav"));
        assert_eq!(p.gets(props::CACHE_CONTROL), Some("volatile"));
        assert_eq!(p.gets(props::VOLUME), Some("-3.5"));
    }
}
