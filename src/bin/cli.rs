use crabstream::encode::jpeg_resolution;
use crabstream::{CameraSession, CrabStreamConfig};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    crabstream::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabstream-cli <snapshot|frames|watch|config> [args] [--config <path>] [--json]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "snapshot" => cmd_snapshot(&args),
        "frames" => cmd_frames(&args),
        "watch" => cmd_watch(&args),
        "config" => cmd_config(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

/// Options shared by every command, plus the remaining positional args.
struct Options {
    config: CrabStreamConfig,
    json: bool,
    positional: Vec<String>,
}

fn parse_options(args: &[String]) -> Result<Options, Box<dyn std::error::Error>> {
    let mut config_path = CrabStreamConfig::default_path();
    let mut json = false;
    let mut positional = Vec::new();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = PathBuf::from(args.get(i).ok_or("--config needs a path")?);
            }
            "--json" => json = true,
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    Ok(Options {
        config: CrabStreamConfig::load_layered(&config_path)?,
        json,
        positional,
    })
}

fn cmd_snapshot(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_options(args)?;
    let output = options
        .positional
        .first()
        .ok_or("Usage: crabstream-cli snapshot <out.jpg>")?;

    let session = CameraSession::from_config(&options.config)?;
    let still = session.get_still_image_timeout(options.config.session.still_timeout());
    session.shutdown(SHUTDOWN_TIMEOUT)?;
    let still = still?;

    std::fs::write(output, &still)?;
    let resolution = jpeg_resolution(&still)?;
    if options.json {
        println!(
            "{}",
            serde_json::json!({ "path": output, "bytes": still.len(), "resolution": resolution })
        );
    } else {
        println!("Saved {} ({} bytes, {})", output, still.len(), resolution);
    }
    Ok(())
}

fn cmd_frames(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_options(args)?;
    let count: u64 = match options.positional.first() {
        Some(count) => count.parse()?,
        None => 1,
    };

    let session = CameraSession::from_config(&options.config)?;
    let timeout = options.config.session.frame_timeout();
    let mut cursor = session.frame_cursor();

    for _ in 0..count {
        let (sequence, frame) = session.get_video_frame_after(cursor, Some(timeout))?;
        cursor = sequence;
        if options.json {
            println!(
                "{}",
                serde_json::json!({ "sequence": sequence, "bytes": frame.len() })
            );
        } else {
            println!("Frame seq:{} {} bytes", sequence, frame.len());
        }
    }

    if options.json {
        println!("{}", serde_json::to_string(&session.status())?);
    }
    session.shutdown(SHUTDOWN_TIMEOUT)?;
    Ok(())
}

fn cmd_watch(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_options(args)?;
    let session = CameraSession::from_config(&options.config)?;
    let timeout = options.config.session.frame_timeout();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let mut cursor = session.frame_cursor();
    while running.load(Ordering::SeqCst) {
        match session.get_video_frame_after(cursor, Some(timeout)) {
            Ok((sequence, frame)) => {
                cursor = sequence;
                println!("Frame seq:{} {} bytes", sequence, frame.len());
            }
            Err(e) => eprintln!("No frame: {}", e),
        }
    }

    let status = session.status();
    session.shutdown(SHUTDOWN_TIMEOUT)?;
    println!(
        "Stopped after {} frames, {} launches",
        status.frames_published, status.launches
    );
    Ok(())
}

fn cmd_config(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_options(args)?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&options.config)?);
    } else {
        print!("{}", options.config.to_toml()?);
    }
    Ok(())
}
