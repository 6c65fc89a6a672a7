//! stream-player: an interactive command-line audio file player.
//!
//! Loads one file at a time, plays it through the selected output device and
//! accepts transport commands on stdin (`help` lists them).

mod cli;
mod commands;
mod config;
mod logging;

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use stream_player::device::list_devices;
use stream_player::{CpalBackend, OutputBackend, Session, VirtualBackend};

use crate::commands::Command;
use crate::config::PlayerConfig;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    logging::init();

    if args.list_devices {
        let host = cpal::default_host();
        let names = list_devices(&host).context("list output devices")?;
        for (i, name) in names.iter().enumerate() {
            println!("#{i}: {name}");
        }
        return Ok(());
    }

    let file_cfg = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    let engine = file_cfg.engine_config(&args);

    let backend: Box<dyn OutputBackend> = if args.null_output {
        tracing::info!("using virtual output");
        Box::new(VirtualBackend::new())
    } else {
        Box::new(CpalBackend::new(file_cfg.device(&args)))
    };
    let mut session = Session::new(backend, engine);
    session.set_volume(file_cfg.volume(&args));

    let _ = ctrlc::set_handler(move || {
        std::process::exit(130);
    });

    if let Some(path) = &args.path {
        match session.load(path) {
            Ok(info) => {
                println!("{}", commands::track_summary(&info));
                if let Err(e) = session.play() {
                    eprintln!("play failed: {e}");
                }
            }
            Err(e) => eprintln!("load failed: {e}"),
        }
    }

    repl(&mut session)
}

fn repl(session: &mut Session) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("> ");
        stdout.flush().context("flush stdout")?;
        line.clear();
        if stdin.lock().read_line(&mut line).context("read stdin")? == 0 {
            break;
        }
        let cmd = match commands::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if cmd == Command::Quit {
            break;
        }
        execute(session, cmd);
    }
    session.stop();
    Ok(())
}

fn execute(session: &mut Session, cmd: Command) {
    match cmd {
        Command::Load(path) => match session.load(&path) {
            Ok(info) => println!("{}", commands::track_summary(&info)),
            Err(e) => println!("load failed: {e}"),
        },
        Command::Play => match session.play() {
            Ok(()) => println!("Playing."),
            Err(e) => println!("play failed: {e}"),
        },
        Command::Pause => match session.pause() {
            Ok(()) => println!("Paused at {}.", commands::format_time(session.current_time())),
            Err(e) => println!("pause failed: {e}"),
        },
        Command::Stop => {
            session.stop();
            println!("Stopped.");
        }
        Command::Seek(secs) => match session.seek(secs) {
            Ok(target) => println!("Seeking to {}.", commands::format_time(target)),
            Err(e) => println!("seek failed: {e}"),
        },
        Command::Volume(None) => {
            println!("Volume: {}%", (session.volume() * 100.0).round() as u32);
        }
        Command::Volume(Some(percent)) => {
            session.set_volume(percent as f32 / 100.0);
            println!("Volume: {percent}%");
        }
        Command::Info => match session.track() {
            Some(info) => println!("{}", commands::track_summary(info)),
            None => println!("No track loaded."),
        },
        Command::Status => println!("{}", commands::status_line(&session.status())),
        Command::Debug => println!("{}", commands::debug_report(&session.status())),
        Command::Help => println!("{}", commands::help_text()),
        Command::Quit => {}
    }
}
