// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use atl::config::AtlConfig;
use atl::diagnostics::Report;
use atl::file_cache::PreloadState;
use atl::middleware::mock::MockMiddleware;
use atl::request::{ManagerRequest, Notification, ObjectRequest, Request, RequestOutcome};
use atl::{AudioSystem, DataScope, ObjectId, RequestFilter, TranslationLayer};
use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;

const MIDDLEWARE_NAME: &str = "mock";

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "An audio translation layer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parses and lists the controls found in the given folder.
    Controls {
        /// The folder holding the control files.
        path: String,
        /// Print a JSON report instead of the control list.
        #[arg(long)]
        json: bool,
    },
    /// Parses the preloads in the given folder and loads each of them.
    Preloads {
        /// The folder holding the control files and banks.
        path: String,
        /// Print a JSON report instead of the preload list.
        #[arg(long)]
        json: bool,
    },
    /// Executes a trigger on the global object and waits for it to finish.
    Play {
        /// The folder holding the control files.
        path: String,
        /// The name of the trigger to execute.
        trigger: String,
        /// The path to the system config.
        #[arg(short, long)]
        config: Option<String>,
        /// How long to wait for the trigger to finish.
        #[arg(short, long, default_value = "5s")]
        wait: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Controls { path, json } => {
            let layer = load_layer(Path::new(&path), false)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&Report::collect(&layer))?);
                return Ok(());
            }

            let controls = layer.controls();
            let mut triggers: Vec<&str> = controls.triggers().map(|t| t.name()).collect();
            triggers.sort();
            println!("Triggers (count: {}):", triggers.len());
            for trigger in triggers {
                println!("- {}", trigger);
            }

            let mut rtpcs: Vec<&str> = controls.rtpcs().map(|r| r.name()).collect();
            rtpcs.sort();
            println!("\nRTPCs (count: {}):", rtpcs.len());
            for rtpc in rtpcs {
                println!("- {}", rtpc);
            }

            let mut switches: Vec<_> = controls.switches().collect();
            switches.sort_by(|a, b| a.name().cmp(b.name()));
            println!("\nSwitches (count: {}):", switches.len());
            for switch in switches {
                let mut states: Vec<&str> = switch.states().map(|s| s.name()).collect();
                states.sort();
                println!("- {} ({})", switch.name(), states.join(", "));
            }

            let mut environments: Vec<&str> = controls.environments().map(|e| e.name()).collect();
            environments.sort();
            println!("\nEnvironments (count: {}):", environments.len());
            for environment in environments {
                println!("- {}", environment);
            }
        }
        Commands::Preloads { path, json } => {
            let mut layer = load_layer(Path::new(&path), true)?;
            let preloads: Vec<_> = layer.file_cache().preloads().map(|p| p.id()).collect();
            if preloads.is_empty() {
                println!("No preloads found in {}.", path);
                return Ok(());
            }
            for preload in preloads {
                layer.process_request(Request::new(ManagerRequest::PreloadSingleRequest(
                    preload,
                )))?;
            }

            let deadline = Instant::now() + Duration::from_secs(10);
            let tick = Duration::from_millis(10);
            while layer
                .file_cache()
                .preloads()
                .any(|p| p.state() == PreloadState::Loading)
            {
                if Instant::now() > deadline {
                    return Err("timed out waiting for banks to load".into());
                }
                thread::sleep(tick);
                layer.update(tick);
            }

            let report = Report::collect(&layer);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
            layer.shut_down()?;
        }
        Commands::Play {
            path,
            trigger,
            config,
            wait,
        } => {
            let config = match config {
                Some(config) => AtlConfig::deserialize(Path::new(&config))?,
                None => AtlConfig::default(),
            }
            .with_controls_path(Path::new(&path));
            let wait: Duration = DurationString::from_string(wait)?.into();

            let system = AudioSystem::start(MockMiddleware::new(MIDDLEWARE_NAME), &config)?;
            let (finished_tx, finished_rx) = crossbeam_channel::unbounded();
            system.add_request_listener(
                RequestFilter::all(),
                Box::new(move |notification| {
                    if let Notification::TriggerFinished { instance, .. } = notification {
                        let _ = finished_tx.send(*instance);
                    }
                }),
            )?;
            let outcome = system.push_request_blocking(Request::object(
                ObjectId::GLOBAL,
                ObjectRequest::ExecuteTrigger {
                    trigger: system.trigger_id(&trigger),
                    delay: Duration::ZERO,
                    source: None,
                },
            ))?;
            let RequestOutcome::TriggerActivated(activation) = outcome else {
                return Err(format!("unexpected outcome {:?}", outcome).into());
            };
            println!("Executing {} ({})", trigger, activation.raw());

            let deadline = Instant::now() + wait;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match finished_rx.recv_timeout(remaining) {
                    Ok(instance) if instance == activation => {
                        println!("{} finished.", trigger);
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => {
                        println!("{} still playing after {:?}, stopping.", trigger, wait);
                        system
                            .push_request_blocking(Request::new(ManagerRequest::StopAllSounds))?;
                        break;
                    }
                }
            }
            system.shut_down()?;
        }
    }

    Ok(())
}

/// Builds an initialized layer over the mock middleware with the folder parsed as level data.
fn load_layer(
    path: &Path,
    with_preloads: bool,
) -> Result<TranslationLayer<MockMiddleware>, Box<dyn Error>> {
    let mut layer = TranslationLayer::new(MockMiddleware::new(MIDDLEWARE_NAME), &AtlConfig::default());
    layer.initialize()?;
    let folder = PathBuf::from(path);
    layer.process_request(Request::new(ManagerRequest::ParseControlsData {
        folder: folder.clone(),
        scope: DataScope::LevelSpecific,
    }))?;
    if with_preloads {
        layer.process_request(Request::new(ManagerRequest::ParsePreloadsData {
            folder,
            scope: DataScope::LevelSpecific,
        }))?;
    }
    Ok(layer)
}
