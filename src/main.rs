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
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{crate_version, Parser, Subcommand};
use tracing::info;

use plenum::audio;
use plenum::config::Settings;
use plenum::engine::{
    Enclosure, InstrumentLayout, MemorySound, SamplerHandle, SoundEngine, SoundSource,
    SynthTremulant, Tremulant, WindchestLayout,
};
use plenum::sound::Sound;

/// The frequencies of the demo chord: C major around middle C.
const DEMO_CHORD: [f32; 4] = [130.81, 261.63, 329.63, 392.0];

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A realtime sound engine for sampled pipe organs."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Runs the engine against mock devices shaped like the configured ones.
    Simulate {
        /// The path to the sound settings.
        settings_path: String,
        /// The number of periods to run.
        #[arg(short, long, default_value_t = 1000)]
        periods: u64,
    },
    /// Plays a demo chord through the configured devices.
    Play {
        /// The path to the sound settings.
        settings_path: String,
        /// How long to hold the chord.
        #[arg(short, long, default_value_t = 3)]
        seconds: u64,
    },
}

/// A demo instrument: one windchest behind a swell box, with a tremulant.
struct Demo {
    layout: InstrumentLayout,
    tremulant: Arc<SynthTremulant>,
    sources: Vec<Arc<dyn SoundSource>>,
}

impl Demo {
    fn new(sample_rate: u32) -> Demo {
        let tremulant = Arc::new(SynthTremulant::new("tremulant", 180, 20, 20, 30, sample_rate));
        let mut windchest = WindchestLayout::new("great", 1.0);
        windchest.tremulants.push(tremulant.clone() as Arc<dyn Tremulant>);
        windchest
            .enclosures
            .push(Arc::new(Enclosure::new("swell", 30, 100)));

        Demo {
            layout: InstrumentLayout {
                windchests: vec![windchest],
            },
            tremulant,
            sources: DEMO_CHORD
                .iter()
                .map(|frequency| {
                    let source: Arc<dyn SoundSource> =
                        Arc::new(MemorySound::sine(*frequency, 0.2, sample_rate));
                    source
                })
                .collect(),
        }
    }

    fn start(&self, engine: &SoundEngine) -> Result<Vec<SamplerHandle>, Box<dyn Error>> {
        let mut handles = Vec::with_capacity(self.sources.len());
        for (i, source) in self.sources.iter().enumerate() {
            // Spread the notes out a little, like a real player would.
            let delay_ms = i as u32 * 40;
            handles.push(engine.start_sampler(source.clone(), Some(0), 0, 1.0, delay_ms, None)?);
        }
        Ok(handles)
    }

    fn stop(&self, engine: &SoundEngine, handles: Vec<SamplerHandle>) {
        for handle in handles {
            engine.stop_sampler(handle);
        }
    }
}

fn open(settings: Settings) -> Result<(Sound, Demo, Arc<SoundEngine>), Box<dyn Error>> {
    let demo = Demo::new(settings.sample_rate());
    let mut sound = Sound::new(settings);
    sound.assign_instrument(Some(demo.layout.clone()))?;
    sound.open()?;
    let engine = sound.engine().ok_or("sound did not open")?;
    Ok((sound, demo, engine))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Simulate {
            settings_path,
            periods,
        } => {
            let settings = Settings::deserialize(&PathBuf::from(&settings_path))?.simulated();
            let (mut sound, demo, engine) = open(settings)?;
            println!("{}", sound.state());

            let started = Instant::now();
            let handles = demo.start(&engine)?;
            let mut peak_voices = 0;
            while engine.clock().period() < periods {
                peak_voices = peak_voices.max(engine.pool().used_sampler_count());
                thread::sleep(Duration::from_millis(1));
            }
            demo.stop(&engine, handles);
            let elapsed = started.elapsed();

            info!(periods = engine.clock().period(), "Simulation finished");
            println!(
                "Ran {} periods ({} frames each) in {:?}, peak polyphony {} of {}",
                engine.clock().period(),
                engine.samples_per_buffer(),
                elapsed,
                peak_voices,
                engine.pool().usage_limit()
            );
            sound.close();
        }
        Commands::Play {
            settings_path,
            seconds,
        } => {
            let settings = Settings::deserialize(&PathBuf::from(&settings_path))?;
            let (mut sound, demo, engine) = open(settings)?;
            println!("{}", sound.state());

            let handles = demo.start(&engine)?;
            thread::sleep(Duration::from_secs(seconds) / 2);
            demo.tremulant.set_active(true);
            thread::sleep(Duration::from_secs(seconds) / 2);
            demo.stop(&engine, handles);
            demo.tremulant.set_active(false);

            // Let the releases ring out.
            thread::sleep(Duration::from_millis(500));
            println!("{}", sound.state());
            sound.close();
        }
    }

    Ok(())
}
