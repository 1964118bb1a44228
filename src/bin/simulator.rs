use clap::{App, Arg};
use colored::*;
use robocycle::commands::{DriveDistance, TankDrive};
use robocycle::fault_injection::{FaultInjectionConfig, FaultyPort};
use robocycle::hal::{DrivetrainModel, Hal, SimulatedPort, SimulationConfig};
use robocycle::subsystems::{DriveConfig, DriveSubsystem};
use robocycle::{CommandId, CommandState, EndReason, Scheduler, SchedulerConfig, TelemetryFrame};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time;
use tracing::info;

const DEFAULT_CYCLES: &str = "500";
const DEFAULT_VOLTS: &str = "6.0";
const DEFAULT_DISTANCE_IN: &str = "24.0";

/// Optional JSON settings file; every section falls back to its defaults.
/// Fault injection stays off unless the file or `--fault-rate` turns it on.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    simulation: SimulationConfig,
    drive: DriveConfig,
    faults: FaultInjectionConfig,
    scheduler: SchedulerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            drive: DriveConfig::default(),
            faults: FaultInjectionConfig {
                enabled: false,
                ..FaultInjectionConfig::default()
            },
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Settings {
    fn set_fault_rate(&mut self, rate: f32) {
        self.faults.enabled = rate > 0.0;
        self.faults.read_fault_rate_percent = rate;
        self.faults.write_fault_rate_percent = rate / 2.0;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("robocycle-sim")
        .version("0.1.0")
        .about("Drives a simulated drivetrain through the command scheduler")
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("CYCLES")
                .help("Maximum number of control cycles")
                .takes_value(true)
                .default_value(DEFAULT_CYCLES),
        )
        .arg(
            Arg::with_name("volts")
                .long("volts")
                .value_name("VOLTS")
                .help("Drive voltage for both sides")
                .takes_value(true)
                .default_value(DEFAULT_VOLTS),
        )
        .arg(
            Arg::with_name("distance")
                .short("d")
                .long("distance")
                .value_name("INCHES")
                .help("Left-side position to drive to")
                .takes_value(true)
                .default_value(DEFAULT_DISTANCE_IN),
        )
        .arg(
            Arg::with_name("fault-rate")
                .long("fault-rate")
                .value_name("PERCENT")
                .help("Injected read fault rate; writes fail at half this rate")
                .takes_value(true)
                .validator(|v| match v.parse::<f32>() {
                    Ok(rate) if (0.0..=100.0).contains(&rate) => Ok(()),
                    _ => Err("Fault rate must be a percentage between 0 and 100".into()),
                }),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON settings file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("realtime")
                .long("realtime")
                .help("Pace cycles with the wall clock instead of running flat out"),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print one telemetry frame per cycle as JSON"),
        )
        .get_matches();

    let mut settings = match matches.value_of("config") {
        Some(path) => serde_json::from_str::<Settings>(&std::fs::read_to_string(path)?)?,
        None => Settings::default(),
    };
    if settings.simulation.model.is_none() {
        settings.simulation.model = Some(DrivetrainModel::default());
    }
    if let Some(rate) = matches.value_of("fault-rate") {
        settings.set_fault_rate(rate.parse::<f32>()?);
    }

    let cycles = matches.value_of("cycles").unwrap_or(DEFAULT_CYCLES).parse::<u64>()?;
    let volts = matches.value_of("volts").unwrap_or(DEFAULT_VOLTS).parse::<f64>()?;
    let distance = matches.value_of("distance").unwrap_or(DEFAULT_DISTANCE_IN).parse::<f64>()?;
    let realtime = matches.is_present("realtime");
    let json = matches.is_present("json");

    if !(settings.simulation.period_s > 0.0 && settings.simulation.period_s.is_finite()) {
        return Err("simulation period must be a positive number of seconds".into());
    }
    let period = Duration::from_secs_f64(settings.simulation.period_s);
    let port = FaultyPort::new(SimulatedPort::new_with_config(settings.simulation), settings.faults);
    let hal = Hal::new(port);

    let mut scheduler = Scheduler::new_with_config(hal.clone(), settings.scheduler);
    let drive = scheduler.register(DriveSubsystem::new(hal, settings.drive))?;
    let idle = drive.clone();
    scheduler.set_default_command(drive.id(), move || TankDrive::stopped(idle.clone()))?;

    let setup_faults = scheduler.setup()?;
    info!("simulation ready, {} setup fault(s)", setup_faults);

    let target = scheduler.schedule(DriveDistance::new(drive.clone(), volts, distance))?;

    let mut interval = time::interval(period);
    for _ in 0..cycles {
        if realtime {
            interval.tick().await;
        }

        let report = scheduler.run_cycle();
        if json {
            println!("{}", TelemetryFrame::capture(&scheduler, &report).to_json()?);
        }

        if scheduler.state(target).map_or(false, CommandState::is_ended) {
            info!("{} ended on cycle {}", target, report.cycle);
            break;
        }
    }

    scheduler.shutdown();
    print_summary(&scheduler, target, drive.borrow().left_position_inches(), distance);
    Ok(())
}

fn print_summary(scheduler: &Scheduler, target: CommandId, position: f64, distance: f64) {
    let diagnostics = scheduler.diagnostics();

    println!();
    println!("{}", "Robocycle simulation summary".bright_blue().bold());
    println!("{}", "============================".bright_blue());
    println!("{:<18} {}", "Cycles:", diagnostics.cycle);

    let outcome = match scheduler.state(target) {
        Some(CommandState::Ended(EndReason::Finished)) => "finished".green(),
        Some(CommandState::Ended(reason)) => format!("{:?}", reason).to_lowercase().yellow(),
        Some(state) => format!("{:?}", state).to_lowercase().yellow(),
        None => "unknown".red(),
    };
    println!("{:<18} {}", "Drive distance:", outcome);
    println!("{:<18} {:.2} in of {:.2} in", "Left position:", position, distance);

    let faults = diagnostics.faults;
    let hardware = if faults.hardware > 0 {
        faults.hardware.to_string().yellow()
    } else {
        faults.hardware.to_string().green()
    };
    let command = if faults.command > 0 {
        faults.command.to_string().red()
    } else {
        faults.command.to_string().green()
    };
    println!("{:<18} {}", "Hardware faults:", hardware);
    println!("{:<18} {}", "Command faults:", command);
    println!("{:<18} {}", "Subsystem faults:", faults.subsystem);
    println!("{:<18} {}", "Conflicts:", faults.conflicts);
    println!(
        "{:<18} {} ok / {} failed",
        "Reads:", diagnostics.hal.updates, diagnostics.hal.read_faults
    );
    println!(
        "{:<18} {} ok / {} failed",
        "Writes:", diagnostics.hal.writes, diagnostics.hal.write_faults
    );

    if let Some(last) = diagnostics.last_fault {
        println!(
            "{:<18} {} (cycle {}, {})",
            "Last fault:",
            last.message.as_str().dimmed(),
            last.cycle,
            last.source.as_str()
        );
    }
}
