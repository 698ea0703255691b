//! Fleet diagnostics CLI. Drives a simulated fleet end to end: single-vehicle
//! diagnostics, fleet-wide scans, and JSON export of the recorded history.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use fleetdiag::can::sim::SimEcu;
use fleetdiag::fleet::{Fleet, FleetVehicle, VehicleInfo};
use fleetdiag::uds::UdsClient;

#[derive(Parser)]
#[command(name = "fleetdiag")]
#[command(author, version, about = "Fleet vehicle diagnostics over UDS on CAN-FD")]
struct Cli {
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export recorded diagnostics to a JSON file
    Export {
        /// Output file path
        #[arg(long, default_value = "diagnostics_export.json")]
        output: PathBuf,

        /// Export a single vehicle instead of the whole fleet
        #[arg(long)]
        vehicle: Option<String>,
    },

    /// Run a fleet-wide diagnostic scan and print the summary counters
    Scan {
        /// Also persist the scan summary as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run diagnostics for a single vehicle
    Diagnose {
        /// Vehicle identifier, e.g. VEH001
        vehicle_id: String,
    },
}

/// The demo fleet from the sample data set, each vehicle backed by its own simulated
/// ECU channel.
fn sample_fleet(
) -> fleetdiag::Result<Fleet<SimEcu, impl Fn(&FleetVehicle) -> UdsClient<SimEcu> + Send + Sync>> {
    let fleet = Fleet::new(2, 1000, |vehicle: &FleetVehicle| {
        let sim = match vehicle.vehicle_id.as_str() {
            "VEH001" => SimEcu::default().with_dtcs(&[("P0101", 0x2f), ("P0102", 0x2f)]),
            "VEH003" => SimEcu::default().with_dtcs(&[("P0420", 0x2f)]),
            _ => SimEcu::default().with_dtcs(&[]),
        }
        .with_vin(&vehicle.info.vin)
        .with_did(0xf40c, &[0x0b, 0xb8]) // 750 rpm
        .with_did(0xf405, &[0x82]) // 90 C coolant
        .with_did(0xf40f, &[0x55]) // 45 C intake air
        .with_did(0xf40d, &[0x00]); // stationary

        UdsClient::new(sim, 0x7e0)
    });

    let vehicles = [
        ("VEH001", "WVW123456789ABCDE", "Volkswagen", "Golf", 2021),
        ("VEH002", "WAUZZZ3C5XE123456", "Audi", "A4", 2022),
        ("VEH003", "JH2RC5004LM101111", "Honda", "Civic", 2020),
        ("VEH004", "1G1FB1E30D1234567", "Chevrolet", "Cruze", 2019),
    ];
    for (id, vin, make, model, year) in vehicles {
        fleet.add_vehicle(id, VehicleInfo::new(vin, make, model, year))?;
        fleet.set_online(id, true)?;
    }

    Ok(fleet)
}

async fn run(cli: Cli) -> fleetdiag::Result<()> {
    let fleet = sample_fleet()?;

    match cli.command {
        Commands::Export { output, vehicle } => {
            // Collect fresh diagnostics before exporting
            fleet.scan_fleet().await;
            fleet.export_diagnostics(&output, vehicle.as_deref())?;
            println!("Diagnostics exported to {}", output.display());
        }
        Commands::Scan { output } => {
            let report = fleet.scan_fleet().await;

            println!("=== FLEET SCAN RESULTS ===");
            println!("Total Vehicles: {}", report.total_vehicles);
            println!("Vehicles Scanned: {}", report.vehicles_scanned);
            println!("Vehicles with Issues: {}", report.vehicles_with_issues);
            println!("Total DTCs Found: {}", report.total_dtcs);

            if let Some(path) = output {
                fleet.export_scan(&path, &report)?;
                println!("Scan results saved to {}", path.display());
            }
        }
        Commands::Diagnose { vehicle_id } => {
            let report = fleet.diagnose(&vehicle_id).await?;
            let history = fleet.history(&vehicle_id, 10);

            println!("Vehicle ID: {}", report.vehicle_id);
            println!("DTC Count: {}", report.dtc_count);
            println!("DTC Codes: {:?}", report.dtc_codes);
            println!("History Length: {}", history.len());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
