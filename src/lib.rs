//! # The Fleetdiag Crate
//! Diagnostic session engine for vehicle fleets. Talks UDS (ISO 14229) to ECUs over
//! CAN-FD with ISO-TP style segmentation, and schedules diagnostic sessions across a
//! fleet with a bounded number of concurrent sessions.
//!
//! ## Single Vehicle Example
//!
//! A [`uds::UdsClient`] owns one CAN channel and one ECU address pair. The simulated
//! ECU below can be swapped for any [`can::BusAdapter`] implementation without
//! touching protocol logic.
//!
//! ```rust
//! use fleetdiag::can::sim::SimEcu;
//! use fleetdiag::uds::UdsClient;
//!
//! async fn single_vehicle_example() {
//!     let mut client = UdsClient::new(SimEcu::default(), 0x7e0);
//!     client.connect();
//!
//!     let dtcs = client.read_dtc(0xff).await.unwrap();
//!     for dtc in &dtcs {
//!         println!("{}: status 0x{:02x}", dtc.code, dtc.status);
//!     }
//! }
//! ```
//!
//! ## Fleet Example
//!
//! The [`fleet::Fleet`] scheduler owns the vehicle registry, opens one UDS session per
//! vehicle, and bounds how many sessions run at once.
//!
//! ```rust
//! use fleetdiag::can::sim::SimEcu;
//! use fleetdiag::fleet::{Fleet, FleetVehicle, VehicleInfo};
//! use fleetdiag::uds::UdsClient;
//!
//! async fn fleet_example() {
//!     let fleet = Fleet::new(2, 100, |_vehicle: &FleetVehicle| {
//!         UdsClient::new(SimEcu::default(), 0x7e0)
//!     });
//!
//!     let info = VehicleInfo::new("WVW123456789ABCDE", "Volkswagen", "Golf", 2021);
//!     fleet.add_vehicle("VEH001", info).unwrap();
//!
//!     let report = fleet.scan_fleet().await;
//!     println!("{}/{} vehicles scanned", report.vehicles_scanned, report.total_vehicles);
//! }
//! ```

pub mod can;
pub mod collector;
mod error;
pub mod fleet;
pub mod isotp;
pub mod uds;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
