//! Fleet scheduler. Owns the vehicle registry, opens one UDS session per vehicle, and
//! bounds how many diagnostic sessions run concurrently during a fleet scan.
//!
//! Vehicles beyond the concurrency bound wait their turn in FIFO order; a failed
//! vehicle is logged and counted as not scanned, and the scan proceeds with the
//! remainder.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::can::{unix_timestamp, BusAdapter};
use crate::collector::{DiagnosticsCollector, FleetSummary, MetricMap};
use crate::error::Error;
use crate::uds::{NegativeResponseCode, UdsClient};
use crate::Result;

pub use crate::collector::VehicleInfo;

/// A vehicle known to the fleet registry. Created on registration, mutated by status
/// updates, removed explicitly. The scheduler is the sole owner.
#[derive(Debug, Clone)]
#[derive(serde::Serialize)]
pub struct FleetVehicle {
    pub vehicle_id: String,
    pub info: VehicleInfo,
    pub online: bool,
    /// Unix epoch seconds of the last status update
    pub last_seen: Option<f64>,
    pub diagnostics_enabled: bool,
}

/// Outcome of one vehicle's diagnostic session.
#[derive(Debug, Clone)]
#[derive(serde::Serialize)]
pub struct DiagnosticReport {
    pub vehicle_id: String,
    pub dtc_count: usize,
    pub dtc_codes: Vec<String>,
}

/// Aggregate outcome of a fleet-wide scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize)]
pub struct ScanReport {
    pub total_vehicles: usize,
    pub vehicles_scanned: usize,
    pub vehicles_with_issues: usize,
    pub total_dtcs: usize,
}

/// Registry-level fleet state plus the collector's aggregate summary.
#[derive(Debug, Clone)]
#[derive(serde::Serialize)]
pub struct FleetStatus {
    pub total_vehicles: usize,
    pub online_vehicles: usize,
    pub offline_vehicles: usize,
    pub diagnostics_summary: FleetSummary,
}

/// Export shape for a fleet scan: the scan counters nested with the fleet status.
#[derive(Debug, Clone)]
#[derive(serde::Serialize)]
pub struct FleetScanExport {
    pub scan_results: ScanReport,
    pub fleet_status: FleetStatus,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MetricGroup {
    Engine,
    Emission,
    Performance,
}

/// One data identifier sampled during a diagnostic session and folded into the
/// diagnostic record's metric maps.
#[derive(Debug, Copy, Clone)]
pub struct MetricDef {
    pub did: u16,
    pub name: &'static str,
    pub group: MetricGroup,
    pub scale: f64,
    pub offset: f64,
}

/// OBD-bridged data identifiers (0xF400 + PID) read during every diagnostic session.
/// Identifiers the ECU does not support are simply absent from the record.
pub static METRIC_CATALOG: &[MetricDef] = &[
    MetricDef { did: 0xf40c, name: "rpm", group: MetricGroup::Engine, scale: 0.25, offset: 0.0 },
    MetricDef { did: 0xf405, name: "coolant_temp", group: MetricGroup::Engine, scale: 1.0, offset: -40.0 },
    MetricDef { did: 0xf40f, name: "intake_air_temp", group: MetricGroup::Engine, scale: 1.0, offset: -40.0 },
    MetricDef { did: 0xf414, name: "o2_sensor_1", group: MetricGroup::Emission, scale: 0.005, offset: 0.0 },
    MetricDef { did: 0xf45e, name: "fuel_rate", group: MetricGroup::Performance, scale: 0.05, offset: 0.0 },
    MetricDef { did: 0xf40d, name: "vehicle_speed", group: MetricGroup::Performance, scale: 1.0, offset: 0.0 },
];

fn decode_metric(def: &MetricDef, bytes: &[u8]) -> Option<serde_json::Value> {
    let raw = match bytes.len() {
        0 => return None,
        1 => bytes[0] as u64,
        _ => u16::from_be_bytes([bytes[0], bytes[1]]) as u64,
    };
    Some(serde_json::Value::from(raw as f64 * def.scale + def.offset))
}

/// Manages a fleet of vehicles for diagnostics.
///
/// `open_session` is the per-vehicle channel seam: it produces a fresh
/// [`UdsClient`] (with its own bus binding) for each diagnostic session, modeling one
/// physical CAN channel per vehicle or a multiplexed channel addressed per vehicle.
pub struct Fleet<A, F>
where
    A: BusAdapter + 'static,
    F: Fn(&FleetVehicle) -> UdsClient<A> + Send + Sync + 'static,
{
    vehicles: Arc<Mutex<HashMap<String, FleetVehicle>>>,
    collector: Arc<Mutex<DiagnosticsCollector>>,
    open_session: Arc<F>,
    max_concurrent: usize,
    cancelled: Arc<AtomicBool>,
}

impl<A, F> Fleet<A, F>
where
    A: BusAdapter + 'static,
    F: Fn(&FleetVehicle) -> UdsClient<A> + Send + Sync + 'static,
{
    pub fn new(max_concurrent: usize, history_capacity: usize, open_session: F) -> Self {
        assert!(max_concurrent > 0, "at least one concurrent session required");
        Self {
            vehicles: Arc::new(Mutex::new(HashMap::new())),
            collector: Arc::new(Mutex::new(DiagnosticsCollector::new(history_capacity))),
            open_session: Arc::new(open_session),
            max_concurrent,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add a vehicle to the registry and register it with the collector.
    pub fn add_vehicle(&self, vehicle_id: &str, info: VehicleInfo) -> Result<()> {
        let mut vehicles = self.vehicles.lock().unwrap();
        if vehicles.contains_key(vehicle_id) {
            return Err(Error::DuplicateVehicle(vehicle_id.to_string()));
        }

        self.collector
            .lock()
            .unwrap()
            .register(vehicle_id, info.clone())?;

        info!(
            "Vehicle added to fleet: {} ({} {})",
            vehicle_id, info.make, info.model
        );
        vehicles.insert(
            vehicle_id.to_string(),
            FleetVehicle {
                vehicle_id: vehicle_id.to_string(),
                info,
                online: false,
                last_seen: None,
                diagnostics_enabled: true,
            },
        );
        Ok(())
    }

    pub fn remove_vehicle(&self, vehicle_id: &str) -> Result<()> {
        let mut vehicles = self.vehicles.lock().unwrap();
        vehicles
            .remove(vehicle_id)
            .ok_or_else(|| Error::UnknownVehicle(vehicle_id.to_string()))?;
        self.collector.lock().unwrap().remove(vehicle_id)?;
        info!("Vehicle removed from fleet: {}", vehicle_id);
        Ok(())
    }

    pub fn set_online(&self, vehicle_id: &str, online: bool) -> Result<()> {
        let mut vehicles = self.vehicles.lock().unwrap();
        let vehicle = vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| Error::UnknownVehicle(vehicle_id.to_string()))?;
        vehicle.online = online;
        vehicle.last_seen = Some(unix_timestamp());
        info!(
            "Vehicle {} is now {}",
            vehicle_id,
            if online { "online" } else { "offline" }
        );
        Ok(())
    }

    pub fn set_diagnostics_enabled(&self, vehicle_id: &str, enabled: bool) -> Result<()> {
        let mut vehicles = self.vehicles.lock().unwrap();
        let vehicle = vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| Error::UnknownVehicle(vehicle_id.to_string()))?;
        vehicle.diagnostics_enabled = enabled;
        Ok(())
    }

    pub fn vehicle(&self, vehicle_id: &str) -> Option<FleetVehicle> {
        self.vehicles.lock().unwrap().get(vehicle_id).cloned()
    }

    pub fn vehicles(&self) -> Vec<FleetVehicle> {
        let mut vehicles: Vec<FleetVehicle> =
            self.vehicles.lock().unwrap().values().cloned().collect();
        vehicles.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        vehicles
    }

    /// Point-in-time snapshot; advisory only, never used for admission decisions.
    pub fn fleet_status(&self) -> FleetStatus {
        let vehicles = self.vehicles.lock().unwrap();
        let online = vehicles.values().filter(|v| v.online).count();
        FleetStatus {
            total_vehicles: vehicles.len(),
            online_vehicles: online,
            offline_vehicles: vehicles.len() - online,
            diagnostics_summary: self.collector.lock().unwrap().fleet_summary(),
        }
    }

    pub fn history(&self, vehicle_id: &str, limit: usize) -> Vec<crate::collector::VehicleDiagnostics> {
        self.collector.lock().unwrap().history(vehicle_id, limit)
    }

    pub fn export_diagnostics(&self, path: &Path, vehicle_id: Option<&str>) -> Result<()> {
        self.collector.lock().unwrap().export_to_file(path, vehicle_id)
    }

    pub fn export_scan(&self, path: &Path, scan_results: &ScanReport) -> Result<()> {
        let export = FleetScanExport {
            scan_results: scan_results.clone(),
            fleet_status: self.fleet_status(),
        };
        let json = serde_json::to_string_pretty(&export).map_err(|e| Error::Export(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| Error::Export(e.to_string()))?;
        info!("Scan results exported to {}", path.display());
        Ok(())
    }

    /// Run one diagnostic session against a single vehicle: read DTCs, sample the
    /// metric catalog, and record the result into the collector.
    pub async fn diagnose(&self, vehicle_id: &str) -> Result<DiagnosticReport> {
        let vehicle = self
            .vehicle(vehicle_id)
            .ok_or_else(|| Error::UnknownVehicle(vehicle_id.to_string()))?;
        Self::run_diagnostic(self.open_session.as_ref(), self.collector.as_ref(), vehicle).await
    }

    async fn run_diagnostic(
        open_session: &F,
        collector: &Mutex<DiagnosticsCollector>,
        vehicle: FleetVehicle,
    ) -> Result<DiagnosticReport> {
        info!("Starting diagnostics for {}...", vehicle.vehicle_id);

        let mut client = open_session(&vehicle);
        client.connect();
        let result = Self::collect_diagnostics(&mut client, collector, &vehicle).await;
        client.disconnect();

        if let Ok(report) = &result {
            info!(
                "Diagnostics completed for {}: {} DTCs found",
                vehicle.vehicle_id, report.dtc_count
            );
        }
        result
    }

    async fn collect_diagnostics(
        client: &mut UdsClient<A>,
        collector: &Mutex<DiagnosticsCollector>,
        vehicle: &FleetVehicle,
    ) -> Result<DiagnosticReport> {
        let dtcs = client.read_dtc(0xff).await?;
        let dtc_codes: Vec<String> = dtcs.iter().map(|d| d.code.clone()).collect();

        let dids: Vec<u16> = METRIC_CATALOG.iter().map(|m| m.did).collect();
        let values = match client.read_data_by_identifier(&dids).await {
            Ok(values) => values,
            // An ECU that supports none of the catalog is not a failed session
            Err(Error::Uds(crate::uds::error::Error::NegativeResponse(
                NegativeResponseCode::RequestOutOfRange,
            ))) => HashMap::new(),
            Err(e) => return Err(e),
        };

        let mut engine_data = MetricMap::new();
        let mut emission_data = MetricMap::new();
        let mut performance_data = MetricMap::new();
        for def in METRIC_CATALOG {
            let Some(value) = values.get(&def.did).and_then(|b| decode_metric(def, b)) else {
                debug!("Metric {} not reported by {}", def.name, vehicle.vehicle_id);
                continue;
            };
            let map = match def.group {
                MetricGroup::Engine => &mut engine_data,
                MetricGroup::Emission => &mut emission_data,
                MetricGroup::Performance => &mut performance_data,
            };
            map.insert(def.name.to_string(), value);
        }

        collector.lock().unwrap().record(
            &vehicle.vehicle_id,
            dtc_codes.clone(),
            engine_data,
            emission_data,
            performance_data,
        )?;

        Ok(DiagnosticReport {
            vehicle_id: vehicle.vehicle_id.clone(),
            dtc_count: dtc_codes.len(),
            dtc_codes,
        })
    }

    /// Stop admitting new vehicles into a running scan. In-flight sessions finish or
    /// fail over their own timeouts; transport state is never torn down mid-session.
    pub fn cancel_scan(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Scan the whole fleet, at most `max_concurrent` sessions in flight at a time.
    /// Excess vehicles queue in FIFO order. A single vehicle's failure does not abort
    /// the scan; it is logged and counted as not scanned.
    pub async fn scan_fleet(&self) -> ScanReport {
        self.cancelled.store(false, Ordering::SeqCst);
        info!("Starting fleet-wide diagnostics scan...");

        let snapshot = self.vehicles();
        let mut report = ScanReport {
            total_vehicles: snapshot.len(),
            vehicles_scanned: 0,
            vehicles_with_issues: 0,
            total_dtcs: 0,
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<Option<DiagnosticReport>> = JoinSet::new();

        for vehicle in snapshot {
            if !vehicle.diagnostics_enabled {
                debug!("Diagnostics disabled for {}, skipping", vehicle.vehicle_id);
                continue;
            }

            let semaphore = semaphore.clone();
            let open_session = self.open_session.clone();
            let collector = self.collector.clone();
            let cancelled = self.cancelled.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                if cancelled.load(Ordering::SeqCst) {
                    debug!("Scan cancelled, skipping {}", vehicle.vehicle_id);
                    return None;
                }

                let vehicle_id = vehicle.vehicle_id.clone();
                match Self::run_diagnostic(open_session.as_ref(), collector.as_ref(), vehicle).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        warn!("Diagnostics failed for {}: {}", vehicle_id, e);
                        None
                    }
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some(diagnostic)) => {
                    report.vehicles_scanned += 1;
                    if diagnostic.dtc_count > 0 {
                        report.vehicles_with_issues += 1;
                        report.total_dtcs += diagnostic.dtc_count;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Diagnostic task failed: {}", e),
            }
        }

        info!(
            "Fleet scan complete: {}/{} vehicles scanned",
            report.vehicles_scanned, report.total_vehicles
        );
        report
    }
}
