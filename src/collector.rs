//! Bounded diagnostics history and per-vehicle summaries.
//!
//! The collector owns every [`VehicleDiagnostics`] record after creation; records are
//! immutable and live in a strict-FIFO ring buffer. When the buffer is at capacity,
//! inserting a record evicts the globally oldest one regardless of which vehicle owns
//! it.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use tracing::{debug, info};

use crate::can::unix_timestamp;
use crate::error::Error;
use crate::Result;

/// Free-form string-keyed metric map, one per metric group.
pub type MetricMap = HashMap<String, serde_json::Value>;

/// Static vehicle identity, supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct VehicleInfo {
    pub vin: String,
    pub make: String,
    pub model: String,
    pub year: u16,
}

impl VehicleInfo {
    pub fn new(vin: &str, make: &str, model: &str, year: u16) -> Self {
        Self {
            vin: vin.to_string(),
            make: make.to_string(),
            model: model.to_string(),
            year,
        }
    }
}

/// One diagnostic capture for one vehicle. Immutable once created. The serialized
/// field order is part of the export contract; do not reorder.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize)]
pub struct VehicleDiagnostics {
    pub vehicle_id: String,
    /// Capture time, unix epoch seconds
    pub timestamp: f64,
    pub dtc_codes: Vec<String>,
    pub engine_data: MetricMap,
    pub emission_data: MetricMap,
    pub performance_data: MetricMap,
}

/// Per-vehicle summary state, updated on every recorded diagnostic.
#[derive(Debug, Clone)]
pub struct VehicleProfile {
    pub info: VehicleInfo,
    pub added_at: f64,
    pub last_diagnostic: Option<f64>,
    pub diagnostics_count: u64,
}

/// Aggregate counts over the collector's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize)]
pub struct FleetSummary {
    pub total_vehicles: usize,
    /// Vehicles with at least one nonempty DTC set among the buffered records.
    pub vehicles_with_dtc: usize,
    pub total_records: usize,
    pub buffer_used: usize,
    pub buffer_capacity: usize,
}

/// Collects diagnostic records for registered vehicles into a bounded FIFO buffer.
pub struct DiagnosticsCollector {
    capacity: usize,
    buffer: VecDeque<VehicleDiagnostics>,
    profiles: HashMap<String, VehicleProfile>,
}

impl DiagnosticsCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
            profiles: HashMap::new(),
        }
    }

    /// Register a vehicle. Re-registration is not permitted; replacing a profile
    /// requires an explicit [`DiagnosticsCollector::remove`] first.
    pub fn register(&mut self, vehicle_id: &str, info: VehicleInfo) -> Result<()> {
        if self.profiles.contains_key(vehicle_id) {
            return Err(Error::DuplicateVehicle(vehicle_id.to_string()));
        }

        self.profiles.insert(
            vehicle_id.to_string(),
            VehicleProfile {
                info,
                added_at: unix_timestamp(),
                last_diagnostic: None,
                diagnostics_count: 0,
            },
        );
        info!("Vehicle registered: {}", vehicle_id);
        Ok(())
    }

    /// Remove a vehicle's profile. Its already-buffered records stay until evicted.
    pub fn remove(&mut self, vehicle_id: &str) -> Result<()> {
        self.profiles
            .remove(vehicle_id)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownVehicle(vehicle_id.to_string()))
    }

    pub fn vehicles(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn profile(&self, vehicle_id: &str) -> Option<&VehicleProfile> {
        self.profiles.get(vehicle_id)
    }

    /// Create and store an immutable diagnostic record for a registered vehicle.
    /// Evicts the oldest buffered record when at capacity.
    pub fn record(
        &mut self,
        vehicle_id: &str,
        dtc_codes: Vec<String>,
        engine_data: MetricMap,
        emission_data: MetricMap,
        performance_data: MetricMap,
    ) -> Result<VehicleDiagnostics> {
        let profile = self
            .profiles
            .get_mut(vehicle_id)
            .ok_or_else(|| Error::UnknownVehicle(vehicle_id.to_string()))?;

        let diagnostic = VehicleDiagnostics {
            vehicle_id: vehicle_id.to_string(),
            timestamp: unix_timestamp(),
            dtc_codes,
            engine_data,
            emission_data,
            performance_data,
        };

        if self.buffer.len() >= self.capacity {
            let evicted = self.buffer.pop_front();
            debug!(
                "Buffer full, evicted record for {:?}",
                evicted.map(|e| e.vehicle_id)
            );
        }

        profile.last_diagnostic = Some(diagnostic.timestamp);
        profile.diagnostics_count += 1;
        self.buffer.push_back(diagnostic.clone());

        info!(
            "Diagnostics collected for {}: {} DTCs",
            vehicle_id,
            diagnostic.dtc_codes.len()
        );
        Ok(diagnostic)
    }

    /// Up to `limit` most recent records for a vehicle, oldest of the window first.
    pub fn history(&self, vehicle_id: &str, limit: usize) -> Vec<VehicleDiagnostics> {
        let matching: Vec<&VehicleDiagnostics> = self
            .buffer
            .iter()
            .filter(|d| d.vehicle_id == vehicle_id)
            .collect();

        let skip = matching.len().saturating_sub(limit);
        matching[skip..].iter().map(|d| (*d).clone()).collect()
    }

    pub fn fleet_summary(&self) -> FleetSummary {
        let vehicles_with_dtc = self
            .buffer
            .iter()
            .filter(|d| !d.dtc_codes.is_empty())
            .map(|d| d.vehicle_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();

        FleetSummary {
            total_vehicles: self.profiles.len(),
            vehicles_with_dtc,
            total_records: self.buffer.len(),
            buffer_used: self.buffer.len(),
            buffer_capacity: self.capacity,
        }
    }

    /// Buffered records, optionally filtered to one vehicle, in insertion order.
    pub fn export_records(&self, vehicle_id: Option<&str>) -> Vec<VehicleDiagnostics> {
        self.buffer
            .iter()
            .filter(|d| vehicle_id.is_none_or(|id| d.vehicle_id == id))
            .cloned()
            .collect()
    }

    /// Export diagnostics as a JSON array, one object per record.
    pub fn export_json(&self, vehicle_id: Option<&str>) -> Result<String> {
        serde_json::to_string_pretty(&self.export_records(vehicle_id))
            .map_err(|e| Error::Export(e.to_string()))
    }

    pub fn export_to_file(&self, path: &Path, vehicle_id: Option<&str>) -> Result<()> {
        let json = self.export_json(vehicle_id)?;
        std::fs::write(path, json).map_err(|e| Error::Export(e.to_string()))?;
        info!("Diagnostics exported to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> VehicleInfo {
        VehicleInfo::new("WVW123456789ABCDE", "Volkswagen", "Golf", 2021)
    }

    fn collect(collector: &mut DiagnosticsCollector, id: &str, dtcs: &[&str]) {
        collector
            .record(
                id,
                dtcs.iter().map(|s| s.to_string()).collect(),
                MetricMap::new(),
                MetricMap::new(),
                MetricMap::new(),
            )
            .unwrap();
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut collector = DiagnosticsCollector::new(10);
        collector.register("VEH001", info()).unwrap();
        assert_eq!(
            collector.register("VEH001", info()),
            Err(Error::DuplicateVehicle("VEH001".into()))
        );

        // Explicit remove + add is the supported re-registration path
        collector.remove("VEH001").unwrap();
        collector.register("VEH001", info()).unwrap();
    }

    #[test]
    fn record_requires_registration() {
        let mut collector = DiagnosticsCollector::new(10);
        let result = collector.record(
            "GHOST",
            vec![],
            MetricMap::new(),
            MetricMap::new(),
            MetricMap::new(),
        );
        assert_eq!(result, Err(Error::UnknownVehicle("GHOST".into())));
    }

    #[test]
    fn ring_buffer_evicts_oldest_first() {
        let mut collector = DiagnosticsCollector::new(3);
        collector.register("VEH001", info()).unwrap();

        for codes in [&["P0101"], &["P0102"], &["P0300"], &["P0420"]] {
            collect(&mut collector, "VEH001", codes);
        }

        let records = collector.export_records(None);
        assert_eq!(records.len(), 3);
        // The earliest inserted record is gone, the rest keep their relative order
        let codes: Vec<&str> = records.iter().map(|r| r.dtc_codes[0].as_str()).collect();
        assert_eq!(codes, vec!["P0102", "P0300", "P0420"]);
    }

    #[test]
    fn eviction_is_global_not_per_vehicle() {
        let mut collector = DiagnosticsCollector::new(2);
        collector.register("VEH001", info()).unwrap();
        collector.register("VEH002", info()).unwrap();

        collect(&mut collector, "VEH001", &["P0101"]);
        collect(&mut collector, "VEH002", &["P0102"]);
        collect(&mut collector, "VEH002", &["P0300"]);

        // VEH001's record was oldest and is evicted even though VEH002 owns the rest
        assert!(collector.history("VEH001", 10).is_empty());
        assert_eq!(collector.history("VEH002", 10).len(), 2);
    }

    #[test]
    fn history_returns_chronological_window() {
        let mut collector = DiagnosticsCollector::new(10);
        collector.register("VEH001", info()).unwrap();
        collector.register("VEH002", info()).unwrap();

        collect(&mut collector, "VEH001", &["P0101"]);
        collect(&mut collector, "VEH002", &["P0420"]);
        collect(&mut collector, "VEH001", &["P0102"]);
        collect(&mut collector, "VEH001", &["P0300"]);

        let history = collector.history("VEH001", 2);
        let codes: Vec<&str> = history.iter().map(|r| r.dtc_codes[0].as_str()).collect();
        assert_eq!(codes, vec!["P0102", "P0300"]);
    }

    #[test]
    fn summary_counts_vehicles_not_records() {
        let mut collector = DiagnosticsCollector::new(10);
        collector.register("VEH001", info()).unwrap();
        collector.register("VEH002", info()).unwrap();

        collect(&mut collector, "VEH001", &["P0101"]);
        collect(&mut collector, "VEH001", &["P0102"]);
        collect(&mut collector, "VEH002", &[]);

        let summary = collector.fleet_summary();
        assert_eq!(summary.total_vehicles, 2);
        assert_eq!(summary.vehicles_with_dtc, 1);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.buffer_used, 3);
        assert_eq!(summary.buffer_capacity, 10);
    }

    #[test]
    fn export_shape_is_stable() {
        let mut collector = DiagnosticsCollector::new(10);
        collector.register("VEH001", info()).unwrap();
        collect(&mut collector, "VEH001", &["P0101", "P0102"]);

        let json = collector.export_json(None).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let records = parsed.as_array().unwrap();
        assert_eq!(records.len(), 1);

        let record = records[0].as_object().unwrap();
        let fields: Vec<&String> = record.keys().collect();
        assert_eq!(
            fields,
            vec![
                "vehicle_id",
                "timestamp",
                "dtc_codes",
                "engine_data",
                "emission_data",
                "performance_data"
            ]
        );
    }
}
