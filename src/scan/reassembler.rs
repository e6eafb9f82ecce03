use std::collections::BTreeMap;

use serde::Serialize;

use super::advertising::AdvertisingReport;

/// Reports collected for one address during one window.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct MergedBatch {
    address: String,
    reports: Vec<AdvertisingReport>,
}

impl MergedBatch {
    #[must_use]
    pub fn new(address: String, reports: Vec<AdvertisingReport>) -> Self {
        Self { address, reports }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Reports in arrival order.
    #[must_use]
    pub fn reports(&self) -> &[AdvertisingReport] {
        &self.reports
    }
}

/// Groups reports by address between two flushes.
#[derive(Debug, Default)]
pub struct PacketReassembler {
    pending: BTreeMap<String, Vec<AdvertisingReport>>,
}

impl PacketReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, report: AdvertisingReport) {
        self.pending
            .entry(report.address().to_string())
            .or_default()
            .push(report);
    }

    /// Drains every pending address into one batch each.
    pub fn flush(&mut self) -> Vec<MergedBatch> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(address, reports)| MergedBatch::new(address, reports))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
