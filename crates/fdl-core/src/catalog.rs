//! Measurement-point catalogs.
//!
//! Each publishing application has a fixed catalog of the points it can
//! schedule. A subscription to a point outside the publisher's catalog is
//! never valid, whatever its period.

use serde::{Deserialize, Serialize};

/// Measurement point identifier as carried on the wire.
pub type MpId = u32;

/// Smallest schedulable publish period. Every valid period is a multiple of it.
pub const MINIMUM_PERIOD_MS: u32 = 1000;

/// Number of stamps carried by one timestamp-kind point per publish.
pub const TIMESTAMP_BURST_LEN: usize = 9;

/// Well-known measurement point ids.
pub mod mp {
    use super::MpId;

    pub const SOURCE_TIME_SEC: MpId = 1001;
    pub const SOURCE_TIME_NSEC: MpId = 1002;
    pub const PFP_VALUE: MpId = 1003;
    pub const PTLT_TEMPERATURE: MpId = 1004;
    pub const PTRT_TEMPERATURE: MpId = 1005;
    pub const TCMP: MpId = 1006;
    pub const COP_HO_REAL: MpId = 1007;
    pub const COP_HO_IMAG: MpId = 1008;
    pub const COP_FO_REAL: MpId = 1009;
    pub const COP_FO_IMAG: MpId = 1010;
    pub const CRANK_HO_REAL: MpId = 1011;
    pub const CRANK_HO_IMAG: MpId = 1012;
    pub const CRANK_FO_REAL: MpId = 1013;
    pub const CRANK_FO_IMAG: MpId = 1014;
    pub const TURBO_REAL: MpId = 1015;
    pub const TURBO_IMAG: MpId = 1016;
    pub const COP_HALFORDER_AMPLITUDE: MpId = 1017;
    pub const COP_HALFORDER_ENERGY: MpId = 1018;
    pub const COP_HALFORDER_PHASE: MpId = 1019;
    pub const COP_FIRSTORDER_AMPLITUDE: MpId = 1020;
    pub const COP_FIRSTORDER_ENERGY: MpId = 1021;
    pub const COP_FIRSTORDER_PHASE: MpId = 1022;
    pub const CRANK_HALFORDER_AMPLITUDE: MpId = 1023;
    pub const CRANK_HALFORDER_ENERGY: MpId = 1024;
    pub const CRANK_HALFORDER_PHASE: MpId = 1025;
    pub const CRANK_FIRSTORDER_AMPLITUDE: MpId = 1026;
    pub const CRANK_FIRSTORDER_ENERGY: MpId = 1027;
    pub const CRANK_FIRSTORDER_PHASE: MpId = 1028;
    pub const TURBO_OIL_FIRSTORDER_AMPLITUDE: MpId = 1029;
    pub const TURBO_OIL_FIRSTORDER_ENERGY: MpId = 1030;
    pub const CAM_SEC_1: MpId = 1031;
    pub const CAM_NSEC_1: MpId = 1032;
    pub const COP_PRESSURE: MpId = 1033;
    pub const CAM_SEC_2: MpId = 1034;
    pub const CAM_NSEC_2: MpId = 1035;
    pub const CAM_SEC_3: MpId = 1036;
    pub const CAM_NSEC_3: MpId = 1037;
    pub const CAM_SEC_4: MpId = 1038;
    pub const CAM_NSEC_4: MpId = 1039;
    pub const CAM_SEC_5: MpId = 1040;
    pub const CAM_NSEC_5: MpId = 1041;
    pub const CAM_SEC_6: MpId = 1042;
    pub const CAM_NSEC_6: MpId = 1043;
    pub const CAM_SEC_7: MpId = 1044;
    pub const CAM_NSEC_7: MpId = 1045;
    pub const CAM_SEC_8: MpId = 1046;
    pub const CAM_NSEC_8: MpId = 1047;
    pub const CAM_SEC_9: MpId = 1048;
    pub const CAM_NSEC_9: MpId = 1049;
}

/// What a point's published values mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MpKind {
    /// Converted physical reading. One value per requested sample.
    Logical,
    /// Burst of up to [`TIMESTAMP_BURST_LEN`] raw stamps, zero-terminated.
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: MpId,
    pub name: &'static str,
    pub kind: MpKind,
}

const fn logical(id: MpId, name: &'static str) -> CatalogEntry {
    CatalogEntry {
        id,
        name,
        kind: MpKind::Logical,
    }
}

const fn stamp(id: MpId, name: &'static str) -> CatalogEntry {
    CatalogEntry {
        id,
        name,
        kind: MpKind::Timestamp,
    }
}

/// The set of points one application family can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Catalog {
    pub family: &'static str,
    pub entries: &'static [CatalogEntry],
    /// Largest subscription a peer may send in one SUBSCRIBE.
    pub max_subscription: usize,
}

impl Catalog {
    /// Looks up a point by id.
    pub fn get(&self, id: MpId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Returns true if the point can be scheduled by this family.
    pub fn contains(&self, id: MpId) -> bool {
        self.get(id).is_some()
    }

    /// Kind of the point, if it is in the catalog.
    pub fn kind_of(&self, id: MpId) -> Option<MpKind> {
        self.get(id).map(|e| e.kind)
    }

    /// Ids in catalog order.
    pub fn ids(&self) -> impl Iterator<Item = MpId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    /// Looks up a catalog by family name (`simm` or `fdl`).
    pub fn by_family(family: &str) -> Option<&'static Catalog> {
        [&SIMM_CATALOG, &FDL_CATALOG]
            .into_iter()
            .find(|c| c.family.eq_ignore_ascii_case(family))
    }
}

static SIMM_ENTRIES: [CatalogEntry; 23] = [
    logical(mp::PFP_VALUE, "PFP_VALUE"),
    logical(mp::PTLT_TEMPERATURE, "PTLT_TEMPERATURE"),
    logical(mp::PTRT_TEMPERATURE, "PTRT_TEMPERATURE"),
    logical(mp::TCMP, "TCMP"),
    stamp(mp::CAM_SEC_1, "CAM_SEC_1"),
    stamp(mp::CAM_SEC_2, "CAM_SEC_2"),
    stamp(mp::CAM_SEC_3, "CAM_SEC_3"),
    stamp(mp::CAM_SEC_4, "CAM_SEC_4"),
    stamp(mp::CAM_SEC_5, "CAM_SEC_5"),
    stamp(mp::CAM_SEC_6, "CAM_SEC_6"),
    stamp(mp::CAM_SEC_7, "CAM_SEC_7"),
    stamp(mp::CAM_SEC_8, "CAM_SEC_8"),
    stamp(mp::CAM_SEC_9, "CAM_SEC_9"),
    stamp(mp::CAM_NSEC_1, "CAM_NSEC_1"),
    stamp(mp::CAM_NSEC_2, "CAM_NSEC_2"),
    stamp(mp::CAM_NSEC_3, "CAM_NSEC_3"),
    stamp(mp::CAM_NSEC_4, "CAM_NSEC_4"),
    stamp(mp::CAM_NSEC_5, "CAM_NSEC_5"),
    stamp(mp::CAM_NSEC_6, "CAM_NSEC_6"),
    stamp(mp::CAM_NSEC_7, "CAM_NSEC_7"),
    stamp(mp::CAM_NSEC_8, "CAM_NSEC_8"),
    stamp(mp::CAM_NSEC_9, "CAM_NSEC_9"),
    logical(mp::COP_PRESSURE, "COP_PRESSURE"),
];

static FDL_ENTRIES: [CatalogEntry; 14] = [
    logical(mp::COP_HALFORDER_AMPLITUDE, "COP_HALFORDER_AMPLITUDE"),
    logical(mp::COP_HALFORDER_ENERGY, "COP_HALFORDER_ENERGY"),
    logical(mp::COP_HALFORDER_PHASE, "COP_HALFORDER_PHASE"),
    logical(mp::COP_FIRSTORDER_AMPLITUDE, "COP_FIRSTORDER_AMPLITUDE"),
    logical(mp::COP_FIRSTORDER_ENERGY, "COP_FIRSTORDER_ENERGY"),
    logical(mp::COP_FIRSTORDER_PHASE, "COP_FIRSTORDER_PHASE"),
    logical(mp::CRANK_HALFORDER_AMPLITUDE, "CRANK_HALFORDER_AMPLITUDE"),
    logical(mp::CRANK_HALFORDER_ENERGY, "CRANK_HALFORDER_ENERGY"),
    logical(mp::CRANK_HALFORDER_PHASE, "CRANK_HALFORDER_PHASE"),
    logical(mp::CRANK_FIRSTORDER_AMPLITUDE, "CRANK_FIRSTORDER_AMPLITUDE"),
    logical(mp::CRANK_FIRSTORDER_ENERGY, "CRANK_FIRSTORDER_ENERGY"),
    logical(mp::CRANK_FIRSTORDER_PHASE, "CRANK_FIRSTORDER_PHASE"),
    logical(mp::TURBO_OIL_FIRSTORDER_AMPLITUDE, "TURBO_OIL_FIRSTORDER_AMPLITUDE"),
    logical(mp::TURBO_OIL_FIRSTORDER_ENERGY, "TURBO_OIL_FIRSTORDER_ENERGY"),
];

/// Sensor interface module: raw sensor readings and CAM zero-crossing stamps.
pub static SIMM_CATALOG: Catalog = Catalog {
    family: "simm",
    entries: &SIMM_ENTRIES,
    max_subscription: 23,
};

/// Frequency-domain analysis app: amplitude, energy and phase per order.
pub static FDL_CATALOG: Catalog = Catalog {
    family: "fdl",
    entries: &FDL_ENTRIES,
    max_subscription: 14,
};
