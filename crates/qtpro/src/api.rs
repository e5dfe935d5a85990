//! Parameter tables and fixed protocol tokens.
//!
//! Every request names a parameter by its semantic name (`"masking_max"`),
//! which the tables map to the device's four-letter mnemonic (`MAXM`). There
//! is one table per scope and direction; lookups work both ways so that
//! replies can be translated back into semantic names.
//!
//! | Scope  | Direction | Header    | Reply header |
//! |--------|-----------|-----------|--------------|
//! | system | get       | `CSGET,`  | `CSGET,`     |
//! | system | set       | `CSSET,`  | `ACK,`       |
//! | zone   | get       | `CZGET,`  | `CZGET,`     |
//! | zone   | set       | `CZSET,`  | `ACK,`       |
//!
//! Zone commands carry the zone index as a single decimal digit directly
//! after the mnemonic, so no mnemonic may itself end in a digit.

use qtpro_core::types::{Direction, Scope};

// ---------------------------------------------------------------------------
// Headers and reserved commands
// ---------------------------------------------------------------------------

/// Header for system-scope reads.
pub const SYSTEM_GET_HEADER: &str = "CSGET,";
/// Header for system-scope writes.
pub const SYSTEM_SET_HEADER: &str = "CSSET,";
/// Header for zone-scope reads.
pub const ZONE_GET_HEADER: &str = "CZGET,";
/// Header for zone-scope writes.
pub const ZONE_SET_HEADER: &str = "CZSET,";
/// Header of every set acknowledgement, whatever the scope.
pub const ACK_HEADER: &str = "ACK,";

/// Request every system parameter at once. Replied to as `{ALSYS=...}`.
pub const ALL_SYSTEM: &str = "ALSYS";
/// Request every parameter of one zone; the zone digit follows.
/// Replied to as `{ALZONE<d>=...}`.
pub const ALL_ZONE: &str = "ALZONE";

/// Magic sequence that resets the controller.
pub const RESET_COMMAND: &str = "ZYXWvU";

// ---------------------------------------------------------------------------
// ParameterTable
// ---------------------------------------------------------------------------

/// Immutable mapping between semantic parameter names and mnemonics for
/// one (scope, direction) pair.
#[derive(Debug)]
pub struct ParameterTable {
    scope: Scope,
    direction: Direction,
    entries: &'static [(&'static str, &'static str)],
}

impl ParameterTable {
    const fn new(
        scope: Scope,
        direction: Direction,
        entries: &'static [(&'static str, &'static str)],
    ) -> Self {
        ParameterTable {
            scope,
            direction,
            entries,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The mnemonic for a semantic parameter name.
    pub fn mnemonic(&self, name: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, m)| *m)
    }

    /// The semantic name for a mnemonic (reverse lookup).
    pub fn name_for(&self, mnemonic: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(_, m)| *m == mnemonic)
            .map(|(n, _)| *n)
    }

    /// Whether `name` is a parameter in this table.
    pub fn contains(&self, name: &str) -> bool {
        self.mnemonic(name).is_some()
    }

    /// All semantic names, in table order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    /// All `(name, mnemonic)` pairs, in table order.
    pub fn entries(&self) -> &'static [(&'static str, &'static str)] {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The command header for this table.
    pub fn header(&self) -> &'static str {
        header(self.scope, self.direction)
    }
}

/// The command header for a scope and direction.
pub fn header(scope: Scope, direction: Direction) -> &'static str {
    match (scope, direction) {
        (Scope::System, Direction::Get) => SYSTEM_GET_HEADER,
        (Scope::System, Direction::Set) => SYSTEM_SET_HEADER,
        (Scope::Zone, Direction::Get) => ZONE_GET_HEADER,
        (Scope::Zone, Direction::Set) => ZONE_SET_HEADER,
    }
}

/// The table for a scope and direction.
pub fn table(scope: Scope, direction: Direction) -> &'static ParameterTable {
    match (scope, direction) {
        (Scope::System, Direction::Get) => &SYSTEM_GET,
        (Scope::System, Direction::Set) => &SYSTEM_SET,
        (Scope::Zone, Direction::Get) => &ZONE_GET,
        (Scope::Zone, Direction::Set) => &ZONE_SET,
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Readable system parameters.
pub static SYSTEM_GET: ParameterTable = ParameterTable::new(
    Scope::System,
    Direction::Get,
    &[
        ("mac_address", "MACA"),
        ("firmware_version", "FIRM"),
        ("lock", "LOCK"),
        ("sensor_a", "SENA"),
        ("sensor_b", "SENB"),
        ("ip_address", "IPAD"),
        ("subnet_mask", "SUBM"),
        ("gateway", "GATE"),
        ("dhcp", "DHCP"),
        ("unit_name", "UNAM"),
        ("host_name", "HNAM"),
        ("serial_number", "SERN"),
        ("time", "TIME"),
        ("date", "DATE"),
    ],
);

/// Writable system parameters.
pub static SYSTEM_SET: ParameterTable = ParameterTable::new(
    Scope::System,
    Direction::Set,
    &[
        ("unit_name", "UNAM"),
        ("host_name", "HNAM"),
        ("lock", "LOCK"),
        ("ip_address", "IPAD"),
        ("subnet_mask", "SUBM"),
        ("gateway", "GATE"),
        ("dhcp", "DHCP"),
        ("time", "TIME"),
        ("date", "DATE"),
    ],
);

/// Readable zone parameters.
pub static ZONE_GET: ParameterTable = ParameterTable::new(
    Scope::Zone,
    Direction::Get,
    &[
        ("zone_name", "ZNAM"),
        ("masking_max", "MAXM"),
        ("masking_min", "MINM"),
        ("masking_level", "MLVL"),
        ("masking_enabled", "MENA"),
        ("paging_level", "PLVL"),
        ("paging_enabled", "PENA"),
        ("music_level", "MUSL"),
        ("music_enabled", "MUSE"),
        ("ramp_enabled", "RAMP"),
        ("ramp_time", "RTIM"),
        ("time_of_day_enabled", "TODE"),
    ],
);

/// Writable zone parameters.
pub static ZONE_SET: ParameterTable = ParameterTable::new(
    Scope::Zone,
    Direction::Set,
    &[
        ("zone_name", "ZNAM"),
        ("masking_max", "MAXM"),
        ("masking_min", "MINM"),
        ("masking_level", "MLVL"),
        ("masking_enabled", "MENA"),
        ("paging_level", "PLVL"),
        ("paging_enabled", "PENA"),
        ("music_level", "MUSL"),
        ("music_enabled", "MUSE"),
        ("ramp_time", "RTIM"),
    ],
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn all_tables() -> [&'static ParameterTable; 4] {
        [&SYSTEM_GET, &SYSTEM_SET, &ZONE_GET, &ZONE_SET]
    }

    #[test]
    fn mnemonics_are_unique_per_table() {
        for table in all_tables() {
            let mut seen = HashSet::new();
            for (_, mnemonic) in table.entries() {
                assert!(
                    seen.insert(*mnemonic),
                    "duplicate mnemonic {mnemonic} in {} {} table",
                    table.scope(),
                    table.direction()
                );
            }
        }
    }

    #[test]
    fn names_are_unique_per_table() {
        for table in all_tables() {
            let names: HashSet<_> = table.names().collect();
            assert_eq!(names.len(), table.len());
        }
    }

    #[test]
    fn no_mnemonic_ends_in_a_digit() {
        for table in all_tables() {
            for (name, mnemonic) in table.entries() {
                let last = mnemonic.chars().last().unwrap();
                assert!(!last.is_ascii_digit(), "{name} -> {mnemonic}");
            }
        }
        assert!(!ALL_SYSTEM.ends_with(|c: char| c.is_ascii_digit()));
        assert!(!ALL_ZONE.ends_with(|c: char| c.is_ascii_digit()));
    }

    #[test]
    fn every_settable_parameter_is_gettable() {
        for (set, get) in [(&SYSTEM_SET, &SYSTEM_GET), (&ZONE_SET, &ZONE_GET)] {
            for (name, mnemonic) in set.entries() {
                assert_eq!(get.mnemonic(name), Some(*mnemonic), "{name}");
            }
        }
    }

    #[test]
    fn lookups_round_trip() {
        assert_eq!(SYSTEM_GET.mnemonic("ip_address"), Some("IPAD"));
        assert_eq!(SYSTEM_GET.name_for("IPAD"), Some("ip_address"));
        assert_eq!(ZONE_SET.mnemonic("masking_max"), Some("MAXM"));
        assert_eq!(ZONE_GET.name_for("MAXM"), Some("masking_max"));
        assert_eq!(ZONE_GET.mnemonic("ip_address"), None);
        assert_eq!(SYSTEM_GET.name_for("XXXX"), None);
    }

    #[test]
    fn read_only_parameters_are_not_settable() {
        assert!(SYSTEM_GET.contains("firmware_version"));
        assert!(!SYSTEM_SET.contains("firmware_version"));
        assert!(!SYSTEM_SET.contains("mac_address"));
        assert!(!ZONE_SET.contains("ramp_enabled"));
    }

    #[test]
    fn table_selection() {
        assert_eq!(table(Scope::Zone, Direction::Set).header(), "CZSET,");
        assert_eq!(table(Scope::System, Direction::Get).header(), "CSGET,");
        assert_eq!(header(Scope::System, Direction::Set), "CSSET,");
        assert_eq!(header(Scope::Zone, Direction::Get), "CZGET,");
        let t = table(Scope::Zone, Direction::Get);
        assert_eq!((t.scope(), t.direction()), (Scope::Zone, Direction::Get));
    }
}
