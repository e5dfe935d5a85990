//! Qt Pro model definitions.
//!
//! The Qt Pro family shares one protocol; models differ only in how many
//! masking zones they drive. Zone indices on the wire are 0-based, so a
//! request for zone `n` is valid when `n < num_zones`.
//!
//! | Model  | Zones |
//! |--------|-------|
//! | QT300  | 3     |
//! | QT600  | 6     |

/// Static model definition for a Qt Pro controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QtProModel {
    /// Human-readable model name (e.g. "Qt Pro 300").
    pub name: &'static str,
    /// Identifier used in configuration and on the command line
    /// (e.g. "QT300").
    pub model_id: &'static str,
    /// Number of independently controlled zones.
    pub num_zones: u8,
}

impl QtProModel {
    /// Whether `zone` (0-based) exists on this model.
    pub fn has_zone(&self, zone: u8) -> bool {
        zone < self.num_zones
    }
}

/// Qt Pro 300: the small model, three zones.
pub fn qt_300() -> QtProModel {
    QtProModel {
        name: "Qt Pro 300",
        model_id: "QT300",
        num_zones: 3,
    }
}

/// Qt Pro 600: the large model, six zones.
pub fn qt_600() -> QtProModel {
    QtProModel {
        name: "Qt Pro 600",
        model_id: "QT600",
        num_zones: 6,
    }
}

/// Returns all supported models.
pub fn all_qtpro_models() -> Vec<QtProModel> {
    vec![qt_300(), qt_600()]
}

/// Look up a model by identifier.
///
/// Accepts the model id (`QT300`, `qt-600`, ...) case-insensitively, with
/// or without a hyphen, plus the aliases `small` and `large`.
pub fn model_by_name(name: &str) -> Option<QtProModel> {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '-' && *c != ' ')
        .collect::<String>()
        .to_ascii_uppercase();
    match normalized.as_str() {
        "QT300" | "SMALL" => Some(qt_300()),
        "QT600" | "LARGE" => Some(qt_600()),
        _ => None,
    }
}
