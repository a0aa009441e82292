//! Dataset registry: loads the dataset definitions from embedded TOML.
//!
//! Each `.toml` file in `packages/source/datasets/` is baked into the binary
//! at compile time via [`include_str!`].

use van311_dataset_models::DatasetKind;

use crate::dataset_def::{DatasetDefinition, parse_dataset_toml};

/// TOML configs embedded at compile time.
const DATASET_TOMLS: &[(&str, &str)] = &[
    (
        "service_requests",
        include_str!("../datasets/service_requests.toml"),
    ),
    ("inquiry_volume", include_str!("../datasets/inquiry_volume.toml")),
    ("contact_centre", include_str!("../datasets/contact_centre.toml")),
];

/// Returns all dataset definitions, parsed from embedded TOML.
///
/// # Panics
///
/// Panics if any TOML config is malformed (the configs are embedded, so
/// this indicates a development error caught by the tests below).
#[must_use]
pub fn all_definitions() -> Vec<DatasetDefinition> {
    DATASET_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_dataset_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Returns the definition of one dataset.
///
/// # Panics
///
/// Panics if the embedded registry has no definition for `kind`.
#[must_use]
pub fn definition(kind: DatasetKind) -> DatasetDefinition {
    all_definitions()
        .into_iter()
        .find(|d| d.id == kind)
        .unwrap_or_else(|| panic!("No embedded dataset definition for {kind}"))
}
