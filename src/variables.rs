//! Logical variable catalog and vintage resolution
//!
//! Survey variable codes change across datasets and years (the 2010
//! decennial publishes total population as `P001001`, the ACS as
//! `B01003_001E`). The catalog maps stable logical names to the machine
//! code a given dataset/year actually publishes, and carries the value
//! type and combination rule the aggregation engine needs.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Statistical type of a variable's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Count,
    Percent,
    Median,
    Currency,
    Ratio,
}

/// How contributions combine across source units.
///
/// The margin-of-error side of each rule follows the standard ACS
/// handbook formulas; see `aggregate::rules`.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinationRule {
    /// Weighted sum of estimates; margins combine root-sum-of-squares.
    Sum,
    /// Recomputed from the combined numerator and denominator counts.
    /// Averaging already-computed percentages across unequal-sized units
    /// is the pitfall this rule exists to avoid.
    Ratio {
        numerator: String,
        denominator: String,
        /// 100.0 for percents, 1.0 for plain ratios.
        scale: f64,
    },
    /// Weighted linear interpolation across the contribution
    /// distribution. Inherently approximate; results are flagged.
    Median,
}

/// Machine codes for one dataset over an inclusive year span.
#[derive(Debug, Clone)]
pub struct Vintage {
    pub dataset: String,
    pub first_year: u16,
    pub last_year: u16,
    pub code: String,
    pub moe_code: Option<String>,
}

impl Vintage {
    pub fn new(
        dataset: impl Into<String>,
        first_year: u16,
        last_year: u16,
        code: impl Into<String>,
        moe_code: Option<&str>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            first_year,
            last_year,
            code: code.into(),
            moe_code: moe_code.map(str::to_string),
        }
    }

    fn covers(&self, dataset: &str, year: u16) -> bool {
        self.dataset == dataset && (self.first_year..=self.last_year).contains(&year)
    }
}

/// A logical variable and every vintage that publishes it.
///
/// Derived ratio variables carry no vintages of their own; they resolve
/// through their numerator and denominator.
#[derive(Debug, Clone)]
pub struct VariableDef {
    pub name: String,
    pub value_type: ValueType,
    pub combination: CombinationRule,
    pub vintages: Vec<Vintage>,
}

/// A variable pinned to the machine codes of a specific dataset/year.
#[derive(Debug, Clone)]
pub struct ResolvedVariable {
    pub logical: String,
    pub code: String,
    pub moe_code: Option<String>,
    pub value_type: ValueType,
    pub combination: CombinationRule,
}

/// Registry of variable definitions.
pub struct VariableCatalog {
    defs: HashMap<String, VariableDef>,
}

impl VariableCatalog {
    pub fn new() -> Self {
        Self {
            defs: HashMap::new(),
        }
    }

    /// Catalog seeded with commonly requested ACS/decennial variables.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        catalog.register(VariableDef {
            name: "total_population".to_string(),
            value_type: ValueType::Count,
            combination: CombinationRule::Sum,
            vintages: vec![
                Vintage::new("acs/acs5", 2009, 2023, "B01003_001E", Some("B01003_001M")),
                // Decennial counts carry no sampling error, hence no MoE field.
                Vintage::new("dec/sf1", 2010, 2010, "P001001", None),
            ],
        });

        catalog.register(VariableDef {
            name: "households".to_string(),
            value_type: ValueType::Count,
            combination: CombinationRule::Sum,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2009,
                2023,
                "B11001_001E",
                Some("B11001_001M"),
            )],
        });

        catalog.register(VariableDef {
            name: "median_household_income".to_string(),
            value_type: ValueType::Currency,
            combination: CombinationRule::Median,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2009,
                2023,
                "B19013_001E",
                Some("B19013_001M"),
            )],
        });

        catalog.register(VariableDef {
            name: "median_age".to_string(),
            value_type: ValueType::Median,
            combination: CombinationRule::Median,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2009,
                2023,
                "B01002_001E",
                Some("B01002_001M"),
            )],
        });

        catalog.register(VariableDef {
            name: "aggregate_income".to_string(),
            value_type: ValueType::Currency,
            combination: CombinationRule::Sum,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2009,
                2023,
                "B19313_001E",
                Some("B19313_001M"),
            )],
        });

        catalog.register(VariableDef {
            name: "per_capita_income".to_string(),
            value_type: ValueType::Ratio,
            combination: CombinationRule::Ratio {
                numerator: "aggregate_income".to_string(),
                denominator: "total_population".to_string(),
                scale: 1.0,
            },
            vintages: Vec::new(),
        });

        catalog.register(VariableDef {
            name: "labor_force".to_string(),
            value_type: ValueType::Count,
            combination: CombinationRule::Sum,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2011,
                2023,
                "B23025_002E",
                Some("B23025_002M"),
            )],
        });

        catalog.register(VariableDef {
            name: "unemployed".to_string(),
            value_type: ValueType::Count,
            combination: CombinationRule::Sum,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2011,
                2023,
                "B23025_005E",
                Some("B23025_005M"),
            )],
        });

        catalog.register(VariableDef {
            name: "unemployment_rate".to_string(),
            value_type: ValueType::Percent,
            combination: CombinationRule::Ratio {
                numerator: "unemployed".to_string(),
                denominator: "labor_force".to_string(),
                scale: 100.0,
            },
            vintages: Vec::new(),
        });

        catalog.register(VariableDef {
            name: "poverty_universe".to_string(),
            value_type: ValueType::Count,
            combination: CombinationRule::Sum,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2009,
                2023,
                "B17001_001E",
                Some("B17001_001M"),
            )],
        });

        catalog.register(VariableDef {
            name: "below_poverty".to_string(),
            value_type: ValueType::Count,
            combination: CombinationRule::Sum,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2009,
                2023,
                "B17001_002E",
                Some("B17001_002M"),
            )],
        });

        catalog.register(VariableDef {
            name: "poverty_rate".to_string(),
            value_type: ValueType::Percent,
            combination: CombinationRule::Ratio {
                numerator: "below_poverty".to_string(),
                denominator: "poverty_universe".to_string(),
                scale: 100.0,
            },
            vintages: Vec::new(),
        });

        catalog
    }

    /// Register or replace a definition.
    pub fn register(&mut self, def: VariableDef) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&VariableDef> {
        self.defs.get(name)
    }

    /// Pin a logical variable to the machine code a dataset/year
    /// publishes. Fails with [`Error::UnknownVariable`] when no vintage
    /// covers the combination; recoverable in non-strict runs.
    pub fn resolve(&self, name: &str, dataset: &str, year: u16) -> Result<ResolvedVariable> {
        let def = self
            .defs
            .get(name)
            .ok_or_else(|| Error::UnknownVariable {
                name: name.to_string(),
                dataset: dataset.to_string(),
                year,
            })?;

        let vintage = def
            .vintages
            .iter()
            .find(|v| v.covers(dataset, year))
            .ok_or_else(|| Error::UnknownVariable {
                name: name.to_string(),
                dataset: dataset.to_string(),
                year,
            })?;

        Ok(ResolvedVariable {
            logical: def.name.clone(),
            code: vintage.code.clone(),
            moe_code: vintage.moe_code.clone(),
            value_type: def.value_type,
            combination: def.combination.clone(),
        })
    }
}

impl Default for VariableCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_acs_vintage() {
        let catalog = VariableCatalog::builtin();

        let resolved = catalog.resolve("total_population", "acs/acs5", 2019).unwrap();
        assert_eq!(resolved.code, "B01003_001E");
        assert_eq!(resolved.moe_code.as_deref(), Some("B01003_001M"));
        assert_eq!(resolved.value_type, ValueType::Count);
    }

    #[test]
    fn test_code_changes_across_vintages() {
        let catalog = VariableCatalog::builtin();

        let decennial = catalog.resolve("total_population", "dec/sf1", 2010).unwrap();
        assert_eq!(decennial.code, "P001001");
        assert!(decennial.moe_code.is_none());

        let acs = catalog.resolve("total_population", "acs/acs5", 2010).unwrap();
        assert_ne!(decennial.code, acs.code);
    }

    #[test]
    fn test_unresolvable_year_is_unknown_variable() {
        let catalog = VariableCatalog::builtin();

        // B23025 only exists from 2011 onward.
        let err = catalog.resolve("labor_force", "acs/acs5", 2009).unwrap_err();
        assert!(matches!(err, Error::UnknownVariable { year: 2009, .. }));
    }

    #[test]
    fn test_unknown_name() {
        let catalog = VariableCatalog::builtin();
        let err = catalog.resolve("no_such_thing", "acs/acs5", 2019).unwrap_err();
        assert!(matches!(err, Error::UnknownVariable { .. }));
    }

    #[test]
    fn test_register_custom_variable() {
        let mut catalog = VariableCatalog::new();
        catalog.register(VariableDef {
            name: "renter_households".to_string(),
            value_type: ValueType::Count,
            combination: CombinationRule::Sum,
            vintages: vec![Vintage::new(
                "acs/acs5",
                2015,
                2023,
                "B25003_003E",
                Some("B25003_003M"),
            )],
        });

        assert!(catalog.resolve("renter_households", "acs/acs5", 2020).is_ok());
        assert!(catalog.resolve("renter_households", "acs/acs5", 2014).is_err());
    }
}
